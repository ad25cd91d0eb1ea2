//! Publish orchestration
//!
//! A publish run is a strictly forward state machine:
//!
//! ```text
//! Idle -> Scanning -> Resolving -> Planning -> Applying -> Binding -> Invalidating -> Done
//! ```
//!
//! with a terminal `Failed` reachable from every non-terminal state. Every
//! visited state is recorded in the [`PublishResult`].
//!
//! Apply tolerates partial failure: a failed or cancelled upload is recorded
//! and the rest continue. The run fails only when no mutating action of a
//! non-empty plan succeeds, or on a fatal scan, config, plan or binding
//! error. Invalidation is best-effort.
//!
//! Error routes and the distribution identifier are checked while `Idle`,
//! before the tree is read.

use crate::core::asset::{load_assets, Fingerprint};
use crate::core::backend::{CdnService, ObjectStorage, PutObject, RemoteObject};
use crate::core::binder::{AccessBinder, AccessGrant, BindingLocks};
use crate::core::config::PublisherConfig;
use crate::core::content_type::ContentTypeResolver;
use crate::core::plan::{ActionKind, ObjectSyncPlanner, PruneCandidate, SyncAction, SyncPlan};
use crate::core::pool::{run_bounded, CancellationToken, TaskOutcome};
use crate::core::retry::RetryPolicy;
use crate::core::routing::{CustomErrorResponse, ErrorRoute, ErrorRoutingTable};
use crate::core::scan::{FileSetScanner, IgnorePredicate};
use crate::core::target::StorageTarget;
use crate::core::validation::DistributionId;
use crate::error::{ApplyError, ConfigError, PublishError, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Publish run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishState {
    Idle,
    Scanning,
    Resolving,
    Planning,
    Applying,
    Binding,
    Invalidating,
    Done,
    Failed,
}

impl PublishState {
    /// Whether no transition leaves this state
    pub fn is_terminal(self) -> bool {
        matches!(self, PublishState::Done | PublishState::Failed)
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened to one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ObjectOutcome {
    Created,
    Updated,
    Skipped,
    Failed { error: String },
    Cancelled,
}

/// Per-object report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReport {
    /// Remote key
    pub key: String,
    /// Planned action
    pub action: ActionKind,
    /// Result of applying it
    pub outcome: ObjectOutcome,
    /// Upload attempts made (0 for skipped or cancelled objects)
    pub attempts: u32,
    pub fingerprint: Fingerprint,
    pub content_type: String,
}

/// Non-fatal invalidation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationWarning {
    pub paths: Vec<String>,
    pub message: String,
}

/// Outcome of one publish run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Per-object reports in asset order
    pub objects: Vec<ObjectReport>,
    /// Remote objects with no local counterpart (never deleted by publish)
    pub prune_candidates: Vec<PruneCandidate>,
    /// Active grant after binding
    pub grant: Option<AccessGrant>,
    pub error_routes: Vec<ErrorRoute>,
    pub custom_error_responses: Vec<CustomErrorResponse>,
    pub warnings: Vec<InvalidationWarning>,
    pub invalidation_id: Option<String>,
    /// Visited states, in order
    pub states: Vec<PublishState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PublishResult {
    fn new() -> Self {
        PublishResult {
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            cancelled: 0,
            objects: Vec::new(),
            prune_candidates: Vec::new(),
            grant: None,
            error_routes: Vec::new(),
            custom_error_responses: Vec::new(),
            warnings: Vec::new(),
            invalidation_id: None,
            states: vec![PublishState::Idle],
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// `(created, updated, skipped)`
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.created, self.updated, self.skipped)
    }

    /// Reports of objects that failed to upload
    pub fn failures(&self) -> impl Iterator<Item = &ObjectReport> {
        self.objects
            .iter()
            .filter(|r| matches!(r.outcome, ObjectOutcome::Failed { .. }))
    }

    /// Keys created or updated in this run
    pub fn changed_keys(&self) -> Vec<&str> {
        self.objects
            .iter()
            .filter(|r| matches!(r.outcome, ObjectOutcome::Created | ObjectOutcome::Updated))
            .map(|r| r.key.as_str())
            .collect()
    }

    /// Last visited state
    pub fn final_state(&self) -> PublishState {
        self.states.last().copied().unwrap_or(PublishState::Idle)
    }

    fn record(&mut self, report: ObjectReport) {
        match report.outcome {
            ObjectOutcome::Created => self.created += 1,
            ObjectOutcome::Updated => self.updated += 1,
            ObjectOutcome::Skipped => self.skipped += 1,
            ObjectOutcome::Failed { .. } => self.failed += 1,
            ObjectOutcome::Cancelled => self.cancelled += 1,
        }
        self.objects.push(report);
    }
}

/// Fatal publish error with the state it occurred in and the partial result
#[derive(Error, Debug)]
#[error("Publish failed during {state}: {error}")]
pub struct PublishFailure {
    pub state: PublishState,
    #[source]
    pub error: PublishError,
    pub result: Box<PublishResult>,
}

/// Bookkeeping for one run
struct Run {
    state: PublishState,
    result: PublishResult,
}

impl Run {
    fn start() -> Self {
        Run {
            state: PublishState::Idle,
            result: PublishResult::new(),
        }
    }

    fn enter(&mut self, state: PublishState) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
        self.result.states.push(state);
    }

    fn check<T, E>(&mut self, result: Result<T, E>) -> Result<T, PublishFailure>
    where
        E: Into<PublishError>,
    {
        result.map_err(|err| self.fail(err.into()))
    }

    fn fail(&mut self, error: PublishError) -> PublishFailure {
        error!("Publish failed during {}: {}", self.state, error);
        self.result.states.push(PublishState::Failed);
        self.result.finished_at = Some(Utc::now());
        PublishFailure {
            state: self.state,
            error,
            result: Box::new(self.result.clone()),
        }
    }

    fn finish(mut self) -> PublishResult {
        self.enter(PublishState::Done);
        self.result.finished_at = Some(Utc::now());
        self.result
    }
}

/// Publishes a local tree and binds read access to a CDN distribution
pub struct Publisher {
    storage: Arc<dyn ObjectStorage>,
    cdn: Arc<dyn CdnService>,
    config: PublisherConfig,
    resolver: ContentTypeResolver,
    ignore: Option<IgnorePredicate>,
    retry: RetryPolicy,
    binder: AccessBinder,
}

impl Publisher {
    /// Create a publisher with the default configuration
    pub fn new(storage: Arc<dyn ObjectStorage>, cdn: Arc<dyn CdnService>) -> Self {
        let config = PublisherConfig::default();
        Publisher {
            resolver: ContentTypeResolver::new(),
            ignore: None,
            retry: config.retry_policy(),
            binder: AccessBinder::new(storage.clone(), config.binding.clone()),
            storage,
            cdn,
            config,
        }
    }

    /// Create a publisher from a checked configuration
    pub fn with_config(
        storage: Arc<dyn ObjectStorage>,
        cdn: Arc<dyn CdnService>,
        config: PublisherConfig,
    ) -> Result<Self, ConfigError> {
        config.check()?;
        Ok(Publisher {
            resolver: config.resolver()?,
            ignore: config.ignore_predicate()?,
            retry: config.retry_policy(),
            binder: AccessBinder::new(storage.clone(), config.binding.clone()),
            storage,
            cdn,
            config,
        })
    }

    /// Share per-resource binding locks with other publishers
    pub fn with_binding_locks(mut self, locks: Arc<BindingLocks>) -> Self {
        self.binder = self.binder.with_locks(locks);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Publish `root` into `target` and bind read access to `distribution_id`
    pub fn publish(
        &self,
        root: impl AsRef<Path>,
        target: &StorageTarget,
        distribution_id: &str,
        routes: &[ErrorRoute],
    ) -> Result<PublishResult, PublishFailure> {
        let cancel = CancellationToken::new();
        self.publish_cancellable(root, target, distribution_id, routes, &cancel)
    }

    /// Like [`publish`](Self::publish), observing `cancel` during Applying
    ///
    /// Once `cancel` is set no new upload starts; uploads in flight finish.
    /// Objects never started are reported as cancelled and the run goes on
    /// to bind as long as at least one upload succeeded.
    pub fn publish_cancellable(
        &self,
        root: impl AsRef<Path>,
        target: &StorageTarget,
        distribution_id: &str,
        routes: &[ErrorRoute],
        cancel: &CancellationToken,
    ) -> Result<PublishResult, PublishFailure> {
        let run = Run::start();
        self.run(root.as_ref(), target, distribution_id, routes, cancel, run)
    }

    /// Like [`publish`](Self::publish), asking the CDN for its identifier first
    pub fn publish_current(
        &self,
        root: impl AsRef<Path>,
        target: &StorageTarget,
        routes: &[ErrorRoute],
    ) -> Result<PublishResult, PublishFailure> {
        let mut run = Run::start();
        let distribution_id = run.check(self.cdn.distribution_id())?;
        info!("CDN reports distribution {}", distribution_id);
        let cancel = CancellationToken::new();
        self.run(root.as_ref(), target, &distribution_id, routes, &cancel, run)
    }

    /// Dry run: scan, resolve and plan without writing anything
    pub fn plan(
        &self,
        root: impl AsRef<Path>,
        target: &StorageTarget,
    ) -> Result<SyncPlan, PublishError> {
        let root = root.as_ref();
        let paths = self.scanner(root).scan()?;
        let assets = load_assets(root, &paths, &self.resolver, self.config.resolve_workers)?;
        Ok(ObjectSyncPlanner::new(self.storage.as_ref()).plan(&assets, target)?)
    }

    /// Delete prune candidates; returns the keys actually removed
    ///
    /// Candidates outside the target prefix are refused. Objects already
    /// gone are not an error.
    pub fn prune(
        &self,
        target: &StorageTarget,
        candidates: &[PruneCandidate],
    ) -> Result<Vec<String>, PublishError> {
        let mut deleted = Vec::new();
        for candidate in candidates {
            let key = candidate.key();
            if target.relative_key(key).is_none() {
                return Err(PublishError::Prune {
                    key: key.to_string(),
                    source: StorageError::InvalidKey(format!(
                        "outside target prefix '{}'",
                        target.prefix()
                    )),
                });
            }

            match self.storage.delete(key) {
                Ok(()) => {
                    info!("Pruned {}", key);
                    deleted.push(key.to_string());
                }
                Err(StorageError::NoSuchKey(_)) => debug!("{} already gone", key),
                Err(source) => {
                    return Err(PublishError::Prune {
                        key: key.to_string(),
                        source,
                    })
                }
            }
        }
        Ok(deleted)
    }

    fn scanner(&self, root: &Path) -> FileSetScanner {
        let scanner = FileSetScanner::new(root);
        match &self.ignore {
            Some(predicate) => scanner.with_ignore_predicate(predicate.clone()),
            None => scanner,
        }
    }

    fn run(
        &self,
        root: &Path,
        target: &StorageTarget,
        distribution_id: &str,
        routes: &[ErrorRoute],
        cancel: &CancellationToken,
        mut run: Run,
    ) -> Result<PublishResult, PublishFailure> {
        info!(
            "Publishing {} to {} for distribution {}",
            root.display(),
            target.resource_pattern(),
            distribution_id
        );

        run.check(ErrorRoutingTable::check(routes))?;
        let distribution = run.check(DistributionId::new(distribution_id))?;

        run.enter(PublishState::Scanning);
        let paths = run.check(self.scanner(root).scan())?;

        run.enter(PublishState::Resolving);
        let assets = run.check(load_assets(
            root,
            &paths,
            &self.resolver,
            self.config.resolve_workers,
        ))?;
        let table = run.check(ErrorRoutingTable::new(routes, &assets))?;
        run.result.error_routes = table.routes().cloned().collect();
        run.result.custom_error_responses = table.custom_error_responses();
        info!("Resolved {} assets ({} bytes)", assets.len(), assets.total_size());

        run.enter(PublishState::Planning);
        let planner = ObjectSyncPlanner::new(self.storage.as_ref());
        let plan = run.check(planner.plan(&assets, target))?;
        run.result.prune_candidates = plan.prune_candidates().to_vec();

        run.enter(PublishState::Applying);
        let applied = self.apply(&plan, target, cancel, &mut run.result);
        run.check(applied)?;
        info!(
            "Applied: {} created, {} updated, {} skipped, {} failed, {} cancelled",
            run.result.created,
            run.result.updated,
            run.result.skipped,
            run.result.failed,
            run.result.cancelled
        );

        run.enter(PublishState::Binding);
        let grant = run.check(self.binder.bind(target, &distribution))?;
        run.result.grant = Some(grant);

        run.enter(PublishState::Invalidating);
        self.invalidate(&mut run.result);

        let result = run.finish();
        info!("Publish complete");
        Ok(result)
    }

    fn apply(
        &self,
        plan: &SyncPlan,
        target: &StorageTarget,
        cancel: &CancellationToken,
        result: &mut PublishResult,
    ) -> Result<(), PublishError> {
        let mutating: Vec<&SyncAction> = plan.mutating().collect();
        let outcomes = run_bounded(
            &mutating,
            self.config.max_concurrent_uploads,
            Some(cancel),
            |action| self.upload(action, target),
        );
        let mut outcomes = outcomes.into_iter();

        for action in plan.actions() {
            let asset = action.asset();
            let key = target.object_key(asset.path());

            let (outcome, attempts) = if !action.is_mutating() {
                (ObjectOutcome::Skipped, 0)
            } else {
                match outcomes.next() {
                    Some(TaskOutcome::Completed((Ok(_), attempts))) => match action.kind() {
                        ActionKind::Create => (ObjectOutcome::Created, attempts),
                        _ => (ObjectOutcome::Updated, attempts),
                    },
                    Some(TaskOutcome::Completed((Err(err), attempts))) => {
                        warn!("Upload of {} failed after {} attempts: {}", key, attempts, err);
                        (
                            ObjectOutcome::Failed {
                                error: err.to_string(),
                            },
                            attempts,
                        )
                    }
                    Some(TaskOutcome::NotStarted) | None => (ObjectOutcome::Cancelled, 0),
                }
            };

            result.record(ObjectReport {
                key,
                action: action.kind(),
                outcome,
                attempts,
                fingerprint: asset.fingerprint().clone(),
                content_type: asset.content_type().to_string(),
            });
        }

        if result.cancelled > 0 {
            warn!("Cancelled: {} uploads not started", result.cancelled);
        }

        let attempted = mutating.len();
        if attempted > 0 && result.created + result.updated == 0 {
            if result.cancelled > 0 {
                return Err(PublishError::Cancelled {
                    not_started: result.cancelled,
                });
            }
            return Err(PublishError::ApplyFailed { attempted });
        }
        Ok(())
    }

    fn upload(
        &self,
        action: &SyncAction,
        target: &StorageTarget,
    ) -> (Result<RemoteObject, ApplyError>, u32) {
        let asset = action.asset();
        let key = target.object_key(asset.path());
        let request = PutObject {
            key: &key,
            body: asset.content(),
            content_type: asset.content_type(),
            fingerprint: asset.fingerprint(),
        };

        let (result, attempts) = self.retry.run(&key, || self.storage.put(request));
        let result = match result {
            Ok(remote) if remote.fingerprint.as_ref() == Some(asset.fingerprint()) => {
                debug!("Uploaded {} ({})", key, asset.fingerprint().short());
                Ok(remote)
            }
            Ok(remote) => Err(ApplyError::FingerprintMismatch {
                expected: asset.fingerprint().to_string(),
                actual: remote
                    .fingerprint
                    .map(|fp| fp.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            }),
            Err(source) if source.is_throttled() => {
                Err(ApplyError::RetriesExhausted { attempts, source })
            }
            Err(err) => Err(ApplyError::Storage(err)),
        };
        (result, attempts)
    }

    fn invalidate(&self, result: &mut PublishResult) {
        let mut paths: Vec<String> = result
            .changed_keys()
            .into_iter()
            .map(|key| format!("/{}", key))
            .collect();
        if paths.is_empty() {
            debug!("Nothing changed, skipping invalidation");
            return;
        }
        paths.sort();

        match self.cdn.invalidate(&paths) {
            Ok(id) => {
                info!("Invalidation {} requested for {} paths", id, paths.len());
                result.invalidation_id = Some(id);
            }
            Err(err) => {
                warn!("Invalidation failed: {}", err);
                result.warnings.push(InvalidationWarning {
                    paths,
                    message: err.to_string(),
                });
            }
        }
    }
}
