//! Access binding: scope storage reads to one CDN distribution
//!
//! Binding is a single-writer critical section per storage resource:
//!
//! 1. Request full public-access blocking and read the toggles back
//! 2. Generate the whole policy document for the current distribution
//! 3. Validate it (no public principal, read-only actions) and verify it with
//!    the policy engine
//! 4. Compare-and-swap it against the stored policy revision, re-reading and
//!    retrying on conflict
//!
//! The document is regenerated on every run, so no statement referencing a
//! previous distribution identifier survives a rebinding.

use crate::core::backend::{ObjectStorage, PublicAccessBlock, StoredPolicy};
use crate::core::iam::{
    Caller, ConditionBlock, ConditionOperator, Effect, Policy, PolicyEngine, Principal, Request,
    Statement, ValueList,
};
use crate::core::target::StorageTarget;
use crate::core::validation::DistributionId;
use crate::error::{BindError, PrecheckError, StorageError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Statement id of the generated grant
pub const GRANT_SID: &str = "AllowCdnReadOnly";

/// Action granted to the CDN
pub const GRANT_ACTION: &str = "s3:GetObject";

/// Default CDN service principal
pub const DEFAULT_PRINCIPAL_SERVICE: &str = "cloudfront.amazonaws.com";

/// Default request-context key carrying the originating distribution
///
/// Storage fills it with the full distribution ARN, so bindings made with
/// this key need an ARN, not a bare distribution id.
pub const DEFAULT_CONDITION_KEY: &str = "AWS:SourceArn";

/// Default number of conditional write attempts
pub const DEFAULT_POLICY_WRITE_ATTEMPTS: u32 = 5;

/// Binder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    /// Service principal trusted to read
    pub principal_service: String,
    /// Request-context key compared against the distribution identifier
    pub condition_key: String,
    /// Conditional write attempts before giving up
    pub policy_write_attempts: u32,
}

impl BinderConfig {
    /// Whether the condition key carries an ARN
    pub fn expects_arn(&self) -> bool {
        self.condition_key.eq_ignore_ascii_case(DEFAULT_CONDITION_KEY)
    }
}

impl Default for BinderConfig {
    fn default() -> Self {
        BinderConfig {
            principal_service: DEFAULT_PRINCIPAL_SERVICE.to_string(),
            condition_key: DEFAULT_CONDITION_KEY.to_string(),
            policy_write_attempts: DEFAULT_POLICY_WRITE_ATTEMPTS,
        }
    }
}

/// The active read grant of a storage target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Resource pattern covering every object under the prefix
    pub resource_pattern: String,
    /// Allowed actions (read-only)
    pub actions: Vec<String>,
    /// Trusted service principal
    pub principal: String,
    /// Request-context key of the binding condition
    pub condition_key: String,
    /// Distribution identifier the condition requires
    pub distribution_id: String,
    /// Policy revision after binding
    pub revision: String,
    /// Whether this binding wrote a new document
    pub changed: bool,
}

/// In-process locks, one per storage resource
#[derive(Debug, Default)]
pub struct BindingLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BindingLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding `resource`
    pub fn for_resource(&self, resource: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Issues and writes distribution-scoped access policies
#[derive(Clone)]
pub struct AccessBinder {
    storage: Arc<dyn ObjectStorage>,
    config: BinderConfig,
    locks: Arc<BindingLocks>,
}

impl AccessBinder {
    /// Create a binder with its own lock table
    pub fn new(storage: Arc<dyn ObjectStorage>, config: BinderConfig) -> Self {
        AccessBinder {
            storage,
            config,
            locks: Arc::new(BindingLocks::new()),
        }
    }

    /// Share a lock table with other binders in this process
    pub fn with_locks(mut self, locks: Arc<BindingLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Binder settings
    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    /// Bind read access on `target` to `distribution`
    pub fn bind(
        &self,
        target: &StorageTarget,
        distribution: &DistributionId,
    ) -> Result<AccessGrant, BindError> {
        if self.config.expects_arn() && !distribution.is_arn() {
            warn!(
                "{} is not a distribution ARN; requests carry an ARN in {} and will not match",
                distribution, self.config.condition_key
            );
        }

        let lock = self.locks.for_resource(target.resource());
        let _guard = lock.lock();

        self.ensure_public_access_blocked()?;

        let policy = self.grant_policy(target, distribution);
        validate_grant(&policy)?;
        self.verify_grant(&policy, target, distribution)?;
        let document = policy.to_json()?;

        let attempts = self.config.policy_write_attempts.max(1);
        for attempt in 1..=attempts {
            let current = self.storage.policy().map_err(BindError::ReadPolicy)?;

            if let Some(stored) = &current {
                if stored_matches(stored, &policy) {
                    info!(
                        "Policy for {} already bound to {} (revision {})",
                        target.resource(),
                        distribution,
                        stored.revision
                    );
                    return Ok(self.grant(target, distribution, stored.revision.clone(), false));
                }
            }

            let expected = current.as_ref().map(|p| p.revision.as_str());
            match self.storage.put_policy(&document, expected) {
                Ok(revision) => {
                    info!(
                        "Bound {} to distribution {} (revision {})",
                        target.resource_pattern(),
                        distribution,
                        revision
                    );
                    return Ok(self.grant(target, distribution, revision, true));
                }
                Err(StorageError::Conflict { expected, actual }) => {
                    warn!(
                        "Policy write conflict on attempt {}/{} (expected {:?}, found {:?})",
                        attempt, attempts, expected, actual
                    );
                }
                Err(err) => return Err(BindError::WritePolicy(err)),
            }
        }

        Err(BindError::ConflictRetriesExhausted { attempts })
    }

    /// The complete policy document for `target` and `distribution`
    pub fn grant_policy(&self, target: &StorageTarget, distribution: &DistributionId) -> Policy {
        build_grant_policy(&self.config, target, distribution)
    }

    /// Request full blocking, then confirm every toggle actually blocks
    fn ensure_public_access_blocked(&self) -> Result<(), PrecheckError> {
        self.storage
            .set_public_access_block(PublicAccessBlock::all_blocked())
            .map_err(PrecheckError::Enable)?;

        let block = self
            .storage
            .public_access_block()
            .map_err(PrecheckError::Read)?;

        let open = block.open_toggles();
        if !open.is_empty() {
            return Err(PrecheckError::NotBlocked(open.join(", ")));
        }
        debug!("Public access fully blocked");
        Ok(())
    }

    /// The grant must admit the bound distribution and nothing else
    fn verify_grant(
        &self,
        policy: &Policy,
        target: &StorageTarget,
        distribution: &DistributionId,
    ) -> Result<(), BindError> {
        let engine = PolicyEngine::new();
        let cdn = Caller::Service(self.config.principal_service.clone());
        let resource = target.object_resource(&target.object_key("index.html"));
        let key = self.config.condition_key.as_str();

        let bound = Request::new(cdn.clone(), GRANT_ACTION, resource.as_str())
            .with_context(key, distribution.as_str());
        if !engine.is_allowed(policy, &bound) {
            return Err(BindError::Verification(format!(
                "distribution {} cannot read {}",
                distribution, resource
            )));
        }

        let probes = [
            Request::new(cdn.clone(), GRANT_ACTION, resource.as_str())
                .with_context(key, format!("{}-other", distribution)),
            Request::new(cdn.clone(), GRANT_ACTION, resource.as_str()),
            Request::new(cdn, "s3:PutObject", resource.as_str())
                .with_context(key, distribution.as_str()),
            Request::new(Caller::Anonymous, GRANT_ACTION, resource.as_str())
                .with_context(key, distribution.as_str()),
        ];
        if let Some(leak) = probes.iter().find(|r| engine.is_allowed(policy, r)) {
            return Err(BindError::Verification(format!(
                "{:?} {} on {} is allowed",
                leak.caller, leak.action, leak.resource
            )));
        }
        Ok(())
    }

    fn grant(
        &self,
        target: &StorageTarget,
        distribution: &DistributionId,
        revision: String,
        changed: bool,
    ) -> AccessGrant {
        AccessGrant {
            resource_pattern: target.resource_pattern(),
            actions: vec![GRANT_ACTION.to_string()],
            principal: self.config.principal_service.clone(),
            condition_key: self.config.condition_key.clone(),
            distribution_id: distribution.as_str().to_string(),
            revision,
            changed,
        }
    }
}

/// Policy granting `config.principal_service` read access to every object
/// under `target`, conditioned on `distribution`
pub fn build_grant_policy(
    config: &BinderConfig,
    target: &StorageTarget,
    distribution: &DistributionId,
) -> Policy {
    let mut condition = ConditionBlock::new();
    condition
        .entry(ConditionOperator::StringEquals)
        .or_default()
        .insert(
            config.condition_key.clone(),
            ValueList::from(distribution.as_str()),
        );

    let mut policy = Policy::new();
    policy.add_statement(
        Statement::new(Effect::Allow, GRANT_ACTION, target.resource_pattern().as_str())
            .with_sid(GRANT_SID)
            .with_principal(Principal::service(&config.principal_service))
            .with_condition(condition),
    );
    policy
}

/// Reject documents naming a public principal or granting non-read actions
pub fn validate_grant(policy: &Policy) -> Result<(), PrecheckError> {
    for (i, statement) in policy.statement.iter().enumerate() {
        let sid = statement.sid.clone().unwrap_or_else(|| format!("#{}", i));

        let public = statement
            .principal
            .as_ref()
            .map_or(true, Principal::is_public);
        if public {
            return Err(PrecheckError::PublicPrincipal(sid));
        }

        if let Some(action) = statement.non_read_actions().first() {
            return Err(PrecheckError::NonReadAction {
                sid,
                action: action.to_string(),
            });
        }
    }
    Ok(())
}

fn stored_matches(stored: &StoredPolicy, policy: &Policy) -> bool {
    Policy::from_json(&stored.document).map_or(false, |existing| existing == *policy)
}
