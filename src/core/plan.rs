//! Object sync planning
//!
//! Computes, per asset, whether the remote object must be created, updated
//! or left alone. The decision is a pure function of two snapshots: the
//! local asset set and the remote listing. Change detection compares content
//! fingerprints and content types; timestamps and sizes are never consulted.
//!
//! Remote objects with no matching asset are reported as prune candidates
//! and are never deleted by planning or applying.

use crate::core::asset::{Asset, AssetSet};
use crate::core::backend::{ObjectStorage, RemoteObject};
use crate::core::target::StorageTarget;
use crate::error::PlanError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Kind of a sync action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Skip,
}

/// Why an existing object needs re-uploading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    /// Stored fingerprint differs from the local content
    FingerprintChanged,
    /// Object has no recorded fingerprint
    FingerprintMissing,
    /// Stored content type differs from the resolved one
    ContentTypeChanged,
}

/// One planned step for one asset
#[derive(Debug, Clone)]
pub enum SyncAction {
    /// No remote object shares the key
    Create(Asset),
    /// Remote object exists but differs
    Update(Asset, RemoteObject),
    /// Remote object already matches
    Skip(Asset, RemoteObject),
}

impl SyncAction {
    /// Asset this action applies to
    pub fn asset(&self) -> &Asset {
        match self {
            SyncAction::Create(asset)
            | SyncAction::Update(asset, _)
            | SyncAction::Skip(asset, _) => asset,
        }
    }

    /// Existing remote object, if any
    pub fn remote(&self) -> Option<&RemoteObject> {
        match self {
            SyncAction::Create(_) => None,
            SyncAction::Update(_, remote) | SyncAction::Skip(_, remote) => Some(remote),
        }
    }

    /// Kind of this action
    pub fn kind(&self) -> ActionKind {
        match self {
            SyncAction::Create(_) => ActionKind::Create,
            SyncAction::Update(..) => ActionKind::Update,
            SyncAction::Skip(..) => ActionKind::Skip,
        }
    }

    /// Whether applying this action writes to storage
    pub fn is_mutating(&self) -> bool {
        !matches!(self, SyncAction::Skip(..))
    }
}

/// Remote object with no local counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneCandidate {
    pub object: RemoteObject,
}

impl PruneCandidate {
    /// Remote key
    pub fn key(&self) -> &str {
        &self.object.key
    }
}

/// Counts per action kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub skip: usize,
    pub prune: usize,
}

/// Ordered actions (one per asset, in asset order) plus prune candidates
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    actions: Vec<SyncAction>,
    prune: Vec<PruneCandidate>,
}

impl SyncPlan {
    /// Planned actions in asset order
    pub fn actions(&self) -> &[SyncAction] {
        &self.actions
    }

    /// Remote objects with no matching asset
    pub fn prune_candidates(&self) -> &[PruneCandidate] {
        &self.prune
    }

    /// Actions that write to storage
    pub fn mutating(&self) -> impl Iterator<Item = &SyncAction> {
        self.actions.iter().filter(|a| a.is_mutating())
    }

    /// Number of actions that write to storage
    pub fn mutating_count(&self) -> usize {
        self.mutating().count()
    }

    /// Counts per kind
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            prune: self.prune.len(),
            ..PlanSummary::default()
        };
        for action in &self.actions {
            match action.kind() {
                ActionKind::Create => summary.create += 1,
                ActionKind::Update => summary.update += 1,
                ActionKind::Skip => summary.skip += 1,
            }
        }
        summary
    }

    /// Consume the plan
    pub fn into_parts(self) -> (Vec<SyncAction>, Vec<PruneCandidate>) {
        (self.actions, self.prune)
    }
}

/// Decide whether `remote` must be re-uploaded to match `asset`
pub fn update_reason(asset: &Asset, remote: &RemoteObject) -> Option<UpdateReason> {
    match &remote.fingerprint {
        None => Some(UpdateReason::FingerprintMissing),
        Some(stored) if stored != asset.fingerprint() => Some(UpdateReason::FingerprintChanged),
        Some(_) if remote.content_type != asset.content_type() => {
            Some(UpdateReason::ContentTypeChanged)
        }
        Some(_) => None,
    }
}

/// Plans sync actions against a storage collaborator
pub struct ObjectSyncPlanner<'a> {
    storage: &'a dyn ObjectStorage,
}

impl<'a> ObjectSyncPlanner<'a> {
    /// Create a planner reading remote state from `storage`
    pub fn new(storage: &'a dyn ObjectStorage) -> Self {
        ObjectSyncPlanner { storage }
    }

    /// List remote objects under the target prefix and diff against `assets`
    ///
    /// Fails closed: a listing error yields `PlanError` and no actions.
    pub fn plan(&self, assets: &AssetSet, target: &StorageTarget) -> Result<SyncPlan, PlanError> {
        let remote = self
            .storage
            .list(target.prefix())
            .map_err(|source| PlanError::Listing {
                prefix: target.prefix().to_string(),
                source,
            })?;
        debug!("Listed {} remote objects under '{}'", remote.len(), target.prefix());

        let plan = Self::compute(assets, remote, target)?;
        let summary = plan.summary();
        info!(
            "Planned {} create, {} update, {} skip, {} prune candidates",
            summary.create, summary.update, summary.skip, summary.prune
        );
        Ok(plan)
    }

    /// Pure diff of two snapshots
    ///
    /// # Examples
    ///
    /// ```
    /// use sitebinder::core::asset::{Asset, AssetSet};
    /// use sitebinder::core::plan::{ActionKind, ObjectSyncPlanner};
    /// use sitebinder::core::target::StorageTarget;
    ///
    /// let assets: AssetSet = vec![Asset::new("index.html", b"hi".to_vec(), "text/html")]
    ///     .into_iter()
    ///     .collect();
    /// let target = StorageTarget::new("bucket")?;
    /// let plan = ObjectSyncPlanner::compute(&assets, Vec::new(), &target).unwrap();
    /// assert_eq!(plan.actions()[0].kind(), ActionKind::Create);
    /// # Ok::<(), sitebinder::error::ConfigError>(())
    /// ```
    pub fn compute(
        assets: &AssetSet,
        remote: Vec<RemoteObject>,
        target: &StorageTarget,
    ) -> Result<SyncPlan, PlanError> {
        let mut by_key: HashMap<String, RemoteObject> = HashMap::with_capacity(remote.len());
        for object in remote {
            // Listings may include keys outside the prefix; those are not ours
            if target.relative_key(&object.key).is_none() {
                continue;
            }
            if by_key.contains_key(&object.key) {
                return Err(PlanError::DuplicateRemoteKey(object.key));
            }
            by_key.insert(object.key.clone(), object);
        }

        let mut actions = Vec::with_capacity(assets.len());
        for asset in assets.iter() {
            let key = target.object_key(asset.path());
            let action = match by_key.remove(&key) {
                None => SyncAction::Create(asset.clone()),
                Some(remote) => match update_reason(asset, &remote) {
                    Some(reason) => {
                        debug!("{}: update ({:?})", key, reason);
                        SyncAction::Update(asset.clone(), remote)
                    }
                    None => SyncAction::Skip(asset.clone(), remote),
                },
            };
            actions.push(action);
        }

        let mut prune: Vec<PruneCandidate> = by_key
            .into_values()
            .map(|object| PruneCandidate { object })
            .collect();
        prune.sort_by(|a, b| a.object.key.cmp(&b.object.key));

        Ok(SyncPlan { actions, prune })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::Fingerprint;
    use crate::core::backend::MemoryStorage;

    fn asset(path: &str, body: &[u8], content_type: &str) -> Asset {
        Asset::new(path, body.to_vec(), content_type)
    }

    fn remote_for(asset: &Asset, key: &str) -> RemoteObject {
        RemoteObject {
            key: key.to_string(),
            content_type: asset.content_type().to_string(),
            fingerprint: Some(asset.fingerprint().clone()),
            revision: "1".to_string(),
            size: asset.size(),
        }
    }

    fn root() -> StorageTarget {
        StorageTarget::new("arn:aws:s3:::site").unwrap()
    }

    #[test]
    fn test_create_update_skip() {
        let index = asset("index.html", b"new", "text/html");
        let logo = asset("img/logo.png", b"png", "image/png");
        let error = asset("error.html", b"oops", "text/html");
        let assets: AssetSet = vec![index.clone(), logo.clone(), error].into_iter().collect();

        let mut stale = remote_for(&index, "index.html");
        stale.fingerprint = Some(Fingerprint::of(b"old"));
        let remote = vec![stale, remote_for(&logo, "img/logo.png")];

        let plan = ObjectSyncPlanner::compute(&assets, remote, &root()).unwrap();
        let kinds: Vec<(&str, ActionKind)> = plan
            .actions()
            .iter()
            .map(|a| (a.asset().path(), a.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("error.html", ActionKind::Create),
                ("img/logo.png", ActionKind::Skip),
                ("index.html", ActionKind::Update),
            ]
        );
        assert_eq!(plan.mutating_count(), 2);
    }

    #[test]
    fn test_same_size_different_content_updates() {
        // Identical size and (conceptually) mtime; only the digest differs
        let local = asset("index.html", b"AAAA", "text/html");
        let mut remote = remote_for(&local, "index.html");
        remote.fingerprint = Some(Fingerprint::of(b"BBBB"));
        assert_eq!(remote.size, local.size());

        let assets: AssetSet = vec![local].into_iter().collect();
        let plan = ObjectSyncPlanner::compute(&assets, vec![remote], &root()).unwrap();
        assert_eq!(plan.actions()[0].kind(), ActionKind::Update);
    }

    #[test]
    fn test_content_type_change_updates() {
        let local = asset("app.js", b"x", "application/javascript");
        let mut remote = remote_for(&local, "app.js");
        remote.content_type = "application/octet-stream".to_string();
        assert_eq!(
            update_reason(&local, &remote),
            Some(UpdateReason::ContentTypeChanged)
        );
    }

    #[test]
    fn test_missing_fingerprint_updates() {
        let local = asset("a.css", b"x", "text/css");
        let mut remote = remote_for(&local, "a.css");
        remote.fingerprint = None;
        assert_eq!(
            update_reason(&local, &remote),
            Some(UpdateReason::FingerprintMissing)
        );
    }

    #[test]
    fn test_prune_candidates_reported_sorted() {
        let keep = asset("index.html", b"x", "text/html");
        let assets: AssetSet = vec![keep.clone()].into_iter().collect();
        let orphan_b = remote_for(&asset("b.html", b"b", "text/html"), "b.html");
        let orphan_a = remote_for(&asset("a.html", b"a", "text/html"), "a.html");

        let plan = ObjectSyncPlanner::compute(
            &assets,
            vec![orphan_b, remote_for(&keep, "index.html"), orphan_a],
            &root(),
        )
        .unwrap();

        let keys: Vec<&str> = plan.prune_candidates().iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["a.html", "b.html"]);
        assert_eq!(plan.summary().prune, 2);
    }

    #[test]
    fn test_prefix_mapping() {
        let target = root().with_prefix("www").unwrap();
        let local = asset("index.html", b"x", "text/html");
        let assets: AssetSet = vec![local.clone()].into_iter().collect();

        let plan = ObjectSyncPlanner::compute(
            &assets,
            vec![
                remote_for(&local, "www/index.html"),
                remote_for(&local, "index.html"),
            ],
            &target,
        )
        .unwrap();
        assert_eq!(plan.actions()[0].kind(), ActionKind::Skip);
        // Outside the prefix: neither matched nor pruned
        assert!(plan.prune_candidates().is_empty());
    }

    #[test]
    fn test_duplicate_remote_key_rejected() {
        let local = asset("index.html", b"x", "text/html");
        let assets: AssetSet = vec![local.clone()].into_iter().collect();
        let err = ObjectSyncPlanner::compute(
            &assets,
            vec![
                remote_for(&local, "index.html"),
                remote_for(&local, "index.html"),
            ],
            &root(),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateRemoteKey(_)));
    }

    #[test]
    fn test_listing_failure_fails_closed() {
        let storage = MemoryStorage::new();
        storage.set_unreachable(true);
        let assets: AssetSet = vec![asset("index.html", b"x", "text/html")].into_iter().collect();

        let err = ObjectSyncPlanner::new(&storage)
            .plan(&assets, &root())
            .unwrap_err();
        assert!(matches!(err, PlanError::Listing { .. }));
    }

    #[test]
    fn test_plan_against_storage() {
        let storage = MemoryStorage::new();
        let local = asset("index.html", b"x", "text/html");
        storage.insert_object(
            "index.html",
            b"x",
            "text/html",
            Some(local.fingerprint().clone()),
        );
        let assets: AssetSet = vec![local, asset("new.css", b"y", "text/css")]
            .into_iter()
            .collect();

        let plan = ObjectSyncPlanner::new(&storage).plan(&assets, &root()).unwrap();
        assert_eq!(
            plan.summary(),
            PlanSummary {
                create: 1,
                update: 0,
                skip: 1,
                prune: 0
            }
        );
    }
}
