//! In-memory storage and CDN backends
//!
//! Useful for embedding and for tests. Both backends support fault
//! injection: unreachable services, throttled or failing keys, pinned public
//! access settings and concurrent policy writers.

use super::{CdnService, ObjectStorage, PublicAccessBlock, PutObject, RemoteObject, StoredPolicy};
use crate::core::asset::Fingerprint;
use crate::core::validation::validate_key;
use crate::error::{CdnError, CdnResult, StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
    fingerprint: Option<Fingerprint>,
    revision: u64,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    block: PublicAccessBlock,
    policy: Option<StoredPolicy>,
    next_revision: u64,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    throttled: HashMap<String, u32>,
    failing: HashSet<String>,
    pinned_block: Option<PublicAccessBlock>,
    reject_block_update: bool,
    concurrent_policy_writes: u32,
    put_delay: Option<Duration>,
}

/// In-memory object storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
    faults: Mutex<Faults>,
    puts: AtomicUsize,
    policy_writes: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryStorage {
    /// Create an empty storage target with public access open
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without going through `put`
    pub fn insert_object(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
        fingerprint: Option<Fingerprint>,
    ) {
        let mut state = self.state.write();
        let revision = state.bump();
        state.objects.insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
                fingerprint,
                revision,
            },
        );
    }

    /// Stored body of an object
    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.state.read().objects.get(key).map(|o| o.body.clone())
    }

    /// Stored object description
    pub fn object(&self, key: &str) -> Option<RemoteObject> {
        self.state.read().objects.get(key).map(|o| describe(key, o))
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        self.state.read().objects.keys().cloned().collect()
    }

    /// Stored policy document, if any
    pub fn policy_document(&self) -> Option<String> {
        self.state.read().policy.as_ref().map(|p| p.document.clone())
    }

    /// Successful uploads so far
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Successful policy writes so far
    pub fn policy_write_count(&self) -> usize {
        self.policy_writes.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `put` calls observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Make every call fail with `Unreachable`
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.lock().unreachable = unreachable;
    }

    /// Throttle the next `times` uploads of `key`
    pub fn throttle_key(&self, key: &str, times: u32) {
        self.faults.lock().throttled.insert(key.to_string(), times);
    }

    /// Fail every upload of `key` with a non-retryable error
    pub fn fail_key(&self, key: &str) {
        self.faults.lock().failing.insert(key.to_string());
    }

    /// Stop failing uploads of `key`
    pub fn heal_key(&self, key: &str) {
        let mut faults = self.faults.lock();
        faults.failing.remove(key);
        faults.throttled.remove(key);
    }

    /// Report `block` regardless of what is requested (account-level override)
    pub fn pin_public_access_block(&self, block: PublicAccessBlock) {
        self.faults.lock().pinned_block = Some(block);
    }

    /// Reject public access block updates with an internal error
    pub fn reject_public_access_updates(&self, reject: bool) {
        self.faults.lock().reject_block_update = reject;
    }

    /// Let another writer replace the policy before each of the next `times` writes
    pub fn simulate_concurrent_policy_writes(&self, times: u32) {
        self.faults.lock().concurrent_policy_writes = times;
    }

    /// Sleep this long inside every upload
    pub fn set_put_delay(&self, delay: Duration) {
        self.faults.lock().put_delay = Some(delay);
    }

    fn check_reachable(&self) -> StorageResult<()> {
        if self.faults.lock().unreachable {
            return Err(StorageError::Unreachable("memory storage offline".to_string()));
        }
        Ok(())
    }

    fn upload_fault(&self, key: &str) -> StorageResult<Option<Duration>> {
        let mut faults = self.faults.lock();
        if faults.failing.contains(key) {
            return Err(StorageError::Internal(format!("injected failure for {}", key)));
        }
        if let Some(remaining) = faults.throttled.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::Throttled(format!("slow down: {}", key)));
            }
        }
        Ok(faults.put_delay)
    }
}

fn describe(key: &str, object: &StoredObject) -> RemoteObject {
    RemoteObject {
        key: key.to_string(),
        content_type: object.content_type.clone(),
        fingerprint: object.fingerprint.clone(),
        revision: object.revision.to_string(),
        size: object.body.len() as u64,
    }
}

impl ObjectStorage for MemoryStorage {
    fn list(&self, prefix: &str) -> StorageResult<Vec<RemoteObject>> {
        self.check_reachable()?;
        let state = self.state.read();
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| describe(key, object))
            .collect())
    }

    fn put(&self, request: PutObject<'_>) -> StorageResult<RemoteObject> {
        self.check_reachable()?;
        validate_key(request.key).map_err(StorageError::InvalidKey)?;
        let delay = self.upload_fault(request.key)?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let remote = {
            let mut state = self.state.write();
            let revision = state.bump();
            let object = StoredObject {
                body: request.body.to_vec(),
                content_type: request.content_type.to_string(),
                fingerprint: Some(request.fingerprint.clone()),
                revision,
            };
            let remote = describe(request.key, &object);
            state.objects.insert(request.key.to_string(), object);
            remote
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.puts.fetch_add(1, Ordering::SeqCst);
        debug!("memory put {} (rev {})", remote.key, remote.revision);
        Ok(remote)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.check_reachable()?;
        self.state
            .write()
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NoSuchKey(key.to_string()))
    }

    fn public_access_block(&self) -> StorageResult<PublicAccessBlock> {
        self.check_reachable()?;
        if let Some(pinned) = self.faults.lock().pinned_block {
            return Ok(pinned);
        }
        Ok(self.state.read().block)
    }

    fn set_public_access_block(&self, block: PublicAccessBlock) -> StorageResult<()> {
        self.check_reachable()?;
        if self.faults.lock().reject_block_update {
            return Err(StorageError::Internal("access denied".to_string()));
        }
        self.state.write().block = block;
        Ok(())
    }

    fn policy(&self) -> StorageResult<Option<StoredPolicy>> {
        self.check_reachable()?;
        Ok(self.state.read().policy.clone())
    }

    fn put_policy(&self, document: &str, expected_revision: Option<&str>) -> StorageResult<String> {
        self.check_reachable()?;
        let concurrent = {
            let mut faults = self.faults.lock();
            if faults.concurrent_policy_writes > 0 {
                faults.concurrent_policy_writes -= 1;
                true
            } else {
                false
            }
        };

        let mut state = self.state.write();
        if concurrent {
            let revision = state.bump().to_string();
            state.policy = Some(StoredPolicy {
                document: r#"{"Version":"2012-10-17","Statement":[]}"#.to_string(),
                revision,
            });
        }

        let current = state.policy.as_ref().map(|p| p.revision.as_str());
        if current != expected_revision {
            return Err(StorageError::Conflict {
                expected: expected_revision.map(str::to_string),
                actual: current.map(str::to_string),
            });
        }

        let revision = state.bump().to_string();
        state.policy = Some(StoredPolicy {
            document: document.to_string(),
            revision: revision.clone(),
        });
        self.policy_writes.fetch_add(1, Ordering::SeqCst);
        Ok(revision)
    }
}

/// In-memory CDN
#[derive(Debug)]
pub struct MemoryCdn {
    distribution_id: RwLock<String>,
    invalidations: Mutex<Vec<Vec<String>>>,
    failing: Mutex<bool>,
}

impl MemoryCdn {
    /// Create a CDN fronted by `distribution_id`
    pub fn new(distribution_id: impl Into<String>) -> Self {
        MemoryCdn {
            distribution_id: RwLock::new(distribution_id.into()),
            invalidations: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
        }
    }

    /// Replace the distribution (e.g. after a teardown and re-create)
    pub fn set_distribution_id(&self, distribution_id: impl Into<String>) {
        *self.distribution_id.write() = distribution_id.into();
    }

    /// Make invalidation requests fail
    pub fn fail_invalidations(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Invalidation requests received so far
    pub fn invalidations(&self) -> Vec<Vec<String>> {
        self.invalidations.lock().clone()
    }
}

impl CdnService for MemoryCdn {
    fn distribution_id(&self) -> CdnResult<String> {
        Ok(self.distribution_id.read().clone())
    }

    fn invalidate(&self, paths: &[String]) -> CdnResult<String> {
        if *self.failing.lock() {
            return Err(CdnError::Unreachable("memory cdn offline".to_string()));
        }
        let mut invalidations = self.invalidations.lock();
        invalidations.push(paths.to_vec());
        Ok(format!("I{}", invalidations.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(storage: &MemoryStorage, key: &str, body: &[u8]) -> StorageResult<RemoteObject> {
        let fingerprint = Fingerprint::of(body);
        storage.put(PutObject {
            key,
            body,
            content_type: "text/html",
            fingerprint: &fingerprint,
        })
    }

    #[test]
    fn test_put_and_list_by_prefix() {
        let storage = MemoryStorage::new();
        put(&storage, "site/index.html", b"a").unwrap();
        put(&storage, "site/img/logo.png", b"b").unwrap();
        put(&storage, "other/index.html", b"c").unwrap();

        let listed: Vec<String> = storage
            .list("site/")
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(listed, vec!["site/img/logo.png", "site/index.html"]);
        assert_eq!(storage.list("").unwrap().len(), 3);
    }

    #[test]
    fn test_put_records_fingerprint_and_revision() {
        let storage = MemoryStorage::new();
        let first = put(&storage, "index.html", b"v1").unwrap();
        let second = put(&storage, "index.html", b"v2").unwrap();

        assert_eq!(second.fingerprint, Some(Fingerprint::of(b"v2")));
        assert_ne!(first.revision, second.revision);
        assert_eq!(storage.body("index.html").unwrap(), b"v2");
        assert_eq!(storage.put_count(), 2);
    }

    #[test]
    fn test_throttle_then_succeed() {
        let storage = MemoryStorage::new();
        storage.throttle_key("a.html", 2);
        assert!(put(&storage, "a.html", b"x").unwrap_err().is_throttled());
        assert!(put(&storage, "a.html", b"x").unwrap_err().is_throttled());
        assert!(put(&storage, "a.html", b"x").is_ok());
    }

    #[test]
    fn test_unreachable() {
        let storage = MemoryStorage::new();
        storage.set_unreachable(true);
        assert!(matches!(storage.list(""), Err(StorageError::Unreachable(_))));
    }

    #[test]
    fn test_policy_compare_and_swap() {
        let storage = MemoryStorage::new();
        let rev1 = storage.put_policy("{}", None).unwrap();

        // Stale expectation loses
        let err = storage.put_policy("{\"a\":1}", None).unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let rev2 = storage.put_policy("{\"a\":1}", Some(rev1.as_str())).unwrap();
        assert_ne!(rev1, rev2);
        assert_eq!(storage.policy_document().unwrap(), "{\"a\":1}");
        assert_eq!(storage.policy_write_count(), 2);
    }

    #[test]
    fn test_pinned_public_access_block() {
        let storage = MemoryStorage::new();
        storage.pin_public_access_block(PublicAccessBlock::default());
        storage
            .set_public_access_block(PublicAccessBlock::all_blocked())
            .unwrap();
        assert!(!storage.public_access_block().unwrap().is_fully_blocked());
    }

    #[test]
    fn test_delete() {
        let storage = MemoryStorage::new();
        put(&storage, "old.html", b"x").unwrap();
        storage.delete("old.html").unwrap();
        assert!(matches!(
            storage.delete("old.html"),
            Err(StorageError::NoSuchKey(_))
        ));
    }

    #[test]
    fn test_cdn_records_invalidations() {
        let cdn = MemoryCdn::new("E1");
        assert_eq!(cdn.distribution_id().unwrap(), "E1");
        let id = cdn.invalidate(&["/index.html".to_string()]).unwrap();
        assert_eq!(id, "I1");
        cdn.fail_invalidations(true);
        assert!(cdn.invalidate(&["/a".to_string()]).is_err());
        assert_eq!(cdn.invalidations().len(), 1);
    }
}
