//! Upload failure, throttling and cancellation tests

use sitebinder::core::backend::{
    MemoryCdn, MemoryStorage, ObjectStorage, PublicAccessBlock, PutObject, RemoteObject,
    StoredPolicy,
};
use sitebinder::error::StorageResult;
use sitebinder::{
    CancellationToken, ObjectOutcome, PublishError, PublishFailure, PublishResult, PublishState,
    Publisher, PublisherConfig, StorageTarget,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Storage that signals cancellation from inside its first upload
struct CancelOnFirstPut {
    inner: MemoryStorage,
    token: CancellationToken,
}

impl ObjectStorage for CancelOnFirstPut {
    fn list(&self, prefix: &str) -> StorageResult<Vec<RemoteObject>> {
        self.inner.list(prefix)
    }

    fn put(&self, request: PutObject<'_>) -> StorageResult<RemoteObject> {
        self.token.cancel();
        self.inner.put(request)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key)
    }

    fn public_access_block(&self) -> StorageResult<PublicAccessBlock> {
        self.inner.public_access_block()
    }

    fn set_public_access_block(&self, block: PublicAccessBlock) -> StorageResult<()> {
        self.inner.set_public_access_block(block)
    }

    fn policy(&self) -> StorageResult<Option<StoredPolicy>> {
        self.inner.policy()
    }

    fn put_policy(&self, document: &str, expected_revision: Option<&str>) -> StorageResult<String> {
        self.inner.put_policy(document, expected_revision)
    }
}

fn site(files: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    for i in 0..files {
        let path = dir.path().join(format!("pages/page-{:02}.html", i));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("<p>page {}</p>", i)).unwrap();
    }
    dir
}

fn fast_config(max_concurrent_uploads: usize) -> PublisherConfig {
    PublisherConfig {
        max_concurrent_uploads,
        retry_ceiling: 3,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 1,
        ..PublisherConfig::default()
    }
}

fn publisher(storage: Arc<dyn ObjectStorage>, cdn: Arc<MemoryCdn>, uploads: usize) -> Publisher {
    Publisher::with_config(storage, cdn, fast_config(uploads)).unwrap()
}

fn target() -> StorageTarget {
    StorageTarget::new("arn:aws:s3:::site").unwrap()
}

fn publish(publisher: &Publisher, root: &Path) -> Result<PublishResult, PublishFailure> {
    publisher.publish(root, &target(), "E1", &[])
}

#[test]
fn test_one_failing_object_does_not_fail_run() {
    let dir = site(4);
    let storage = Arc::new(MemoryStorage::new());
    let cdn = Arc::new(MemoryCdn::new("E1"));
    storage.fail_key("pages/page-02.html");

    let publisher = publisher(storage.clone(), cdn.clone(), 2);
    let result = publish(&publisher, dir.path()).unwrap();
    assert_eq!(result.final_state(), PublishState::Done);
    assert_eq!(result.counts(), (3, 0, 0));
    assert_eq!(result.failed, 1);

    let failed: Vec<&str> = result.failures().map(|r| r.key.as_str()).collect();
    assert_eq!(failed, vec!["pages/page-02.html"]);
    assert!(result.grant.is_some());

    // Failed objects are not invalidated
    let paths = cdn.invalidations().pop().unwrap();
    assert_eq!(paths.len(), 3);
    assert!(!paths.contains(&"/pages/page-02.html".to_string()));

    // The next run picks the failed object up again
    storage.heal_key("pages/page-02.html");
    let retry = publish(&publisher, dir.path()).unwrap();
    assert_eq!(retry.counts(), (1, 0, 3));
    assert_eq!(retry.failed, 0);
}

#[test]
fn test_throttled_uploads_retried_within_ceiling() {
    let dir = site(3);
    let storage = Arc::new(MemoryStorage::new());
    storage.throttle_key("pages/page-00.html", 2);
    storage.throttle_key("pages/page-01.html", 3);

    let publisher = publisher(storage.clone(), Arc::new(MemoryCdn::new("E1")), 2);
    let result = publish(&publisher, dir.path()).unwrap();
    assert_eq!(result.counts(), (3, 0, 0));

    let attempts: Vec<u32> = result.objects.iter().map(|r| r.attempts).collect();
    assert_eq!(attempts, vec![3, 4, 1]);
}

#[test]
fn test_throttled_past_ceiling_marks_object_failed() {
    let dir = site(2);
    let storage = Arc::new(MemoryStorage::new());
    storage.throttle_key("pages/page-01.html", 10);

    let publisher = publisher(storage.clone(), Arc::new(MemoryCdn::new("E1")), 2);
    let result = publish(&publisher, dir.path()).unwrap();
    assert_eq!(result.created, 1);
    assert_eq!(result.failed, 1);

    let report = result.failures().next().unwrap();
    assert_eq!(report.attempts, 4);
    match &report.outcome {
        ObjectOutcome::Failed { error } => assert!(error.contains("throttled")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(storage.object("pages/page-01.html").is_none());
}

#[test]
fn test_every_upload_failing_fails_before_binding() {
    let dir = site(2);
    let storage = Arc::new(MemoryStorage::new());
    storage.fail_key("pages/page-00.html");
    storage.fail_key("pages/page-01.html");

    let publisher = publisher(storage.clone(), Arc::new(MemoryCdn::new("E1")), 2);
    let failure = publish(&publisher, dir.path()).unwrap_err();
    assert_eq!(failure.state, PublishState::Applying);
    assert!(matches!(failure.error, PublishError::ApplyFailed { attempted: 2 }));
    assert_eq!(failure.result.failed, 2);
    assert!(storage.policy_document().is_none());
}

#[test]
fn test_cancellation_mid_flight() {
    let dir = site(5);
    let token = CancellationToken::new();
    let storage = Arc::new(CancelOnFirstPut {
        inner: MemoryStorage::new(),
        token: token.clone(),
    });

    let cdn = Arc::new(MemoryCdn::new("E1"));
    let publisher = publisher(storage.clone(), cdn.clone(), 1);
    let result = publisher
        .publish_cancellable(dir.path(), &target(), "E1", &[], &token)
        .unwrap();

    assert_eq!(result.final_state(), PublishState::Done);
    assert_eq!(result.created, 1);
    assert_eq!(result.cancelled, 4);
    let cancelled = result
        .objects
        .iter()
        .filter(|r| r.outcome == ObjectOutcome::Cancelled && r.attempts == 0)
        .count();
    assert_eq!(cancelled, 4);

    // The in-flight upload completed and nothing else was written
    assert_eq!(storage.inner.keys(), vec!["pages/page-00.html"]);
    assert!(result.grant.is_some());
    assert!(storage.inner.policy_document().unwrap().contains("E1"));
    assert_eq!(cdn.invalidations(), vec![vec!["/pages/page-00.html".to_string()]]);

    // A fresh run is not affected and uploads the rest
    let rest = publish(&publisher, dir.path()).unwrap();
    assert_eq!(rest.counts(), (4, 0, 1));
}

#[test]
fn test_concurrency_bound_respected() {
    let dir = site(12);
    let storage = Arc::new(MemoryStorage::new());
    storage.set_put_delay(Duration::from_millis(20));

    let publisher = publisher(storage.clone(), Arc::new(MemoryCdn::new("E1")), 3);
    let result = publish(&publisher, dir.path()).unwrap();
    assert_eq!(result.created, 12);
    assert!(storage.peak_in_flight() >= 1);
    assert!(storage.peak_in_flight() <= 3);
}

#[test]
fn test_unreachable_storage_fails_planning() {
    let dir = site(2);
    let storage = Arc::new(MemoryStorage::new());
    storage.set_unreachable(true);

    let publisher = publisher(storage.clone(), Arc::new(MemoryCdn::new("E1")), 2);
    let failure = publish(&publisher, dir.path()).unwrap_err();
    assert_eq!(failure.state, PublishState::Planning);
    assert!(matches!(failure.error, PublishError::Plan(_)));
    assert!(failure.result.objects.is_empty());
}

#[test]
fn test_invalidation_failure_is_warning() {
    let dir = site(2);
    let storage = Arc::new(MemoryStorage::new());
    let cdn = Arc::new(MemoryCdn::new("E1"));
    cdn.fail_invalidations(true);

    let result = publish(&publisher(storage, cdn, 2), dir.path()).unwrap();
    assert_eq!(result.final_state(), PublishState::Done);
    assert!(result.invalidation_id.is_none());
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(
        result.warnings[0].paths,
        vec!["/pages/page-00.html", "/pages/page-01.html"]
    );
}
