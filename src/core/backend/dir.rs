//! Local directory mirror of a storage target
//!
//! Lays a bucket out on disk so a publish can be staged and inspected
//! without a cloud account:
//!
//! ```text
//! <root>/objects/<key>          object bodies
//! <root>/.meta/<key>.json       content type, fingerprint, revision
//! <root>/.bucket/policy.json    access policy + revision
//! <root>/.bucket/public-access-block.json
//! <root>/.bucket/invalidations.jsonl   (DirCdn)
//! ```
//!
//! Policy compare-and-swap is atomic within one process only.

use super::{CdnService, ObjectStorage, PublicAccessBlock, PutObject, RemoteObject, StoredPolicy};
use crate::core::asset::Fingerprint;
use crate::core::content_type::FALLBACK_CONTENT_TYPE;
use crate::core::validation::validate_key;
use crate::error::{CdnResult, StorageError, StorageResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = ".meta";
const BUCKET_DIR: &str = ".bucket";
const POLICY_FILE: &str = "policy.json";
const BLOCK_FILE: &str = "public-access-block.json";
const INVALIDATIONS_FILE: &str = "invalidations.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
    #[serde(default)]
    fingerprint: Option<Fingerprint>,
    revision: u64,
}

/// Storage target backed by a local directory
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
    // Serializes writers inside this process
    write_lock: Mutex<()>,
}

impl DirStorage {
    /// Open (creating if needed) a directory-backed storage target
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(META_DIR))?;
        fs::create_dir_all(root.join(BUCKET_DIR))?;
        info!("Opened directory storage at {:?}", root);
        Ok(DirStorage {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an object body
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.root.join(BUCKET_DIR).join(name)
    }

    fn read_meta(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        match fs::read(self.meta_path(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn describe(&self, key: &str) -> StorageResult<RemoteObject> {
        let size = fs::metadata(self.object_path(key))?.len();
        let meta = self.read_meta(key)?;
        Ok(match meta {
            Some(meta) => RemoteObject {
                key: key.to_string(),
                content_type: meta.content_type,
                fingerprint: meta.fingerprint,
                revision: meta.revision.to_string(),
                size,
            },
            // Object dropped in by hand: nothing recorded, always re-uploaded
            None => RemoteObject {
                key: key.to_string(),
                content_type: FALLBACK_CONTENT_TYPE.to_string(),
                fingerprint: None,
                revision: "0".to_string(),
                size,
            },
        })
    }

    /// Every object key, sorted
    fn collect_keys(&self) -> StorageResult<Vec<String>> {
        let objects = self.root.join(OBJECTS_DIR);
        let mut keys = Vec::new();

        for entry in WalkDir::new(&objects).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&objects)
                .map_err(|_| StorageError::InvalidKey(entry.path().display().to_string()))?;
            let segments = rel
                .components()
                .map(|c| c.as_os_str().to_str())
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| StorageError::InvalidKey(format!("{:?}", rel)))?;
            keys.push(segments.join("/"));
        }

        keys.sort();
        Ok(keys)
    }
}

/// Write `bytes` to `path` via a temporary sibling and rename
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

impl ObjectStorage for DirStorage {
    fn list(&self, prefix: &str) -> StorageResult<Vec<RemoteObject>> {
        self.collect_keys()?
            .iter()
            .filter(|key| key.starts_with(prefix))
            .map(|key| self.describe(key))
            .collect()
    }

    fn put(&self, request: PutObject<'_>) -> StorageResult<RemoteObject> {
        validate_key(request.key).map_err(StorageError::InvalidKey)?;
        let _guard = self.write_lock.lock();

        let revision = self.read_meta(request.key)?.map(|m| m.revision).unwrap_or(0) + 1;
        let meta = ObjectMeta {
            content_type: request.content_type.to_string(),
            fingerprint: Some(request.fingerprint.clone()),
            revision,
        };

        write_atomic(&self.object_path(request.key), request.body)?;
        write_atomic(&self.meta_path(request.key), &serde_json::to_vec_pretty(&meta)?)?;
        debug!("dir put {} (rev {})", request.key, revision);

        Ok(RemoteObject {
            key: request.key.to_string(),
            content_type: meta.content_type,
            fingerprint: meta.fingerprint,
            revision: revision.to_string(),
            size: request.body.len() as u64,
        })
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key).map_err(StorageError::InvalidKey)?;
        let _guard = self.write_lock.lock();
        fs::remove_file(self.object_path(key)).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StorageError::NoSuchKey(key.to_string())
            } else {
                err.into()
            }
        })?;
        match fs::remove_file(self.meta_path(key)) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn public_access_block(&self) -> StorageResult<PublicAccessBlock> {
        match fs::read(self.bucket_path(BLOCK_FILE)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            // A fresh bucket starts with public access open
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(PublicAccessBlock::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn set_public_access_block(&self, block: PublicAccessBlock) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        write_atomic(&self.bucket_path(BLOCK_FILE), &serde_json::to_vec_pretty(&block)?)?;
        Ok(())
    }

    fn policy(&self) -> StorageResult<Option<StoredPolicy>> {
        match fs::read(self.bucket_path(POLICY_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put_policy(&self, document: &str, expected_revision: Option<&str>) -> StorageResult<String> {
        let _guard = self.write_lock.lock();

        let current = self.policy()?;
        let current_revision = current.as_ref().map(|p| p.revision.as_str());
        if current_revision != expected_revision {
            return Err(StorageError::Conflict {
                expected: expected_revision.map(str::to_string),
                actual: current_revision.map(str::to_string),
            });
        }

        let next = current_revision
            .and_then(|r| r.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        let stored = StoredPolicy {
            document: document.to_string(),
            revision: next.to_string(),
        };
        write_atomic(&self.bucket_path(POLICY_FILE), &serde_json::to_vec_pretty(&stored)?)?;
        info!("Wrote policy revision {} to {:?}", stored.revision, self.root);
        Ok(stored.revision)
    }
}

#[derive(Debug, Serialize)]
struct InvalidationRecord<'a> {
    id: String,
    distribution_id: &'a str,
    paths: &'a [String],
    created_at: String,
}

/// CDN stand-in for a directory storage target
///
/// Reports a fixed distribution identifier and appends invalidation
/// requests to `.bucket/invalidations.jsonl`.
#[derive(Debug)]
pub struct DirCdn {
    root: PathBuf,
    distribution_id: String,
    lock: Mutex<()>,
}

impl DirCdn {
    /// Create a CDN stand-in writing under `root`
    pub fn new(root: impl AsRef<Path>, distribution_id: impl Into<String>) -> Self {
        DirCdn {
            root: root.as_ref().to_path_buf(),
            distribution_id: distribution_id.into(),
            lock: Mutex::new(()),
        }
    }

    fn log_path(&self) -> PathBuf {
        self.root.join(BUCKET_DIR).join(INVALIDATIONS_FILE)
    }
}

impl CdnService for DirCdn {
    fn distribution_id(&self) -> CdnResult<String> {
        Ok(self.distribution_id.clone())
    }

    fn invalidate(&self, paths: &[String]) -> CdnResult<String> {
        let _guard = self.lock.lock();
        let log_path = self.log_path();
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let previous = match fs::read_to_string(&log_path) {
            Ok(log) => log.lines().count(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };

        let record = InvalidationRecord {
            id: format!("I{}", previous + 1),
            distribution_id: &self.distribution_id,
            paths,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        file.write_all(line.as_bytes())?;
        Ok(record.id)
    }
}
