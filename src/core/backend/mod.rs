//! Storage and CDN collaborator interfaces
//!
//! The engine never talks to a vendor SDK directly. It consumes two
//! synchronous traits:
//! - [`ObjectStorage`] - object listing/upload, public access block and
//!   conditional (compare-and-swap) policy writes
//! - [`CdnService`] - distribution identity and best-effort invalidation
//!
//! Two implementations ship with the crate: in-memory backends with fault
//! injection ([`memory`]) and a local directory mirror ([`dir`]).

pub mod dir;
pub mod memory;

pub use dir::{DirCdn, DirStorage};
pub use memory::{MemoryCdn, MemoryStorage};

use crate::core::asset::Fingerprint;
use crate::error::{CdnResult, StorageResult};
use serde::{Deserialize, Serialize};

/// Published counterpart of an asset, as reported by storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Full object key (target prefix included)
    pub key: String,
    /// Stored content type
    pub content_type: String,
    /// Stored fingerprint (`None` for objects written by other tools)
    pub fingerprint: Option<Fingerprint>,
    /// Storage-side revision marker
    pub revision: String,
    /// Stored size in bytes
    pub size: u64,
}

/// Upload request for a single object
#[derive(Debug, Clone, Copy)]
pub struct PutObject<'a> {
    pub key: &'a str,
    pub body: &'a [u8],
    pub content_type: &'a str,
    /// Recorded as object metadata so later runs can diff against it
    pub fingerprint: &'a Fingerprint,
}

/// Public access toggles of a storage target
///
/// Mirrors the four S3 block-public-access settings. Every toggle must be
/// `true` before a trust binding may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublicAccessBlock {
    pub block_public_acls: bool,
    pub ignore_public_acls: bool,
    pub block_public_policy: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlock {
    /// All toggles blocking
    pub fn all_blocked() -> Self {
        PublicAccessBlock {
            block_public_acls: true,
            ignore_public_acls: true,
            block_public_policy: true,
            restrict_public_buckets: true,
        }
    }

    /// Whether every toggle is blocking
    pub fn is_fully_blocked(&self) -> bool {
        self.open_toggles().is_empty()
    }

    /// Names of toggles that are not blocking
    pub fn open_toggles(&self) -> Vec<&'static str> {
        let mut open = Vec::new();
        if !self.block_public_acls {
            open.push("block_public_acls");
        }
        if !self.ignore_public_acls {
            open.push("ignore_public_acls");
        }
        if !self.block_public_policy {
            open.push("block_public_policy");
        }
        if !self.restrict_public_buckets {
            open.push("restrict_public_buckets");
        }
        open
    }
}

/// Access policy document as stored, with its revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPolicy {
    pub document: String,
    pub revision: String,
}

/// Object storage collaborator
pub trait ObjectStorage: Send + Sync {
    /// List objects whose key starts with `prefix`
    fn list(&self, prefix: &str) -> StorageResult<Vec<RemoteObject>>;

    /// Create or overwrite an object
    fn put(&self, request: PutObject<'_>) -> StorageResult<RemoteObject>;

    /// Delete an object (explicit prune only)
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Current public access toggles
    fn public_access_block(&self) -> StorageResult<PublicAccessBlock>;

    /// Request new public access toggles
    ///
    /// Storage may override the request (e.g. an account-level setting), so
    /// callers read the toggles back to verify.
    fn set_public_access_block(&self, block: PublicAccessBlock) -> StorageResult<()>;

    /// Current access policy, if any
    fn policy(&self) -> StorageResult<Option<StoredPolicy>>;

    /// Write the access policy if the stored revision equals `expected_revision`
    ///
    /// `None` expects no policy to exist. Returns the new revision, or
    /// `StorageError::Conflict` when another writer got there first.
    fn put_policy(&self, document: &str, expected_revision: Option<&str>) -> StorageResult<String>;
}

/// CDN collaborator
pub trait CdnService: Send + Sync {
    /// Identifier of the distribution fronting the storage target
    fn distribution_id(&self) -> CdnResult<String>;

    /// Invalidate cached copies of `paths`; returns an invalidation id
    fn invalidate(&self, paths: &[String]) -> CdnResult<String>;
}
