//! Error types for publishing and access binding
//!
//! Fatal errors (`ScanError`, `ConfigError`, `PlanError`, `PrecheckError`,
//! `BindError`) abort a publish run. Per-object upload failures and
//! invalidation failures are recorded in the publish result instead.

use std::path::PathBuf;
use thiserror::Error;

/// Publish operation result type
pub type Result<T> = std::result::Result<T, PublishError>;

/// Storage collaborator result type
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// CDN collaborator result type
pub type CdnResult<T> = std::result::Result<T, CdnError>;

/// Local tree enumeration errors
#[derive(Error, Debug)]
pub enum ScanError {
    /// Root directory missing or unreadable
    #[error("Root directory is not readable: {path}: {source}")]
    UnreadableRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root exists but is not a directory
    #[error("Root is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A symbolic link resolves to one of its own ancestors
    #[error("Symbolic link cycle: {link} resolves to ancestor {target}")]
    SymlinkCycle { link: PathBuf, target: PathBuf },

    /// Entry could not be read (includes dangling symlinks)
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path cannot be expressed as an object key
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    /// Relative path is not a valid object key
    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}

/// Configuration errors (error routes, targets, publisher settings)
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Matched status code outside the 4xx range
    #[error("Error route status {0} is not a 4xx client error")]
    StatusOutOfRange(u16),

    /// Response status code is not an HTTP status
    #[error("Response status {0} is not a valid HTTP status code")]
    InvalidResponseStatus(u16),

    /// Two routes match the same status code
    #[error("Duplicate error route for status {0}")]
    DuplicateRoute(u16),

    /// Fallback document not among the scanned assets
    #[error("Fallback document '{document}' for status {status} is not in the scanned asset set")]
    MissingDocument { status: u16, document: String },

    /// Ignore pattern is not a valid regex
    #[error("Invalid ignore pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Content type override is malformed
    #[error("Invalid content type override: '{extension}' = '{content_type}'")]
    InvalidContentType {
        extension: String,
        content_type: String,
    },

    /// Storage target is malformed
    #[error("Invalid storage target: {0}")]
    InvalidTarget(String),

    /// Distribution identifier is malformed
    #[error("Invalid distribution identifier: '{0}'")]
    InvalidDistribution(String),

    /// Field-level validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Configuration file is not valid TOML
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage collaborator errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Service cannot be reached
    #[error("Storage unreachable: {0}")]
    Unreachable(String),

    /// Request rejected by rate limiting (retryable)
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// Conditional policy write lost a race
    #[error("Policy revision conflict: expected {expected:?}, found {actual:?}")]
    Conflict {
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Object does not exist
    #[error("Object does not exist: {0}")]
    NoSuchKey(String),

    /// Invalid object key
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// Internal service error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether the request may succeed if retried after a delay
    pub fn is_throttled(&self) -> bool {
        matches!(self, StorageError::Throttled(_))
    }
}

/// CDN collaborator errors
#[derive(Error, Debug)]
pub enum CdnError {
    /// Service cannot be reached
    #[error("CDN unreachable: {0}")]
    Unreachable(String),

    /// Request rejected by the service
    #[error("CDN rejected request: {0}")]
    Rejected(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Planning errors (no partial plan is ever returned)
#[derive(Error, Debug)]
pub enum PlanError {
    /// Remote listing failed
    #[error("Cannot list remote objects under '{prefix}': {source}")]
    Listing {
        prefix: String,
        #[source]
        source: StorageError,
    },

    /// Listing returned the same key twice
    #[error("Remote listing contains duplicate key: {0}")]
    DuplicateRemoteKey(String),
}

/// Public access precondition errors
#[derive(Error, Debug)]
pub enum PrecheckError {
    /// Enabling the public access block failed
    #[error("Failed to enable public access block: {0}")]
    Enable(#[source] StorageError),

    /// Reading the public access block back failed
    #[error("Failed to read public access block: {0}")]
    Read(#[source] StorageError),

    /// One or more toggles still allow public access
    #[error("Public access is not fully blocked (open: {0})")]
    NotBlocked(String),

    /// Generated document names a public principal
    #[error("Policy statement '{0}' grants access to a public principal")]
    PublicPrincipal(String),

    /// Generated document grants more than read access
    #[error("Policy statement '{sid}' grants non-read action {action}")]
    NonReadAction { sid: String, action: String },
}

/// Access binding errors
#[derive(Error, Debug)]
pub enum BindError {
    /// Public access precondition failed
    #[error(transparent)]
    Precheck(#[from] PrecheckError),

    /// Current policy could not be read
    #[error("Failed to read current policy: {0}")]
    ReadPolicy(#[source] StorageError),

    /// Policy write failed for a reason other than a conflict
    #[error("Failed to write policy: {0}")]
    WritePolicy(#[source] StorageError),

    /// Every conditional write lost to a concurrent writer
    #[error("Policy write conflicted {attempts} times, giving up")]
    ConflictRetriesExhausted { attempts: u32 },

    /// Generated grant does not admit exactly the bound distribution
    #[error("Generated policy failed verification: {0}")]
    Verification(String),

    /// Policy (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-object upload errors (recorded, never fatal on their own)
#[derive(Error, Debug)]
pub enum ApplyError {
    /// Throttled on every attempt up to the retry ceiling
    #[error("Upload still throttled after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// Non-retryable storage failure
    #[error("Upload failed: {0}")]
    Storage(#[from] StorageError),

    /// Storage acknowledged a different fingerprint than was sent
    #[error("Storage stored fingerprint {actual}, expected {expected}")]
    FingerprintMismatch { expected: String, actual: String },
}

/// Fatal publish errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// Local tree could not be enumerated or read
    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    /// Invalid configuration or error routing table
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Remote state could not be planned against
    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    /// Public access precondition failed; no policy written
    #[error("Precondition failed: {0}")]
    Precheck(PrecheckError),

    /// Policy could not be written
    #[error("Binding failed: {0}")]
    Bind(BindError),

    /// No mutating action of a non-empty plan succeeded
    #[error("None of the {attempted} planned uploads succeeded")]
    ApplyFailed { attempted: usize },

    /// Caller cancelled the run during Applying
    #[error("Publish cancelled with {not_started} uploads not started")]
    Cancelled { not_started: usize },

    /// Distribution identifier could not be obtained from the CDN
    #[error("Cannot resolve distribution identifier: {0}")]
    Distribution(#[from] CdnError),

    /// Prune deletion failed
    #[error("Prune failed for {key}: {source}")]
    Prune {
        key: String,
        #[source]
        source: StorageError,
    },
}

impl From<BindError> for PublishError {
    fn from(err: BindError) -> Self {
        match err {
            BindError::Precheck(precheck) => PublishError::Precheck(precheck),
            other => PublishError::Bind(other),
        }
    }
}

impl From<PrecheckError> for PublishError {
    fn from(err: PrecheckError) -> Self {
        PublishError::Precheck(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precheck_bind_error_maps_to_precheck() {
        let err: PublishError = BindError::Precheck(PrecheckError::NotBlocked(
            "block_public_acls".to_string(),
        ))
        .into();
        assert!(matches!(err, PublishError::Precheck(_)));

        let err: PublishError = BindError::ConflictRetriesExhausted { attempts: 3 }.into();
        assert!(matches!(err, PublishError::Bind(_)));
    }

    #[test]
    fn test_throttled_is_retryable() {
        assert!(StorageError::Throttled("slow down".into()).is_throttled());
        assert!(!StorageError::Unreachable("down".into()).is_throttled());
    }
}
