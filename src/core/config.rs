//! Publisher configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration:
//!
//! ```toml
//! max_concurrent_uploads = 8
//! retry_ceiling = 5
//! ignore_hidden = true
//! ignore = ['\.map$', '^drafts/']
//!
//! [content_types]
//! webmanifest = "application/manifest+json"
//!
//! [binding]
//! principal_service = "cloudfront.amazonaws.com"
//! condition_key = "AWS:SourceArn"
//! policy_write_attempts = 5
//!
//! [[error_routes]]
//! status = 404
//! document = "error.html"
//! response_status = 404
//! ```

use crate::core::binder::BinderConfig;
use crate::core::content_type::ContentTypeResolver;
use crate::core::retry::RetryPolicy;
use crate::core::routing::ErrorRoute;
use crate::core::scan::{any_of, hidden_entries, pattern_ignore, IgnorePredicate};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Default upload concurrency
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 8;

/// Default asset-building concurrency
pub const DEFAULT_RESOLVE_WORKERS: usize = 4;

/// Default throttle retries per object
pub const DEFAULT_RETRY_CEILING: u32 = 5;

/// Default first backoff ceiling
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Default backoff cap
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Publisher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_delays"))]
pub struct PublisherConfig {
    /// Upper bound on simultaneous uploads
    #[validate(range(min = 1, max = 256))]
    pub max_concurrent_uploads: usize,

    /// Workers reading and fingerprinting assets
    #[validate(range(min = 1, max = 256))]
    pub resolve_workers: usize,

    /// Retries of a throttled upload before the object is marked failed
    #[validate(range(max = 20))]
    pub retry_ceiling: u32,

    /// Backoff ceiling of the first retry
    #[validate(range(min = 1, max = 60000))]
    pub retry_base_delay_ms: u64,

    /// Backoff cap
    #[validate(range(min = 1, max = 300000))]
    pub retry_max_delay_ms: u64,

    /// Skip entries whose name starts with `.`
    pub ignore_hidden: bool,

    /// Regex patterns over relative paths; matching entries are skipped
    pub ignore: Vec<String>,

    /// Extension to content type overrides
    pub content_types: BTreeMap<String, String>,

    /// Access binding settings
    #[validate(custom(function = "validate_binding"))]
    pub binding: BinderConfig,

    /// Error routes, validated against the scanned assets at publish time
    pub error_routes: Vec<ErrorRoute>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            resolve_workers: DEFAULT_RESOLVE_WORKERS,
            retry_ceiling: DEFAULT_RETRY_CEILING,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            ignore_hidden: false,
            ignore: Vec::new(),
            content_types: BTreeMap::new(),
            binding: BinderConfig::default(),
            error_routes: Vec::new(),
        }
    }
}

impl PublisherConfig {
    /// Parse and check a TOML document
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: PublisherConfig = toml::from_str(source)?;
        config.check()?;
        Ok(config)
    }

    /// Read, parse and check a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    /// Field rules plus the checks that need compilation
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        self.ignore_predicate()?;
        self.resolver()?;
        Ok(())
    }

    /// Combined ignore predicate (`None`: nothing ignored)
    pub fn ignore_predicate(&self) -> Result<Option<IgnorePredicate>, ConfigError> {
        let mut predicates = Vec::new();
        if self.ignore_hidden {
            predicates.push(hidden_entries());
        }
        if !self.ignore.is_empty() {
            predicates.push(pattern_ignore(&self.ignore)?);
        }
        Ok(any_of(predicates))
    }

    /// Content type resolver with overrides applied
    pub fn resolver(&self) -> Result<ContentTypeResolver, ConfigError> {
        ContentTypeResolver::with_overrides(&self.content_types)
    }

    /// Backoff policy for throttled uploads
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_ceiling,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

fn validate_delays(config: &PublisherConfig) -> Result<(), ValidationError> {
    if config.retry_base_delay_ms > config.retry_max_delay_ms {
        return Err(ValidationError::new("retry_base_delay_exceeds_max"));
    }
    Ok(())
}

fn validate_binding(binding: &BinderConfig) -> Result<(), ValidationError> {
    if binding.principal_service.trim().is_empty() || binding.principal_service.contains('*') {
        return Err(ValidationError::new("invalid_principal_service"));
    }
    if binding.condition_key.trim().is_empty() {
        return Err(ValidationError::new("empty_condition_key"));
    }
    if !(1..=50).contains(&binding.policy_write_attempts) {
        return Err(ValidationError::new("policy_write_attempts_out_of_range"));
    }
    Ok(())
}
