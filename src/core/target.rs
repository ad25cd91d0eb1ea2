//! Storage target: the resource a site is published into

use crate::core::validation::normalize_prefix;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// A storage resource (e.g. `arn:aws:s3:::my-site`) plus an optional key prefix
///
/// Object keys are `prefix + relative asset path`. The access grant covers
/// every object under the prefix.
///
/// # Examples
///
/// ```
/// use sitebinder::core::target::StorageTarget;
///
/// let target = StorageTarget::new("arn:aws:s3:::my-site")?.with_prefix("www")?;
/// assert_eq!(target.object_key("img/logo.png"), "www/img/logo.png");
/// assert_eq!(target.resource_pattern(), "arn:aws:s3:::my-site/www/*");
/// # Ok::<(), sitebinder::error::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageTarget {
    resource: String,
    prefix: String,
}

impl StorageTarget {
    /// Create a target for `resource` with no key prefix
    pub fn new(resource: impl Into<String>) -> Result<Self, ConfigError> {
        let resource = resource.into();
        let trimmed = resource.trim_end_matches('/');

        if trimmed.is_empty() {
            return Err(ConfigError::InvalidTarget("resource cannot be empty".to_string()));
        }
        if trimmed.contains('*') || trimmed.contains('?') {
            return Err(ConfigError::InvalidTarget(format!(
                "resource '{}' cannot contain wildcards",
                resource
            )));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '"') {
            return Err(ConfigError::InvalidTarget(format!(
                "resource '{}' contains whitespace or quotes",
                resource
            )));
        }

        Ok(StorageTarget {
            resource: trimmed.to_string(),
            prefix: String::new(),
        })
    }

    /// Publish under `prefix` instead of the resource root
    pub fn with_prefix(mut self, prefix: &str) -> Result<Self, ConfigError> {
        self.prefix = normalize_prefix(prefix)?;
        Ok(self)
    }

    /// Storage resource identifier
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Normalized key prefix (`""` or ending in `/`)
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Remote key for a relative asset path
    pub fn object_key(&self, relative: &str) -> String {
        format!("{}{}", self.prefix, relative)
    }

    /// Relative asset path for a remote key under this target
    pub fn relative_key<'k>(&self, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(self.prefix.as_str())
    }

    /// Resource pattern covering every object under the prefix
    pub fn resource_pattern(&self) -> String {
        format!("{}/{}*", self.resource, self.prefix)
    }

    /// Resource identifier of a single object
    pub fn object_resource(&self, key: &str) -> String {
        format!("{}/{}", self.resource, key)
    }
}
