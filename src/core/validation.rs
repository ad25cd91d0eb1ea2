//! Validation for object keys, key prefixes and distribution identifiers
//!
//! Object keys are derived from relative asset paths and must be stable,
//! `/`-separated and free of traversal segments so that one asset maps to
//! exactly one remote object.

use crate::error::ConfigError;
use std::fmt;

/// Maximum object key length in bytes (S3 limit)
pub const MAX_KEY_LENGTH: usize = 1024;

/// Maximum distribution identifier length (long enough for a full ARN)
const MAX_DISTRIBUTION_ID_LENGTH: usize = 256;

/// Validate an object key
///
/// # Rules
/// - Non-empty, at most 1024 bytes
/// - No leading `/`, no backslashes
/// - No empty, `.` or `..` segments
///
/// Returns a human-readable reason on failure.
///
/// # Examples
///
/// ```
/// use sitebinder::core::validation::validate_key;
///
/// assert!(validate_key("img/logo.png").is_ok());
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("/index.html").is_err());
/// ```
pub fn validate_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("key cannot be empty".to_string());
    }

    if key.len() > MAX_KEY_LENGTH {
        return Err(format!(
            "key too long: {} bytes (max {})",
            key.len(),
            MAX_KEY_LENGTH
        ));
    }

    if key.starts_with('/') {
        return Err("key cannot start with '/'".to_string());
    }

    if key.contains('\\') {
        return Err("key cannot contain backslashes".to_string());
    }

    for segment in key.split('/') {
        match segment {
            "" => return Err("key cannot contain empty segments".to_string()),
            "." | ".." => return Err(format!("key cannot contain '{}' segments", segment)),
            _ => {}
        }
    }

    Ok(())
}

/// Normalize a key prefix to either `""` or `"segment/.../"`
///
/// # Examples
///
/// ```
/// use sitebinder::core::validation::normalize_prefix;
///
/// assert_eq!(normalize_prefix("").unwrap(), "");
/// assert_eq!(normalize_prefix("/site/").unwrap(), "site/");
/// assert_eq!(normalize_prefix("a/b").unwrap(), "a/b/");
/// assert!(normalize_prefix("a/../b").is_err());
/// ```
pub fn normalize_prefix(prefix: &str) -> Result<String, ConfigError> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    validate_key(trimmed)
        .map_err(|reason| ConfigError::InvalidTarget(format!("prefix '{}': {}", prefix, reason)))?;

    Ok(format!("{}/", trimmed))
}

/// A validated CDN distribution identifier
///
/// Accepts bare identifiers (`E123ABC`) and ARNs
/// (`arn:aws:cloudfront::123456789012:distribution/E123ABC`). The value is
/// kept verbatim so it can be embedded in a policy condition unchanged.
/// `AWS:SourceArn` conditions only ever match the ARN form.
///
/// # Examples
///
/// ```
/// use sitebinder::core::validation::DistributionId;
///
/// let id = DistributionId::new("E123ABC").unwrap();
/// assert_eq!(id.as_str(), "E123ABC");
///
/// assert!(DistributionId::new("").is_err());
/// assert!(DistributionId::new("E123 ABC").is_err());
/// assert!(DistributionId::new("*").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DistributionId(String);

impl DistributionId {
    /// Create a new validated identifier
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();

        let valid_len = !id.is_empty() && id.len() <= MAX_DISTRIBUTION_ID_LENGTH;
        let valid_chars = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '/' | '.' | '_' | '-'));

        // Wildcards would turn the binding condition into a pattern
        if !valid_len || !valid_chars {
            return Err(ConfigError::InvalidDistribution(id));
        }

        Ok(DistributionId(id))
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a full distribution ARN rather than a bare id
    pub fn is_arn(&self) -> bool {
        self.0.starts_with("arn:") && self.0.contains(":distribution/")
    }
}

impl AsRef<str> for DistributionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
