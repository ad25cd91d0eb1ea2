//! Extension-based content type resolution
//!
//! A fixed table covers the asset types a static site publishes; anything
//! else falls back to `application/octet-stream`. Overrides are consulted
//! before the fixed table.

use crate::error::ConfigError;
use std::collections::HashMap;

/// Content type returned when no table entry matches
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Built-in extension table (extensions are lower-case)
const DEFAULT_TABLE: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
];

/// Maps relative paths to MIME types
///
/// # Examples
///
/// ```
/// use sitebinder::core::content_type::ContentTypeResolver;
///
/// let resolver = ContentTypeResolver::new();
/// assert_eq!(resolver.resolve("index.html"), "text/html");
/// assert_eq!(resolver.resolve("img/Logo.PNG"), "image/png");
/// assert_eq!(resolver.resolve("README"), "application/octet-stream");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContentTypeResolver {
    overrides: HashMap<String, String>,
}

impl ContentTypeResolver {
    /// Create a resolver using only the built-in table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver with extension overrides
    ///
    /// Extensions may be given with or without a leading dot and in any case.
    pub fn with_overrides<I, K, V>(overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut resolver = Self::new();
        for (extension, content_type) in overrides {
            resolver.add_override(extension.as_ref(), content_type.as_ref())?;
        }
        Ok(resolver)
    }

    /// Register a single override
    pub fn add_override(&mut self, extension: &str, content_type: &str) -> Result<(), ConfigError> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        let invalid = || ConfigError::InvalidContentType {
            extension: extension.to_string(),
            content_type: content_type.to_string(),
        };

        if ext.is_empty() || ext.contains('/') || ext.contains('.') {
            return Err(invalid());
        }

        // type/subtype, no whitespace
        let well_formed = content_type
            .split_once('/')
            .map(|(kind, sub)| !kind.is_empty() && !sub.is_empty())
            .unwrap_or(false)
            && !content_type.chars().any(char::is_whitespace);
        if !well_formed {
            return Err(invalid());
        }

        self.overrides.insert(ext, content_type.to_string());
        Ok(())
    }

    /// Resolve the content type of a relative path
    pub fn resolve(&self, path: &str) -> &str {
        let Some(ext) = extension(path) else {
            return FALLBACK_CONTENT_TYPE;
        };
        let ext = ext.to_ascii_lowercase();

        if let Some(content_type) = self.overrides.get(&ext) {
            return content_type;
        }

        DEFAULT_TABLE
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, content_type)| *content_type)
            .unwrap_or(FALLBACK_CONTENT_TYPE)
    }
}

/// Final extension of the last path component
///
/// `archive.tar.gz` has extension `gz`; `README` and `dir.d/README` have none.
fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.').map(|idx| &name[idx + 1..])
}
