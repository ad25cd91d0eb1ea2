//! Assets: local files destined for publication
//!
//! An asset carries its content, resolved content type and SHA-256
//! fingerprint. Assets are immutable for the duration of a publish run;
//! the bytes hashed are exactly the bytes uploaded.

use crate::core::content_type::ContentTypeResolver;
use crate::core::pool::{run_bounded, TaskOutcome};
use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Content-derived digest (lowercase hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a byte slice
    ///
    /// # Examples
    ///
    /// ```
    /// use sitebinder::core::asset::Fingerprint;
    ///
    /// let fp = Fingerprint::of(b"hello");
    /// assert_eq!(
    ///     fp.as_str(),
    ///     "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    /// );
    /// ```
    pub fn of(bytes: &[u8]) -> Self {
        Fingerprint(hex::encode(Sha256::digest(bytes)))
    }

    /// Parse a stored hex fingerprint (case-insensitive)
    pub fn from_hex(value: &str) -> Option<Self> {
        let bytes = hex::decode(value).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        Some(Fingerprint(hex::encode(bytes)))
    }

    /// Full hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A local file destined for publication
#[derive(Debug, Clone)]
pub struct Asset {
    path: String,
    content: Arc<[u8]>,
    content_type: String,
    fingerprint: Fingerprint,
}

impl Asset {
    /// Create an asset, computing its fingerprint
    pub fn new(
        path: impl Into<String>,
        content: impl Into<Arc<[u8]>>,
        content_type: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let fingerprint = Fingerprint::of(&content);
        Asset {
            path: path.into(),
            content,
            content_type: content_type.into(),
            fingerprint,
        }
    }

    /// Create an asset whose content type comes from `resolver`
    pub fn resolved(
        path: impl Into<String>,
        content: impl Into<Arc<[u8]>>,
        resolver: &ContentTypeResolver,
    ) -> Self {
        let path = path.into();
        let content_type = resolver.resolve(&path).to_string();
        Self::new(path, content, content_type)
    }

    /// Relative path (unique within a run)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Content bytes
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Resolved content type
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Content fingerprint
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Assets of one run, ordered and unique by relative path
#[derive(Debug, Clone, Default)]
pub struct AssetSet {
    assets: BTreeMap<String, Asset>,
}

impl AssetSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an asset, replacing any previous asset with the same path
    pub fn insert(&mut self, asset: Asset) -> Option<Asset> {
        self.assets.insert(asset.path.clone(), asset)
    }

    /// Look up an asset by relative path
    pub fn get(&self, path: &str) -> Option<&Asset> {
        self.assets.get(path)
    }

    /// Whether an asset exists at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }

    /// Assets in lexicographic path order
    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Relative paths in lexicographic order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    /// Number of assets
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Total content size in bytes
    pub fn total_size(&self) -> u64 {
        self.assets.values().map(Asset::size).sum()
    }
}

impl FromIterator<Asset> for AssetSet {
    fn from_iter<I: IntoIterator<Item = Asset>>(iter: I) -> Self {
        let mut set = AssetSet::new();
        for asset in iter {
            set.insert(asset);
        }
        set
    }
}

/// Read, fingerprint and resolve the scanned `paths` under `root`
///
/// Files are processed on up to `workers` threads; reading and hashing are
/// independent per asset.
pub fn load_assets(
    root: &Path,
    paths: &[String],
    resolver: &ContentTypeResolver,
    workers: usize,
) -> Result<AssetSet, ScanError> {
    let outcomes = run_bounded(paths, workers, None, |rel| {
        let full = root.join(rel);
        let content = std::fs::read(&full).map_err(|source| ScanError::Io { path: full, source })?;
        let asset = Asset::resolved(rel.clone(), content, resolver);
        debug!(
            "Loaded {} ({} bytes, {}, {})",
            asset.path(),
            asset.size(),
            asset.content_type(),
            asset.fingerprint().short()
        );
        Ok::<Asset, ScanError>(asset)
    });

    let mut set = AssetSet::new();
    for outcome in outcomes {
        if let TaskOutcome::Completed(result) = outcome {
            set.insert(result?);
        }
    }
    Ok(set)
}
