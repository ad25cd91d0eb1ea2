//! Local asset tree enumeration
//!
//! Walks a root directory and returns every publishable file as a
//! `/`-separated relative path. Results are sorted lexicographically so a
//! run never depends on filesystem arrival order.
//!
//! Symbolic links are followed. A link resolving to a directory that is
//! already on the current ancestor chain is a cycle and aborts the scan.
//! Ignored directories are pruned from the walk and never read.

use crate::core::validation::validate_key;
use crate::error::{ConfigError, ScanError};
use regex::RegexSet;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Predicate over a relative path; `true` excludes the entry
///
/// Applied to directories as well as files. An excluded directory is not
/// descended into.
pub type IgnorePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Enumerates a local directory tree into an ordered set of relative paths
///
/// # Examples
///
/// ```no_run
/// use sitebinder::core::scan::FileSetScanner;
///
/// let paths = FileSetScanner::new("public")
///     .with_ignore(|path| path.ends_with(".map"))
///     .scan()?;
/// for path in paths {
///     println!("{}", path);
/// }
/// # Ok::<(), sitebinder::error::ScanError>(())
/// ```
#[derive(Clone)]
pub struct FileSetScanner {
    root: PathBuf,
    ignore: Option<IgnorePredicate>,
}

impl FileSetScanner {
    /// Create a scanner for `root` that excludes nothing
    pub fn new(root: impl AsRef<Path>) -> Self {
        FileSetScanner {
            root: root.as_ref().to_path_buf(),
            ignore: None,
        }
    }

    /// Exclude entries matching `predicate`
    pub fn with_ignore<F>(self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.with_ignore_predicate(Arc::new(predicate))
    }

    /// Exclude entries matching a shared predicate
    pub fn with_ignore_predicate(mut self, predicate: IgnorePredicate) -> Self {
        self.ignore = Some(predicate);
        self
    }

    /// Root directory being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate the tree
    ///
    /// # Errors
    ///
    /// - `UnreadableRoot` / `NotADirectory` for a bad root
    /// - `SymlinkCycle` when a link resolves to one of its ancestors
    /// - `Io` for unreadable entries and dangling links
    /// - `NonUtf8Path` / `InvalidKey` for names that cannot become object keys
    pub fn scan(&self) -> Result<Vec<String>, ScanError> {
        let metadata = fs::metadata(&self.root).map_err(|source| ScanError::UnreadableRoot {
            path: self.root.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(ScanError::NotADirectory(self.root.clone()));
        }

        let mut paths = BTreeSet::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| match self.relative(entry.path()) {
                Some(rel) if !rel.is_empty() && self.is_ignored(&rel) => {
                    debug!("Ignoring {}", rel);
                    false
                }
                _ => true,
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => match self.walk_error(err) {
                    Some(err) => return Err(err),
                    None => continue,
                },
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }

            let rel = self
                .relative(entry.path())
                .ok_or_else(|| ScanError::NonUtf8Path(entry.path().to_path_buf()))?;
            if !file_type.is_file() {
                debug!("Skipping special file {}", rel);
                continue;
            }

            validate_key(&rel).map_err(|reason| ScanError::InvalidKey {
                key: rel.clone(),
                reason,
            })?;
            paths.insert(rel);
        }

        info!("Scanned {:?}: {} files", self.root, paths.len());
        Ok(paths.into_iter().collect())
    }

    /// `/`-separated path of `path` below the root, `None` if not UTF-8
    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let segments = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(segments.join("/"))
    }

    /// Map a walk error; `None` when it concerns an ignored entry
    fn walk_error(&self, err: walkdir::Error) -> Option<ScanError> {
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        // Links are resolved before the ignore filter sees them
        if let Some(rel) = self.relative(&path) {
            if !rel.is_empty() && self.is_ignored(&rel) {
                debug!("Ignoring {}", rel);
                return None;
            }
        }

        if let Some(ancestor) = err.loop_ancestor() {
            return Some(ScanError::SymlinkCycle {
                link: path,
                target: ancestor.to_path_buf(),
            });
        }

        let source = err
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed"));
        Some(ScanError::Io { path, source })
    }

    fn is_ignored(&self, rel: &str) -> bool {
        self.ignore.as_ref().map(|p| p(rel)).unwrap_or(false)
    }
}

impl std::fmt::Debug for FileSetScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSetScanner")
            .field("root", &self.root)
            .field("ignore", &self.ignore.is_some())
            .finish()
    }
}

/// Predicate excluding any path with a segment starting with `.`
pub fn hidden_entries() -> IgnorePredicate {
    Arc::new(|rel: &str| rel.split('/').any(|segment| segment.starts_with('.')))
}

/// Predicate excluding paths matching any of the given regexes
pub fn pattern_ignore(patterns: &[String]) -> Result<IgnorePredicate, ConfigError> {
    // Compile individually first so the error names the offending pattern
    for pattern in patterns {
        regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
    }

    let set = RegexSet::new(patterns).map_err(|source| ConfigError::InvalidPattern {
        pattern: patterns.join(" | "),
        source,
    })?;
    Ok(Arc::new(move |rel: &str| set.is_match(rel)))
}

/// Combine predicates; an entry is excluded if any predicate excludes it
pub fn any_of(predicates: Vec<IgnorePredicate>) -> Option<IgnorePredicate> {
    match predicates.len() {
        0 => None,
        1 => predicates.into_iter().next(),
        _ => Some(Arc::new(move |rel: &str| predicates.iter().any(|p| p(rel)))),
    }
}
