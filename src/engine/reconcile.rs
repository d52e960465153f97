//! engine::reconcile
//!
//! Artifact Reconciler: keep oversized build artifacts out of version
//! control.
//!
//! Files at or above [`SIZE_THRESHOLD`] are moved out of the publish tree
//! into the release-assets directory, keeping their relative path, and
//! their paths join the exclude list. User exclude patterns are unioned in.
//! The resulting list is sorted and deduplicated, so the same tree and the
//! same patterns always give the same list.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files of this size or larger are never committed (100 MiB).
pub const SIZE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// A file moved out of the publish tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OversizedFile {
    /// Path relative to the publish tree, `/`-separated.
    pub path: String,
    pub size: u64,
}

/// Result of reconciling one publish tree.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub publish_tree: PathBuf,
    pub oversized: Vec<OversizedFile>,
    /// Sorted, deduplicated exclude list.
    pub exclude: Vec<String>,
}

/// Errors from the reconciler.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("publish tree {0} does not exist")]
    MissingTree(PathBuf),

    #[error("invalid exclude pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("cannot walk {path}: {message}")]
    Walk { path: PathBuf, message: String },

    #[error("cannot move {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// =============================================================================
// Exclude patterns
// =============================================================================

#[derive(Debug, Clone)]
enum Rule {
    /// `dir/`: the directory and everything below it.
    Prefix(String),
    /// Glob against the relative path or the file name.
    Glob(Pattern),
}

/// Compiled exclude list.
///
/// # Example
///
/// ```
/// use igrelease::engine::reconcile::ExcludeMatcher;
///
/// let m = ExcludeMatcher::new(&["build/".to_string(), "*.zip".to_string()]).unwrap();
/// assert!(m.is_excluded("build/a/b.txt"));
/// assert!(m.is_excluded("downloads/full-ig.zip"));
/// assert!(!m.is_excluded("index.html"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    rules: Vec<Rule>,
}

impl ExcludeMatcher {
    /// Compile `patterns`; blank entries are ignored.
    pub fn new(patterns: &[String]) -> Result<Self, ReconcileError> {
        let mut rules = Vec::new();
        for raw in patterns {
            let pattern = raw.trim().trim_start_matches('/');
            if pattern.is_empty() {
                continue;
            }
            if let Some(dir) = pattern.strip_suffix('/') {
                rules.push(Rule::Prefix(dir.to_string()));
            } else {
                let glob = Pattern::new(pattern).map_err(|e| ReconcileError::InvalidPattern {
                    pattern: raw.clone(),
                    message: e.msg.to_string(),
                })?;
                rules.push(Rule::Glob(glob));
            }
        }
        Ok(Self { rules })
    }

    /// Whether `rel` (a `/`-separated path relative to the tree root) is
    /// excluded, either itself or through an excluded ancestor directory.
    pub fn is_excluded(&self, rel: &str) -> bool {
        let name = rel.rsplit('/').next().unwrap_or(rel);
        self.rules.iter().any(|rule| match rule {
            Rule::Prefix(dir) => {
                rel == dir
                    || rel
                        .strip_prefix(dir.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            Rule::Glob(glob) => glob.matches(rel) || glob.matches(name),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Relative `/`-separated form of `path` under `root`.
pub(crate) fn relative_slash(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

// =============================================================================
// Reconcile
// =============================================================================

/// Segregate oversized files of `publish_tree` into `assets_dir` and build
/// the exclude list.
///
/// # Errors
///
/// - [`ReconcileError::MissingTree`] if `publish_tree` is not a directory
/// - [`ReconcileError::InvalidPattern`] for a malformed user pattern
/// - [`ReconcileError::Walk`] / [`ReconcileError::Io`] on filesystem errors
pub fn reconcile(
    publish_tree: &Path,
    assets_dir: &Path,
    threshold: u64,
    user_patterns: &[String],
) -> Result<Reconciliation, ReconcileError> {
    if !publish_tree.is_dir() {
        return Err(ReconcileError::MissingTree(publish_tree.to_path_buf()));
    }
    // Fail on a bad pattern before anything is moved.
    ExcludeMatcher::new(user_patterns)?;

    let mut oversized = Vec::new();
    let walker = WalkDir::new(publish_tree)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| ReconcileError::Walk {
            path: e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| publish_tree.to_path_buf()),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|e| ReconcileError::Walk {
                path: entry.path().to_path_buf(),
                message: e.to_string(),
            })?
            .len();
        if size < threshold {
            continue;
        }
        if let Some(rel) = relative_slash(publish_tree, entry.path()) {
            oversized.push(OversizedFile { path: rel, size });
        }
    }

    for file in &oversized {
        let from = publish_tree.join(&file.path);
        let to = assets_dir.join(&file.path);
        move_file(&from, &to)?;
        warn!(
            path = %file.path,
            size_mib = file.size / (1024 * 1024),
            assets = %assets_dir.display(),
            "oversized file moved out of the publish tree"
        );
    }

    let mut exclude: Vec<String> = oversized
        .iter()
        .map(|f| f.path.clone())
        .chain(
            user_patterns
                .iter()
                .map(|p| p.trim().trim_start_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        )
        .collect();
    exclude.sort();
    exclude.dedup();

    info!(
        tree = %publish_tree.display(),
        oversized = oversized.len(),
        excluded = exclude.len(),
        "reconciled"
    );
    Ok(Reconciliation {
        publish_tree: publish_tree.to_path_buf(),
        oversized,
        exclude,
    })
}

/// Rename, falling back to copy and remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<(), ReconcileError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ReconcileError::Io { path, source }
    };
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    debug!(from = %from.display(), to = %to.display(), "rename failed, copying");
    fs::copy(from, to).map_err(io_err(from))?;
    fs::remove_file(from).map_err(io_err(from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    /// Sparse file of `size` bytes.
    fn sized(path: &Path, size: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::File::create(path).unwrap().set_len(size).unwrap();
    }

    fn patterns(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn threshold_is_inclusive() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("output");
        let assets = temp.path().join("assets");
        sized(&tree.join("big/full-ig.zip"), 100 * MIB);
        sized(&tree.join("almost.zip"), 99 * MIB);
        fs::write(tree.join("index.html"), "<html/>").unwrap();

        let r = reconcile(&tree, &assets, SIZE_THRESHOLD, &[]).unwrap();

        assert_eq!(
            r.oversized,
            vec![OversizedFile {
                path: "big/full-ig.zip".into(),
                size: 100 * MIB
            }]
        );
        assert_eq!(r.exclude, vec!["big/full-ig.zip".to_string()]);
        assert!(!tree.join("big/full-ig.zip").exists());
        assert_eq!(
            fs::metadata(assets.join("big/full-ig.zip")).unwrap().len(),
            100 * MIB
        );
        assert!(tree.join("almost.zip").exists());
    }

    #[test]
    fn user_patterns_are_unioned_sorted_and_deduplicated() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("output");
        sized(&tree.join("a.bin"), 10);
        sized(&tree.join("z.bin"), 10);

        let r = reconcile(
            &tree,
            &temp.path().join("assets"),
            5,
            &patterns(&["*.log", "temp/", "a.bin", "*.log", " "]),
        )
        .unwrap();
        assert_eq!(r.exclude, vec!["*.log", "a.bin", "temp/", "z.bin"]);
    }

    #[test]
    fn deterministic_across_runs() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("output");
        for name in ["c", "a", "b/x", "b/a"] {
            sized(&tree.join(name), 8);
        }
        let first = reconcile(&tree, &temp.path().join("a1"), 8, &[]).unwrap();
        for name in ["c", "a", "b/x", "b/a"] {
            sized(&tree.join(name), 8);
        }
        let second = reconcile(&tree, &temp.path().join("a2"), 8, &[]).unwrap();
        assert_eq!(first.exclude, second.exclude);
        assert_eq!(first.exclude, vec!["a", "b/a", "b/x", "c"]);
    }

    #[test]
    fn missing_tree_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = reconcile(&temp.path().join("nope"), temp.path(), SIZE_THRESHOLD, &[]).unwrap_err();
        assert!(matches!(err, ReconcileError::MissingTree(_)));
    }

    #[test]
    fn invalid_pattern_moves_nothing() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("output");
        sized(&tree.join("big"), 10);
        let err = reconcile(&tree, &temp.path().join("assets"), 5, &patterns(&["[oops"])).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidPattern { .. }));
        assert!(tree.join("big").exists());
    }

    mod matcher {
        use super::super::ExcludeMatcher;

        fn m(p: &[&str]) -> ExcludeMatcher {
            ExcludeMatcher::new(&p.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
        }

        #[test]
        fn directory_prefix() {
            let m = m(&["temp/"]);
            assert!(m.is_excluded("temp"));
            assert!(m.is_excluded("temp/a/b"));
            assert!(!m.is_excluded("temporary/a"));
            assert!(!m.is_excluded("x/temp/a"));
        }

        #[test]
        fn glob_matches_path_or_name() {
            let m = m(&["*.zip", "site/*.json"]);
            assert!(m.is_excluded("deep/dir/full.zip"));
            assert!(m.is_excluded("site/package.json"));
            assert!(!m.is_excluded("other/package.json"));
        }

        #[test]
        fn leading_slash_is_ignored() {
            let m = m(&["/qa.html"]);
            assert!(m.is_excluded("qa.html"));
        }

        #[test]
        fn empty_excludes_nothing() {
            let m = m(&[]);
            assert!(m.is_empty());
            assert!(!m.is_excluded("anything"));
        }
    }
}
