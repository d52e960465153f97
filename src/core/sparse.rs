//! core::sparse
//!
//! Sparse checkout selection for the webroot.
//!
//! The build tool needs a handful of webroot paths no matter what the
//! operator asks for, so the effective checkout set is always the union
//! of the requested directories and [`MANDATORY_PATHS`].
//!
//! Patterns are emitted for `git sparse-checkout set --no-cone`, anchored
//! at the repository root so that `templates/` never matches a nested
//! `foo/templates/`.

/// Paths every sparse webroot checkout must contain.
///
/// Entries with a trailing `/` are directories, the rest are files.
pub const MANDATORY_PATHS: &[&str] = &[
    "templates/",
    "publish-setup.json",
    "package-registry.json",
    "package-feed.xml",
    "publication-feed.xml",
];

/// Requested and mandatory sparse paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseSpec {
    requested: Vec<String>,
}

impl SparseSpec {
    /// Create a spec from requested directories.
    ///
    /// Entries are normalized to `dir/` form; empty entries are dropped.
    pub fn new<I, S>(requested: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dirs: Vec<String> = Vec::new();
        for raw in requested {
            let trimmed = raw.as_ref().trim().trim_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            let dir = format!("{trimmed}/");
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        Self { requested: dirs }
    }

    /// Add a directory to the requested set.
    pub fn with_dir(mut self, dir: &str) -> Self {
        let extra = Self::new([dir]);
        for d in extra.requested {
            if !self.requested.contains(&d) {
                self.requested.push(d);
            }
        }
        self
    }

    /// Directories the operator asked for.
    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    /// The effective checkout set: mandatory paths first, then requested
    /// directories not already covered.
    pub fn effective(&self) -> Vec<String> {
        let mut set: Vec<String> = MANDATORY_PATHS.iter().map(|p| p.to_string()).collect();
        for dir in &self.requested {
            if !set.contains(dir) {
                set.push(dir.clone());
            }
        }
        set
    }

    /// Root-anchored patterns for `git sparse-checkout set --no-cone`.
    pub fn patterns(&self) -> Vec<String> {
        self.effective()
            .into_iter()
            .map(|p| format!("/{p}"))
            .collect()
    }
}
