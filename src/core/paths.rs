//! core::paths
//!
//! Centralized path routing for the release workspace.
//!
//! # Workspace Layout
//!
//! Everything a release touches lives under one `work_dir`:
//! - `source/` - IG source checkout (unless a local source dir is given)
//! - `webroot/` - Destination site repository
//! - `history-template/` - History page template repository
//! - `ig-registry/` - IG registry repository
//! - `fhir-package-cache/` - Package cache shared by builds
//! - `temp/` - Scratch space for the publication step
//! - `release-assets/` - Oversized files kept out of version control
//! - `publisher.jar` - Default build tool location
//!
//! **Hard rule:** No code outside this module should compute these
//! locations by hand.
//!
//! # Example
//!
//! ```
//! use igrelease::core::paths::WorkPaths;
//! use std::path::PathBuf;
//!
//! let paths = WorkPaths::new("/work");
//! assert_eq!(paths.webroot(), PathBuf::from("/work/webroot"));
//! assert_eq!(
//!     WorkPaths::lock_path(&paths.webroot()),
//!     PathBuf::from("/work/webroot.lock")
//! );
//! ```

use std::path::{Path, PathBuf};

/// File name of the interrupted-publish marker inside a git directory.
pub const PUBLISH_MARKER: &str = "igrelease-publish-in-progress";

/// Centralized routing for workspace paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    root: PathBuf,
}

impl WorkPaths {
    /// Create workspace paths rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // =========================================================================
    // Repository checkouts
    // =========================================================================

    pub fn source(&self) -> PathBuf {
        self.root.join("source")
    }

    pub fn webroot(&self) -> PathBuf {
        self.root.join("webroot")
    }

    pub fn history_template(&self) -> PathBuf {
        self.root.join("history-template")
    }

    pub fn ig_registry(&self) -> PathBuf {
        self.root.join("ig-registry")
    }

    // =========================================================================
    // Build scratch
    // =========================================================================

    pub fn package_cache(&self) -> PathBuf {
        self.root.join("fhir-package-cache")
    }

    pub fn temp(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn release_assets(&self) -> PathBuf {
        self.root.join("release-assets")
    }

    /// Resolve a configured path against the workspace root.
    ///
    /// Absolute paths are returned unchanged.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    // =========================================================================
    // Derived locations
    // =========================================================================

    /// Lock file guarding a checkout: `<tree>.lock` beside the tree.
    pub fn lock_path(tree: &Path) -> PathBuf {
        let mut name = tree
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tree".into());
        name.push(".lock");
        tree.with_file_name(name)
    }

    /// Interrupted-publish marker for a repository's git directory.
    pub fn publish_marker(git_dir: &Path) -> PathBuf {
        git_dir.join(PUBLISH_MARKER)
    }

    /// Build output directory of a source tree.
    pub fn build_output(source: &Path) -> PathBuf {
        source.join("output")
    }

    /// Publication request file of a source tree.
    pub fn publication_request(source: &Path) -> PathBuf {
        source.join("publication-request.json")
    }
}
