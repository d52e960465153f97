//! git::interface
//!
//! Read-only repository inspection using git2.
//!
//! Network transfers and mutations (clone, fetch, sparse checkout, commit,
//! push, rebase) go through the system `git` binary in
//! [`command`](super::command), because git2 cannot do partial clones or
//! sparse checkouts. Everything that only *looks* at a local checkout
//! lives here.
//!
//! # Error Handling
//!
//! Git errors are categorized into typed variants:
//! - [`GitError::NotARepo`]: Path is not the root of a Git checkout
//! - [`GitError::RefNotFound`]: Requested ref does not exist
//! - [`GitError::Command`]: The git binary exited non-zero
//! - [`GitError::PushRejected`]: The remote refused a push
//! - [`GitError::RebaseConflict`]: A rebase stopped and was aborted
//!
//! # Example
//!
//! ```ignore
//! use igrelease::git::Git;
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("work/webroot"))?;
//! println!("webroot is at {}", git.head_oid()?.short(7));
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::types::{BranchName, Oid, TypeError};
use crate::process::ProcessError;

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Path is not the root of a Git checkout.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was opened
        path: PathBuf,
    },

    /// Repository is bare (no working directory).
    #[error("bare repository not supported")]
    BareRepo,

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound {
        /// The ref that was not found
        refname: String,
    },

    /// Invalid object id or ref name.
    #[error("invalid git value: {message}")]
    InvalidValue {
        /// Description of the problem
        message: String,
    },

    /// The git binary exited non-zero.
    #[error("`{command}` failed (exit {}): {}", status.map_or("signal".to_string(), |s| s.to_string()), last_line(stderr))]
    Command {
        /// The command line, without credentials
        command: String,
        /// Exit code, `None` if killed by a signal
        status: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// The remote refused a push (non-fast-forward or similar).
    #[error("push of {branch} rejected: {}", last_line(stderr))]
    PushRejected {
        /// Branch being pushed
        branch: String,
        /// Captured standard error
        stderr: String,
    },

    /// A rebase stopped on conflicts and was aborted.
    #[error("rebase onto origin/{branch} hit conflicts and was aborted")]
    RebaseConflict {
        /// Upstream branch
        branch: String,
    },

    /// Running the git binary failed (not found, timeout, i/o).
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

fn last_line(s: &str) -> &str {
    s.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

/// stderr fragments that mark a transient transport failure.
const NETWORK_MARKERS: &[&str] = &[
    "could not resolve host",
    "temporary failure in name resolution",
    "connection refused",
    "connection reset",
    "connection timed out",
    "operation timed out",
    "unable to access",
    "early eof",
    "rpc failed",
    "remote end hung up",
];

impl GitError {
    /// Whether this failure is transient and worth retrying.
    ///
    /// HTTP 4xx responses surface as "unable to access" too, but those are
    /// permission or existence problems and are not retried.
    pub fn is_network(&self) -> bool {
        let stderr = match self {
            GitError::Command { stderr, .. } => stderr.to_ascii_lowercase(),
            _ => return false,
        };
        if stderr.contains("returned error: 4") {
            return false;
        }
        NETWORK_MARKERS.iter().any(|m| stderr.contains(m))
    }

    /// Whether this failure is a process timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GitError::Process(ProcessError::Timeout { .. }))
    }

    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound | git2::ErrorCode::UnbornBranch => GitError::RefNotFound {
                refname: context.to_string(),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        GitError::InvalidValue {
            message: err.to_string(),
        }
    }
}

/// State of in-progress Git operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitState {
    /// No operation in progress.
    Clean,
    /// Rebase in progress.
    Rebase,
    /// Merge in progress.
    Merge,
    /// Cherry-pick, revert, bisect or am in progress.
    Other,
}

impl GitState {
    /// Check if any operation is in progress.
    ///
    /// # Example
    ///
    /// ```
    /// use igrelease::git::GitState;
    ///
    /// assert!(!GitState::Clean.is_in_progress());
    /// assert!(GitState::Rebase.is_in_progress());
    /// ```
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, GitState::Clean)
    }
}

/// Read-only handle on a local checkout.
pub struct Git {
    /// The underlying git2 repository
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl Git {
    // =========================================================================
    // Repository Opening and Info
    // =========================================================================

    /// Open the checkout rooted exactly at `path`.
    ///
    /// Unlike discovery, a directory nested inside some other repository
    /// is not mistaken for a checkout.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if `path` is not a checkout root
    /// - [`GitError::BareRepo`] if the repository has no working directory
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::open(path).map_err(|_| GitError::NotARepo {
            path: path.to_path_buf(),
        })?;

        if repo.is_bare() {
            return Err(GitError::BareRepo);
        }

        Ok(Self { repo })
    }

    /// Whether `path` looks like a checkout root (has a `.git` entry).
    pub fn is_checkout(path: &Path) -> bool {
        path.join(".git").exists()
    }

    /// Get direct access to the .git directory path.
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Whether the repository is a shallow clone.
    pub fn is_shallow(&self) -> bool {
        self.repo.is_shallow()
    }

    // =========================================================================
    // State Detection
    // =========================================================================

    /// Get the current Git state (rebase, merge, etc.).
    pub fn state(&self) -> GitState {
        match self.repo.state() {
            git2::RepositoryState::Clean => GitState::Clean,
            git2::RepositoryState::Rebase
            | git2::RepositoryState::RebaseInteractive
            | git2::RepositoryState::RebaseMerge
            | git2::RepositoryState::ApplyMailboxOrRebase => GitState::Rebase,
            git2::RepositoryState::Merge => GitState::Merge,
            _ => GitState::Other,
        }
    }

    // =========================================================================
    // Working Tree Status
    // =========================================================================

    /// Paths with any change (tracked or untracked), relative to the root.
    ///
    /// libgit2 ignores skip-worktree bits, so on a sparse checkout every
    /// path outside the sparse set shows up here. Use
    /// `GitCli::uncommitted_changes` for dirt checks.
    pub fn changed_paths(&self) -> Result<Vec<String>, GitError> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .map_err(|e| GitError::from_git2(e, "status"))?;
        Ok(statuses
            .iter()
            .filter_map(|e| e.path().map(String::from))
            .collect())
    }

    // =========================================================================
    // Ref Resolution
    // =========================================================================

    /// Get HEAD commit OID.
    ///
    /// # Errors
    ///
    /// - [`GitError::RefNotFound`] if HEAD is unborn (new repository)
    pub fn head_oid(&self) -> Result<Oid, GitError> {
        let commit = self
            .repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| GitError::from_git2(e, "HEAD"))?;

        Ok(Oid::new(commit.id().to_string())?)
    }

    /// Get the current branch name, if on a branch.
    ///
    /// Returns `None` if HEAD is detached or unborn.
    pub fn current_branch(&self) -> Result<Option<BranchName>, GitError> {
        let head = match self.repo.head() {
            Ok(h) => h,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(GitError::from_git2(e, "HEAD")),
        };

        if head.is_branch() {
            if let Some(name) = head.shorthand() {
                return Ok(Some(BranchName::new(name)?));
            }
        }

        Ok(None)
    }

    /// Number of commits reachable from HEAD.
    pub fn commit_count(&self) -> Result<usize, GitError> {
        let mut walk = self
            .repo
            .revwalk()
            .map_err(|e| GitError::from_git2(e, "revwalk"))?;
        walk.push_head()
            .map_err(|e| GitError::from_git2(e, "HEAD"))?;
        Ok(walk.count())
    }

    // =========================================================================
    // Remotes
    // =========================================================================

    /// Get the URL for a remote.
    ///
    /// Returns `None` if the remote doesn't exist.
    pub fn remote_url(&self, name: &str) -> Result<Option<String>, GitError> {
        match self.repo.find_remote(name) {
            Ok(remote) => Ok(remote.url().map(String::from)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_err(stderr: &str) -> GitError {
        GitError::Command {
            command: "git fetch".into(),
            status: Some(128),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn network_failures_are_classified() {
        for stderr in [
            "fatal: unable to access 'https://github.com/x/y/': Could not resolve host: github.com",
            "ssh: connect to host github.com port 22: Connection refused",
            "error: RPC failed; curl 56 GnuTLS recv error (-54)",
            "fatal: early EOF",
            "fatal: the remote end hung up unexpectedly",
            "fatal: unable to access 'https://x/': Connection timed out after 300000 ms",
        ] {
            assert!(command_err(stderr).is_network(), "{stderr}");
        }
    }

    #[test]
    fn structural_failures_are_not_network() {
        for stderr in [
            "fatal: Remote branch nope not found in upstream origin",
            "fatal: unable to access 'https://github.com/x/y/': The requested URL returned error: 403",
            "fatal: repository '/tmp/missing' does not exist",
            "fatal: Not possible to fast-forward, aborting.",
        ] {
            assert!(!command_err(stderr).is_network(), "{stderr}");
        }
        assert!(!GitError::BareRepo.is_network());
    }

    #[test]
    fn command_error_shows_last_stderr_line() {
        let err = command_err("hint: something\nfatal: the real reason\n");
        let msg = err.to_string();
        assert!(msg.contains("the real reason"));
        assert!(msg.contains("128"));
    }

    #[test]
    fn open_rejects_plain_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            Git::open(temp.path()),
            Err(GitError::NotARepo { .. })
        ));
        assert!(!Git::is_checkout(temp.path()));
    }
}
