//! engine::sync
//!
//! Repository Synchronizer: bring a local checkout of a [`RepositoryRef`]
//! in line with its remote branch.
//!
//! # Behavior
//!
//! - Missing or empty path: fresh clone (full, shallow or sparse)
//! - Existing checkout: verify `origin`, refuse foreign dirt, re-apply the
//!   sparse set, fetch the branch and fast-forward
//! - Anything else at the path: [`SyncError::PathConflict`]
//!
//! A [`WorkingRepo`] holds an exclusive [`TreeLock`] on its tree for its
//! whole lifetime, so one checkout is never driven by two callers.
//!
//! Transient transport failures are retried with exponential backoff
//! ([`retry::with_backoff`](super::retry::with_backoff)); every other
//! failure is returned on the first attempt.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::retry;
use crate::core::config::resolve::SyncPolicy;
use crate::core::config::RepositoryRef;
use crate::core::lock::{LockError, TreeLock};
use crate::core::paths::WorkPaths;
use crate::core::sparse::SparseSpec;
use crate::core::types::BranchName;
use crate::git::{CloneKind, Git, GitCli, GitError};

/// How a repository is checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// All history and every file.
    Full,
    /// Only the tip of the branch.
    Shallow,
    /// Partial clone limited to the effective sparse set.
    Sparse(SparseSpec),
}

impl SyncMode {
    fn clone_kind(&self) -> CloneKind {
        match self {
            SyncMode::Full => CloneKind::Full,
            SyncMode::Shallow => CloneKind::Shallow,
            SyncMode::Sparse(_) => CloneKind::Sparse,
        }
    }
}

/// Errors from repository synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure that survived every retry.
    #[error("network failure syncing {repo}: {source}")]
    Network {
        repo: String,
        #[source]
        source: GitError,
    },

    /// Git failure that retrying cannot fix.
    #[error("git failure syncing {repo}: {source}")]
    Structural {
        repo: String,
        #[source]
        source: GitError,
    },

    /// The local path holds something other than this repository.
    #[error("{path} cannot be used for {repo}: {reason}")]
    PathConflict {
        repo: String,
        path: PathBuf,
        reason: String,
    },

    /// The checkout has tracked changes this tool did not make.
    #[error("{path} has {changes} uncommitted change(s); commit or discard them first")]
    DirtyWorktree { path: PathBuf, changes: usize },

    /// Another operation owns the tree.
    #[error(transparent)]
    Locked(#[from] LockError),

    /// Filesystem error preparing the tree.
    #[error("cannot prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    fn from_git(repo: &str, err: GitError) -> Self {
        if err.is_network() {
            SyncError::Network {
                repo: repo.to_string(),
                source: err,
            }
        } else {
            SyncError::Structural {
                repo: repo.to_string(),
                source: err,
            }
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network { .. })
    }

    /// Whether the failure was a process timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            SyncError::Network { source, .. } | SyncError::Structural { source, .. } => {
                source.is_timeout()
            }
            _ => false,
        }
    }
}

/// A synchronized checkout, locked for the lifetime of this value.
#[derive(Debug)]
pub struct WorkingRepo {
    path: PathBuf,
    reference: Option<RepositoryRef>,
    branch: Option<BranchName>,
    shallow: bool,
    _lock: TreeLock,
}

impl WorkingRepo {
    /// Lock a local directory that is used as-is (a local source tree).
    pub fn local(path: &Path) -> Result<Self, SyncError> {
        if !path.is_dir() {
            return Err(SyncError::PathConflict {
                repo: "source".into(),
                path: path.to_path_buf(),
                reason: "local source directory does not exist".into(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            reference: None,
            branch: None,
            shallow: false,
            _lock: TreeLock::acquire(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The repository this checkout mirrors; `None` for a local tree.
    pub fn reference(&self) -> Option<&RepositoryRef> {
        self.reference.as_ref()
    }

    /// Branch currently materialized in the tree.
    pub fn branch(&self) -> Option<&BranchName> {
        self.branch.as_ref()
    }

    pub fn is_shallow(&self) -> bool {
        self.shallow
    }
}

/// Drives the system git to clone and update checkouts.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    git: GitCli,
    policy: SyncPolicy,
}

impl Synchronizer {
    pub fn new(git: GitCli, policy: SyncPolicy) -> Self {
        Self { git, policy }
    }

    /// Synchronize `reference` into its local path.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Locked`] if another operation owns the tree
    /// - [`SyncError::PathConflict`] if the path holds something else
    /// - [`SyncError::DirtyWorktree`] if the tree has foreign changes
    /// - [`SyncError::Network`] after `attempts` transport failures
    /// - [`SyncError::Structural`] for any other git failure
    pub async fn sync(
        &self,
        reference: &RepositoryRef,
        mode: &SyncMode,
    ) -> Result<WorkingRepo, SyncError> {
        let lock = TreeLock::acquire(&reference.path)?;
        let name = repo_label(reference);

        retry::with_backoff(&self.policy, &name, SyncError::is_retryable, |attempt| {
            debug!(repo = %name, attempt, "sync attempt");
            self.sync_once(reference, mode, &name)
        })
        .await?;

        let shallow = Git::open(&reference.path)
            .map(|g| g.is_shallow())
            .map_err(|e| SyncError::from_git(&name, e))?;
        info!(repo = %name, branch = %reference.branch, path = %reference.path.display(), "synchronized");

        Ok(WorkingRepo {
            path: reference.path.clone(),
            reference: Some(reference.clone()),
            branch: Some(reference.branch.clone()),
            shallow,
            _lock: lock,
        })
    }

    async fn sync_once(
        &self,
        reference: &RepositoryRef,
        mode: &SyncMode,
        name: &str,
    ) -> Result<(), SyncError> {
        let path = &reference.path;
        if Git::is_checkout(path) {
            self.update(reference, mode, name).await
        } else if is_absent_or_empty(path)? {
            self.fresh_clone(reference, mode, name).await
        } else {
            Err(SyncError::PathConflict {
                repo: name.to_string(),
                path: path.clone(),
                reason: "path exists and is not a git checkout".into(),
            })
        }
    }

    async fn fresh_clone(
        &self,
        reference: &RepositoryRef,
        mode: &SyncMode,
        name: &str,
    ) -> Result<(), SyncError> {
        let path = &reference.path;
        info!(repo = %name, mode = ?mode.clone_kind(), "cloning");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let result = async {
            self.git
                .clone_repo(
                    reference.url.as_str(),
                    reference.branch.as_str(),
                    path,
                    mode.clone_kind(),
                )
                .await?;
            if let SyncMode::Sparse(spec) = mode {
                self.git.sparse_checkout_set(path, &spec.patterns()).await?;
            }
            Ok::<(), GitError>(())
        }
        .await;

        if let Err(err) = result {
            // A half-written clone would turn the retry into a PathConflict.
            if path.exists() {
                if let Err(e) = fs::remove_dir_all(path) {
                    warn!(path = %path.display(), error = %e, "could not remove partial clone");
                }
            }
            return Err(SyncError::from_git(name, err));
        }
        Ok(())
    }

    async fn update(
        &self,
        reference: &RepositoryRef,
        mode: &SyncMode,
        name: &str,
    ) -> Result<(), SyncError> {
        let path = &reference.path;
        let git_err = |e| SyncError::from_git(name, e);

        let (shallow, marker) = {
            let repo = Git::open(path).map_err(git_err)?;
            let origin = repo.remote_url("origin").map_err(git_err)?;
            match origin {
                Some(url) if reference.url.same_repository(&url) => {}
                Some(url) => {
                    return Err(SyncError::PathConflict {
                        repo: name.to_string(),
                        path: path.clone(),
                        reason: format!("origin is {url}, expected {}", reference.url),
                    })
                }
                None => {
                    return Err(SyncError::PathConflict {
                        repo: name.to_string(),
                        path: path.clone(),
                        reason: "checkout has no origin remote".into(),
                    })
                }
            }
            (repo.is_shallow(), WorkPaths::publish_marker(repo.git_dir()))
        };

        if marker.exists() {
            self.recover_interrupted_publish(path, &marker, name).await?;
        } else {
            let changes = self.git.uncommitted_changes(path).await.map_err(git_err)?;
            if !changes.is_empty() {
                return Err(SyncError::DirtyWorktree {
                    path: path.clone(),
                    changes: changes.len(),
                });
            }
        }

        if let SyncMode::Sparse(spec) = mode {
            self.git
                .sparse_checkout_set(path, &spec.patterns())
                .await
                .map_err(git_err)?;
        }

        let branch = reference.branch.as_str();
        let shallow = shallow || *mode == SyncMode::Shallow;
        self.git
            .fetch_branch(path, branch, shallow)
            .await
            .map_err(git_err)?;
        let upstream = format!("origin/{branch}");
        if shallow {
            self.git
                .checkout_reset(path, branch, &upstream)
                .await
                .map_err(git_err)?;
        } else {
            self.git.checkout(path, branch).await.map_err(git_err)?;
            self.git
                .merge_ff_only(path, &upstream)
                .await
                .map_err(git_err)?;
        }
        Ok(())
    }

    /// Discard the leftovers of a publish that never reached its commit.
    async fn recover_interrupted_publish(
        &self,
        path: &Path,
        marker: &Path,
        name: &str,
    ) -> Result<(), SyncError> {
        let git_err = |e| SyncError::from_git(name, e);
        let subpath = fs::read_to_string(marker)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        warn!(repo = %name, subpath = %subpath, "resetting tree left by an interrupted publish");

        let in_rebase = Git::open(path)
            .map(|g| g.state().is_in_progress())
            .map_err(git_err)?;
        if in_rebase {
            self.git.rebase_abort(path).await.map_err(git_err)?;
        }
        self.git.reset_hard(path).await.map_err(git_err)?;
        if !subpath.is_empty() {
            self.git.clean(path, &subpath).await.map_err(git_err)?;
        }
        fs::remove_file(marker).map_err(|e| SyncError::Io {
            path: marker.to_path_buf(),
            source: e,
        })
    }

    /// Put `branch` in the tree: track it if the remote has it, otherwise
    /// create it from `origin/<base>`.
    ///
    /// The local branch is always reset to the remote state, so a rerun
    /// after a failed push starts from what the remote actually holds.
    pub async fn materialize_branch(
        &self,
        repo: &mut WorkingRepo,
        branch: &BranchName,
        base: &BranchName,
    ) -> Result<(), SyncError> {
        let name = repo
            .reference
            .as_ref()
            .map(repo_label)
            .unwrap_or_else(|| repo.path.display().to_string());
        let path = repo.path.clone();
        let shallow = repo.shallow;

        let exists = retry::with_backoff(&self.policy, &name, SyncError::is_retryable, |_| {
            let path = path.clone();
            let name = name.clone();
            async move {
                self.git
                    .remote_has_branch(&path, branch.as_str())
                    .await
                    .map_err(|e| SyncError::from_git(&name, e))
            }
        })
        .await?;

        let start = if exists { branch } else { base };
        retry::with_backoff(&self.policy, &name, SyncError::is_retryable, |_| {
            let path = path.clone();
            let name = name.clone();
            async move {
                self.git
                    .fetch_branch(&path, start.as_str(), shallow)
                    .await
                    .map_err(|e| SyncError::from_git(&name, e))
            }
        })
        .await?;

        let upstream = format!("origin/{start}");
        self.git
            .checkout_reset(&path, branch.as_str(), &upstream)
            .await
            .map_err(|e| SyncError::from_git(&name, e))?;

        info!(repo = %name, branch = %branch, from = %upstream, created = !exists, "branch materialized");
        repo.branch = Some(branch.clone());
        Ok(())
    }
}

fn repo_label(reference: &RepositoryRef) -> String {
    reference
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| reference.url.to_string())
}

fn is_absent_or_empty(path: &Path) -> Result<bool, SyncError> {
    if path.is_file() {
        return Ok(false);
    }
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(SyncError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
