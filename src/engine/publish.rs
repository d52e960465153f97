//! engine::publish
//!
//! Publisher: mirror a publish tree into one subpath of a destination
//! checkout, commit exactly that subpath and push it.
//!
//! # Guarantees
//!
//! - Only `<subpath>` (plus explicitly named extra paths) is staged and
//!   committed; sibling folders are never touched, even when they carry
//!   pending local changes.
//! - No staged change means no commit, but the branch is still pushed so an
//!   earlier unpushed commit reaches the remote.
//! - A rejected push gets exactly one `pull --rebase` and one more push.
//!   Force push is used only when the caller asks for it and then replaces
//!   the rebase.
//!
//! While the tree is being rewritten an interrupted-publish marker sits in
//! the git directory; the Synchronizer uses it to tell our own dirt from a
//! user's.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::reconcile::{relative_slash, ExcludeMatcher, ReconcileError};
use super::sync::WorkingRepo;
use crate::core::paths::WorkPaths;
use crate::core::types::{BranchName, Oid, Subpath};
use crate::git::{Git, GitCli, GitError, PushOutcome};

/// First line of a `.gitignore` this tool owns.
pub const GITIGNORE_MARKER: &str = "# managed by igrelease";

/// Commit message of a milestone publish.
pub fn milestone_message(package_id: &str, version: &str, subpath: &Subpath) -> String {
    format!("Publish {package_id} {version} to {subpath}")
}

/// Commit message of a preview publish.
pub fn preview_message(package_id: &str, subpath: &Subpath) -> String {
    format!("Update preview of {package_id} in {subpath}")
}

/// Commit message of a registry update.
pub fn registry_message(package_id: &str, version: &str) -> String {
    format!("Register {package_id} {version}")
}

/// How to commit and push.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub branch: BranchName,
    pub message: String,
    /// Overwrite the remote branch instead of rebasing onto it.
    pub force: bool,
    /// Pause before the single `pull --rebase` after a rejection.
    pub retry_delay: Duration,
    /// Maintain `<subpath>/.gitignore` from the exclude list.
    pub manage_gitignore: bool,
    /// Further repository-relative paths committed with the subpath when
    /// they exist.
    pub extra_paths: Vec<String>,
}

/// Where a publish landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub repository: PathBuf,
    pub branch: BranchName,
    /// HEAD after the push.
    pub oid: Oid,
    /// False when nothing changed and no commit was made.
    pub created: bool,
}

/// Errors from the Publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The subpath (or one of its ancestors) is a file.
    #[error("cannot publish to {path}: {reason}")]
    PathCollision { path: PathBuf, reason: String },

    /// Push still rejected after one rebase.
    #[error("push to {branch} rejected: {stderr}")]
    PushRejected { branch: String, stderr: String },

    /// The rebase onto the remote branch conflicted and was aborted.
    #[error("rebase onto origin/{branch} conflicted; the remote branch changed the same files")]
    RebaseConflict { branch: String },

    #[error(transparent)]
    Exclude(#[from] ReconcileError),

    #[error(transparent)]
    Git(GitError),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<GitError> for PublishError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::RebaseConflict { branch } => PublishError::RebaseConflict { branch },
            GitError::PushRejected { branch, stderr } => PublishError::PushRejected { branch, stderr },
            other => PublishError::Git(other),
        }
    }
}

impl PublishError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PublishError::Git(e) if e.is_timeout())
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PublishError {
    let path = path.to_path_buf();
    move |source| PublishError::Io { path, source }
}

// =============================================================================
// Interrupted-publish marker
// =============================================================================

/// Record that `pathspec` of `repo` is about to be rewritten.
pub fn mark_in_progress(repo: &Path, pathspec: &str) -> Result<PathBuf, PublishError> {
    let marker = WorkPaths::publish_marker(Git::open(repo)?.git_dir());
    fs::write(&marker, format!("{pathspec}\n")).map_err(io_err(&marker))?;
    debug!(marker = %marker.display(), pathspec, "publish marker written");
    Ok(marker)
}

/// Remove the marker of `repo`, if any.
pub fn clear_marker(repo: &Path) -> Result<(), PublishError> {
    let marker = WorkPaths::publish_marker(Git::open(repo)?.git_dir());
    match fs::remove_file(&marker) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(&marker)(e)),
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Commits and pushes publish trees.
#[derive(Debug, Clone)]
pub struct Publisher {
    git: GitCli,
}

impl Publisher {
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }

    /// Mirror `publish_tree` into `<repo>/<subpath>`, commit and push.
    ///
    /// When `publish_tree` already is `<repo>/<subpath>` (the build wrote
    /// into the checkout) nothing is copied; excluded files are still
    /// removed.
    ///
    /// # Errors
    ///
    /// - [`PublishError::PathCollision`] if a file sits where the subpath
    ///   or one of its parents should be
    /// - [`PublishError::PushRejected`] / [`PublishError::RebaseConflict`]
    ///   when the rebase-retry does not resolve a rejected push
    pub async fn publish(
        &self,
        repo: &WorkingRepo,
        publish_tree: &Path,
        subpath: &Subpath,
        exclude: &[String],
        opts: &PublishOptions,
    ) -> Result<CommitRef, PublishError> {
        let root = repo.path();
        check_target(root, subpath)?;
        let matcher = ExcludeMatcher::new(exclude)?;
        let target = subpath.under(root);

        mark_in_progress(root, subpath.as_str())?;
        fs::create_dir_all(&target).map_err(io_err(&target))?;
        let preserve: &[&str] = if opts.manage_gitignore { &[".gitignore"] } else { &[] };
        if same_dir(publish_tree, &target) {
            debug!(tree = %target.display(), "publish tree is the target; mirroring skipped");
            prune(&target, &target, &matcher, preserve)?;
        } else {
            mirror(publish_tree, &target, &matcher, preserve)?;
        }
        if opts.manage_gitignore {
            write_gitignore(&target, exclude)?;
        }

        let mut pathspecs = vec![subpath.as_str().to_string()];
        pathspecs.extend(
            opts.extra_paths
                .iter()
                .filter(|p| root.join(p).exists())
                .cloned(),
        );
        self.commit_and_push(root, &pathspecs, opts).await
    }

    /// Commit whatever changed at `paths` (already written by someone else)
    /// and push.
    pub async fn publish_paths(
        &self,
        repo: &WorkingRepo,
        paths: &[String],
        opts: &PublishOptions,
    ) -> Result<CommitRef, PublishError> {
        self.commit_and_push(repo.path(), paths, opts).await
    }

    async fn commit_and_push(
        &self,
        root: &Path,
        pathspecs: &[String],
        opts: &PublishOptions,
    ) -> Result<CommitRef, PublishError> {
        let specs: Vec<&str> = pathspecs.iter().map(String::as_str).collect();
        self.git.add_all(root, &specs).await?;
        let created = self.git.has_staged_changes(root, &specs).await?;
        if created {
            self.git.commit_only(root, &opts.message, &specs).await?;
            info!(repo = %root.display(), message = %opts.message, "committed");
        } else {
            info!(repo = %root.display(), "nothing changed; no commit");
        }
        clear_marker(root)?;

        self.push(root, opts).await?;
        let oid = Git::open(root)?.head_oid()?;
        info!(repo = %root.display(), branch = %opts.branch, oid = %oid.short(8), "pushed");
        Ok(CommitRef {
            repository: root.to_path_buf(),
            branch: opts.branch.clone(),
            oid,
            created,
        })
    }

    async fn push(&self, root: &Path, opts: &PublishOptions) -> Result<(), PublishError> {
        let branch = opts.branch.as_str();
        let stderr = match self.git.push(root, branch, opts.force).await? {
            PushOutcome::Pushed => return Ok(()),
            PushOutcome::Rejected { stderr } if opts.force => {
                return Err(PublishError::PushRejected {
                    branch: branch.to_string(),
                    stderr,
                })
            }
            PushOutcome::Rejected { stderr } => stderr,
        };

        warn!(branch, delay_ms = opts.retry_delay.as_millis() as u64, "push rejected; rebasing onto the remote branch");
        debug!(stderr = %stderr.trim(), "first push rejection");
        tokio::time::sleep(opts.retry_delay).await;
        self.git.pull_rebase(root, branch).await?;

        match self.git.push(root, branch, false).await? {
            PushOutcome::Pushed => Ok(()),
            PushOutcome::Rejected { stderr } => Err(PublishError::PushRejected {
                branch: branch.to_string(),
                stderr,
            }),
        }
    }
}

// =============================================================================
// Tree mirroring
// =============================================================================

/// Every ancestor of the subpath, and the subpath itself, must be a
/// directory or absent.
fn check_target(root: &Path, subpath: &Subpath) -> Result<(), PublishError> {
    let mut current = root.to_path_buf();
    for part in subpath.as_str().split('/') {
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(PublishError::PathCollision {
                    path: current,
                    reason: "a file exists where a directory is needed".into(),
                })
            }
            Err(_) => return Ok(()),
        }
    }
    Ok(())
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Make `dst` hold exactly the non-excluded content of `src`.
///
/// `.git` entries are never read or written. Paths in `preserve` (relative
/// to `dst`) survive even though `src` lacks them.
pub fn mirror(
    src: &Path,
    dst: &Path,
    matcher: &ExcludeMatcher,
    preserve: &[&str],
) -> Result<(), PublishError> {
    if !src.is_dir() {
        return Err(PublishError::Exclude(ReconcileError::MissingTree(src.to_path_buf())));
    }
    prune(src, dst, matcher, preserve)?;

    let mut copied = 0usize;
    let walker = WalkDir::new(src)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| PublishError::Io {
            path: src.to_path_buf(),
            source: e.into(),
        })?;
        let Some(rel) = relative_slash(src, entry.path()) else {
            continue;
        };
        if rel.is_empty() || matcher.is_excluded(&rel) {
            continue;
        }
        let to = dst.join(&rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&to).map_err(io_err(&to))?;
        } else if !same_contents(entry.path(), &to).map_err(io_err(&to))? {
            fs::copy(entry.path(), &to).map_err(io_err(&to))?;
            copied += 1;
        }
    }
    debug!(src = %src.display(), dst = %dst.display(), copied, "mirrored");
    Ok(())
}

/// Remove from `dst` what `src` does not have, plus everything excluded.
fn prune(
    src: &Path,
    dst: &Path,
    matcher: &ExcludeMatcher,
    preserve: &[&str],
) -> Result<(), PublishError> {
    if !dst.exists() {
        return Ok(());
    }
    let mut entries = Vec::new();
    // Pre-order so the `.git` filter prunes before descending; deletion
    // walks the list backwards, deepest first.
    let walker = WalkDir::new(dst)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| PublishError::Io {
            path: dst.to_path_buf(),
            source: e.into(),
        })?;
        if let Some(rel) = relative_slash(dst, entry.path()) {
            if !rel.is_empty() {
                entries.push((rel, entry.file_type().is_dir()));
            }
        }
    }

    let mut removed = 0usize;
    for (rel, is_dir) in entries.into_iter().rev() {
        if preserve.contains(&rel.as_str()) {
            continue;
        }
        let path = dst.join(&rel);
        let counterpart = src.join(&rel);
        let keep = !matcher.is_excluded(&rel)
            && if is_dir {
                counterpart.is_dir()
            } else {
                counterpart.is_file()
            };
        if keep || !path.exists() {
            continue;
        }
        if is_dir {
            fs::remove_dir_all(&path).map_err(io_err(&path))?;
        } else {
            fs::remove_file(&path).map_err(io_err(&path))?;
        }
        removed += 1;
    }
    if removed > 0 {
        debug!(dst = %dst.display(), removed, "pruned");
    }
    Ok(())
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    let (meta_a, meta_b) = match (fs::metadata(a), fs::metadata(b)) {
        (Ok(x), Ok(y)) => (x, y),
        _ => return Ok(false),
    };
    if !meta_b.is_file() || meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = ra.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        rb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

// =============================================================================
// Managed .gitignore
// =============================================================================

/// What [`write_gitignore`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitignoreAction {
    Written,
    Removed,
    /// A user-authored file was left alone.
    LeftUserFile,
    Unchanged,
}

/// Keep `<dir>/.gitignore` in line with `exclude`.
pub fn write_gitignore(dir: &Path, exclude: &[String]) -> Result<GitignoreAction, PublishError> {
    let path = dir.join(".gitignore");
    let existing = match fs::read_to_string(&path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(io_err(&path)(e)),
    };
    let managed = existing
        .as_deref()
        .is_some_and(|t| t.lines().next() == Some(GITIGNORE_MARKER));

    if existing.is_some() && !managed {
        warn!(path = %path.display(), "user-authored .gitignore left untouched");
        return Ok(GitignoreAction::LeftUserFile);
    }
    if exclude.is_empty() {
        if managed {
            fs::remove_file(&path).map_err(io_err(&path))?;
            return Ok(GitignoreAction::Removed);
        }
        return Ok(GitignoreAction::Unchanged);
    }

    let mut entries: Vec<&str> = exclude
        .iter()
        .map(|p| p.trim().trim_start_matches('/'))
        .filter(|p| !p.is_empty())
        .collect();
    entries.sort_unstable();
    entries.dedup();
    let mut text = String::from(GITIGNORE_MARKER);
    text.push('\n');
    for entry in entries {
        text.push_str(entry);
        text.push('\n');
    }
    if existing.as_deref() == Some(text.as_str()) {
        return Ok(GitignoreAction::Unchanged);
    }
    fs::write(&path, text).map_err(io_err(&path))?;
    Ok(GitignoreAction::Written)
}
