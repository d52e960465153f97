//! git::command
//!
//! Network and mutating Git operations through the system `git` binary.
//!
//! Every call runs through the [`ProcessRunner`], so it gets the same
//! timeout and process-group handling as the build tool. Non-zero exits
//! become [`GitError::Command`] with the captured stderr, which
//! [`GitError::is_network`] classifies for retries.
//!
//! # Credentials
//!
//! A bearer credential is handed to git as an `http.extraHeader` through
//! `GIT_CONFIG_*` environment variables. It never appears on a command
//! line, in a remote URL or in `.git/config`.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use super::GitError;
use crate::auth::Credential;
use crate::process::{ProcessCommand, ProcessOutput, ProcessRunner};

/// How a fresh clone is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneKind {
    /// Full history.
    Full,
    /// `--depth=1 --single-branch`.
    Shallow,
    /// `--filter=blob:none --sparse`; the caller sets the sparse patterns.
    Sparse,
}

/// Result of a push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote refused the update; `stderr` is git's explanation.
    Rejected { stderr: String },
}

/// stderr fragments that mark a refused push.
const REJECTION_MARKERS: &[&str] = &[
    "[rejected]",
    "non-fast-forward",
    "fetch first",
    "[remote rejected]",
    "failed to push some refs",
];

/// Commit identity and credentials applied to every git invocation.
#[derive(Clone)]
pub struct GitCli {
    runner: ProcessRunner,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl std::fmt::Debug for GitCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may hold the bearer header.
        let keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("GitCli")
            .field("timeout", &self.timeout)
            .field("env", &keys)
            .finish()
    }
}

impl GitCli {
    pub fn new(runner: ProcessRunner, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            env: vec![("GIT_TERMINAL_PROMPT".into(), "0".into())],
        }
    }

    /// Send `credential` as a bearer header on HTTP transports.
    pub fn with_credential(mut self, credential: Option<&Credential>) -> Self {
        if let Some(cred) = credential {
            self.env.extend(cred.git_env());
        }
        self
    }

    /// Author and committer identity for commits made by this handle.
    pub fn with_identity(mut self, name: &str, email: &str) -> Self {
        for (key, value) in [
            ("GIT_AUTHOR_NAME", name),
            ("GIT_AUTHOR_EMAIL", email),
            ("GIT_COMMITTER_NAME", name),
            ("GIT_COMMITTER_EMAIL", email),
        ] {
            self.env.push((key.into(), value.into()));
        }
        self
    }

    fn command<I, S>(&self, cwd: Option<&Path>, args: I) -> ProcessCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut cmd = ProcessCommand::new("git")
            .args(args)
            .envs(self.env.iter().cloned())
            .timeout(self.timeout);
        if let Some(dir) = cwd {
            cmd = cmd.current_dir(dir);
        }
        cmd
    }

    /// Run git and return its output whatever the exit status.
    async fn run_raw<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<ProcessOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Ok(self.runner.run(&self.command(cwd, args)).await?)
    }

    /// Run git and require exit 0.
    async fn run<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<ProcessOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let out = self.run_raw(cwd, args).await?;
        if out.success() {
            Ok(out)
        } else {
            Err(command_error(&out))
        }
    }

    // =========================================================================
    // Clone and sparse checkout
    // =========================================================================

    /// Clone `url` at `branch` into `dest`.
    pub async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
        kind: CloneKind,
    ) -> Result<(), GitError> {
        let mut args: Vec<OsString> = vec!["clone".into()];
        match kind {
            CloneKind::Full => {}
            CloneKind::Shallow => {
                args.push("--depth=1".into());
                args.push("--single-branch".into());
            }
            CloneKind::Sparse => {
                args.push("--filter=blob:none".into());
                args.push("--sparse".into());
            }
        }
        args.extend(["--branch".into(), branch.into(), "--".into(), url.into()]);
        args.push(dest.as_os_str().to_os_string());
        self.run(None, args).await?;
        Ok(())
    }

    /// Replace the sparse checkout set with root-anchored, non-cone patterns.
    pub async fn sparse_checkout_set(&self, repo: &Path, patterns: &[String]) -> Result<(), GitError> {
        let mut args: Vec<OsString> = vec!["sparse-checkout".into(), "set".into(), "--no-cone".into()];
        args.extend(patterns.iter().map(OsString::from));
        self.run(Some(repo), args).await?;
        Ok(())
    }

    // =========================================================================
    // Fetch, checkout, fast-forward
    // =========================================================================

    /// Fetch one branch into its remote-tracking ref.
    pub async fn fetch_branch(&self, repo: &Path, branch: &str, shallow: bool) -> Result<(), GitError> {
        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        let mut args = vec!["fetch", "--no-tags"];
        if shallow {
            args.push("--depth=1");
        }
        args.extend(["origin", refspec.as_str()]);
        self.run(Some(repo), args).await?;
        Ok(())
    }

    /// Whether `branch` exists on `origin`.
    pub async fn remote_has_branch(&self, repo: &Path, branch: &str) -> Result<bool, GitError> {
        let refname = format!("refs/heads/{branch}");
        let out = self
            .run(Some(repo), ["ls-remote", "--heads", "origin", refname.as_str()])
            .await?;
        Ok(out
            .stdout
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(refname.as_str())))
    }

    /// Check out `branch`, creating or resetting it to `start_point`.
    pub async fn checkout_reset(&self, repo: &Path, branch: &str, start_point: &str) -> Result<(), GitError> {
        self.run(Some(repo), ["checkout", "-B", branch, start_point])
            .await?;
        Ok(())
    }

    /// Check out an existing local branch, creating it from
    /// `origin/<branch>` if needed.
    pub async fn checkout(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        let local = format!("refs/heads/{branch}");
        let exists = self
            .run_raw(Some(repo), ["show-ref", "--verify", "--quiet", local.as_str()])
            .await?
            .success();
        if exists {
            self.run(Some(repo), ["checkout", branch]).await?;
        } else {
            let upstream = format!("origin/{branch}");
            self.run(Some(repo), ["checkout", "-b", branch, "--track", upstream.as_str()])
                .await?;
        }
        Ok(())
    }

    /// `git merge --ff-only <upstream>`.
    pub async fn merge_ff_only(&self, repo: &Path, upstream: &str) -> Result<(), GitError> {
        self.run(Some(repo), ["merge", "--ff-only", upstream]).await?;
        Ok(())
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Discard tracked changes.
    pub async fn reset_hard(&self, repo: &Path) -> Result<(), GitError> {
        self.run(Some(repo), ["reset", "--hard", "--quiet"]).await?;
        Ok(())
    }

    /// Remove untracked files below `pathspec`.
    pub async fn clean(&self, repo: &Path, pathspec: &str) -> Result<(), GitError> {
        self.run(Some(repo), ["clean", "-fd", "--quiet", "--", pathspec])
            .await?;
        Ok(())
    }

    /// Abort an in-progress rebase.
    pub async fn rebase_abort(&self, repo: &Path) -> Result<(), GitError> {
        self.run(Some(repo), ["rebase", "--abort"]).await?;
        Ok(())
    }

    // =========================================================================
    // Stage, commit, push
    // =========================================================================

    /// Stage every change below the given pathspecs.
    pub async fn add_all(&self, repo: &Path, pathspecs: &[&str]) -> Result<(), GitError> {
        let mut args = vec!["add", "--all", "--sparse", "--"];
        args.extend_from_slice(pathspecs);
        self.run(Some(repo), args).await?;
        Ok(())
    }

    /// Whether the index differs from HEAD below the given pathspecs.
    pub async fn has_staged_changes(&self, repo: &Path, pathspecs: &[&str]) -> Result<bool, GitError> {
        let mut args = vec!["diff", "--cached", "--quiet", "--"];
        args.extend_from_slice(pathspecs);
        let out = self.run_raw(Some(repo), args).await?;
        match out.status {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(command_error(&out)),
        }
    }

    /// Tracked paths with staged or unstaged changes.
    ///
    /// Uses `git status`, which honours sparse checkout: paths outside the
    /// sparse set are not reported as deleted.
    pub async fn uncommitted_changes(&self, repo: &Path) -> Result<Vec<String>, GitError> {
        let out = self
            .run(Some(repo), ["status", "--porcelain=v1", "--untracked-files=no"])
            .await?;
        Ok(out
            .stdout
            .lines()
            .filter_map(|line| line.get(3..))
            .map(String::from)
            .collect())
    }

    /// Commit only the given pathspecs, leaving other staged changes alone.
    pub async fn commit_only(&self, repo: &Path, message: &str, pathspecs: &[&str]) -> Result<(), GitError> {
        let mut args = vec!["commit", "--quiet", "--no-verify", "-m", message, "--only", "--"];
        args.extend_from_slice(pathspecs);
        self.run(Some(repo), args).await?;
        Ok(())
    }

    /// Push HEAD to `refs/heads/<branch>` on origin.
    ///
    /// A rejection is an outcome, not an error, so callers can decide
    /// between rebasing and giving up.
    pub async fn push(&self, repo: &Path, branch: &str, force: bool) -> Result<PushOutcome, GitError> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        let mut args = vec!["push", "--porcelain"];
        if force {
            args.push("--force");
        }
        args.extend(["origin", refspec.as_str()]);

        let out = self.run_raw(Some(repo), args).await?;
        if out.success() {
            return Ok(PushOutcome::Pushed);
        }
        let text = format!("{}\n{}", out.stdout, out.stderr);
        if REJECTION_MARKERS.iter().any(|m| text.contains(m)) {
            debug!(branch, "push rejected");
            return Ok(PushOutcome::Rejected { stderr: out.stderr });
        }
        Err(command_error(&out))
    }

    /// `git pull --rebase origin <branch>`; a conflicted rebase is aborted.
    ///
    /// Local edits outside the commit (sibling folders in a shared webroot)
    /// are stashed around the rebase.
    pub async fn pull_rebase(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        let out = self
            .run_raw(
                Some(repo),
                ["pull", "--rebase", "--autostash", "--no-edit", "origin", branch],
            )
            .await?;
        if out.success() {
            return Ok(());
        }
        let err = command_error(&out);
        if err.is_network() {
            return Err(err);
        }
        if super::Git::open(repo)
            .map(|g| g.state().is_in_progress())
            .unwrap_or(false)
        {
            self.rebase_abort(repo).await?;
            return Err(GitError::RebaseConflict {
                branch: branch.to_string(),
            });
        }
        Err(err)
    }
}

fn command_error(out: &ProcessOutput) -> GitError {
    GitError::Command {
        command: out.command_line(),
        status: out.status,
        stderr: out.stderr.clone(),
    }
}
