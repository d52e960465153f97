//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! This module is the **ONLY doorway** to Git. No other module imports
//! `git2` or builds a `git` command line.
//!
//! Two halves:
//! - [`Git`] - local, read-only inspection with `git2` (HEAD, branch,
//!   status, remote URL, shallow/sparse state)
//! - [`GitCli`] - network and mutating operations through the system
//!   `git` binary (partial clone, sparse checkout, fetch, commit, push,
//!   rebase), run by the process runner
//!
//! # Invariants
//!
//! - Credentials reach git only through environment variables
//! - Every CLI invocation carries a timeout and runs in its own process
//!   group
//! - Failures carry git's stderr so callers can tell transient network
//!   trouble from structural problems
//!
//! # Example
//!
//! ```ignore
//! use igrelease::git::{CloneKind, Git, GitCli};
//!
//! let cli = GitCli::new(runner, timeout);
//! cli.clone_repo(url, "main", &dest, CloneKind::Shallow).await?;
//! let head = Git::open(&dest)?.head_oid()?;
//! ```

mod command;
mod interface;

pub use command::{CloneKind, GitCli, PushOutcome};
pub use interface::{Git, GitError, GitState};
