//! core::lock
//!
//! Exclusive lock on a working tree.
//!
//! Each checkout in the workspace is owned by exactly one synchronizer
//! call at a time. Ownership is an OS-level exclusive lock on the file
//! `<tree>.lock` beside the tree, held for the lifetime of the
//! `WorkingRepo` that owns the tree.
//!
//! # Invariants
//!
//! - Lock acquisition is non-blocking (fails fast if locked)
//! - Lock is automatically released on drop (RAII pattern)
//! - The lock file lives outside the tree so it never shows up as dirt
//!
//! # Example
//!
//! ```
//! use igrelease::core::lock::TreeLock;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let tree = dir.path().join("webroot");
//! let lock = TreeLock::acquire(&tree).unwrap();
//! assert!(TreeLock::acquire(&tree).is_err());
//! drop(lock);
//! assert!(TreeLock::acquire(&tree).is_ok());
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

use crate::core::paths::WorkPaths;

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another owner already holds the lock.
    #[error("working tree '{0}' is locked by another operation")]
    AlreadyLocked(PathBuf),

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),
}

/// An exclusive lock on one working tree.
///
/// The lock is released when this guard is dropped.
#[derive(Debug)]
pub struct TreeLock {
    /// Path to the lock file.
    path: PathBuf,
    /// The open file handle with the lock held.
    file: Option<File>,
}

impl TreeLock {
    /// Acquire the lock for `tree`.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyLocked`] if another owner holds the lock
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock cannot be acquired
    pub fn acquire(tree: &Path) -> Result<Self, LockError> {
        let path = WorkPaths::lock_path(tree);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                LockError::CreateFailed(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                file: Some(file),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(LockError::AlreadyLocked(tree.to_path_buf()))
            }
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    /// Check if the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TreeLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}
