//! Fixtures shared by the integration tests: bare remotes served over
//! `file://`, seeded with commits made by the system git.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use igrelease::core::config::{RepositoryRef, SyncPolicy};
use igrelease::core::types::{BranchName, RepoUrl};
use igrelease::git::GitCli;
use igrelease::process::ProcessRunner;

/// Run git with a fixed identity and return stdout; panics on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test User", "-c", "user.email=test@example.com"])
        .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

/// Write `content` to `root/rel`, creating parent directories.
pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A bare repository with one branch, seeded with `files`.
pub fn bare_remote(root: &Path, name: &str, branch: &str, files: &[(&str, &str)]) -> PathBuf {
    let seed = root.join(format!("{name}-seed"));
    std::fs::create_dir_all(&seed).unwrap();
    git(&seed, &["init", "--quiet"]);
    git(&seed, &["checkout", "--quiet", "-b", branch]);
    for (rel, content) in files {
        write(&seed, rel, content);
    }
    git(&seed, &["add", "--all"]);
    git(&seed, &["commit", "--quiet", "-m", "seed"]);

    let bare = root.join(format!("{name}.git"));
    git(
        root,
        &["clone", "--quiet", "--bare", seed.to_str().unwrap(), bare.to_str().unwrap()],
    );
    std::fs::remove_dir_all(&seed).unwrap();
    bare
}

/// Commit `files` on `branch` of `bare` from a throwaway clone, as another
/// user would.
pub fn push_commit(bare: &Path, branch: &str, files: &[(&str, &str)], message: &str) {
    let scratch = tempfile::TempDir::new().unwrap();
    let clone = scratch.path().join("c");
    git(
        scratch.path(),
        &["clone", "--quiet", "--branch", branch, &file_url(bare), clone.to_str().unwrap()],
    );
    for (rel, content) in files {
        write(&clone, rel, content);
    }
    git(&clone, &["add", "--all"]);
    git(&clone, &["commit", "--quiet", "-m", message]);
    git(&clone, &["push", "--quiet", "origin", branch]);
}

/// Contents of `path` on `branch` of a bare repository, if present.
pub fn show(bare: &Path, branch: &str, path: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["show", &format!("{branch}:{path}")])
        .current_dir(bare)
        .output()
        .expect("failed to run git");
    output
        .status
        .success()
        .then(|| String::from_utf8(output.stdout).unwrap())
}

/// Commit subjects on `branch`, newest first.
pub fn log_subjects(bare: &Path, branch: &str) -> Vec<String> {
    git(bare, &["log", "--format=%s", branch])
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

pub fn repo_ref(bare: &Path, branch: &str, checkout: &Path) -> RepositoryRef {
    RepositoryRef {
        url: RepoUrl::parse(&file_url(bare)).unwrap(),
        branch: BranchName::new(branch).unwrap(),
        path: checkout.to_path_buf(),
    }
}

pub fn git_cli() -> GitCli {
    GitCli::new(ProcessRunner::default(), Duration::from_secs(60))
        .with_identity("Release Bot", "bot@example.com")
}

/// One attempt, no waiting: local transports do not flake.
pub fn policy() -> SyncPolicy {
    SyncPolicy {
        attempts: 1,
        backoff: Duration::from_millis(10),
        backoff_max: Duration::from_millis(10),
    }
}

/// Executable shell script standing in for the IG publisher.
#[cfg(unix)]
pub fn fake_tool(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("fake-publisher.sh");
    std::fs::write(&path, format!("#!/bin/sh\nset -e\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
