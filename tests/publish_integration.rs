//! Integration tests for the Publisher: subpath isolation, push
//! conflicts, and the managed `.gitignore`.

mod support;

use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use igrelease::core::types::{BranchName, Subpath};
use igrelease::engine::publish::{PublishError, PublishOptions, Publisher, GITIGNORE_MARKER};
use igrelease::engine::sync::{SyncMode, Synchronizer, WorkingRepo};

use support::{bare_remote, git_cli, log_subjects, policy, push_commit, repo_ref, show, write};

const BRANCH: &str = "release/my-ig";

fn options(message: &str) -> PublishOptions {
    PublishOptions {
        branch: BranchName::new(BRANCH).unwrap(),
        message: message.to_string(),
        force: false,
        retry_delay: Duration::from_millis(10),
        manage_gitignore: true,
        extra_paths: vec![],
    }
}

/// A webroot remote and a checkout of it on the publish branch.
async fn checkout(temp: &Path) -> (std::path::PathBuf, WorkingRepo) {
    let bare = bare_remote(
        temp,
        "webroot",
        "main",
        &[
            ("templates/page.html", "<html/>"),
            ("my-ig/index.html", "old"),
            ("my-ig/stale.html", "stale"),
            ("other-ig/index.html", "untouched"),
        ],
    );
    let sync = Synchronizer::new(git_cli(), policy());
    let mut repo = sync
        .sync(&repo_ref(&bare, "main", &temp.join("work/webroot")), &SyncMode::Full)
        .await
        .unwrap();
    sync.materialize_branch(
        &mut repo,
        &BranchName::new(BRANCH).unwrap(),
        &BranchName::new("main").unwrap(),
    )
    .await
    .unwrap();
    (bare, repo)
}

fn build_tree(root: &Path) -> std::path::PathBuf {
    let tree = root.join("output");
    write(&tree, "index.html", "new");
    write(&tree, "pages/a.html", "a");
    tree
}

#[tokio::test]
async fn publish_replaces_only_the_subpath() {
    let temp = TempDir::new().unwrap();
    let (bare, repo) = checkout(temp.path()).await;
    let tree = build_tree(temp.path());
    let subpath = Subpath::new("my-ig").unwrap();

    let commit = Publisher::new(git_cli())
        .publish(&repo, &tree, &subpath, &[], &options("Publish x 1.0.0 to my-ig"))
        .await
        .unwrap();

    assert!(commit.created);
    assert_eq!(commit.branch.as_str(), BRANCH);
    assert_eq!(show(&bare, BRANCH, "my-ig/index.html").as_deref(), Some("new"));
    assert_eq!(show(&bare, BRANCH, "my-ig/pages/a.html").as_deref(), Some("a"));
    assert_eq!(show(&bare, BRANCH, "my-ig/stale.html"), None);
    assert_eq!(
        show(&bare, BRANCH, "other-ig/index.html").as_deref(),
        Some("untouched")
    );
    assert_eq!(log_subjects(&bare, BRANCH)[0], "Publish x 1.0.0 to my-ig");
}

#[tokio::test]
async fn unchanged_tree_makes_no_commit() {
    let temp = TempDir::new().unwrap();
    let (bare, repo) = checkout(temp.path()).await;
    let tree = build_tree(temp.path());
    let subpath = Subpath::new("my-ig").unwrap();
    let publisher = Publisher::new(git_cli());

    let first = publisher
        .publish(&repo, &tree, &subpath, &[], &options("first"))
        .await
        .unwrap();
    let second = publisher
        .publish(&repo, &tree, &subpath, &[], &options("second"))
        .await
        .unwrap();

    assert!(!second.created);
    assert_eq!(second.oid, first.oid);
    assert_eq!(log_subjects(&bare, BRANCH)[0], "first");
}

#[tokio::test]
async fn rejected_push_is_rebased_and_retried() {
    let temp = TempDir::new().unwrap();
    let (bare, repo) = checkout(temp.path()).await;
    let tree = build_tree(temp.path());

    // The branch moves on the remote after our checkout.
    support::git(
        temp.path(),
        &["--git-dir", bare.to_str().unwrap(), "branch", BRANCH, "main"],
    );
    push_commit(&bare, BRANCH, &[("other-ig/index.html", "concurrent")], "concurrent");

    let commit = Publisher::new(git_cli())
        .publish(&repo, &tree, &Subpath::new("my-ig").unwrap(), &[], &options("ours"))
        .await
        .unwrap();

    assert!(commit.created);
    let subjects = log_subjects(&bare, BRANCH);
    assert_eq!(&subjects[..2], ["ours", "concurrent"]);
    assert_eq!(
        show(&bare, BRANCH, "other-ig/index.html").as_deref(),
        Some("concurrent")
    );
    assert_eq!(show(&bare, BRANCH, "my-ig/index.html").as_deref(), Some("new"));
}

#[tokio::test]
async fn rebase_retry_keeps_local_edits_in_sibling_folders() {
    let temp = TempDir::new().unwrap();
    let (bare, repo) = checkout(temp.path()).await;
    let tree = build_tree(temp.path());
    fs::write(repo.path().join("other-ig/index.html"), "local edit").unwrap();

    support::git(
        temp.path(),
        &["--git-dir", bare.to_str().unwrap(), "branch", BRANCH, "main"],
    );
    push_commit(&bare, BRANCH, &[("third-ig/index.html", "third")], "concurrent");

    let commit = Publisher::new(git_cli())
        .publish(&repo, &tree, &Subpath::new("my-ig").unwrap(), &[], &options("ours"))
        .await
        .unwrap();

    assert!(commit.created);
    assert_eq!(&log_subjects(&bare, BRANCH)[..2], ["ours", "concurrent"]);
    assert_eq!(show(&bare, BRANCH, "third-ig/index.html").as_deref(), Some("third"));
    assert_eq!(
        show(&bare, BRANCH, "other-ig/index.html").as_deref(),
        Some("untouched")
    );
    assert_eq!(
        fs::read_to_string(repo.path().join("other-ig/index.html")).unwrap(),
        "local edit"
    );
}

#[tokio::test]
async fn conflicting_rebase_fails_without_pushing() {
    let temp = TempDir::new().unwrap();
    let (bare, repo) = checkout(temp.path()).await;
    let tree = build_tree(temp.path());

    support::git(
        temp.path(),
        &["--git-dir", bare.to_str().unwrap(), "branch", BRANCH, "main"],
    );
    push_commit(&bare, BRANCH, &[("my-ig/index.html", "theirs")], "theirs");

    let err = Publisher::new(git_cli())
        .publish(&repo, &tree, &Subpath::new("my-ig").unwrap(), &[], &options("ours"))
        .await
        .unwrap_err();

    assert!(
        matches!(err, PublishError::RebaseConflict { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(log_subjects(&bare, BRANCH)[0], "theirs");
}

#[tokio::test]
async fn force_push_overwrites_the_branch() {
    let temp = TempDir::new().unwrap();
    let (bare, repo) = checkout(temp.path()).await;
    let tree = build_tree(temp.path());

    support::git(
        temp.path(),
        &["--git-dir", bare.to_str().unwrap(), "branch", BRANCH, "main"],
    );
    push_commit(&bare, BRANCH, &[("my-ig/index.html", "theirs")], "theirs");

    let mut opts = options("preview");
    opts.force = true;
    Publisher::new(git_cli())
        .publish(&repo, &tree, &Subpath::new("my-ig").unwrap(), &[], &opts)
        .await
        .unwrap();

    let subjects = log_subjects(&bare, BRANCH);
    assert_eq!(subjects[0], "preview");
    assert!(!subjects.contains(&"theirs".to_string()));
}

#[tokio::test]
async fn excluded_paths_stay_out_and_are_ignored() {
    let temp = TempDir::new().unwrap();
    let (bare, repo) = checkout(temp.path()).await;
    let tree = build_tree(temp.path());
    write(&tree, "big/archive.zip", "zip");
    write(&tree, "debug.log", "log");
    let exclude = vec!["big/".to_string(), "*.log".to_string()];

    Publisher::new(git_cli())
        .publish(&repo, &tree, &Subpath::new("my-ig").unwrap(), &exclude, &options("x"))
        .await
        .unwrap();

    assert_eq!(show(&bare, BRANCH, "my-ig/big/archive.zip"), None);
    assert_eq!(show(&bare, BRANCH, "my-ig/debug.log"), None);
    let gitignore = show(&bare, BRANCH, "my-ig/.gitignore").unwrap();
    assert!(gitignore.starts_with(GITIGNORE_MARKER));
    assert!(gitignore.contains("big/"));
    assert!(gitignore.contains("*.log"));
}

#[tokio::test]
async fn file_where_the_subpath_goes_is_a_collision() {
    let temp = TempDir::new().unwrap();
    let (_bare, repo) = checkout(temp.path()).await;
    let tree = build_tree(temp.path());
    fs::write(repo.path().join("nested"), "a file").unwrap();

    let err = Publisher::new(git_cli())
        .publish(&repo, &tree, &Subpath::new("nested/ig").unwrap(), &[], &options("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::PathCollision { .. }));
}
