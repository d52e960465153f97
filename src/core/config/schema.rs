//! core::config::schema
//!
//! Configuration layer type.
//!
//! # Layers
//!
//! Every configuration source (global file, local override file,
//! environment, CLI) produces one [`ConfigLayer`]. Every field is an
//! `Option`: `None` means "this layer does not set the key". Layers are
//! combined with [`ConfigLayer::overlay`], a total function where the
//! higher layer wins key by key. `sparse_dirs` is the one exception and is
//! unioned across layers.
//!
//! # Validation
//!
//! Layers are not validated individually. Shape checks (branch names,
//! URLs, subpaths) run once on the merged result in
//! [`resolve`](super::resolve::resolve).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One configuration layer.
///
/// # Example
///
/// ```toml
/// source_repo = "WorldHealthOrganization/smart-dak-pnc"
/// source_branch = "v0.9.9_releaseCandidate"
/// ig_folder = "dak-pnc"
///
/// enable_sparse_checkout = true
/// sparse_dirs = ["assets"]
///
/// enable_pr_creation = true
/// exclude = ["*.zip", "temp/"]
///
/// [pubreq]
/// package_id = "smart.who.int.pnc"
/// version = "0.9.9"
/// canonical = "http://smart.who.int/pnc"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    // Repositories
    pub source_repo: Option<String>,
    pub source_branch: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub webroot_repo: Option<String>,
    pub webroot_branch: Option<String>,
    pub history_repo: Option<String>,
    pub history_branch: Option<String>,
    pub registry_repo: Option<String>,
    pub registry_branch: Option<String>,

    // Sparse checkout of the webroot
    pub enable_sparse_checkout: Option<bool>,
    pub sparse_dirs: Option<Vec<String>>,

    // Pull requests
    pub enable_pr_creation: Option<bool>,
    pub webroot_pr_target_branch: Option<String>,
    pub registry_pr_target_branch: Option<String>,
    pub webroot_publish_branch: Option<String>,
    pub registry_publish_branch: Option<String>,
    /// Should stay empty in files; the environment is the place for tokens.
    pub github_token: Option<String>,
    pub github_api_base: Option<String>,

    // Publishing
    pub ig_folder: Option<String>,
    pub publish_gh_pages: Option<bool>,
    pub sitepreview_dir: Option<String>,
    pub gh_pages_branch: Option<String>,
    pub allow_force_push_preview: Option<bool>,
    pub exclude: Option<Vec<String>>,
    pub commit_author_name: Option<String>,
    pub commit_author_email: Option<String>,

    // Build
    pub work_dir: Option<PathBuf>,
    pub publisher_jar: Option<PathBuf>,
    pub build_tool: Option<PathBuf>,
    pub build_args: Option<Vec<String>>,
    pub java_heap: Option<String>,
    pub go_publish: Option<bool>,
    pub ensure_pubreq: Option<bool>,

    // Timeouts and retries
    pub build_timeout_secs: Option<u64>,
    pub git_timeout_secs: Option<u64>,
    pub sync_attempts: Option<u32>,
    pub sync_backoff_ms: Option<u64>,
    pub sync_backoff_max_ms: Option<u64>,
    pub push_retry_delay_ms: Option<u64>,
    pub sync_workers: Option<usize>,

    /// Publication request inputs.
    pub pubreq: Option<PubreqLayer>,
}

/// Publication request inputs, used to synthesize
/// `publication-request.json` when the source tree lacks one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PubreqLayer {
    pub package_id: Option<String>,
    pub version: Option<String>,
    pub canonical: Option<String>,
    pub path: Option<String>,
}

impl PubreqLayer {
    fn overlay(self, higher: PubreqLayer) -> PubreqLayer {
        PubreqLayer {
            package_id: higher.package_id.or(self.package_id),
            version: higher.version.or(self.version),
            canonical: higher.canonical.or(self.canonical),
            path: higher.path.or(self.path),
        }
    }

    fn is_empty(&self) -> bool {
        self == &PubreqLayer::default()
    }
}

/// Snapshot of the process environment.
///
/// Captured once at the CLI edge so that nothing below it reads the
/// environment ad hoc.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Build a snapshot from `(key, value)` pairs, e.g. `std::env::vars()`.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get a variable, treating empty values as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

impl ConfigLayer {
    /// Built-in defaults, the lowest layer.
    ///
    /// Settings that are legitimately optional (`source_repo`, `ig_folder`,
    /// `github_token`, ...) stay unset here; derived defaults such as the
    /// publish branches are filled in by `resolve`.
    pub fn builtin() -> Self {
        Self {
            webroot_repo: Some("WorldHealthOrganization/smart-html".into()),
            webroot_branch: Some("main".into()),
            history_repo: Some("HL7/fhir-ig-history-template".into()),
            history_branch: Some("main".into()),
            registry_repo: Some("FHIR/ig-registry".into()),
            registry_branch: Some("master".into()),
            enable_sparse_checkout: Some(false),
            enable_pr_creation: Some(false),
            webroot_pr_target_branch: Some("main".into()),
            registry_pr_target_branch: Some("master".into()),
            github_api_base: Some("https://api.github.com".into()),
            publish_gh_pages: Some(false),
            allow_force_push_preview: Some(false),
            commit_author_name: Some("github-actions[bot]".into()),
            commit_author_email: Some("github-actions[bot]@users.noreply.github.com".into()),
            work_dir: Some(PathBuf::from(".")),
            publisher_jar: Some(PathBuf::from("publisher.jar")),
            java_heap: Some("4g".into()),
            go_publish: Some(false),
            ensure_pubreq: Some(false),
            build_timeout_secs: Some(7200),
            git_timeout_secs: Some(900),
            sync_attempts: Some(3),
            sync_backoff_ms: Some(1000),
            sync_backoff_max_ms: Some(30_000),
            push_retry_delay_ms: Some(2000),
            sync_workers: Some(4),
            ..Default::default()
        }
    }

    /// Build the environment layer.
    ///
    /// `PUBREQ_*` variables fill the publication request. Inside GitHub
    /// Actions the running repository becomes the default source.
    pub fn from_env(env: &EnvSnapshot) -> Self {
        let pubreq = PubreqLayer {
            package_id: env.get("PUBREQ_PACKAGE_ID").map(String::from),
            version: env.get("PUBREQ_VERSION").map(String::from),
            canonical: env.get("PUBREQ_CANONICAL").map(String::from),
            path: env.get("PUBREQ_PATH").map(String::from),
        };

        let in_actions = env.get("GITHUB_ACTIONS") == Some("true");
        let source_repo = env
            .get("GITHUB_REPOSITORY")
            .filter(|_| in_actions)
            .map(|repo| format!("https://github.com/{repo}"));

        Self {
            source_repo,
            pubreq: (!pubreq.is_empty()).then_some(pubreq),
            ..Default::default()
        }
    }

    /// Overlay `higher` on top of `self`.
    ///
    /// Keys set in `higher` replace keys in `self`; keys unset in `higher`
    /// survive. `sparse_dirs` is the union of both layers, in first-seen
    /// order.
    pub fn overlay(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            source_repo: higher.source_repo.or(self.source_repo),
            source_branch: higher.source_branch.or(self.source_branch),
            source_dir: higher.source_dir.or(self.source_dir),
            webroot_repo: higher.webroot_repo.or(self.webroot_repo),
            webroot_branch: higher.webroot_branch.or(self.webroot_branch),
            history_repo: higher.history_repo.or(self.history_repo),
            history_branch: higher.history_branch.or(self.history_branch),
            registry_repo: higher.registry_repo.or(self.registry_repo),
            registry_branch: higher.registry_branch.or(self.registry_branch),
            enable_sparse_checkout: higher.enable_sparse_checkout.or(self.enable_sparse_checkout),
            sparse_dirs: union(self.sparse_dirs, higher.sparse_dirs),
            enable_pr_creation: higher.enable_pr_creation.or(self.enable_pr_creation),
            webroot_pr_target_branch: higher
                .webroot_pr_target_branch
                .or(self.webroot_pr_target_branch),
            registry_pr_target_branch: higher
                .registry_pr_target_branch
                .or(self.registry_pr_target_branch),
            webroot_publish_branch: higher.webroot_publish_branch.or(self.webroot_publish_branch),
            registry_publish_branch: higher
                .registry_publish_branch
                .or(self.registry_publish_branch),
            github_token: higher.github_token.or(self.github_token),
            github_api_base: higher.github_api_base.or(self.github_api_base),
            ig_folder: higher.ig_folder.or(self.ig_folder),
            publish_gh_pages: higher.publish_gh_pages.or(self.publish_gh_pages),
            sitepreview_dir: higher.sitepreview_dir.or(self.sitepreview_dir),
            gh_pages_branch: higher.gh_pages_branch.or(self.gh_pages_branch),
            allow_force_push_preview: higher
                .allow_force_push_preview
                .or(self.allow_force_push_preview),
            exclude: higher.exclude.or(self.exclude),
            commit_author_name: higher.commit_author_name.or(self.commit_author_name),
            commit_author_email: higher.commit_author_email.or(self.commit_author_email),
            work_dir: higher.work_dir.or(self.work_dir),
            publisher_jar: higher.publisher_jar.or(self.publisher_jar),
            build_tool: higher.build_tool.or(self.build_tool),
            build_args: higher.build_args.or(self.build_args),
            java_heap: higher.java_heap.or(self.java_heap),
            go_publish: higher.go_publish.or(self.go_publish),
            ensure_pubreq: higher.ensure_pubreq.or(self.ensure_pubreq),
            build_timeout_secs: higher.build_timeout_secs.or(self.build_timeout_secs),
            git_timeout_secs: higher.git_timeout_secs.or(self.git_timeout_secs),
            sync_attempts: higher.sync_attempts.or(self.sync_attempts),
            sync_backoff_ms: higher.sync_backoff_ms.or(self.sync_backoff_ms),
            sync_backoff_max_ms: higher.sync_backoff_max_ms.or(self.sync_backoff_max_ms),
            push_retry_delay_ms: higher.push_retry_delay_ms.or(self.push_retry_delay_ms),
            sync_workers: higher.sync_workers.or(self.sync_workers),
            pubreq: match (self.pubreq, higher.pubreq) {
                (Some(low), Some(high)) => Some(low.overlay(high)),
                (low, high) => high.or(low),
            },
        }
    }

    /// Whether this layer carries a non-empty token.
    pub fn has_token(&self) -> bool {
        self.github_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

fn union(low: Option<Vec<String>>, high: Option<Vec<String>>) -> Option<Vec<String>> {
    match (low, high) {
        (None, None) => None,
        (low, high) => {
            let mut merged: Vec<String> = Vec::new();
            for dir in low.into_iter().flatten().chain(high.into_iter().flatten()) {
                if !merged.contains(&dir) {
                    merged.push(dir);
                }
            }
            Some(merged)
        }
    }
}
