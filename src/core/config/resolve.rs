//! core::config::resolve
//!
//! Merge configuration layers into a fully-typed [`EffectiveConfig`].
//!
//! # Precedence
//!
//! Highest wins:
//! 1. CLI flags
//! 2. Environment
//! 3. Local override file
//! 4. Global defaults file
//! 5. Built-in defaults
//!
//! [`resolve`] is a pure function of its four inputs: it performs no I/O
//! and reads no environment. All shape checks happen here, so every
//! downstream stage works with validated types.

use std::path::PathBuf;
use std::time::Duration;

use super::schema::{ConfigLayer, PubreqLayer};
use super::ConfigError;
use crate::auth::{Credential, CredentialSource};
use crate::core::paths::WorkPaths;
use crate::core::sparse::SparseSpec;
use crate::core::types::{BranchName, RepoUrl, Subpath};

/// A repository to synchronize: where it lives, which branch, and where it
/// is checked out locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub url: RepoUrl,
    pub branch: BranchName,
    pub path: PathBuf,
}

/// Where the IG source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// An existing local tree; not synchronized.
    Local(PathBuf),
    /// A repository cloned into the workspace.
    Remote(RepositoryRef),
}

impl SourceLocation {
    /// The local path of the source tree.
    pub fn path(&self) -> &std::path::Path {
        match self {
            SourceLocation::Local(path) => path,
            SourceLocation::Remote(r) => &r.path,
        }
    }
}

/// What the Publisher writes and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishMode {
    /// Milestone release into `ig_folder` on the webroot publish branch.
    Milestone { subpath: Subpath, branch: BranchName },
    /// GitHub Pages preview into `sitepreview_dir` on the pages branch.
    Preview {
        subpath: Subpath,
        branch: BranchName,
        allow_force_push: bool,
    },
}

impl PublishMode {
    pub fn subpath(&self) -> &Subpath {
        match self {
            PublishMode::Milestone { subpath, .. } | PublishMode::Preview { subpath, .. } => {
                subpath
            }
        }
    }

    pub fn branch(&self) -> &BranchName {
        match self {
            PublishMode::Milestone { branch, .. } | PublishMode::Preview { branch, .. } => branch,
        }
    }

    pub fn is_milestone(&self) -> bool {
        matches!(self, PublishMode::Milestone { .. })
    }
}

/// Retry policy for network-class git failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub backoff_max: Duration,
}

/// Build tool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    /// Jar run with `java -jar` when no custom tool is configured.
    pub publisher_jar: PathBuf,
    /// Executable replacing `java -jar <publisher_jar>`.
    pub build_tool: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub java_heap: String,
    pub go_publish: bool,
    pub timeout: Duration,
}

/// Commit identity used for publish commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// Fully-resolved configuration.
///
/// Every recognized setting has a value; settings that are legitimately
/// optional are `Option` and `None` is their defined value.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub paths: WorkPaths,
    pub source: SourceLocation,
    pub webroot: RepositoryRef,
    pub history: RepositoryRef,
    pub registry: RepositoryRef,

    pub enable_sparse_checkout: bool,
    pub sparse: SparseSpec,

    pub ig_folder: Subpath,
    pub publish: PublishMode,
    pub webroot_publish_branch: BranchName,
    pub registry_publish_branch: BranchName,
    pub exclude: Vec<String>,
    pub commit_author: CommitAuthor,

    pub enable_pr_creation: bool,
    pub webroot_pr_target_branch: BranchName,
    pub registry_pr_target_branch: BranchName,
    pub github_token: Option<Credential>,
    pub github_api_base: String,

    pub build: BuildSettings,
    pub ensure_pubreq: bool,
    pub pubreq: PubreqLayer,

    pub git_timeout: Duration,
    pub sync_policy: SyncPolicy,
    pub push_retry_delay: Duration,
    pub sync_workers: usize,
}

/// Overlay the four input layers on the built-in defaults.
pub fn merge(
    global: ConfigLayer,
    local: ConfigLayer,
    env: ConfigLayer,
    cli: ConfigLayer,
) -> ConfigLayer {
    ConfigLayer::builtin()
        .overlay(global)
        .overlay(local)
        .overlay(env)
        .overlay(cli)
}

/// Merge and validate configuration layers.
///
/// # Errors
///
/// Returns `ConfigError` when a required key is missing, a value fails its
/// type or shape check, or mutually exclusive settings are combined.
pub fn resolve(
    global: ConfigLayer,
    local: ConfigLayer,
    env: ConfigLayer,
    cli: ConfigLayer,
) -> Result<EffectiveConfig, ConfigError> {
    from_layer(merge(global, local, env, cli))
}

/// Validate an already merged layer.
pub fn from_layer(m: ConfigLayer) -> Result<EffectiveConfig, ConfigError> {
    let work_dir = required(m.work_dir, "work_dir")?;
    let paths = WorkPaths::new(work_dir);

    let ig_folder = subpath(required(m.ig_folder, "ig_folder")?, "ig_folder")?;

    let source = match (m.source_dir, m.source_repo) {
        (Some(dir), _) => SourceLocation::Local(paths.resolve(&dir)),
        (None, Some(url)) => SourceLocation::Remote(RepositoryRef {
            url: repo_url(&url, "source_repo")?,
            branch: branch(m.source_branch.unwrap_or_else(|| "main".into()), "source_branch")?,
            path: paths.source(),
        }),
        (None, None) => {
            return Err(ConfigError::Missing(
                "source_repo or source_dir".to_string(),
            ))
        }
    };

    let webroot = repository(m.webroot_repo, m.webroot_branch, paths.webroot(), "webroot")?;
    let history = repository(
        m.history_repo,
        m.history_branch,
        paths.history_template(),
        "history",
    )?;
    let registry = repository(
        m.registry_repo,
        m.registry_branch,
        paths.ig_registry(),
        "registry",
    )?;

    let default_publish_branch = format!("release/{ig_folder}");
    let webroot_publish_branch = branch(
        m.webroot_publish_branch
            .unwrap_or_else(|| default_publish_branch.clone()),
        "webroot_publish_branch",
    )?;
    let registry_publish_branch = branch(
        m.registry_publish_branch
            .unwrap_or(default_publish_branch),
        "registry_publish_branch",
    )?;

    let publish = if required(m.publish_gh_pages, "publish_gh_pages")? {
        if m.sitepreview_dir.is_none() && m.gh_pages_branch.is_none() {
            return Err(ConfigError::Conflict(
                "publish_gh_pages requires sitepreview_dir or gh_pages_branch".to_string(),
            ));
        }
        let subpath = match m.sitepreview_dir {
            Some(dir) => subpath(dir, "sitepreview_dir")?,
            None => ig_folder.clone(),
        };
        PublishMode::Preview {
            subpath,
            branch: branch(
                m.gh_pages_branch.unwrap_or_else(|| "gh-pages".into()),
                "gh_pages_branch",
            )?,
            allow_force_push: required(m.allow_force_push_preview, "allow_force_push_preview")?,
        }
    } else {
        PublishMode::Milestone {
            subpath: ig_folder.clone(),
            branch: webroot_publish_branch.clone(),
        }
    };

    let github_api_base = required(m.github_api_base, "github_api_base")?;
    url::Url::parse(&github_api_base).map_err(|e| {
        ConfigError::InvalidValue(format!("github_api_base '{github_api_base}': {e}"))
    })?;

    let java_heap = required(m.java_heap, "java_heap")?;
    if !is_heap_size(&java_heap) {
        return Err(ConfigError::InvalidValue(format!(
            "java_heap '{java_heap}' must look like 4g, 2048m or 1048576k"
        )));
    }

    let sync_backoff_ms = required(m.sync_backoff_ms, "sync_backoff_ms")?;
    let sync_backoff_max_ms = required(m.sync_backoff_max_ms, "sync_backoff_max_ms")?;
    if sync_backoff_max_ms < sync_backoff_ms {
        return Err(ConfigError::InvalidValue(
            "sync_backoff_max_ms must not be smaller than sync_backoff_ms".to_string(),
        ));
    }

    Ok(EffectiveConfig {
        source,
        webroot,
        history,
        registry,
        enable_sparse_checkout: required(m.enable_sparse_checkout, "enable_sparse_checkout")?,
        sparse: SparseSpec::new(m.sparse_dirs.unwrap_or_default()),
        ig_folder,
        publish,
        webroot_publish_branch,
        registry_publish_branch,
        exclude: m.exclude.unwrap_or_default(),
        commit_author: CommitAuthor {
            name: non_empty(required(m.commit_author_name, "commit_author_name")?, "commit_author_name")?,
            email: non_empty(
                required(m.commit_author_email, "commit_author_email")?,
                "commit_author_email",
            )?,
        },
        enable_pr_creation: required(m.enable_pr_creation, "enable_pr_creation")?,
        webroot_pr_target_branch: branch(
            required(m.webroot_pr_target_branch, "webroot_pr_target_branch")?,
            "webroot_pr_target_branch",
        )?,
        registry_pr_target_branch: branch(
            required(m.registry_pr_target_branch, "registry_pr_target_branch")?,
            "registry_pr_target_branch",
        )?,
        github_token: m
            .github_token
            .and_then(|t| Credential::new(t, CredentialSource::ConfigFile)),
        github_api_base: github_api_base.trim_end_matches('/').to_string(),
        build: BuildSettings {
            publisher_jar: paths.resolve(&required(m.publisher_jar, "publisher_jar")?),
            build_tool: m.build_tool,
            extra_args: m.build_args.unwrap_or_default(),
            java_heap,
            go_publish: required(m.go_publish, "go_publish")?,
            timeout: Duration::from_secs(positive(
                required(m.build_timeout_secs, "build_timeout_secs")?,
                "build_timeout_secs",
            )?),
        },
        ensure_pubreq: required(m.ensure_pubreq, "ensure_pubreq")?,
        pubreq: m.pubreq.unwrap_or_default(),
        git_timeout: Duration::from_secs(positive(
            required(m.git_timeout_secs, "git_timeout_secs")?,
            "git_timeout_secs",
        )?),
        sync_policy: SyncPolicy {
            attempts: positive(required(m.sync_attempts, "sync_attempts")?, "sync_attempts")?,
            backoff: Duration::from_millis(sync_backoff_ms),
            backoff_max: Duration::from_millis(sync_backoff_max_ms),
        },
        push_retry_delay: Duration::from_millis(required(
            m.push_retry_delay_ms,
            "push_retry_delay_ms",
        )?),
        sync_workers: positive(required(m.sync_workers, "sync_workers")?, "sync_workers")?,
        paths,
    })
}

// =============================================================================
// Field helpers
// =============================================================================

fn required<T>(value: Option<T>, key: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn branch(value: String, key: &str) -> Result<BranchName, ConfigError> {
    BranchName::new(value).map_err(|e| ConfigError::InvalidValue(format!("{key}: {e}")))
}

fn repo_url(value: &str, key: &str) -> Result<RepoUrl, ConfigError> {
    RepoUrl::parse(value).map_err(|e| ConfigError::InvalidValue(format!("{key}: {e}")))
}

fn subpath(value: String, key: &str) -> Result<Subpath, ConfigError> {
    Subpath::new(value).map_err(|e| ConfigError::InvalidValue(format!("{key}: {e}")))
}

fn non_empty(value: String, key: &str) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue(format!("{key} cannot be empty")));
    }
    Ok(value)
}

fn positive<T: PartialOrd + Default>(value: T, key: &str) -> Result<T, ConfigError> {
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(format!("{key} must be positive")));
    }
    Ok(value)
}

fn repository(
    url: Option<String>,
    branch_name: Option<String>,
    path: PathBuf,
    name: &str,
) -> Result<RepositoryRef, ConfigError> {
    let url_key = format!("{name}_repo");
    let branch_key = format!("{name}_branch");
    Ok(RepositoryRef {
        url: repo_url(&required(url, &url_key)?, &url_key)?,
        branch: branch(required(branch_name, &branch_key)?, &branch_key)?,
        path,
    })
}

fn is_heap_size(s: &str) -> bool {
    let digits = s.trim_end_matches(['k', 'K', 'm', 'M', 'g', 'G']);
    s.len() - digits.len() <= 1
        && !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn minimal() -> ConfigLayer {
        ConfigLayer {
            source_repo: Some("owner/ig".into()),
            ig_folder: Some("my-ig".into()),
            ..Default::default()
        }
    }

    fn empty() -> ConfigLayer {
        ConfigLayer::default()
    }

    #[test]
    fn builtin_defaults_fill_everything() {
        let cfg = resolve(empty(), minimal(), empty(), empty()).unwrap();
        assert_eq!(
            cfg.webroot.url.as_str(),
            "https://github.com/WorldHealthOrganization/smart-html.git"
        );
        assert_eq!(cfg.registry.branch.as_str(), "master");
        assert_eq!(cfg.webroot_publish_branch.as_str(), "release/my-ig");
        assert_eq!(cfg.registry_publish_branch.as_str(), "release/my-ig");
        assert_eq!(cfg.build.java_heap, "4g");
        assert_eq!(cfg.build.publisher_jar, PathBuf::from("./publisher.jar"));
        assert_eq!(cfg.sync_policy.attempts, 3);
        assert_eq!(cfg.sync_workers, 4);
        assert_eq!(cfg.github_api_base, "https://api.github.com");
        assert!(cfg.publish.is_milestone());
        assert!(cfg.github_token.is_none());
    }

    #[test]
    fn cli_beats_global() {
        let global = ConfigLayer {
            webroot_branch: Some("from-global".into()),
            ..Default::default()
        };
        let cli = ConfigLayer {
            webroot_branch: Some("from-cli".into()),
            ..Default::default()
        };
        let cfg = resolve(global, minimal(), empty(), cli).unwrap();
        assert_eq!(cfg.webroot.branch.as_str(), "from-cli");
    }

    #[test]
    fn local_only_key_resolves_to_local() {
        let mut local = minimal();
        local.history_branch = Some("legacy".into());
        let cfg = resolve(empty(), local, empty(), empty()).unwrap();
        assert_eq!(cfg.history.branch.as_str(), "legacy");
    }

    #[test]
    fn env_sits_between_local_and_cli() {
        let mut local = minimal();
        local.source_repo = Some("local/ig".into());
        let env = ConfigLayer {
            source_repo: Some("env/ig".into()),
            ..Default::default()
        };
        let cfg = resolve(empty(), local.clone(), env.clone(), empty()).unwrap();
        assert_eq!(
            cfg.source,
            SourceLocation::Remote(RepositoryRef {
                url: RepoUrl::parse("env/ig").unwrap(),
                branch: BranchName::new("main").unwrap(),
                path: PathBuf::from("./source"),
            })
        );

        let cli = ConfigLayer {
            source_repo: Some("cli/ig".into()),
            ..Default::default()
        };
        let cfg = resolve(empty(), local, env, cli).unwrap();
        match cfg.source {
            SourceLocation::Remote(r) => assert!(r.url.as_str().contains("cli/ig")),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn source_dir_wins_over_repo() {
        let mut local = minimal();
        local.source_dir = Some(PathBuf::from("/src/ig"));
        let cfg = resolve(empty(), local, empty(), empty()).unwrap();
        assert_eq!(cfg.source, SourceLocation::Local(PathBuf::from("/src/ig")));
    }

    #[test]
    fn empty_sparse_dirs_yield_mandatory_paths() {
        let mut local = minimal();
        local.sparse_dirs = Some(vec![]);
        local.enable_sparse_checkout = Some(true);
        let cfg = resolve(empty(), local, empty(), empty()).unwrap();
        assert_eq!(
            cfg.sparse.effective(),
            crate::core::sparse::MANDATORY_PATHS.to_vec()
        );
    }

    #[test]
    fn sparse_dirs_union_across_layers() {
        let global = ConfigLayer {
            sparse_dirs: Some(vec!["assets".into()]),
            ..Default::default()
        };
        let cli = ConfigLayer {
            sparse_dirs: Some(vec!["images".into()]),
            ..Default::default()
        };
        let cfg = resolve(global, minimal(), empty(), cli).unwrap();
        assert_eq!(
            cfg.sparse.requested(),
            &["assets/".to_string(), "images/".to_string()]
        );
    }

    #[test]
    fn missing_ig_folder_rejected() {
        let local = ConfigLayer {
            source_repo: Some("owner/ig".into()),
            ..Default::default()
        };
        let err = resolve(empty(), local, empty(), empty()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref k) if k == "ig_folder"));
    }

    #[test]
    fn missing_source_rejected() {
        let local = ConfigLayer {
            ig_folder: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(
            resolve(empty(), local, empty(), empty()),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn pages_without_target_rejected() {
        let cli = ConfigLayer {
            publish_gh_pages: Some(true),
            ..Default::default()
        };
        let err = resolve(empty(), minimal(), empty(), cli).unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));
    }

    #[test]
    fn pages_with_dir_defaults_branch() {
        let cli = ConfigLayer {
            publish_gh_pages: Some(true),
            sitepreview_dir: Some("previews/my-ig".into()),
            ..Default::default()
        };
        let cfg = resolve(empty(), minimal(), empty(), cli).unwrap();
        match cfg.publish {
            PublishMode::Preview {
                subpath, branch, ..
            } => {
                assert_eq!(subpath.as_str(), "previews/my-ig");
                assert_eq!(branch.as_str(), "gh-pages");
            }
            other => panic!("expected preview, got {other:?}"),
        }
    }

    #[test]
    fn pages_with_branch_defaults_dir() {
        let cli = ConfigLayer {
            publish_gh_pages: Some(true),
            gh_pages_branch: Some("pages".into()),
            ..Default::default()
        };
        let cfg = resolve(empty(), minimal(), empty(), cli).unwrap();
        assert_eq!(cfg.publish.subpath().as_str(), "my-ig");
        assert_eq!(cfg.publish.branch().as_str(), "pages");
    }

    #[test]
    fn malformed_url_rejected() {
        let mut local = minimal();
        local.webroot_repo = Some("ftp://example.com/x".into());
        let err = resolve(empty(), local, empty(), empty()).unwrap_err();
        assert!(err.to_string().contains("webroot_repo"));
    }

    #[test]
    fn empty_branch_rejected() {
        let cli = ConfigLayer {
            webroot_branch: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(
            resolve(empty(), minimal(), empty(), cli),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn unsafe_subpath_rejected() {
        let mut local = minimal();
        local.ig_folder = Some("../escape".into());
        assert!(resolve(empty(), local, empty(), empty()).is_err());
    }

    #[test]
    fn bad_numbers_rejected() {
        for layer in [
            ConfigLayer {
                sync_workers: Some(0),
                ..Default::default()
            },
            ConfigLayer {
                sync_attempts: Some(0),
                ..Default::default()
            },
            ConfigLayer {
                sync_backoff_ms: Some(5000),
                sync_backoff_max_ms: Some(10),
                ..Default::default()
            },
            ConfigLayer {
                java_heap: Some("lots".into()),
                ..Default::default()
            },
        ] {
            assert!(resolve(empty(), minimal(), empty(), layer).is_err());
        }
    }

    #[test]
    fn heap_sizes() {
        assert!(is_heap_size("4g"));
        assert!(is_heap_size("2048M"));
        assert!(is_heap_size("512"));
        assert!(!is_heap_size("g"));
        assert!(!is_heap_size("4gg"));
        assert!(!is_heap_size("-4g"));
    }

    fn branch_strategy() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[a-z][a-z0-9-]{0,8}")
    }

    proptest! {
        #[test]
        fn highest_set_layer_wins(
            g in branch_strategy(),
            l in branch_strategy(),
            e in branch_strategy(),
            c in branch_strategy(),
        ) {
            let layer = |b: &Option<String>| ConfigLayer {
                history_branch: b.clone(),
                ..Default::default()
            };
            let mut local = layer(&l);
            local.source_repo = Some("owner/ig".into());
            local.ig_folder = Some("my-ig".into());

            let cfg = resolve(layer(&g), local, layer(&e), layer(&c)).unwrap();
            let expected = c.or(e).or(l).or(g).unwrap_or_else(|| "main".into());
            prop_assert_eq!(cfg.history.branch.as_str(), expected.as_str());
        }
    }
}
