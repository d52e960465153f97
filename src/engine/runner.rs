//! engine::runner
//!
//! Pipeline Controller: drives one release through the state machine.
//!
//! # Flow
//!
//! 1. **Sync**: every repository concurrently (bounded by `sync_workers`,
//!    fail-fast), then materialize the publish branches
//! 2. **Config**: load or synthesize the publication request (milestone)
//! 3. **Build** and **Validate**, then the optional publication step
//! 4. **Reconcile**: oversized files out, exclude list in
//! 5. **Publish**: webroot subpath, then the registry list if it changed
//! 6. **Pull requests**: recorded, never fatal
//!
//! Every stage runs under an outer timeout from [`StageBounds`]. A failed
//! stage moves the report to `Failed(stage)`; nothing is rolled back.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::build::{self, BuildExecutor, GoPublishPaths};
use super::pr::{PrAutomator, PrError, PullRequestSpec};
use super::publish::{self, CommitRef, PublishError, PublishOptions, Publisher};
use super::reconcile::{self, Reconciliation, SIZE_THRESHOLD};
use super::report::{BuildSummary, PrOutcome, PrTarget, RunReport, StageOutcome};
use super::sync::{SyncMode, Synchronizer, WorkingRepo};
use super::{Context, PipelineState, Stage, StageError};
use crate::core::config::{PublishMode, RepositoryRef, SourceLocation};
use crate::core::paths::WorkPaths;
use crate::core::pubreq::{self, PublicationRequest};
use crate::forge::ForgeError;
use crate::git::{Git, GitCli};

/// Registry list updated by the publication step.
pub const REGISTRY_LIST: &str = "fhir-ig-list.json";

/// Webroot files the publication step rewrites next to the IG folder.
pub const FEED_FILES: &[&str] = &[
    "package-feed.xml",
    "publication-feed.xml",
    "package-registry.json",
];

/// Outer wall-clock bound per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBounds {
    pub sync: Duration,
    pub config: Duration,
    pub build: Duration,
    pub validate: Duration,
    pub reconcile: Duration,
    pub publish: Duration,
    /// Per pull request.
    pub pull_request: Duration,
}

impl StageBounds {
    /// Derive bounds from the per-process timeouts: a stage may run every
    /// git call it makes at its full timeout, on every attempt.
    pub fn from_config(cfg: &crate::core::config::EffectiveConfig) -> Self {
        let git = cfg.git_timeout;
        let attempts = cfg.sync_policy.attempts.max(1);
        let per_attempt = git.saturating_mul(4) + cfg.sync_policy.backoff_max;
        Self {
            sync: per_attempt.saturating_mul(attempts).saturating_mul(2),
            config: Duration::from_secs(60),
            build: cfg.build.timeout + Duration::from_secs(60),
            validate: Duration::from_secs(60),
            reconcile: git,
            publish: git.saturating_mul(12) + cfg.push_retry_delay.saturating_mul(2),
            pull_request: Duration::from_secs(120),
        }
    }
}

/// Checkouts produced by the sync stage.
#[derive(Debug)]
struct Checkouts {
    source: WorkingRepo,
    webroot: WorkingRepo,
    history: Option<WorkingRepo>,
    registry: Option<WorkingRepo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Source,
    Webroot,
    History,
    Registry,
}

/// One release run.
#[derive(Debug)]
pub struct Pipeline {
    ctx: Context,
    bounds: StageBounds,
}

impl Pipeline {
    pub fn new(ctx: Context) -> Self {
        let bounds = StageBounds::from_config(&ctx.config);
        Self { ctx, bounds }
    }

    pub fn with_bounds(mut self, bounds: StageBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Run every stage and return the report. Never panics on a stage
    /// failure; the report carries it.
    pub async fn run(&self) -> RunReport {
        self.run_until(std::future::pending()).await
    }

    /// Like [`Pipeline::run`], but stops as soon as `abort` completes. The
    /// stage in progress is recorded as failed with [`StageError::Aborted`].
    pub async fn run_until<A>(&self, abort: A) -> RunReport
    where
        A: Future<Output = ()>,
    {
        let mut report = RunReport::new();
        report.state = PipelineState::ConfigResolved;
        let result = tokio::select! {
            result = self.drive(&mut report) => result,
            () = abort => {
                warn!("abort requested");
                Err(StageError::Aborted)
            }
        };
        match result {
            Ok(()) => report.finish(),
            Err(err) => {
                if report.failure.is_none() {
                    let stage = report.running.unwrap_or(Stage::Config);
                    report.fail(stage, &err);
                }
                report.preserved = self.working_dirs();
                error!(state = %report.state, error = %err, "release failed");
            }
        }
        report
    }

    async fn drive(&self, report: &mut RunReport) -> Result<(), StageError> {
        let cfg = &self.ctx.config;
        let go_publish = cfg.build.go_publish;
        let git = GitCli::new(self.ctx.runner.clone(), cfg.git_timeout)
            .with_credential(self.ctx.credential.as_ref())
            .with_identity(&cfg.commit_author.name, &cfg.commit_author.email);
        let synchronizer = Synchronizer::new(git.clone(), cfg.sync_policy);

        // Sync
        let repos = timed(report, Stage::Sync, self.bounds.sync, async {
            let mut repos = self.sync_all(&synchronizer).await?;
            synchronizer
                .materialize_branch(&mut repos.webroot, cfg.publish.branch(), &cfg.webroot.branch)
                .await?;
            if let Some(registry) = repos.registry.as_mut() {
                synchronizer
                    .materialize_branch(registry, &cfg.registry_publish_branch, &cfg.registry.branch)
                    .await?;
            }
            Ok(repos)
        })
        .await?;
        report.state = PipelineState::SyncedAll;

        // Publication request
        let source = repos.source.path().to_path_buf();
        let request = if cfg.publish.is_milestone() {
            let req = timed(report, Stage::Config, self.bounds.config, async {
                Ok(pubreq::ensure(&source, &cfg.pubreq, cfg.ensure_pubreq)?)
            })
            .await?;
            Some(req)
        } else {
            optional_request(&source)
        };

        // Build and validate
        let executor = BuildExecutor::new(self.ctx.runner.clone(), cfg.build.clone());
        let cache = cfg.paths.package_cache();
        let built = timed(report, Stage::Build, self.bounds.build, async {
            Ok(executor.build(&source, &cache, &cfg.build.extra_args).await?)
        })
        .await?;
        report.build = Some(BuildSummary {
            warnings: built.warnings(),
            errors: built.errors(),
            duration: built.duration,
        });
        report.state = PipelineState::Built;

        timed(report, Stage::Validate, self.bounds.validate, async {
            Ok(build::verify_output(&built)?)
        })
        .await?;
        report.state = PipelineState::Validated;

        if go_publish {
            timed(report, Stage::GoPublish, self.bounds.build, async {
                self.go_publish(&executor, &repos).await
            })
            .await?;
        }

        // Reconcile
        let tree = if go_publish {
            cfg.publish.subpath().under(repos.webroot.path())
        } else {
            built.output_dir.clone()
        };
        let assets = cfg.paths.release_assets();
        let recon = timed(report, Stage::Reconcile, self.bounds.reconcile, async {
            Ok(reconcile::reconcile(&tree, &assets, SIZE_THRESHOLD, &cfg.exclude)?)
        })
        .await?;
        report.oversized = recon.oversized.clone();
        if !recon.oversized.is_empty() {
            report.preserved.push(assets.clone());
        }
        report.state = PipelineState::Reconciled;

        // Publish
        let publisher = Publisher::new(git);
        let (webroot_commit, registry_commit) =
            timed(report, Stage::Publish, self.bounds.publish, async {
                let commit = self
                    .publish_webroot(&publisher, &repos, &recon, request.as_ref())
                    .await?;
                let registry = match repos.registry.as_ref() {
                    Some(registry) if go_publish => {
                        self.publish_registry(&publisher, registry, request.as_ref())
                            .await?
                    }
                    _ => None,
                };
                Ok((commit, registry))
            })
            .await?;
        report.publish = Some(webroot_commit.clone());
        report.registry = registry_commit.clone();
        report.state = PipelineState::Published;

        // Pull requests
        self.pull_requests(report, &webroot_commit, registry_commit.as_ref(), request.as_ref())
            .await;
        report.state = PipelineState::PrsHandled;
        Ok(())
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Synchronize every repository; the first failure cancels the rest.
    async fn sync_all(&self, synchronizer: &Synchronizer) -> Result<Checkouts, StageError> {
        let cfg = &self.ctx.config;
        let webroot_mode = if cfg.enable_sparse_checkout {
            SyncMode::Sparse(cfg.sparse.clone().with_dir(cfg.publish.subpath().as_str()))
        } else {
            SyncMode::Full
        };

        let mut jobs: Vec<(Role, RepositoryRef, SyncMode)> = Vec::new();
        if let SourceLocation::Remote(source) = &cfg.source {
            jobs.push((Role::Source, source.clone(), SyncMode::Shallow));
        }
        jobs.push((Role::Webroot, cfg.webroot.clone(), webroot_mode));
        if cfg.build.go_publish {
            jobs.push((Role::History, cfg.history.clone(), SyncMode::Shallow));
            jobs.push((Role::Registry, cfg.registry.clone(), SyncMode::Full));
        }

        let mut source = match &cfg.source {
            SourceLocation::Local(path) => Some(WorkingRepo::local(path)?),
            SourceLocation::Remote(_) => None,
        };
        let (mut webroot, mut history, mut registry) = (None, None, None);

        let permits = Arc::new(Semaphore::new(cfg.sync_workers.max(1)));
        let mut tasks = JoinSet::new();
        for (role, reference, mode) in jobs {
            let synchronizer = synchronizer.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (role, synchronizer.sync(&reference, &mode).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (role, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tasks.abort_all();
                    return Err(StageError::Task {
                        stage: Stage::Sync,
                        message: e.to_string(),
                    });
                }
            };
            let repo = match result {
                Ok(repo) => repo,
                Err(e) => {
                    warn!(role = ?role, error = %e, "sync failed; cancelling the others");
                    tasks.abort_all();
                    return Err(e.into());
                }
            };
            debug!(role = ?role, path = %repo.path().display(), "sync done");
            match role {
                Role::Source => source = Some(repo),
                Role::Webroot => webroot = Some(repo),
                Role::History => history = Some(repo),
                Role::Registry => registry = Some(repo),
            }
        }

        let missing = |what: &str| StageError::Task {
            stage: Stage::Sync,
            message: format!("{what} checkout missing after sync"),
        };
        Ok(Checkouts {
            source: source.ok_or_else(|| missing("source"))?,
            webroot: webroot.ok_or_else(|| missing("webroot"))?,
            history,
            registry,
        })
    }

    // =========================================================================
    // Build
    // =========================================================================

    async fn go_publish(
        &self,
        executor: &BuildExecutor,
        repos: &Checkouts,
    ) -> Result<(), StageError> {
        let cfg = &self.ctx.config;
        let missing = |what: &str| StageError::Task {
            stage: Stage::GoPublish,
            message: format!("{what} checkout is required by the publication step"),
        };
        let history = repos.history.as_ref().ok_or_else(|| missing("history"))?;
        let registry = repos.registry.as_ref().ok_or_else(|| missing("registry"))?;

        publish::mark_in_progress(repos.webroot.path(), cfg.publish.subpath().as_str())?;
        publish::mark_in_progress(registry.path(), REGISTRY_LIST)?;

        let (cache, temp) = (cfg.paths.package_cache(), cfg.paths.temp());
        executor
            .go_publish(&GoPublishPaths {
                source: repos.source.path(),
                webroot: repos.webroot.path(),
                registry: registry.path(),
                history: history.path(),
                package_cache: &cache,
                temp: &temp,
            })
            .await?;
        Ok(())
    }

    // =========================================================================
    // Publish
    // =========================================================================

    async fn publish_webroot(
        &self,
        publisher: &Publisher,
        repos: &Checkouts,
        recon: &Reconciliation,
        request: Option<&PublicationRequest>,
    ) -> Result<CommitRef, StageError> {
        let cfg = &self.ctx.config;
        let subpath = cfg.publish.subpath();
        let package_id = package_id(request, cfg.ig_folder.as_str());
        let (message, force) = match &cfg.publish {
            PublishMode::Milestone { .. } => {
                let version = request.map(PublicationRequest::version).unwrap_or_default();
                (publish::milestone_message(package_id, version, subpath), false)
            }
            PublishMode::Preview {
                branch,
                allow_force_push,
                ..
            } => {
                let force = *allow_force_push
                    && *branch != cfg.webroot.branch
                    && *branch != cfg.webroot_pr_target_branch;
                (publish::preview_message(package_id, subpath), force)
            }
        };
        let extra_paths = if cfg.build.go_publish {
            FEED_FILES.iter().map(|f| f.to_string()).collect()
        } else {
            Vec::new()
        };

        let opts = PublishOptions {
            branch: cfg.publish.branch().clone(),
            message,
            force,
            retry_delay: cfg.push_retry_delay,
            manage_gitignore: !cfg.publish.is_milestone(),
            extra_paths,
        };
        Ok(publisher
            .publish(&repos.webroot, &recon.publish_tree, subpath, &recon.exclude, &opts)
            .await?)
    }

    /// Commit the registry list if the publication step changed it.
    async fn publish_registry(
        &self,
        publisher: &Publisher,
        registry: &WorkingRepo,
        request: Option<&PublicationRequest>,
    ) -> Result<Option<CommitRef>, StageError> {
        let cfg = &self.ctx.config;
        let changed = Git::open(registry.path())
            .and_then(|g| g.changed_paths())
            .map_err(PublishError::from)?;
        if !changed.iter().any(|p| p == REGISTRY_LIST) {
            info!(repo = %registry.path().display(), "registry list unchanged");
            publish::clear_marker(registry.path())?;
            return Ok(None);
        }

        let package_id = package_id(request, cfg.ig_folder.as_str());
        let version = request.map(PublicationRequest::version).unwrap_or_default();
        let opts = PublishOptions {
            branch: cfg.registry_publish_branch.clone(),
            message: publish::registry_message(package_id, version),
            force: false,
            retry_delay: cfg.push_retry_delay,
            manage_gitignore: false,
            extra_paths: Vec::new(),
        };
        let commit = publisher
            .publish_paths(registry, &[REGISTRY_LIST.to_string()], &opts)
            .await?;
        Ok(Some(commit))
    }

    // =========================================================================
    // Pull requests
    // =========================================================================

    async fn pull_requests(
        &self,
        report: &mut RunReport,
        webroot: &CommitRef,
        registry: Option<&CommitRef>,
        request: Option<&PublicationRequest>,
    ) {
        let cfg = &self.ctx.config;
        if !cfg.enable_pr_creation {
            report.record(
                Stage::PullRequests,
                Duration::ZERO,
                StageOutcome::Skipped("PR creation disabled".into()),
            );
            return;
        }

        let started = Instant::now();
        report.running = Some(Stage::PullRequests);
        let package_id = package_id(request, cfg.ig_folder.as_str());
        let version = request.map(PublicationRequest::version).unwrap_or_default();
        let title = match &cfg.publish {
            PublishMode::Milestone { subpath, .. } => {
                publish::milestone_message(package_id, version, subpath)
            }
            PublishMode::Preview { subpath, .. } => publish::preview_message(package_id, subpath),
        };

        let mut specs = vec![(
            PrTarget::Webroot,
            PullRequestSpec {
                title: title.clone(),
                body: pr_body(webroot, cfg.publish.subpath().as_str()),
                base: cfg.webroot_pr_target_branch.clone(),
                head: webroot.branch.clone(),
                target: cfg.webroot.url.clone(),
            },
        )];
        if let Some(commit) = registry.filter(|c| c.created) {
            specs.push((
                PrTarget::Registry,
                PullRequestSpec {
                    title: publish::registry_message(package_id, version),
                    body: pr_body(commit, REGISTRY_LIST),
                    base: cfg.registry_pr_target_branch.clone(),
                    head: commit.branch.clone(),
                    target: cfg.registry.url.clone(),
                },
            ));
        }

        let automator = PrAutomator::new(Arc::clone(&self.ctx.forges));
        for (target, spec) in specs {
            let bound = self.bounds.pull_request;
            let result = match tokio::time::timeout(bound, automator.open_or_update(&spec)).await {
                Ok(result) => result,
                Err(_) => Err(PrError::Forge {
                    target: spec.target.to_string(),
                    source: ForgeError::NetworkError(format!(
                        "no response within {}s",
                        bound.as_secs()
                    )),
                }),
            };
            if let Err(e) = &result {
                warn!(pr_target = %target, error = %e, "pull request failed; publish stands");
            }
            report.prs.push(PrOutcome { target, result });
        }

        let failed = report.pr_failures().count();
        let outcome = if failed == 0 {
            StageOutcome::Succeeded
        } else {
            StageOutcome::Failed(format!("{failed} pull request(s) failed"))
        };
        report.record(Stage::PullRequests, started.elapsed(), outcome);
    }

    /// Working directories a failed run leaves behind.
    fn working_dirs(&self) -> Vec<PathBuf> {
        let cfg = &self.ctx.config;
        let mut dirs = vec![cfg.source.path().to_path_buf(), cfg.webroot.path.clone()];
        if cfg.build.go_publish {
            dirs.push(cfg.history.path.clone());
            dirs.push(cfg.registry.path.clone());
        }
        dirs.push(cfg.paths.release_assets());
        dirs.retain(|d| d.exists());
        dirs
    }
}

/// Run one stage under its bound and record the outcome.
async fn timed<T, F>(
    report: &mut RunReport,
    stage: Stage,
    bound: Duration,
    fut: F,
) -> Result<T, StageError>
where
    F: Future<Output = Result<T, StageError>>,
{
    let started = Instant::now();
    report.running = Some(stage);
    info!(stage = %stage, "stage started");
    let result = match tokio::time::timeout(bound, fut).await {
        Ok(result) => result,
        Err(_) => Err(StageError::Timeout {
            stage,
            after: bound,
        }),
    };
    let elapsed = started.elapsed();
    match &result {
        Ok(_) => {
            info!(stage = %stage, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
            report.record(stage, elapsed, StageOutcome::Succeeded);
        }
        Err(e) => {
            report.record(stage, elapsed, StageOutcome::Failed(e.to_string()));
            report.fail(stage, e);
        }
    }
    result
}

/// A preview does not require a publication request, but uses one if the
/// source has it.
fn optional_request(source: &std::path::Path) -> Option<PublicationRequest> {
    let path = WorkPaths::publication_request(source);
    if !path.exists() {
        return None;
    }
    match PublicationRequest::load(&path) {
        Ok(req) => Some(req),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable publication request");
            None
        }
    }
}

fn package_id<'a>(request: Option<&'a PublicationRequest>, fallback: &'a str) -> &'a str {
    request
        .map(PublicationRequest::package_id)
        .filter(|id| !id.is_empty())
        .unwrap_or(fallback)
}

fn pr_body(commit: &CommitRef, what: &str) -> String {
    format!(
        "Automated release update of `{what}`.\n\nBranch `{}` at {}.",
        commit.branch,
        commit.oid.short(12)
    )
}
