//! engine
//!
//! The release pipeline: Sync -> Build -> Validate -> Reconcile -> Publish
//! -> Pull requests.
//!
//! # Architecture
//!
//! Each stage is a component with a typed contract and its own error enum:
//!
//! - [`sync`]: Repository Synchronizer
//! - [`build`]: Build Stage Executor
//! - [`reconcile`]: Artifact Reconciler
//! - [`publish`]: Publisher
//! - [`pr`]: Pull Request Automator
//! - [`runner`]: Pipeline Controller driving the state machine
//!
//! The controller wraps every stage error in a [`StageError`], which fixes
//! the process exit code. Nothing is rolled back on failure; the
//! [`report::RunReport`] names the failed stage and the preserved working
//! directories.
//!
//! # State machine
//!
//! ```text
//! Init -> ConfigResolved -> SyncedAll -> Built -> Validated -> Reconciled
//!      -> Published -> PrsHandled -> Done
//!                  \-> Failed(stage)   (absorbing, from any state)
//! ```

pub mod build;
pub mod pr;
pub mod publish;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod runner;
pub mod sync;

pub use report::RunReport;
pub use runner::Pipeline;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::Credential;
use crate::core::config::{ConfigError, EffectiveConfig};
use crate::forge::ForgeFactory;
use crate::process::ProcessRunner;

/// Everything a pipeline run needs, resolved once at the edge.
#[derive(Clone)]
pub struct Context {
    pub config: EffectiveConfig,
    /// Bearer credential for git transports and the forge API.
    pub credential: Option<Credential>,
    pub runner: ProcessRunner,
    pub forges: Arc<dyn ForgeFactory>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Config,
    Sync,
    Build,
    Validate,
    /// The tool's own publication step, run between validation and
    /// reconciliation.
    GoPublish,
    Reconcile,
    Publish,
    PullRequests,
}

impl Stage {
    /// Exit code when this stage fails.
    pub fn exit_code(self) -> i32 {
        match self {
            Stage::Config => 2,
            Stage::Sync => 3,
            Stage::Build | Stage::Validate | Stage::GoPublish => 4,
            Stage::Reconcile | Stage::Publish => 5,
            Stage::PullRequests => 6,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Sync => "sync",
            Stage::Build => "build",
            Stage::Validate => "validate",
            Stage::GoPublish => "go-publish",
            Stage::Reconcile => "reconcile",
            Stage::Publish => "publish",
            Stage::PullRequests => "pull-requests",
        };
        f.write_str(name)
    }
}

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    ConfigResolved,
    SyncedAll,
    Built,
    Validated,
    Reconciled,
    Published,
    PrsHandled,
    Done,
    Failed(Stage),
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Failed(stage) => write!(f, "failed in {stage}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Exit code for a stage that ran past its bound.
pub const EXIT_TIMEOUT: i32 = 7;
/// Exit code for an operator abort.
pub const EXIT_ABORTED: i32 = 130;

/// A stage failure, as recorded by the controller.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] sync::SyncError),

    #[error(transparent)]
    Build(#[from] build::BuildError),

    #[error(transparent)]
    Reconcile(#[from] reconcile::ReconcileError),

    #[error(transparent)]
    Publish(#[from] publish::PublishError),

    /// The stage exceeded its outer bound.
    #[error("stage {stage} timed out after {}s", after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    /// A worker task died without reporting.
    #[error("{stage} worker failed: {message}")]
    Task { stage: Stage, message: String },

    /// The operator interrupted the run.
    #[error("aborted by operator")]
    Aborted,
}

impl StageError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            StageError::Config(_) => Stage::Config.exit_code(),
            StageError::Sync(e) if e.is_timeout() => EXIT_TIMEOUT,
            StageError::Sync(_) => Stage::Sync.exit_code(),
            StageError::Build(e) if e.is_timeout() => EXIT_TIMEOUT,
            StageError::Build(_) => Stage::Build.exit_code(),
            StageError::Reconcile(_) => Stage::Reconcile.exit_code(),
            StageError::Publish(e) if e.is_timeout() => EXIT_TIMEOUT,
            StageError::Publish(_) => Stage::Publish.exit_code(),
            StageError::Timeout { .. } => EXIT_TIMEOUT,
            StageError::Task { stage, .. } => stage.exit_code(),
            StageError::Aborted => EXIT_ABORTED,
        }
    }
}
