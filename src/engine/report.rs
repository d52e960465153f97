//! engine::report
//!
//! The run report: what every stage did, where the publish landed, what
//! happened to each pull request, and which directories were left behind.
//!
//! PR outcomes are kept apart from the publish outcome, so a failed PR
//! never hides a successful publish.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::pr::{PrError, PrRef};
use super::publish::CommitRef;
use super::reconcile::OversizedFile;
use super::{PipelineState, Stage, StageError};

/// Exit code for a PR failure after a successful publish.
pub const EXIT_PR_FAILED: i32 = 6;

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Skipped(String),
    Failed(String),
}

/// One executed (or skipped) stage.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: Stage,
    pub duration: Duration,
    pub outcome: StageOutcome,
}

/// The stage that stopped the pipeline.
#[derive(Debug, Clone)]
pub struct Failure {
    pub stage: Stage,
    pub cause: String,
    pub exit_code: i32,
}

/// Which destination a PR was aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrTarget {
    Webroot,
    Registry,
}

impl std::fmt::Display for PrTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrTarget::Webroot => write!(f, "webroot"),
            PrTarget::Registry => write!(f, "registry"),
        }
    }
}

/// Result of one PR attempt.
#[derive(Debug, Clone)]
pub struct PrOutcome {
    pub target: PrTarget,
    pub result: Result<PrRef, PrError>,
}

/// Build counters worth reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildSummary {
    pub warnings: usize,
    pub errors: usize,
    pub duration: Duration,
}

/// Everything a finished (or failed) run has to say.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: PipelineState,
    pub stages: Vec<StageRecord>,
    /// Stage currently executing, if any.
    pub running: Option<Stage>,
    pub failure: Option<Failure>,
    pub build: Option<BuildSummary>,
    pub publish: Option<CommitRef>,
    pub registry: Option<CommitRef>,
    pub prs: Vec<PrOutcome>,
    pub oversized: Vec<OversizedFile>,
    /// Working directories left in place for inspection or a rerun.
    pub preserved: Vec<PathBuf>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            state: PipelineState::Init,
            stages: Vec::new(),
            running: None,
            failure: None,
            build: None,
            publish: None,
            registry: None,
            prs: Vec::new(),
            oversized: Vec::new(),
            preserved: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: Stage, duration: Duration, outcome: StageOutcome) {
        self.running = None;
        self.stages.push(StageRecord {
            stage,
            duration,
            outcome,
        });
    }

    /// Move to the absorbing failed state.
    pub fn fail(&mut self, stage: Stage, err: &StageError) {
        self.state = PipelineState::Failed(stage);
        self.running = None;
        self.failure = Some(Failure {
            stage,
            cause: err.to_string(),
            exit_code: err.exit_code(),
        });
        self.finished_at = Some(Utc::now());
    }

    pub fn finish(&mut self) {
        self.state = PipelineState::Done;
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn pr_failures(&self) -> impl Iterator<Item = &PrOutcome> {
        self.prs.iter().filter(|p| p.result.is_err())
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        match &self.failure {
            Some(f) => f.exit_code,
            None if self.pr_failures().next().is_some() => EXIT_PR_FAILED,
            None => 0,
        }
    }

    /// Human-readable summary, one fact per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match &self.failure {
            None => {
                let _ = writeln!(out, "Release finished ({})", self.state);
            }
            Some(f) => {
                let _ = writeln!(out, "Release failed in stage {}: {}", f.stage, f.cause);
            }
        }
        if let Some(end) = self.finished_at {
            let secs = (end - self.started_at).num_seconds().max(0);
            let _ = writeln!(out, "  elapsed: {secs}s");
        }
        let width = self
            .stages
            .iter()
            .map(|r| r.stage.to_string().len())
            .max()
            .unwrap_or(0);
        for record in &self.stages {
            let outcome = match &record.outcome {
                StageOutcome::Succeeded => "ok".to_string(),
                StageOutcome::Skipped(why) => format!("skipped ({why})"),
                StageOutcome::Failed(why) => format!("failed: {why}"),
            };
            let _ = writeln!(
                out,
                "  {:<width$} {:>6.1}s  {outcome}",
                record.stage.to_string(),
                record.duration.as_secs_f64()
            );
        }
        if let Some(build) = &self.build {
            let _ = writeln!(
                out,
                "  build: {} warning(s), {} error(s)",
                build.warnings, build.errors
            );
        }
        for (label, commit) in [("publish", &self.publish), ("registry", &self.registry)] {
            if let Some(c) = commit {
                let what = if c.created { "committed" } else { "unchanged" };
                let _ = writeln!(out, "  {label}: {what} {} on {}", c.oid.short(8), c.branch);
            }
        }
        for file in &self.oversized {
            let _ = writeln!(
                out,
                "  oversized (kept out of git): {} ({} MiB)",
                file.path,
                file.size / (1024 * 1024)
            );
        }
        for pr in &self.prs {
            let line = match &pr.result {
                Ok(PrRef::Created(p)) => format!("opened #{} {}", p.number, p.url),
                Ok(PrRef::Existing(p)) => format!("already open #{} {}", p.number, p.url),
                Ok(PrRef::Skipped) => "skipped (head equals base)".to_string(),
                Err(e) => format!("FAILED: {e}"),
            };
            let _ = writeln!(out, "  pull request ({}): {line}", pr.target);
        }
        if !self.preserved.is_empty() {
            let _ = writeln!(out, "  preserved working directories:");
            for path in &self.preserved {
                let _ = writeln!(out, "    {}", path.display());
            }
        }
        out
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
