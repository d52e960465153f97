//! engine::build
//!
//! Build Stage Executor: run the external IG publisher and check what it
//! left behind.
//!
//! The build tool is opaque. This module only assembles its command line,
//! captures its output, turns `WARNING`/`ERROR` lines into diagnostics and
//! verifies the output tree. A failed build is never retried.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::core::config::resolve::BuildSettings;
use crate::core::paths::WorkPaths;
use crate::process::{ProcessCommand, ProcessError, ProcessOutput, ProcessRunner};

/// QA report files; at least one must exist in the output.
pub const QA_ARTIFACTS: &[&str] = &["qa.html", "qa.json"];

/// Severity of a build diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One notable line of build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Outcome of a finished build tool run.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    pub output_dir: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
    pub duration: Duration,
}

impl BuildResult {
    pub fn warnings(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn errors(&self) -> usize {
        self.count(Severity::Error)
    }

    fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Errors from the build stage.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build tool (jar or executable) is not there.
    #[error("build tool not found: {0}")]
    ToolMissing(PathBuf),

    /// The tool exited non-zero.
    #[error("{step} failed (exit {}): {last_line}", status.map_or("signal".to_string(), |s| s.to_string()))]
    Failed {
        step: &'static str,
        status: Option<i32>,
        last_line: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// The tool exited 0 but its output is incomplete.
    #[error("build output {path} is incomplete: {reason}")]
    MissingOutput { path: PathBuf, reason: String },

    /// Running the tool failed (timeout, i/o).
    #[error(transparent)]
    Process(ProcessError),
}

impl BuildError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BuildError::Process(ProcessError::Timeout { .. }))
    }
}

/// Checkouts the milestone publication step reads and writes.
#[derive(Debug, Clone)]
pub struct GoPublishPaths<'a> {
    pub source: &'a Path,
    pub webroot: &'a Path,
    pub registry: &'a Path,
    pub history: &'a Path,
    pub package_cache: &'a Path,
    pub temp: &'a Path,
}

/// Runs the IG publisher.
#[derive(Debug, Clone)]
pub struct BuildExecutor {
    runner: ProcessRunner,
    settings: BuildSettings,
}

impl BuildExecutor {
    pub fn new(runner: ProcessRunner, settings: BuildSettings) -> Self {
        Self { runner, settings }
    }

    /// Build the IG in `source`.
    ///
    /// Returns the result of an exit-0 run. Use [`verify_output`] before
    /// trusting the output tree.
    ///
    /// # Errors
    ///
    /// - [`BuildError::ToolMissing`] if the jar or tool does not exist
    /// - [`BuildError::Failed`] on a non-zero exit
    /// - [`BuildError::Process`] on timeout
    pub async fn build(
        &self,
        source: &Path,
        cache_dir: &Path,
        extra_args: &[String],
    ) -> Result<BuildResult, BuildError> {
        let mut args: Vec<OsString> = vec![
            "-ig".into(),
            source.into(),
            "-package-cache-folder".into(),
            cache_dir.into(),
        ];
        args.extend(extra_args.iter().map(OsString::from));

        info!(source = %source.display(), "running build");
        let out = self.run("build", source, args).await?;
        let result = BuildResult {
            status: out.status,
            output_dir: WorkPaths::build_output(source),
            diagnostics: diagnostics(&out),
            duration: out.duration,
        };
        info!(
            warnings = result.warnings(),
            errors = result.errors(),
            elapsed_secs = result.duration.as_secs(),
            "build finished"
        );
        Ok(result)
    }

    /// Run the milestone publication step (`-go-publish`).
    ///
    /// It writes the release into the webroot and updates the registry
    /// list in place.
    pub async fn go_publish(&self, paths: &GoPublishPaths<'_>) -> Result<BuildResult, BuildError> {
        let registry_list = paths.registry.join("fhir-ig-list.json");
        let templates = paths.webroot.join("templates");
        let args: Vec<OsString> = vec![
            "-go-publish".into(),
            "-package-cache-folder".into(),
            paths.package_cache.into(),
            "-source".into(),
            paths.source.into(),
            "-web".into(),
            paths.webroot.into(),
            "-temp".into(),
            paths.temp.into(),
            "-registry".into(),
            registry_list.into(),
            "-history".into(),
            paths.history.into(),
            "-templates".into(),
            templates.into(),
        ];

        fs::create_dir_all(paths.temp).map_err(|e| BuildError::MissingOutput {
            path: paths.temp.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!(web = %paths.webroot.display(), "running publication step");
        let out = self.run("publication step", paths.source, args).await?;
        Ok(BuildResult {
            status: out.status,
            output_dir: paths.webroot.to_path_buf(),
            diagnostics: diagnostics(&out),
            duration: out.duration,
        })
    }

    /// Assemble the command line: `java -Xmx.. -jar <jar> ...` or the
    /// configured tool with the heap hint in `JAVA_TOOL_OPTIONS`.
    fn command(&self, cwd: &Path, args: Vec<OsString>) -> Result<ProcessCommand, BuildError> {
        let heap = format!("-Xmx{}", self.settings.java_heap);
        let cmd = match &self.settings.build_tool {
            Some(tool) => {
                if tool.components().count() > 1 && !tool.exists() {
                    return Err(BuildError::ToolMissing(tool.clone()));
                }
                ProcessCommand::new(tool).env("JAVA_TOOL_OPTIONS", heap)
            }
            None => {
                let jar = &self.settings.publisher_jar;
                if !jar.is_file() {
                    return Err(BuildError::ToolMissing(jar.clone()));
                }
                ProcessCommand::new("java")
                    .arg(heap)
                    .arg("-Dfile.encoding=UTF-8")
                    .arg("-jar")
                    .arg(jar)
            }
        };
        Ok(cmd
            .args(args)
            .current_dir(cwd)
            .timeout(self.settings.timeout))
    }

    async fn run(
        &self,
        step: &'static str,
        cwd: &Path,
        args: Vec<OsString>,
    ) -> Result<ProcessOutput, BuildError> {
        let cmd = self.command(cwd, args)?;
        let out = self.runner.run(&cmd).await.map_err(|e| match e {
            ProcessError::NotFound { .. } => BuildError::ToolMissing(PathBuf::from(cmd.program_name())),
            other => BuildError::Process(other),
        })?;
        if !out.success() {
            let diagnostics = diagnostics(&out);
            warn!(step, status = ?out.status, errors = diagnostics.len(), "build tool failed");
            return Err(BuildError::Failed {
                step,
                status: out.status,
                last_line: out.last_error_line().to_string(),
                diagnostics,
            });
        }
        Ok(out)
    }
}

/// Check an exit-0 build: the output directory exists, holds a QA report
/// and a `templates` directory.
///
/// # Errors
///
/// [`BuildError::MissingOutput`] naming the first thing that is missing.
pub fn verify_output(result: &BuildResult) -> Result<(), BuildError> {
    let dir = &result.output_dir;
    let missing = |reason: &str| BuildError::MissingOutput {
        path: dir.clone(),
        reason: reason.to_string(),
    };
    if !dir.is_dir() {
        return Err(missing("output directory does not exist"));
    }
    if !QA_ARTIFACTS.iter().any(|f| dir.join(f).is_file()) {
        return Err(missing("no qa.html or qa.json"));
    }
    if !dir.join("templates").is_dir() {
        return Err(missing("no templates directory"));
    }
    Ok(())
}

fn diagnostics(out: &ProcessOutput) -> Vec<Diagnostic> {
    out.stdout
        .lines()
        .chain(out.stderr.lines())
        .filter_map(|line| {
            let severity = if line.contains("ERROR") {
                Severity::Error
            } else if line.contains("WARNING") {
                Severity::Warning
            } else {
                return None;
            };
            Some(Diagnostic {
                severity,
                message: line.trim().to_string(),
            })
        })
        .collect()
}
