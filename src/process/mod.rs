//! process
//!
//! Uniform execution of external programs (git, java, the build tool).
//!
//! # Architecture
//!
//! Every external call goes through [`ProcessRunner::run`], which returns a
//! [`ProcessOutput`] with the exit status, captured stdout/stderr and the
//! wall-clock duration. Retry and timeout policy is therefore the same for
//! every stage.
//!
//! # Process groups
//!
//! On Unix each child is started in its own process group. A
//! [`GroupGuard`] owns that group while the child runs:
//! - on timeout the whole group receives SIGTERM, then SIGKILL after a
//!   grace period, and [`ProcessError::Timeout`] is returned;
//! - if the future running the child is dropped (operator abort, a failed
//!   sibling sync) the guard sends SIGKILL to the group from `Drop`.
//!
//! Either way no orphaned git or build processes survive the pipeline.
//!
//! # Example
//!
//! ```no_run
//! use igrelease::process::{ProcessCommand, ProcessRunner};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), igrelease::process::ProcessError> {
//! let runner = ProcessRunner::default();
//! let out = runner
//!     .run(&ProcessCommand::new("git").arg("--version").timeout(Duration::from_secs(10)))
//!     .await?;
//! assert!(out.success());
//! # Ok(())
//! # }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Default wall-clock bound for a single process.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// Errors from running an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program binary does not exist.
    #[error("program not found: {program}")]
    NotFound { program: String },

    /// The program exists but could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The program exceeded its wall-clock bound and its group was killed.
    #[error("{program} timed out after {}s", after.as_secs())]
    Timeout { program: String, after: Duration },

    /// Waiting on the program failed.
    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

/// Description of one external invocation.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl ProcessCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program name for messages.
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    fn display_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// Result of a finished external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub program: String,
    pub args: Vec<String>,
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Short `program args...` rendering for logs and errors.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Last non-empty stderr line, or stdout's if stderr is empty.
    pub fn last_error_line(&self) -> &str {
        fn last_line(s: &str) -> Option<&str> {
            s.lines().rev().map(str::trim).find(|l| !l.is_empty())
        }
        last_line(&self.stderr)
            .or_else(|| last_line(&self.stdout))
            .unwrap_or("")
    }
}

/// Runs external processes with a timeout inside their own process group.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Time between SIGTERM and SIGKILL on timeout.
    kill_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_secs(5),
        }
    }
}

impl ProcessRunner {
    pub fn with_kill_grace(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Run a command to completion, capturing its output.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// [`ProcessOutput::status`].
    ///
    /// # Errors
    ///
    /// - [`ProcessError::NotFound`] if the program does not exist
    /// - [`ProcessError::Spawn`] if it cannot be started
    /// - [`ProcessError::Timeout`] if it exceeds the command's timeout
    /// - [`ProcessError::Io`] if collecting its output fails
    pub async fn run(&self, cmd: &ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let program = cmd.program_name();
        let args = cmd.display_args();
        debug!(program = %program, args = ?args, cwd = ?cmd.cwd, "running");

        let mut command = tokio::process::Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: program.clone(),
                }
            } else {
                ProcessError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        let mut guard = GroupGuard::new(child.id());
        let started = Instant::now();

        match tokio::time::timeout(cmd.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                guard.disarm();
                let out = ProcessOutput {
                    program,
                    args,
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    duration: started.elapsed(),
                };
                debug!(
                    program = %out.program,
                    status = ?out.status,
                    elapsed_ms = out.duration.as_millis() as u64,
                    "finished"
                );
                Ok(out)
            }
            Ok(Err(e)) => Err(ProcessError::Io { program, source: e }),
            Err(_) => {
                warn!(program = %program, timeout_secs = cmd.timeout.as_secs(), "timed out, killing process group");
                guard.terminate(self.kill_grace).await;
                Err(ProcessError::Timeout {
                    program,
                    after: cmd.timeout,
                })
            }
        }
    }
}

/// Owns a child's process group until the child is reaped.
///
/// Dropping an armed guard kills the whole group.
#[derive(Debug)]
pub struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    /// The child exited normally; nothing left to kill.
    fn disarm(&mut self) {
        self.pgid = None;
    }

    /// SIGTERM the group, wait `grace`, then SIGKILL it.
    async fn terminate(&mut self, grace: Duration) {
        if let Some(pgid) = self.pgid.take() {
            if signal_group(pgid, "TERM") {
                tokio::time::sleep(grace).await;
                signal_group(pgid, "KILL");
            }
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(pgid, "dropping running process group");
            signal_group(pgid, "KILL");
        }
    }
}

/// Returns whether the signal reached the group.
#[cfg(unix)]
fn signal_group(pgid: u32, signal: &str) -> bool {
    // Negative pid addresses the whole process group.
    let status = std::process::Command::new("kill")
        .arg(format!("-{signal}"))
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => true,
        Ok(status) => {
            debug!(pgid, signal, code = ?status.code(), "process group already gone");
            false
        }
        Err(e) => {
            warn!(pgid, signal, error = %e, "could not signal process group");
            false
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _signal: &str) -> bool {
    false
}
