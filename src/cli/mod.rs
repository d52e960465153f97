//! cli
//!
//! Command-line interface layer for igr.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Install the tracing subscriber
//! - Delegate to command handlers and turn their outcome into an exit code
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap and dispatches to the
//! [`crate::engine`] for execution. Configuration errors surface here as
//! exit code 2; pipeline failures carry their own code in the run report.

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use tracing_subscriber::EnvFilter;

use crate::core::config::{ConfigError, EnvSnapshot};
use crate::ui::output::{self, Verbosity};

/// Exit code for anything that is not a stage failure.
const EXIT_FAILURE: i32 = 1;

/// Run the CLI application and return the process exit code.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> i32 {
    let cli = Cli::parse_args();
    let verbosity = Verbosity::from_flags(cli.quiet, cli.debug);
    init_tracing(verbosity);

    let env = EnvSnapshot::from_vars(std::env::vars());
    match commands::dispatch(cli.command, &env, verbosity) {
        Ok(code) => code,
        Err(err) => {
            output::error(format!("{err:#}"));
            exit_code_for(&err)
        }
    }
}

/// `RUST_LOG` wins over the verbosity flags.
fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        crate::engine::Stage::Config.exit_code()
    } else {
        EXIT_FAILURE
    }
}
