//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Resolves configuration from files, environment and flags
//! 2. Calls the engine to execute the command
//! 3. Formats and displays output
//!
//! Handlers return the process exit code. `release` is async underneath;
//! it builds its own tokio runtime so the rest of the CLI stays sync.

mod completion;
mod config_cmd;
mod release;

pub use completion::completion;
pub use config_cmd::{init as config_init, show as config_show};
pub use release::release;

use anyhow::Result;

use crate::cli::args::{Command, ConfigAction, ReleaseArgs};
use crate::core::config::{self, ConfigLayer, EnvSnapshot};
use crate::ui::output::{self, Verbosity};

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, env: &EnvSnapshot, verbosity: Verbosity) -> Result<i32> {
    match command {
        Command::Release(args) => release::release(&args, env, verbosity),
        Command::Config { action } => match action {
            ConfigAction::Show(args) => config_cmd::show(&args, env, verbosity).map(|()| 0),
            ConfigAction::Init {
                path,
                ig_folder,
                source_repo,
                force,
            } => config_cmd::init(&path, ig_folder.as_deref(), source_repo.as_deref(), force)
                .map(|()| 0),
        },
        Command::Completion { shell } => completion::completion(shell).map(|()| 0),
    }
}

/// Load the file layers and merge them with the environment and flags.
///
/// Config warnings (such as a token stored in a file) are printed here.
fn merged_layer(
    args: &ReleaseArgs,
    env: &EnvSnapshot,
    verbosity: Verbosity,
) -> Result<ConfigLayer, config::ConfigError> {
    let loaded = config::load_layers(env, args.config.as_deref())?;
    for warning in &loaded.warnings {
        output::warn(
            format!("{}: {}", warning.path.display(), warning.message),
            verbosity,
        );
    }
    Ok(config::resolve::merge(
        loaded.global,
        loaded.local,
        ConfigLayer::from_env(env),
        args.to_layer(),
    ))
}
