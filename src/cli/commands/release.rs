//! release command - Run the release pipeline

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{debug, info};

use super::merged_layer;
use crate::auth::Credential;
use crate::cli::args::ReleaseArgs;
use crate::core::config::{resolve, EnvSnapshot};
use crate::engine::{Context, Pipeline};
use crate::forge::github::GitHubForgeFactory;
use crate::process::ProcessRunner;
use crate::ui::output::{self, Verbosity};

/// Resolve configuration, run the pipeline, and print the report.
///
/// Returns the exit code the report assigns. Ctrl-C stops the run at the
/// stage in progress and exits with 130.
pub fn release(args: &ReleaseArgs, env: &EnvSnapshot, verbosity: Verbosity) -> Result<i32> {
    let layer = merged_layer(args, env, verbosity)?;
    let config = resolve::from_layer(layer)?;

    let credential = Credential::resolve(
        env,
        args.github_token.as_deref(),
        config.github_token.as_ref().map(Credential::expose),
    );
    match &credential {
        Some(c) => debug!(source = %c.source(), "using GitHub credential"),
        None if config.enable_pr_creation => {
            output::warn(
                "no GitHub token found (GITHUB_TOKEN, GH_PAT); pull requests will fail",
                verbosity,
            );
        }
        None => {}
    }

    let forges = Arc::new(GitHubForgeFactory::new(
        Arc::new(credential.clone()),
        config.github_api_base.clone(),
    ));
    info!(
        ig_folder = %config.ig_folder,
        milestone = config.publish.is_milestone(),
        "starting release"
    );
    let ctx = Context {
        config,
        credential,
        runner: ProcessRunner::default(),
        forges,
    };
    let pipeline = Pipeline::new(ctx);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let report = runtime.block_on(pipeline.run_until(async {
        // If the handler cannot be installed, run without abort support.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }));

    output::report(&report, verbosity);
    Ok(report.exit_code())
}
