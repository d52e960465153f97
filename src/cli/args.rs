//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output
//!
//! Release flags map one to one onto configuration keys and form the
//! highest configuration layer. A boolean flag that is not given leaves the
//! key to the lower layers.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::config::ConfigLayer;

/// igr - Build and publish Implementation Guide releases
#[derive(Parser, Debug)]
#[command(name = "igr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output; only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sync repositories, build the IG, publish it and open pull requests
    #[command(
        name = "release",
        long_about = "Run the full release pipeline.\n\n\
            Synchronizes the source, webroot and (for milestone publication) history \
            and registry repositories, runs the IG publisher, moves oversized files out \
            of the publish tree, commits the result into one folder of the webroot and \
            pushes it. With --enable-pr, pull requests are opened against the webroot \
            and registry.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Milestone release of a remote IG into the smart-html webroot
    igr release --source-repo WorldHealthOrganization/smart-dak-pnc --ig-folder dak-pnc

    # Build a local checkout and preview it on GitHub Pages
    igr release --source . --ig-folder dak-pnc --publish-gh-pages

    # Only check out what the webroot needs, and open PRs
    igr release --ig-folder dak-pnc --enable-sparse --sparse assets --enable-pr

EXIT CODES:
    0 success, 2 config, 3 sync, 4 build, 5 reconcile/publish,
    6 pull request failed after a successful publish, 7 timeout, 130 aborted"
    )]
    Release(ReleaseArgs),

    /// Show or initialize configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completion scripts
    #[command(
        name = "completion",
        long_about = "Generate shell completion scripts for tab-completion.\n\n\
            Outputs a completion script for the specified shell. Add the output \
            to your shell's configuration to enable tab-completion for igr.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Bash (add to ~/.bashrc)
    igr completion bash >> ~/.bashrc

    # Zsh (add to ~/.zshrc)
    igr completion zsh >> ~/.zshrc

    # Fish
    igr completion fish > ~/.config/fish/completions/igr.fish"
    )]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags of `igr release` (and `igr config show`).
#[derive(Args, Debug, Clone, Default)]
pub struct ReleaseArgs {
    /// Local override file (default: ./release-config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Build this local source tree instead of cloning the source repo
    #[arg(long = "source", value_name = "DIR")]
    pub source_dir: Option<PathBuf>,

    /// Source repository (URL or owner/name)
    #[arg(long)]
    pub source_repo: Option<String>,

    /// Source branch
    #[arg(long)]
    pub source_branch: Option<String>,

    /// Webroot repository (URL or owner/name)
    #[arg(long)]
    pub webroot_repo: Option<String>,

    /// Webroot base branch
    #[arg(long)]
    pub webroot_branch: Option<String>,

    /// History template repository
    #[arg(long)]
    pub history_repo: Option<String>,

    /// History template branch
    #[arg(long)]
    pub history_branch: Option<String>,

    /// Folder of the webroot that receives the release
    #[arg(long)]
    pub ig_folder: Option<String>,

    /// Check out only the needed parts of the webroot
    #[arg(long)]
    pub enable_sparse: bool,

    /// Extra webroot directories for the sparse checkout
    #[arg(long = "sparse", value_name = "DIR", num_args = 1..)]
    pub sparse_dirs: Vec<String>,

    /// Publish a GitHub Pages preview instead of a milestone release
    #[arg(long)]
    pub publish_gh_pages: bool,

    /// Preview folder on the pages branch (default: the IG folder)
    #[arg(long)]
    pub sitepreview_dir: Option<String>,

    /// Pages branch (default: gh-pages)
    #[arg(long)]
    pub gh_pages_branch: Option<String>,

    /// Keep this path out of the published tree (repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Open pull requests after publishing
    #[arg(long)]
    pub enable_pr: bool,

    /// GitHub token (GITHUB_TOKEN and GH_PAT take precedence)
    #[arg(long, value_name = "TOKEN")]
    pub github_token: Option<String>,

    /// Write publication-request.json from PUBREQ_* settings when missing
    #[arg(long)]
    pub ensure_pubreq: bool,

    /// Run the publisher's milestone publication step after the build
    #[arg(long)]
    pub go_publish: bool,

    /// Workspace for checkouts, caches and assets
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,
}

impl ReleaseArgs {
    /// The CLI configuration layer.
    ///
    /// `--github-token` is not part of it; the credential is resolved
    /// separately with its own precedence.
    pub fn to_layer(&self) -> ConfigLayer {
        let flag = |set: bool| set.then_some(true);
        let list = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());
        ConfigLayer {
            source_dir: self.source_dir.clone(),
            source_repo: self.source_repo.clone(),
            source_branch: self.source_branch.clone(),
            webroot_repo: self.webroot_repo.clone(),
            webroot_branch: self.webroot_branch.clone(),
            history_repo: self.history_repo.clone(),
            history_branch: self.history_branch.clone(),
            ig_folder: self.ig_folder.clone(),
            enable_sparse_checkout: flag(self.enable_sparse),
            sparse_dirs: list(&self.sparse_dirs),
            publish_gh_pages: flag(self.publish_gh_pages),
            sitepreview_dir: self.sitepreview_dir.clone(),
            gh_pages_branch: self.gh_pages_branch.clone(),
            exclude: list(&self.exclude),
            enable_pr_creation: flag(self.enable_pr),
            ensure_pubreq: flag(self.ensure_pubreq),
            go_publish: flag(self.go_publish),
            work_dir: self.work_dir.clone(),
            ..Default::default()
        }
    }
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the effective configuration (token redacted)
    Show(ReleaseArgs),
    /// Write a starter local override file
    Init {
        /// Where to write it
        #[arg(long, value_name = "PATH", default_value = "release-config.toml")]
        path: PathBuf,

        /// IG folder to put in the template
        #[arg(long)]
        ig_folder: Option<String>,

        /// Source repository to put in the template
        #[arg(long)]
        source_repo: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
