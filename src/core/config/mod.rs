//! core::config
//!
//! Configuration layers, loading and resolution.
//!
//! # Overview
//!
//! A release is configured by five layers:
//! - **Built-in**: defaults baked into the binary
//! - **Global**: user-level defaults file
//! - **Local**: per-project override file
//! - **Environment**: CI variables (`PUBREQ_*`, `GITHUB_REPOSITORY`)
//! - **CLI**: flags on `igr release`
//!
//! This module does the file I/O. Merging and validation live in
//! [`resolve`], which is pure.
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$GLOBAL_RELEASE_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/igrelease/config.toml`
//! 3. `<config dir>/igrelease/config.toml`
//!
//! # Local Config Location
//!
//! `--config <path>`, else `./release-config.toml`.
//!
//! # Example
//!
//! ```no_run
//! use igrelease::core::config::{load_layers, resolve, ConfigLayer, EnvSnapshot};
//!
//! let env = EnvSnapshot::from_vars(std::env::vars());
//! let loaded = load_layers(&env, None).unwrap();
//! let config = resolve::resolve(
//!     loaded.global,
//!     loaded.local,
//!     ConfigLayer::from_env(&env),
//!     ConfigLayer::default(),
//! )
//! .unwrap();
//! println!("publishing into {}", config.ig_folder);
//! ```

pub mod resolve;
pub mod schema;

pub use resolve::{
    BuildSettings, CommitAuthor, EffectiveConfig, PublishMode, RepositoryRef, SourceLocation,
    SyncPolicy,
};
pub use schema::{ConfigLayer, EnvSnapshot, PubreqLayer};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default name of the local override file.
pub const LOCAL_CONFIG_FILE: &str = "release-config.toml";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("conflicting settings: {0}")]
    Conflict(String),

    #[error("invalid publication request: {0}")]
    PublicationRequest(String),
}

/// Warnings generated during config loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// The warning message.
    pub message: String,
    /// The path that triggered the warning.
    pub path: PathBuf,
}

/// File layers as loaded from disk.
#[derive(Debug, Default)]
pub struct LoadedLayers {
    pub global: ConfigLayer,
    pub local: ConfigLayer,
    /// Path to the global config file (if loaded)
    pub global_path: Option<PathBuf>,
    /// Path to the local config file (if loaded)
    pub local_path: Option<PathBuf>,
    /// Any warnings generated during loading.
    pub warnings: Vec<ConfigWarning>,
}

/// Load the global and local file layers.
///
/// Missing files are not an error and yield empty layers, except an
/// explicitly requested `--config` path, which must exist.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be read or parsed.
pub fn load_layers(
    env: &EnvSnapshot,
    explicit_local: Option<&Path>,
) -> Result<LoadedLayers, ConfigError> {
    let mut loaded = LoadedLayers::default();

    if let Some(path) = global_config_path(env).filter(|p| p.exists()) {
        loaded.global = read_layer(&path)?;
        loaded.global_path = Some(path);
    }

    let local_path = match explicit_local {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                });
            }
            Some(path.to_path_buf())
        }
        None => Some(PathBuf::from(LOCAL_CONFIG_FILE)).filter(|p| p.exists()),
    };
    if let Some(path) = local_path {
        loaded.local = read_layer(&path)?;
        loaded.local_path = Some(path);
    }

    for (layer, path) in [
        (&loaded.global, &loaded.global_path),
        (&loaded.local, &loaded.local_path),
    ] {
        if let (true, Some(path)) = (layer.has_token(), path) {
            loaded.warnings.push(ConfigWarning {
                message: "github_token is set in a config file; prefer GITHUB_TOKEN or GH_PAT"
                    .to_string(),
                path: path.clone(),
            });
        }
    }

    Ok(loaded)
}

/// Location of the global config file.
///
/// Returns `None` only when no config directory can be determined.
pub fn global_config_path(env: &EnvSnapshot) -> Option<PathBuf> {
    if let Some(path) = env.get("GLOBAL_RELEASE_CONFIG") {
        return Some(PathBuf::from(path));
    }
    if let Some(xdg_home) = env.get("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_home).join("igrelease/config.toml"));
    }
    dirs::config_dir().map(|dir| dir.join("igrelease/config.toml"))
}

/// Read and parse one config file.
pub fn read_layer(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Write a config layer atomically.
///
/// Creates parent directories if needed. Uses atomic write (write to temp
/// file, then rename) to prevent corruption.
pub fn write_atomic(path: &Path, layer: &ConfigLayer) -> Result<(), ConfigError> {
    let contents =
        toml::to_string_pretty(layer).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
    write_text_atomic(path, &contents)
}

/// Write text atomically (temp file in the same directory, then rename).
pub fn write_text_atomic(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ConfigError::WriteError { path, source }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err(path))?;
    }

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let mut file = fs::File::create(&temp_path).map_err(write_err(&temp_path))?;
    file.write_all(contents.as_bytes())
        .map_err(write_err(&temp_path))?;
    file.sync_all().map_err(write_err(&temp_path))?;

    fs::rename(&temp_path, path).map_err(write_err(path))?;
    Ok(())
}

/// Starter local override file written by `igr config init`.
pub fn local_template(ig_folder: Option<&str>, source_repo: Option<&str>) -> String {
    format!(
        r#"# Release configuration for igr.
# Values here override the global defaults file; CLI flags override both.

source_repo = "{source_repo}"
source_branch = "main"
ig_folder = "{ig_folder}"

# webroot_repo = "WorldHealthOrganization/smart-html"
# webroot_branch = "main"
# history_repo = "HL7/fhir-ig-history-template"
# registry_repo = "FHIR/ig-registry"

# enable_sparse_checkout = true
# sparse_dirs = ["assets"]

# enable_pr_creation = true
# exclude = ["*.zip"]

# Leave empty; tokens come from GITHUB_TOKEN or GH_PAT.
github_token = ""
"#,
        source_repo = source_repo.unwrap_or("owner/my-ig"),
        ig_folder = ig_folder.unwrap_or("my-ig"),
    )
}
