//! config command - Show the effective configuration or write a starter file

use std::path::Path;

use anyhow::{bail, Result};

use super::merged_layer;
use crate::cli::args::ReleaseArgs;
use crate::core::config::{self, resolve, ConfigError, ConfigLayer, EnvSnapshot};
use crate::ui::output::{self, Verbosity};

const REDACTED: &str = "<redacted>";

/// Print the merged configuration as TOML.
///
/// The merged layer is validated first, so `show` fails exactly where
/// `release` would. The token is never printed.
pub fn show(args: &ReleaseArgs, env: &EnvSnapshot, verbosity: Verbosity) -> Result<()> {
    let layer = merged_layer(args, env, verbosity)?;
    resolve::from_layer(layer.clone())?;
    println!("{}", render(layer, args.github_token.is_some())?);
    Ok(())
}

/// Write the local override template.
pub fn init(
    path: &Path,
    ig_folder: Option<&str>,
    source_repo: Option<&str>,
    force: bool,
) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    config::write_text_atomic(path, &config::local_template(ig_folder, source_repo))?;
    output::print(format!("Wrote {}", path.display()), Verbosity::Normal);
    Ok(())
}

fn render(mut layer: ConfigLayer, cli_token: bool) -> Result<String, ConfigError> {
    if layer.has_token() || cli_token {
        layer.github_token = Some(REDACTED.to_string());
    }
    toml::to_string_pretty(&layer).map_err(|e| ConfigError::InvalidValue(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_redacted() {
        let layer = ConfigLayer {
            github_token: Some("ghp_secret".into()),
            ig_folder: Some("my-ig".into()),
            ..Default::default()
        };
        let text = render(layer, false).unwrap();
        assert!(!text.contains("ghp_secret"));
        assert!(text.contains(REDACTED));
        assert!(text.contains("ig_folder = \"my-ig\""));
    }

    #[test]
    fn cli_token_shows_as_redacted() {
        let text = render(ConfigLayer::default(), true).unwrap();
        assert!(text.contains(REDACTED));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release-config.toml");
        init(&path, Some("my-ig"), Some("o/ig"), false).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("ig_folder = \"my-ig\""));

        assert!(init(&path, None, None, false).is_err());
        init(&path, Some("other"), None, true).unwrap();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("ig_folder = \"other\""));
    }

    #[test]
    fn template_parses_as_a_layer() {
        let text = config::local_template(Some("my-ig"), Some("o/ig"));
        let layer: ConfigLayer = toml::from_str(&text).unwrap();
        assert_eq!(layer.ig_folder.as_deref(), Some("my-ig"));
    }
}
