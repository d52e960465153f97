//! core::pubreq
//!
//! The publication request (`publication-request.json`).
//!
//! The build tool's milestone publication step reads this file from the
//! root of the IG source. A release either finds one there or, when asked
//! to, synthesizes one from the `pubreq` settings and writes it. Either
//! way the request is validated before the build starts.
//!
//! # Example
//!
//! ```
//! use igrelease::core::config::PubreqLayer;
//! use igrelease::core::pubreq::PublicationRequest;
//!
//! let inputs = PubreqLayer {
//!     package_id: Some("smart.who.int.pnc".into()),
//!     version: Some("1.0.0".into()),
//!     canonical: Some("http://smart.who.int/pnc".into()),
//!     path: None,
//! };
//! let req = PublicationRequest::synthesize(&inputs).unwrap();
//! assert_eq!(req.path.as_deref(), Some("http://smart.who.int/pnc/1.0.0"));
//! assert!(req.validate().is_ok());
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::config::{ConfigError, PubreqLayer};
use crate::core::paths::WorkPaths;

/// Contents of `publication-request.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PublicationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introduction: Option<String>,

    /// Canonical URL the request was derived from; not part of the file.
    #[serde(skip)]
    pub canonical: Option<String>,
}

impl PublicationRequest {
    /// Build a request from configured inputs.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::PublicationRequest` when package id, version or
    /// canonical URL is missing.
    pub fn synthesize(inputs: &PubreqLayer) -> Result<Self, ConfigError> {
        let need = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .ok_or_else(|| {
                    ConfigError::PublicationRequest(format!(
                        "cannot synthesize a publication request without {name}"
                    ))
                })
        };
        let package_id = need(&inputs.package_id, "pubreq.package_id")?;
        let version = need(&inputs.version, "pubreq.version")?;
        let canonical = need(&inputs.canonical, "pubreq.canonical")?;
        let canonical = canonical.trim_end_matches('/').to_string();

        let path = inputs
            .path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| format!("{canonical}/{version}"));

        Ok(Self {
            package_id: Some(package_id),
            desc: Some(format!("Release {version}")),
            version: Some(version),
            path: Some(path),
            mode: Some("milestone".into()),
            status: Some("release".into()),
            sequence: Some("Releases".into()),
            first: Some(false),
            ci_build: Some(canonical.clone()),
            canonical: Some(canonical),
            ..Default::default()
        })
    }

    /// Read a request file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut req: Self =
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        req.canonical = req.ci_build.clone();
        Ok(req)
    }

    /// Check that every required field is present and non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("package-id", &self.package_id),
            ("version", &self.version),
            ("path", &self.path),
            ("mode", &self.mode),
            ("status", &self.status),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.as_deref().map_or(true, |s| s.trim().is_empty()))
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::PublicationRequest(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Write the request as pretty JSON, atomically.
    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        crate::core::config::write_text_atomic(path, &format!("{json}\n"))
    }

    pub fn package_id(&self) -> &str {
        self.package_id.as_deref().unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or_default()
    }
}

/// Load the source tree's publication request, synthesizing it when
/// `ensure` is set and the file is absent. The result is validated.
///
/// # Errors
///
/// `ConfigError` if the file is absent and cannot be synthesized, fails to
/// parse, or lacks required fields.
pub fn ensure(
    source: &Path,
    inputs: &PubreqLayer,
    ensure: bool,
) -> Result<PublicationRequest, ConfigError> {
    let path = WorkPaths::publication_request(source);
    let req = if path.exists() {
        PublicationRequest::load(&path)?
    } else if ensure {
        let req = PublicationRequest::synthesize(inputs)?;
        req.write(&path)?;
        tracing::info!(path = %path.display(), "wrote synthesized publication request");
        req
    } else {
        return Err(ConfigError::PublicationRequest(format!(
            "{} not found (use --ensure-pubreq to synthesize it)",
            path.display()
        )));
    };
    req.validate()?;
    Ok(req)
}
