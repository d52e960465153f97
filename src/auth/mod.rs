//! auth - Bearer credential resolution
//!
//! The release pipeline authenticates with a single bearer credential. It
//! is resolved once at the CLI edge and carried immutably in the pipeline
//! context; no component reads the environment for it later.
//!
//! # Precedence
//!
//! Highest wins:
//! 1. `GITHUB_TOKEN` (set by CI)
//! 2. `GH_PAT`
//! 3. `--github-token`
//! 4. `github_token` from configuration
//!
//! # Security
//!
//! Tokens MUST never appear in logs (including `--debug`), error messages
//! or command lines. [`Credential`] implements a redacting `Debug`, and
//! git receives the token through `GIT_CONFIG_*` environment variables.
//!
//! # Example
//!
//! ```
//! use igrelease::auth::{Credential, CredentialSource};
//! use igrelease::core::config::EnvSnapshot;
//!
//! let env = EnvSnapshot::from_vars([("GH_PAT", "ghp_example")]);
//! let cred = Credential::resolve(&env, None, None).unwrap();
//! assert_eq!(cred.source(), CredentialSource::GhPat);
//! assert!(!format!("{cred:?}").contains("ghp_example"));
//! ```

use std::fmt;

use thiserror::Error;

use crate::core::config::EnvSnapshot;

/// Errors from obtaining a bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no GitHub credential available (set GITHUB_TOKEN or GH_PAT)")]
    NotAuthenticated,
}

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    GithubToken,
    GhPat,
    CommandLine,
    ConfigFile,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialSource::GithubToken => "GITHUB_TOKEN",
            CredentialSource::GhPat => "GH_PAT",
            CredentialSource::CommandLine => "--github-token",
            CredentialSource::ConfigFile => "config github_token",
        };
        write!(f, "{s}")
    }
}

/// An immutable bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    source: CredentialSource,
}

impl Credential {
    /// Create a credential from a raw token.
    ///
    /// Returns `None` for empty or whitespace-only tokens.
    pub fn new(token: impl Into<String>, source: CredentialSource) -> Option<Self> {
        let token = token.into().trim().to_string();
        (!token.is_empty()).then_some(Self { token, source })
    }

    /// Resolve the credential from all sources, highest precedence first.
    pub fn resolve(
        env: &EnvSnapshot,
        cli_token: Option<&str>,
        config_token: Option<&str>,
    ) -> Option<Self> {
        env.get("GITHUB_TOKEN")
            .and_then(|t| Self::new(t, CredentialSource::GithubToken))
            .or_else(|| env.get("GH_PAT").and_then(|t| Self::new(t, CredentialSource::GhPat)))
            .or_else(|| cli_token.and_then(|t| Self::new(t, CredentialSource::CommandLine)))
            .or_else(|| config_token.and_then(|t| Self::new(t, CredentialSource::ConfigFile)))
    }

    /// The raw token. Only for building request headers.
    pub fn expose(&self) -> &str {
        &self.token
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Value for an `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Environment variables that make git send the credential as an
    /// `http.extraHeader`, keeping it off the command line.
    pub fn git_env(&self) -> Vec<(String, String)> {
        vec![
            ("GIT_CONFIG_COUNT".into(), "1".into()),
            ("GIT_CONFIG_KEY_0".into(), "http.extraHeader".into()),
            (
                "GIT_CONFIG_VALUE_0".into(),
                format!("Authorization: {}", self.authorization()),
            ),
        ]
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// Trait for providing bearer tokens to forge adapters.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a bearer token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if no token exists
    async fn bearer_token(&self) -> Result<String, AuthError>;
}

#[async_trait::async_trait]
impl TokenProvider for Credential {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

#[async_trait::async_trait]
impl TokenProvider for Option<Credential> {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        self.as_ref()
            .map(|c| c.token.clone())
            .ok_or(AuthError::NotAuthenticated)
    }
}
