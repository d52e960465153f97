//! forge::traits
//!
//! The narrow slice of a hosting service the release pipeline needs:
//! look up an open pull request between two branches and open one.
//!
//! Forge calls happen only after a publish has been pushed. A forge
//! failure is recorded beside the publish outcome and never undoes it.
//!
//! ```ignore
//! use igrelease::forge::{CreatePrRequest, Forge, ForgeError};
//!
//! async fn open(forge: &dyn Forge) -> Result<u64, ForgeError> {
//!     if let Some(pr) = forge.find_open_pr("release/my-ig", "main").await? {
//!         return Ok(pr.number);
//!     }
//!     let pr = forge
//!         .create_pr(CreatePrRequest {
//!             head: "release/my-ig".into(),
//!             base: "main".into(),
//!             title: "Publish who.smart.x 1.0.0 to my-ig".into(),
//!             body: None,
//!         })
//!         .await?;
//!     Ok(pr.number)
//! }
//! ```

use async_trait::async_trait;
use thiserror::Error;

/// Failures talking to a hosting service.
#[derive(Debug, Clone, Error)]
pub enum ForgeError {
    /// No token was available for a call that needs one.
    #[error("authentication required")]
    AuthRequired,

    /// The token was rejected or lacks the scope for the call.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The API quota is exhausted.
    #[error("rate limited")]
    RateLimited,

    /// Any other non-success response.
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// The request never got a response.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The target repository URL is not on this forge.
    #[error("unsupported remote: {0}")]
    UnsupportedRemote(String),
}

impl ForgeError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ForgeError::RateLimited | ForgeError::NetworkError(_)
        ) || matches!(self, ForgeError::ApiError { status, .. } if *status >= 500)
    }
}

/// A pull request to open: `head` proposed into `base`.
#[derive(Debug, Clone)]
pub struct CreatePrRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: Option<String>,
}

/// A pull request as the forge reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    /// Web URL for reviewers.
    pub url: String,
    pub state: PrState,
    pub head: String,
    pub base: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PrState::Open => "open",
            PrState::Closed => "closed",
            PrState::Merged => "merged",
        })
    }
}

/// One repository on a hosting service.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Short service name for logs, e.g. `github`.
    fn name(&self) -> &'static str;

    /// Open `request.head` into `request.base`.
    ///
    /// # Errors
    ///
    /// `AuthRequired` without a token, `AuthFailed` on 401/403, and
    /// `ApiError` (usually 422) when the head branch is unknown.
    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError>;

    /// The open pull request from `head` into `base`, if there is one.
    async fn find_open_pr(&self, head: &str, base: &str)
        -> Result<Option<PullRequest>, ForgeError>;
}

/// Hands out a [`Forge`] per target repository. The pipeline may open
/// pull requests against both the webroot and the registry.
pub trait ForgeFactory: Send + Sync {
    /// # Errors
    ///
    /// `UnsupportedRemote` when `url` is not hosted on this forge.
    fn forge_for(&self, url: &str) -> Result<Box<dyn Forge>, ForgeError>;
}
