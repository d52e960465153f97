//! forge::github
//!
//! GitHub forge implementation using the REST API.
//!
//! # Authentication
//!
//! Requests carry `Authorization: Bearer <token>` obtained from a
//! [`TokenProvider`]. The pipeline resolves its credential once, so the
//! provider is normally an immutable [`Credential`](crate::auth::Credential).
//!
//! # Rate Limiting
//!
//! GitHub has rate limits. This implementation:
//! - Returns `ForgeError::RateLimited` when limits are hit (429, or 403
//!   with `x-ratelimit-remaining: 0`)
//! - Does not retry; a PR failure never unwinds a publish
//!
//! # Example
//!
//! ```ignore
//! use igrelease::forge::github::GitHubForge;
//! use igrelease::forge::{CreatePrRequest, Forge};
//! use std::sync::Arc;
//!
//! let forge = GitHubForge::new(Arc::new(credential), "FHIR", "ig-registry");
//! let pr = forge.create_pr(CreatePrRequest {
//!     head: "release/my-ig".to_string(),
//!     base: "master".to_string(),
//!     title: "Register my-ig 1.0.0".to_string(),
//!     body: None,
//! }).await?;
//! ```
//!
//! [`TokenProvider`]: crate::auth::TokenProvider

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{CreatePrRequest, Forge, ForgeError, ForgeFactory, PrState, PullRequest};
use crate::auth::TokenProvider;

/// Default GitHub API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = "igrelease";

/// GitHub forge implementation for one repository.
pub struct GitHubForge {
    /// HTTP client for making requests
    client: Client,
    /// Source of the bearer token
    token_provider: Arc<dyn TokenProvider>,
    /// Repository owner (user or organization)
    owner: String,
    /// Repository name
    repo: String,
    /// API base URL (configurable for GitHub Enterprise and tests)
    api_base: String,
}

impl std::fmt::Debug for GitHubForge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubForge")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl GitHubForge {
    /// Create a forge for `owner/repo` on github.com.
    pub fn new(
        provider: Arc<dyn TokenProvider>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        Self::with_api_base(provider, owner, repo, DEFAULT_API_BASE)
    }

    /// Create a forge with a custom API base URL.
    ///
    /// Use this for GitHub Enterprise installations
    /// (e.g. `https://github.example.com/api/v3`).
    pub fn with_api_base(
        provider: Arc<dyn TokenProvider>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            token_provider: provider,
            owner: owner.into(),
            repo: repo.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a forge from a remote URL.
    ///
    /// Returns `None` if the URL is not a GitHub repository.
    pub fn from_remote_url(
        url: &str,
        provider: Arc<dyn TokenProvider>,
        api_base: &str,
    ) -> Option<Self> {
        let (owner, repo) = parse_github_url(url)?;
        Some(Self::with_api_base(provider, owner, repo, api_base))
    }

    /// Get the repository owner.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Get the repository name.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Build common headers for API requests.
    async fn headers(&self) -> Result<HeaderMap, ForgeError> {
        let token = self
            .token_provider
            .bearer_token()
            .await
            .map_err(|_| ForgeError::AuthRequired)?;
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ForgeError::AuthFailed("token is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        Ok(headers)
    }

    /// Build URL for a repository endpoint.
    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    /// Handle API response, mapping errors appropriately.
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: Response,
    ) -> Result<T, ForgeError> {
        let status = response.status();

        if status.is_success() {
            response.json().await.map_err(|e| ForgeError::ApiError {
                status: status.as_u16(),
                message: format!("Failed to parse response: {}", e),
            })
        } else {
            Err(Self::error_from_response(response, status).await)
        }
    }

    /// Map an error response from the API.
    async fn error_from_response(response: Response, status: StatusCode) -> ForgeError {
        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0");

        // Try to get error message from body
        let message = match response.json::<GitHubErrorResponse>().await {
            Ok(err) => err.message,
            Err(_) => "Unknown error".to_string(),
        };

        match status {
            StatusCode::UNAUTHORIZED => ForgeError::AuthFailed("Invalid or expired token".into()),
            StatusCode::FORBIDDEN if rate_limited => ForgeError::RateLimited,
            StatusCode::FORBIDDEN => ForgeError::AuthFailed(format!("Permission denied: {}", message)),
            StatusCode::NOT_FOUND => ForgeError::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => ForgeError::RateLimited,
            _ if status.is_server_error() => ForgeError::ApiError {
                status: status.as_u16(),
                message: format!("GitHub server error: {}", message),
            },
            _ => ForgeError::ApiError {
                status: status.as_u16(),
                message,
            },
        }
    }
}

#[async_trait]
impl Forge for GitHubForge {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError> {
        let url = self.repo_url("pulls");
        debug!(repo = %self.repo, head = %request.head, base = %request.base, "creating pull request");

        let body = CreatePrBody {
            head: &request.head,
            base: &request.base,
            title: &request.title,
            body: request.body.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .headers(self.headers().await?)
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::NetworkError(e.to_string()))?;

        let pr: GitHubPullRequest = self.handle_response(response).await?;
        Ok(pr.into())
    }

    async fn find_open_pr(
        &self,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>, ForgeError> {
        // GitHub API requires owner:branch format for the head filter
        let head_param = if head.contains(':') {
            head.to_string()
        } else {
            format!("{}:{}", self.owner, head)
        };

        let response = self
            .client
            .get(self.repo_url("pulls"))
            .query(&[
                ("head", head_param.as_str()),
                ("base", base),
                ("state", "open"),
            ])
            .headers(self.headers().await?)
            .send()
            .await
            .map_err(|e| ForgeError::NetworkError(e.to_string()))?;

        let prs: Vec<GitHubPullRequest> = self.handle_response(response).await?;
        Ok(prs
            .into_iter()
            .map(PullRequest::from)
            .find(|pr| pr.base == base))
    }
}

/// Builds [`GitHubForge`]s that share one credential and API base.
pub struct GitHubForgeFactory {
    provider: Arc<dyn TokenProvider>,
    api_base: String,
}

impl GitHubForgeFactory {
    pub fn new(provider: Arc<dyn TokenProvider>, api_base: impl Into<String>) -> Self {
        Self {
            provider,
            api_base: api_base.into(),
        }
    }
}

impl std::fmt::Debug for GitHubForgeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubForgeFactory")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl ForgeFactory for GitHubForgeFactory {
    fn forge_for(&self, url: &str) -> Result<Box<dyn Forge>, ForgeError> {
        GitHubForge::from_remote_url(url, Arc::clone(&self.provider), &self.api_base)
            .map(|f| Box::new(f) as Box<dyn Forge>)
            .ok_or_else(|| ForgeError::UnsupportedRemote(url.to_string()))
    }
}

// --------------------------------------------------------------------------
// GitHub API Types
// --------------------------------------------------------------------------

/// Request body for creating a PR.
#[derive(Serialize)]
struct CreatePrBody<'a> {
    head: &'a str,
    base: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
}

/// GitHub API error response.
#[derive(Deserialize)]
struct GitHubErrorResponse {
    message: String,
}

/// GitHub pull request response.
#[derive(Deserialize)]
struct GitHubPullRequest {
    number: u64,
    html_url: String,
    state: String,
    title: String,
    head: GitHubBranchRef,
    base: GitHubBranchRef,
    merged_at: Option<String>,
}

/// Branch reference in a PR.
#[derive(Deserialize)]
struct GitHubBranchRef {
    #[serde(rename = "ref")]
    ref_name: String,
}

impl From<GitHubPullRequest> for PullRequest {
    fn from(pr: GitHubPullRequest) -> Self {
        let state = if pr.merged_at.is_some() {
            PrState::Merged
        } else if pr.state == "closed" {
            PrState::Closed
        } else {
            PrState::Open
        };

        PullRequest {
            number: pr.number,
            url: pr.html_url,
            state,
            head: pr.head.ref_name,
            base: pr.base.ref_name,
            title: pr.title,
        }
    }
}

// --------------------------------------------------------------------------
// URL Parsing
// --------------------------------------------------------------------------

/// Parse a GitHub remote URL to extract owner and repo.
///
/// Supports SSH and HTTPS formats:
/// - `git@github.com:owner/repo.git`
/// - `ssh://git@github.com/owner/repo.git`
/// - `https://github.com/owner/repo.git`
/// - `https://github.com/owner/repo`
///
/// # Returns
///
/// `Some((owner, repo))` if the URL is a valid GitHub URL, `None` otherwise.
///
/// # Example
///
/// ```
/// use igrelease::forge::github::parse_github_url;
///
/// let (owner, repo) = parse_github_url("git@github.com:FHIR/ig-registry.git").unwrap();
/// assert_eq!(owner, "FHIR");
/// assert_eq!(repo, "ig-registry");
/// assert!(parse_github_url("/srv/git/webroot.git").is_none());
/// ```
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let rest = url
        .strip_prefix("git@github.com:")
        .or_else(|| url.strip_prefix("ssh://git@github.com/"))
        .or_else(|| url.strip_prefix("https://github.com/"))
        .or_else(|| url.strip_prefix("http://github.com/"))?;
    let rest = rest.trim_end_matches('/');
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let (owner, repo) = rest.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}
