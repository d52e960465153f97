//! engine::pr
//!
//! Pull Request Automator: open a PR for a pushed publish branch unless an
//! open one already exists.
//!
//! Lookup before create makes the operation idempotent, so a rerun after a
//! partial failure never duplicates a PR. Failures here are reported, never
//! propagated into the publish outcome.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::core::types::{BranchName, RepoUrl};
use crate::forge::{CreatePrRequest, ForgeError, ForgeFactory, PullRequest};

/// One PR to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestSpec {
    pub title: String,
    pub body: String,
    pub base: BranchName,
    pub head: BranchName,
    pub target: RepoUrl,
}

/// Outcome of [`PrAutomator::open_or_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrRef {
    Created(PullRequest),
    /// An open PR for the same head and base was already there.
    Existing(PullRequest),
    /// Head and base are the same branch; there is nothing to propose.
    Skipped,
}

impl PrRef {
    pub fn pull_request(&self) -> Option<&PullRequest> {
        match self {
            PrRef::Created(pr) | PrRef::Existing(pr) => Some(pr),
            PrRef::Skipped => None,
        }
    }
}

/// Errors from PR automation.
#[derive(Debug, Clone, Error)]
pub enum PrError {
    #[error("{0} is not a GitHub repository")]
    UnsupportedRemote(String),

    #[error("pull request on {target}: {source}")]
    Forge {
        target: String,
        #[source]
        source: ForgeError,
    },
}

/// Opens PRs through whatever forge serves each target.
#[derive(Clone)]
pub struct PrAutomator {
    factory: Arc<dyn ForgeFactory>,
}

impl std::fmt::Debug for PrAutomator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrAutomator").finish_non_exhaustive()
    }
}

impl PrAutomator {
    pub fn new(factory: Arc<dyn ForgeFactory>) -> Self {
        Self { factory }
    }

    /// Find an open PR `head -> base` on the target, or create one.
    ///
    /// # Errors
    ///
    /// - [`PrError::UnsupportedRemote`] if the target is not on GitHub
    /// - [`PrError::Forge`] for API, auth, rate-limit and network failures
    pub async fn open_or_update(&self, spec: &PullRequestSpec) -> Result<PrRef, PrError> {
        if spec.head == spec.base {
            info!(repo = %spec.target, branch = %spec.head, "head equals base; no pull request");
            return Ok(PrRef::Skipped);
        }

        let target = spec.target.as_str();
        let forge_err = |source| PrError::Forge {
            target: target.to_string(),
            source,
        };
        let forge = self.factory.forge_for(target).map_err(|e| match e {
            ForgeError::UnsupportedRemote(url) => PrError::UnsupportedRemote(url),
            other => forge_err(other),
        })?;

        if let Some(existing) = forge
            .find_open_pr(spec.head.as_str(), spec.base.as_str())
            .await
            .map_err(forge_err)?
        {
            info!(repo = target, number = existing.number, url = %existing.url, "pull request already open");
            return Ok(PrRef::Existing(existing));
        }

        let created = forge
            .create_pr(CreatePrRequest {
                head: spec.head.to_string(),
                base: spec.base.to_string(),
                title: spec.title.clone(),
                body: Some(spec.body.clone()),
            })
            .await
            .map_err(|e| {
                warn!(repo = target, error = %e, transient = e.is_transient(), "pull request creation failed");
                forge_err(e)
            })?;
        info!(repo = target, number = created.number, url = %created.url, "pull request opened");
        Ok(PrRef::Created(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::mock::{FailOn, MockForge, MockOperation};
    use crate::forge::PrState;

    fn spec(head: &str, base: &str) -> PullRequestSpec {
        PullRequestSpec {
            title: "Publish who.smart.x 1.0.0".into(),
            body: "Automated release".into(),
            base: BranchName::new(base).unwrap(),
            head: BranchName::new(head).unwrap(),
            target: RepoUrl::parse("https://github.com/WorldHealthOrganization/smart-html").unwrap(),
        }
    }

    #[tokio::test]
    async fn creates_then_finds_existing() {
        let forge = MockForge::new();
        let automator = PrAutomator::new(Arc::new(forge.clone()));

        let first = automator.open_or_update(&spec("release/x", "main")).await.unwrap();
        assert!(matches!(first, PrRef::Created(ref pr) if pr.number == 1));

        let second = automator.open_or_update(&spec("release/x", "main")).await.unwrap();
        assert!(matches!(second, PrRef::Existing(ref pr) if pr.number == 1));
        assert_eq!(forge.all_prs().len(), 1);
    }

    #[tokio::test]
    async fn head_equal_to_base_is_skipped() {
        let forge = MockForge::new();
        let automator = PrAutomator::new(Arc::new(forge.clone()));
        let out = automator.open_or_update(&spec("main", "main")).await.unwrap();
        assert_eq!(out, PrRef::Skipped);
        assert!(forge.operations().is_empty());
    }

    #[tokio::test]
    async fn forge_failure_is_a_pr_error() {
        let forge = MockForge::new().fail_on(FailOn::CreatePr(ForgeError::AuthFailed(
            "Resource not accessible by integration".into(),
        )));
        let automator = PrAutomator::new(Arc::new(forge.clone()));
        let err = automator.open_or_update(&spec("release/x", "main")).await.unwrap_err();
        assert!(matches!(
            err,
            PrError::Forge {
                source: ForgeError::AuthFailed(_),
                ..
            }
        ));
        assert_eq!(
            forge.operations(),
            vec![
                MockOperation::FindOpenPr {
                    head: "release/x".into(),
                    base: "main".into()
                },
                MockOperation::CreatePr {
                    head: "release/x".into(),
                    base: "main".into(),
                    title: "Publish who.smart.x 1.0.0".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn closed_pr_does_not_count() {
        let forge = MockForge::with_prs(vec![PullRequest {
            number: 4,
            url: "u".into(),
            state: PrState::Merged,
            head: "release/x".into(),
            base: "main".into(),
            title: "old".into(),
        }]);
        let automator = PrAutomator::new(Arc::new(forge));
        let out = automator.open_or_update(&spec("release/x", "main")).await.unwrap();
        assert!(matches!(out, PrRef::Created(ref pr) if pr.number == 5));
    }

    #[tokio::test]
    async fn non_github_target_is_unsupported() {
        let factory = crate::forge::github::GitHubForgeFactory::new(
            Arc::new(None::<crate::auth::Credential>),
            crate::forge::github::DEFAULT_API_BASE,
        );
        let automator = PrAutomator::new(Arc::new(factory));
        let mut s = spec("release/x", "main");
        s.target = RepoUrl::parse("https://gitlab.com/o/r").unwrap();
        let err = automator.open_or_update(&s).await.unwrap_err();
        assert!(matches!(err, PrError::UnsupportedRemote(_)));
    }
}
