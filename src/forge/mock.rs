//! forge::mock
//!
//! Mock forge implementation for deterministic testing.
//!
//! # Design
//!
//! The mock forge provides a deterministic implementation of the `Forge` trait
//! for use in tests. It stores PRs in memory, records every call and allows
//! configuring failure scenarios. It also acts as its own [`ForgeFactory`]
//! so a single mock serves every target repository of a pipeline run.
//!
//! # Example
//!
//! ```
//! use igrelease::forge::mock::MockForge;
//! use igrelease::forge::{CreatePrRequest, Forge, PrState};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let forge = MockForge::new();
//!
//! let pr = forge.create_pr(CreatePrRequest {
//!     head: "release/my-ig".to_string(),
//!     base: "main".to_string(),
//!     title: "Publish my-ig".to_string(),
//!     body: None,
//! }).await.unwrap();
//!
//! assert_eq!(pr.number, 1);
//! assert_eq!(pr.state, PrState::Open);
//! assert!(forge.find_open_pr("release/my-ig", "main").await.unwrap().is_some());
//! # });
//! ```

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{CreatePrRequest, Forge, ForgeError, ForgeFactory, PrState, PullRequest};

/// Mock forge for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockForge {
    /// Internal state shared across clones.
    inner: Arc<Mutex<MockForgeInner>>,
}

/// Internal mutable state.
#[derive(Debug, Default)]
struct MockForgeInner {
    /// Stored PRs in creation order.
    prs: Vec<PullRequest>,
    /// Method to fail on (for testing error paths).
    fail_on: Option<FailOn>,
    /// Recorded operations for verification.
    operations: Vec<MockOperation>,
    /// Target URLs handed to the factory.
    targets: Vec<String>,
}

/// Configuration for which operation should fail.
#[derive(Debug, Clone)]
pub enum FailOn {
    /// Fail create_pr with the given error.
    CreatePr(ForgeError),
    /// Fail find_open_pr with the given error.
    FindOpenPr(ForgeError),
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    CreatePr {
        head: String,
        base: String,
        title: String,
    },
    FindOpenPr {
        head: String,
        base: String,
    },
}

impl MockForge {
    /// Create a new empty mock forge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock forge with pre-existing PRs.
    pub fn with_prs(prs: Vec<PullRequest>) -> Self {
        let forge = Self::new();
        forge.lock().prs = prs;
        forge
    }

    /// Configure the mock to fail on a specific operation.
    ///
    /// # Example
    ///
    /// ```
    /// use igrelease::forge::mock::{FailOn, MockForge};
    /// use igrelease::forge::ForgeError;
    ///
    /// let forge = MockForge::new()
    ///     .fail_on(FailOn::CreatePr(ForgeError::RateLimited));
    /// ```
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.lock().fail_on = Some(fail_on);
        self
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.lock().operations.clone()
    }

    /// Get all PRs, in creation order.
    pub fn all_prs(&self) -> Vec<PullRequest> {
        self.lock().prs.clone()
    }

    /// Repository URLs the factory was asked for.
    pub fn targets(&self) -> Vec<String> {
        self.lock().targets.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockForgeInner> {
        // A panicking test thread must not hide the recorded state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Forge for MockForge {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError> {
        let mut inner = self.lock();
        inner.operations.push(MockOperation::CreatePr {
            head: request.head.clone(),
            base: request.base.clone(),
            title: request.title.clone(),
        });
        if let Some(FailOn::CreatePr(e)) = &inner.fail_on {
            return Err(e.clone());
        }

        let number = inner.prs.iter().map(|p| p.number).max().unwrap_or(0) + 1;
        let pr = PullRequest {
            number,
            url: format!("https://github.com/mock/repo/pull/{}", number),
            state: PrState::Open,
            head: request.head,
            base: request.base,
            title: request.title,
        };
        inner.prs.push(pr.clone());
        Ok(pr)
    }

    async fn find_open_pr(
        &self,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>, ForgeError> {
        let mut inner = self.lock();
        inner.operations.push(MockOperation::FindOpenPr {
            head: head.to_string(),
            base: base.to_string(),
        });
        if let Some(FailOn::FindOpenPr(e)) = &inner.fail_on {
            return Err(e.clone());
        }
        Ok(inner
            .prs
            .iter()
            .find(|p| p.state == PrState::Open && p.head == head && p.base == base)
            .cloned())
    }
}

impl ForgeFactory for MockForge {
    fn forge_for(&self, url: &str) -> Result<Box<dyn Forge>, ForgeError> {
        self.lock().targets.push(url.to_string());
        Ok(Box::new(self.clone()))
    }
}
