//! Platform abstraction
//!
//! [`PlatformService`] is the single seam between the engine and a code
//! host: snapshot assembly, check publication, comments, branch updates and
//! merge submission all go through it, so the orchestrator and the actions
//! can be driven by a mock in tests. [`MergeQueue`] is the engine's view of
//! the external merge-train coordinator; it is a separate trait because the
//! queue is not a code-host feature and is substituted independently.

pub mod github;

pub use github::GitHubService;

use crate::error::Result;
use crate::types::{
    CheckStatus, CommitMessage, Conclusion, MergeMethod, PostedCheck, PrComment,
    PullRequestSnapshot,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Identity of the repository and bot account a service operates as
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Login the automation authenticates as; used to recognize our own
    /// checks and comments
    pub bot_login: String,
    /// API host override for self-hosted installations
    pub host: Option<String>,
}

/// Everything the engine needs from a code host
#[async_trait]
pub trait PlatformService: Send + Sync {
    /// Repository/bot identity this service operates as
    fn config(&self) -> &PlatformConfig;

    // Snapshot assembly

    /// Build a fresh, fully materialized snapshot of one pull request
    async fn snapshot(&self, number: u64) -> Result<PullRequestSnapshot>;

    /// Expand a team operand (`@org/slug`) into member logins
    async fn team_members(&self, team: &str) -> Result<Vec<String>>;

    // Checks

    /// Checks our bot has published on a head commit, keyed by check name
    async fn list_checks(&self, head_sha: &str) -> Result<BTreeMap<String, PostedCheck>>;

    /// Publish or update one check on a head commit
    async fn set_check(
        &self,
        head_sha: &str,
        name: &str,
        status: CheckStatus,
        conclusion: Option<Conclusion>,
        title: &str,
        summary: &str,
    ) -> Result<()>;

    // Comments

    /// All issue comments on a pull request, oldest first
    async fn list_comments(&self, number: u64) -> Result<Vec<PrComment>>;

    /// Post an issue comment on a pull request
    async fn post_comment(&self, number: u64, body: &str) -> Result<()>;

    // Branch manipulation

    /// Update the head branch with the latest base-branch changes
    async fn update_base_branch(&self, number: u64, head_sha: &str) -> Result<()>;

    /// Submit the merge. `head_sha` pins the expected head so a concurrent
    /// push is rejected server-side. Client-side rejections surface as
    /// [`crate::error::ApiError`] so callers can classify them.
    async fn merge_pull(
        &self,
        number: u64,
        head_sha: &str,
        method: MergeMethod,
        commit_message: Option<&CommitMessage>,
    ) -> Result<()>;

    // Embedded-pull detection

    /// Recently closed pull requests targeting a base branch
    async fn list_closed_pulls(&self, base_ref: &str) -> Result<Vec<PullRequestSnapshot>>;

    /// Commit SHAs of one pull request
    async fn list_pull_commits(&self, number: u64) -> Result<Vec<String>>;
}

/// The engine's handle on the external merge-train coordinator.
///
/// Both operations are idempotent: enqueueing an already queued pull request
/// or dequeueing an absent one succeeds without effect.
#[async_trait]
pub trait MergeQueue: Send + Sync {
    /// Add a pull request to the queue with the method to use once its turn
    /// comes
    async fn enqueue(&self, number: u64, method: MergeMethod) -> Result<()>;

    /// Remove a pull request from the queue
    async fn dequeue(&self, number: u64) -> Result<()>;
}

/// Process-local queue, for single-instance deployments and tests
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    entries: Mutex<BTreeMap<u64, MergeMethod>>,
}

impl InMemoryQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued pull-request numbers, in order
    pub async fn queued(&self) -> Vec<u64> {
        self.entries.lock().await.keys().copied().collect()
    }
}

#[async_trait]
impl MergeQueue for InMemoryQueue {
    async fn enqueue(&self, number: u64, method: MergeMethod) -> Result<()> {
        let previous = self.entries.lock().await.insert(number, method);
        if previous.is_none() {
            debug!(pull = number, %method, "pull request queued for merge");
        }
        Ok(())
    }

    async fn dequeue(&self, number: u64) -> Result<()> {
        if self.entries.lock().await.remove(&number).is_some() {
            debug!(pull = number, "pull request removed from merge queue");
        }
        Ok(())
    }
}
