//! Core types for pullrules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// PR state (open, closed, merged)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    /// PR is open
    #[default]
    Open,
    /// PR was closed without merging
    Closed,
    /// PR was merged
    Merged,
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// Commit title/message pair used when submitting a merge
///
/// Computed outside the engine (e.g. extracted from a `## Commit Message`
/// section of the PR body) and carried on the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    /// First line of the merge/squash commit
    pub title: String,
    /// Remaining commit body
    pub message: String,
}

impl CommitMessage {
    /// Extract a commit message from a PR body.
    ///
    /// Looks for a `## Commit Message` markdown section; the first non-empty
    /// line below it becomes the title, the rest the body. Returns `None`
    /// when the section is absent or empty.
    pub fn from_body(body: &str) -> Option<Self> {
        let mut lines = body
            .lines()
            .skip_while(|l| l.trim().to_lowercase() != "## commit message")
            .skip(1)
            .take_while(|l| !l.trim_start().starts_with("## "))
            .skip_while(|l| l.trim().is_empty());

        let title = lines.next()?.trim().to_string();
        let message = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        Some(Self { title, message })
    }
}

/// A fully materialized, immutable view of one pull request.
///
/// Everything condition evaluation needs is resolved up front (reviews
/// consolidated, statuses flattened, team memberships expanded), so
/// evaluation itself is pure and side-effect free. A snapshot is rebuilt
/// fresh on every invocation and never cached across invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequestSnapshot {
    /// PR number
    pub number: u64,
    /// Current state
    pub state: PrState,
    /// Whether the PR has been merged
    pub merged: bool,
    /// Login of whoever merged it
    pub merged_by: Option<String>,
    /// When it was merged
    pub merged_at: Option<DateTime<Utc>>,
    /// Base branch name
    pub base_ref: String,
    /// Base repository name
    pub base_repo: String,
    /// Head branch name
    pub head_ref: String,
    /// Head commit SHA
    pub head_sha: String,
    /// PR author login
    pub author: String,
    /// Label names currently applied
    pub labels: Vec<String>,
    /// Changed file paths
    pub files: Vec<String>,
    /// SHAs of the commits in this PR
    pub commits: Vec<String>,
    /// Logins whose latest review is an approval (one entry per reviewer,
    /// last review state wins)
    pub approved_reviews_by: Vec<String>,
    /// Logins whose latest review requests changes
    pub changes_requested_reviews_by: Vec<String>,
    /// Status contexts currently reporting success
    pub status_success: Vec<String>,
    /// Status contexts currently reporting failure
    pub status_failure: Vec<String>,
    /// Check name to state; `None` while the check is queued or running,
    /// the terminal conclusion once completed
    pub checks: BTreeMap<String, Option<String>>,
    /// Whether the PR can be merged (`None` = still computing)
    pub mergeable: Option<bool>,
    /// Whether the PR can be rebased (`None` = still computing)
    pub rebaseable: Option<bool>,
    /// Whether the head is behind its base branch
    pub behind: bool,
    /// Whether the base-branch owner allows us to push to the head branch
    pub base_is_modifiable: bool,
    /// Pre-computed merge/squash commit message, if any
    pub commit_message: Option<CommitMessage>,
    /// Team operand (as written in conditions, e.g. `@org/reviewers`) to
    /// expanded member logins; resolved once per invocation
    pub teams: BTreeMap<String, Vec<String>>,
}

/// Refresh sub-kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshKind {
    /// Requested by a user (enables retry of previously failed actions)
    User,
    /// Forced (re-runs every action unconditionally)
    Forced,
}

/// One triggering event record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventSource {
    /// A pull_request webhook event
    PullRequest {
        /// The webhook action field (opened, closed, synchronize, ...)
        action: String,
    },
    /// A synthetic re-evaluation request
    Refresh {
        /// Who/what asked for it
        action: RefreshKind,
    },
    /// Any other event kind, kept for logging
    Other {
        /// The raw event type name
        name: String,
    },
}

impl EventSource {
    /// Event type name for logging
    pub fn event_type(&self) -> &str {
        match self {
            Self::PullRequest { .. } => "pull_request",
            Self::Refresh { .. } => "refresh",
            Self::Other { name } => name,
        }
    }

    /// Whether this is any refresh event
    pub const fn is_refresh(&self) -> bool {
        matches!(self, Self::Refresh { .. })
    }

    /// Whether this is a forced refresh
    pub const fn is_forced_refresh(&self) -> bool {
        matches!(
            self,
            Self::Refresh {
                action: RefreshKind::Forced
            }
        )
    }
}

/// Terminal or pending status of one rule×action check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    /// The action completed successfully
    Success,
    /// The action ran and failed
    Failure,
    /// Nothing to do
    Neutral,
    /// The action was cancelled
    Cancelled,
    /// Manual intervention required
    ActionRequired,
    /// Still in progress; published as an `in_progress` check with no
    /// terminal conclusion
    Pending,
}

impl Conclusion {
    /// Check status this conclusion publishes under
    pub const fn check_status(self) -> CheckStatus {
        match self {
            Self::Pending => CheckStatus::InProgress,
            _ => CheckStatus::Completed,
        }
    }
}

impl std::fmt::Display for Conclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Neutral => "neutral",
            Self::Cancelled => "cancelled",
            Self::ActionRequired => "action_required",
            Self::Pending => "pending",
        };
        write!(f, "{s}")
    }
}

/// Publication status of an external check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// The check is still running
    InProgress,
    /// The check has a terminal conclusion
    Completed,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// What an action reports after `run` or `cancel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    /// Outcome
    pub conclusion: Conclusion,
    /// Check title (one line)
    pub title: String,
    /// Check body
    pub summary: String,
}

impl ActionReport {
    /// Build a report with an arbitrary conclusion
    pub fn new(
        conclusion: Conclusion,
        title: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            conclusion,
            title: title.into(),
            summary: summary.into(),
        }
    }

    /// Success report
    pub fn success(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(Conclusion::Success, title, summary)
    }

    /// Failure report
    pub fn failure(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(Conclusion::Failure, title, summary)
    }

    /// Cancelled report
    pub fn cancelled(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(Conclusion::Cancelled, title, summary)
    }

    /// Pending report (published as `in_progress`)
    pub fn pending(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(Conclusion::Pending, title, summary)
    }
}

/// An already-published external check, as read back from the code host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedCheck {
    /// Terminal conclusion, `None` while in progress
    pub conclusion: Option<Conclusion>,
    /// Check title
    pub title: String,
    /// Check body
    pub summary: String,
}

/// A comment on a pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrComment {
    /// Comment author login
    pub author: String,
    /// Comment body text
    pub body: String,
}

/// Merge strategy/method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Create a merge commit
    #[default]
    Merge,
    /// Rebase commits onto the base branch
    Rebase,
    /// Squash all commits into one
    Squash,
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::Rebase => write!(f, "rebase"),
            Self::Squash => write!(f, "squash"),
        }
    }
}

/// What to do when a rebase merge is requested but the PR is not rebaseable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebaseFallback {
    /// Fall back to a merge commit
    #[default]
    Merge,
    /// Fall back to a squash
    Squash,
    /// Do not fall back; require manual intervention
    None,
}

/// Strict-merge mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strict {
    /// Merge even when the head is behind its base
    #[default]
    Off,
    /// Update the branch synchronously before merging
    On,
    /// Hand the update to the merge-train queue
    Smart,
}

impl Strict {
    /// Whether strict behavior is enabled at all
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Whether the smart queue is in play
    pub const fn is_smart(self) -> bool {
        matches!(self, Self::Smart)
    }
}

impl<'de> Deserialize<'de> for Strict {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bool(bool),
            Str(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bool(false) => Ok(Self::Off),
            Repr::Bool(true) => Ok(Self::On),
            Repr::Str(s) if s == "smart" => Ok(Self::Smart),
            Repr::Str(s) => Err(serde::de::Error::custom(format!(
                "expected bool or \"smart\", got \"{s}\""
            ))),
        }
    }
}

impl Serialize for Strict {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Off => serializer.serialize_bool(false),
            Self::On => serializer.serialize_bool(true),
            Self::Smart => serializer.serialize_str("smart"),
        }
    }
}
