//! Mock platform service and merge queue for testing
//!
//! These are test utilities - not all may be used in current tests but are
//! available for future test development.

#![allow(dead_code)]

use async_trait::async_trait;
use pullrules::error::{ApiError, Error, Result};
use pullrules::platform::{MergeQueue, PlatformConfig, PlatformService};
use pullrules::types::{
    CheckStatus, CommitMessage, Conclusion, MergeMethod, PostedCheck, PrComment,
    PullRequestSnapshot,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Call record for `set_check`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCheckCall {
    pub head_sha: String,
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<Conclusion>,
    pub title: String,
    pub summary: String,
}

/// Call record for `merge_pull`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCall {
    pub number: u64,
    pub head_sha: String,
    pub method: MergeMethod,
}

/// Call record for `post_comment`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCommentCall {
    pub number: u64,
    pub body: String,
}

/// Simple mock platform service for testing
///
/// This manually implements `PlatformService` rather than using mockall,
/// because mockall has issues with methods returning references.
///
/// Features:
/// - Stored snapshots that a successful merge mutates, so refresh-after-merge
///   behaves like the real service
/// - Published checks stored per head SHA and visible to later `list_checks`
/// - Call tracking for verification
/// - Error injection for failure path testing
pub struct MockPlatformService {
    config: PlatformConfig,
    snapshots: Mutex<HashMap<u64, PullRequestSnapshot>>,
    team_responses: Mutex<HashMap<String, Vec<String>>>,
    checks: Mutex<HashMap<String, BTreeMap<String, PostedCheck>>>,
    comments: Mutex<HashMap<u64, Vec<PrComment>>>,
    closed_pulls: Mutex<Vec<PullRequestSnapshot>>,
    pull_commits: Mutex<HashMap<u64, Vec<String>>>,
    // Call tracking
    snapshot_calls: Mutex<Vec<u64>>,
    set_check_calls: Mutex<Vec<SetCheckCall>>,
    merge_calls: Mutex<Vec<MergeCall>>,
    update_branch_calls: Mutex<Vec<u64>>,
    post_comment_calls: Mutex<Vec<PostCommentCall>>,
    // Error injection
    error_on_merge: Mutex<Option<(u16, String)>>,
    error_on_update_branch: Mutex<Option<String>>,
    error_on_post_comment: Mutex<Option<String>>,
    error_on_set_check: Mutex<Option<String>>,
}

/// Default config used by most tests
pub fn test_config() -> PlatformConfig {
    PlatformConfig {
        owner: "acme".to_string(),
        repo: "widgets".to_string(),
        bot_login: "acme-bot".to_string(),
        host: None,
    }
}

/// A plain open pull request targeting `main`, ready to be customized
pub fn base_pull(number: u64) -> PullRequestSnapshot {
    PullRequestSnapshot {
        number,
        base_ref: "main".to_string(),
        base_repo: "acme/widgets".to_string(),
        head_ref: format!("feature-{number}"),
        head_sha: format!("sha-{number}"),
        author: "contributor".to_string(),
        commits: vec![format!("commit-{number}-1"), format!("commit-{number}-2")],
        base_is_modifiable: true,
        ..PullRequestSnapshot::default()
    }
}

impl MockPlatformService {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PlatformConfig) -> Self {
        Self {
            config,
            snapshots: Mutex::new(HashMap::new()),
            team_responses: Mutex::new(HashMap::new()),
            checks: Mutex::new(HashMap::new()),
            comments: Mutex::new(HashMap::new()),
            closed_pulls: Mutex::new(Vec::new()),
            pull_commits: Mutex::new(HashMap::new()),
            snapshot_calls: Mutex::new(Vec::new()),
            set_check_calls: Mutex::new(Vec::new()),
            merge_calls: Mutex::new(Vec::new()),
            update_branch_calls: Mutex::new(Vec::new()),
            post_comment_calls: Mutex::new(Vec::new()),
            error_on_merge: Mutex::new(None),
            error_on_update_branch: Mutex::new(None),
            error_on_post_comment: Mutex::new(None),
            error_on_set_check: Mutex::new(None),
        }
    }

    // === Fixture setup ===

    /// Store a snapshot so `snapshot()` (used by refresh) can serve it
    pub fn setup_pull(&self, pull: PullRequestSnapshot) {
        self.snapshots.lock().unwrap().insert(pull.number, pull);
    }

    /// Set the members for a team operand (as written, e.g. `@acme/reviewers`)
    pub fn set_team(&self, team: &str, members: &[&str]) {
        self.team_responses.lock().unwrap().insert(
            team.to_string(),
            members.iter().map(ToString::to_string).collect(),
        );
    }

    /// Pre-publish a check, as if a previous evaluation posted it
    pub fn seed_check(&self, head_sha: &str, name: &str, check: PostedCheck) {
        self.checks
            .lock()
            .unwrap()
            .entry(head_sha.to_string())
            .or_default()
            .insert(name.to_string(), check);
    }

    /// Pre-existing comment on a pull request
    pub fn seed_comment(&self, number: u64, author: &str, body: &str) {
        self.comments
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push(PrComment {
                author: author.to_string(),
                body: body.to_string(),
            });
    }

    /// Register a closed pull request with its commits, for embedded-pull
    /// detection
    pub fn setup_closed_pull(&self, pull: PullRequestSnapshot, commits: &[&str]) {
        self.pull_commits.lock().unwrap().insert(
            pull.number,
            commits.iter().map(ToString::to_string).collect(),
        );
        self.closed_pulls.lock().unwrap().push(pull);
    }

    // === Error injection methods ===

    /// Make `merge_pull` fail with a structured API error
    pub fn fail_merge_with_api(&self, status: u16, message: &str) {
        *self.error_on_merge.lock().unwrap() = Some((status, message.to_string()));
    }

    /// Make `update_base_branch` return an error
    pub fn fail_update_branch(&self, msg: &str) {
        *self.error_on_update_branch.lock().unwrap() = Some(msg.to_string());
    }

    /// Make `post_comment` return an error
    pub fn fail_post_comment(&self, msg: &str) {
        *self.error_on_post_comment.lock().unwrap() = Some(msg.to_string());
    }

    /// Make `set_check` return an error
    pub fn fail_set_check(&self, msg: &str) {
        *self.error_on_set_check.lock().unwrap() = Some(msg.to_string());
    }

    // === Call verification methods ===

    pub fn get_set_check_calls(&self) -> Vec<SetCheckCall> {
        self.set_check_calls.lock().unwrap().clone()
    }

    pub fn get_merge_calls(&self) -> Vec<MergeCall> {
        self.merge_calls.lock().unwrap().clone()
    }

    pub fn get_update_branch_calls(&self) -> Vec<u64> {
        self.update_branch_calls.lock().unwrap().clone()
    }

    pub fn get_post_comment_calls(&self) -> Vec<PostCommentCall> {
        self.post_comment_calls.lock().unwrap().clone()
    }

    pub fn merge_call_count(&self) -> usize {
        self.merge_calls.lock().unwrap().len()
    }

    pub fn set_check_call_count(&self) -> usize {
        self.set_check_calls.lock().unwrap().len()
    }

    /// The last state of a published check, if any
    pub fn published_check(&self, head_sha: &str, name: &str) -> Option<PostedCheck> {
        self.checks
            .lock()
            .unwrap()
            .get(head_sha)
            .and_then(|m| m.get(name))
            .cloned()
    }

    pub fn assert_merge_called(&self, number: u64) {
        let calls = self.get_merge_calls();
        assert!(
            calls.iter().any(|c| c.number == number),
            "Expected merge_pull({number}) but got: {calls:?}"
        );
    }

    pub fn assert_merge_not_called(&self, number: u64) {
        let calls = self.get_merge_calls();
        assert!(
            !calls.iter().any(|c| c.number == number),
            "Expected merge_pull({number}) NOT to be called but it was: {calls:?}"
        );
    }

    pub fn assert_merge_called_with_method(&self, number: u64, method: MergeMethod) {
        let calls = self.get_merge_calls();
        assert!(
            calls.iter().any(|c| c.number == number && c.method == method),
            "Expected merge_pull({number}, {method:?}) but got: {calls:?}"
        );
    }

    pub fn assert_check_posted(&self, name: &str) {
        let calls = self.get_set_check_calls();
        assert!(
            calls.iter().any(|c| c.name == name),
            "Expected check `{name}` to be posted but got: {calls:?}"
        );
    }

    pub fn assert_check_not_posted(&self, name: &str) {
        let calls = self.get_set_check_calls();
        assert!(
            !calls.iter().any(|c| c.name == name),
            "Expected check `{name}` NOT to be posted but it was: {calls:?}"
        );
    }
}

impl Default for MockPlatformService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformService for MockPlatformService {
    fn config(&self) -> &PlatformConfig {
        &self.config
    }

    async fn snapshot(&self, number: u64) -> Result<PullRequestSnapshot> {
        self.snapshot_calls.lock().unwrap().push(number);
        let snapshots = self.snapshots.lock().unwrap();
        snapshots.get(&number).cloned().ok_or_else(|| {
            Error::Platform(format!("snapshot: no response configured for PR #{number}"))
        })
    }

    async fn team_members(&self, team: &str) -> Result<Vec<String>> {
        let responses = self.team_responses.lock().unwrap();
        responses.get(team).cloned().ok_or_else(|| {
            Error::Platform(format!("team_members: no members configured for {team}"))
        })
    }

    async fn list_checks(&self, head_sha: &str) -> Result<BTreeMap<String, PostedCheck>> {
        let checks = self.checks.lock().unwrap();
        Ok(checks.get(head_sha).cloned().unwrap_or_default())
    }

    async fn set_check(
        &self,
        head_sha: &str,
        name: &str,
        status: CheckStatus,
        conclusion: Option<Conclusion>,
        title: &str,
        summary: &str,
    ) -> Result<()> {
        self.set_check_calls.lock().unwrap().push(SetCheckCall {
            head_sha: head_sha.to_string(),
            name: name.to_string(),
            status,
            conclusion,
            title: title.to_string(),
            summary: summary.to_string(),
        });

        if let Some(msg) = self.error_on_set_check.lock().unwrap().as_ref() {
            return Err(Error::Platform(msg.clone()));
        }

        self.checks
            .lock()
            .unwrap()
            .entry(head_sha.to_string())
            .or_default()
            .insert(
                name.to_string(),
                PostedCheck {
                    conclusion,
                    title: title.to_string(),
                    summary: summary.to_string(),
                },
            );
        Ok(())
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<PrComment>> {
        let comments = self.comments.lock().unwrap();
        Ok(comments.get(&number).cloned().unwrap_or_default())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<()> {
        self.post_comment_calls
            .lock()
            .unwrap()
            .push(PostCommentCall {
                number,
                body: body.to_string(),
            });

        if let Some(msg) = self.error_on_post_comment.lock().unwrap().as_ref() {
            return Err(Error::Platform(msg.clone()));
        }

        self.comments
            .lock()
            .unwrap()
            .entry(number)
            .or_default()
            .push(PrComment {
                author: self.config.bot_login.clone(),
                body: body.to_string(),
            });
        Ok(())
    }

    async fn update_base_branch(&self, number: u64, _head_sha: &str) -> Result<()> {
        self.update_branch_calls.lock().unwrap().push(number);

        if let Some(msg) = self.error_on_update_branch.lock().unwrap().as_ref() {
            return Err(Error::Platform(msg.clone()));
        }

        if let Some(pull) = self.snapshots.lock().unwrap().get_mut(&number) {
            pull.behind = false;
        }
        Ok(())
    }

    async fn merge_pull(
        &self,
        number: u64,
        head_sha: &str,
        method: MergeMethod,
        _commit_message: Option<&CommitMessage>,
    ) -> Result<()> {
        self.merge_calls.lock().unwrap().push(MergeCall {
            number,
            head_sha: head_sha.to_string(),
            method,
        });

        if let Some((status, message)) = self.error_on_merge.lock().unwrap().as_ref() {
            return Err(ApiError {
                status: *status,
                message: message.clone(),
            }
            .into());
        }

        // A successful merge is visible on the next refresh
        if let Some(pull) = self.snapshots.lock().unwrap().get_mut(&number) {
            pull.merged = true;
            pull.state = pullrules::types::PrState::Merged;
            pull.merged_by = Some(self.config.bot_login.clone());
        }
        Ok(())
    }

    async fn list_closed_pulls(&self, _base_ref: &str) -> Result<Vec<PullRequestSnapshot>> {
        Ok(self.closed_pulls.lock().unwrap().clone())
    }

    async fn list_pull_commits(&self, number: u64) -> Result<Vec<String>> {
        let commits = self.pull_commits.lock().unwrap();
        Ok(commits.get(&number).cloned().unwrap_or_default())
    }
}

/// Mock merge queue with call tracking
#[derive(Default)]
pub struct MockMergeQueue {
    entries: Mutex<Vec<(u64, MergeMethod)>>,
    enqueue_calls: Mutex<Vec<(u64, MergeMethod)>>,
    dequeue_calls: Mutex<Vec<u64>>,
}

impl MockMergeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_enqueue_calls(&self) -> Vec<(u64, MergeMethod)> {
        self.enqueue_calls.lock().unwrap().clone()
    }

    pub fn get_dequeue_calls(&self) -> Vec<u64> {
        self.dequeue_calls.lock().unwrap().clone()
    }

    pub fn queued(&self) -> Vec<u64> {
        self.entries.lock().unwrap().iter().map(|(n, _)| *n).collect()
    }

    pub fn assert_enqueued(&self, number: u64, method: MergeMethod) {
        let calls = self.get_enqueue_calls();
        assert!(
            calls.iter().any(|(n, m)| *n == number && *m == method),
            "Expected enqueue({number}, {method:?}) but got: {calls:?}"
        );
    }

    pub fn assert_dequeued(&self, number: u64) {
        let calls = self.get_dequeue_calls();
        assert!(
            calls.contains(&number),
            "Expected dequeue({number}) but got: {calls:?}"
        );
    }
}

#[async_trait]
impl MergeQueue for MockMergeQueue {
    async fn enqueue(&self, number: u64, method: MergeMethod) -> Result<()> {
        self.enqueue_calls.lock().unwrap().push((number, method));
        let mut entries = self.entries.lock().unwrap();
        if !entries.iter().any(|(n, _)| *n == number) {
            entries.push((number, method));
        }
        Ok(())
    }

    async fn dequeue(&self, number: u64) -> Result<()> {
        self.dequeue_calls.lock().unwrap().push(number);
        self.entries.lock().unwrap().retain(|(n, _)| *n != number);
        Ok(())
    }
}
