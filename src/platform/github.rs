//! GitHub platform service implementation

use crate::error::{ApiError, Error, Result};
use crate::platform::{PlatformConfig, PlatformService};
use crate::types::{
    CheckStatus, CommitMessage, Conclusion, MergeMethod, PostedCheck, PrComment, PrState,
    PullRequestSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

// Raw REST types for the endpoints octocrab's typed models don't cover
// (check runs, combined status, compare) or cover without the fields the
// snapshot needs (merged_by, maintainer_can_modify, rebaseable).

#[derive(Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Deserialize)]
struct RawRepo {
    full_name: String,
}

#[derive(Deserialize)]
struct RawRef {
    #[serde(rename = "ref")]
    ref_field: String,
    sha: String,
    repo: Option<RawRepo>,
}

#[derive(Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Deserialize)]
struct RawPull {
    number: u64,
    state: String,
    merged: bool,
    merged_by: Option<RawUser>,
    merged_at: Option<DateTime<Utc>>,
    base: RawRef,
    head: RawRef,
    user: RawUser,
    labels: Vec<RawLabel>,
    body: Option<String>,
    rebaseable: Option<bool>,
    mergeable: Option<bool>,
    #[serde(default)]
    maintainer_can_modify: bool,
}

#[derive(Deserialize)]
struct RawReview {
    user: RawUser,
    state: String,
}

#[derive(Deserialize)]
struct RawFile {
    filename: String,
}

#[derive(Deserialize)]
struct RawCommit {
    sha: String,
}

#[derive(Deserialize)]
struct RawStatus {
    context: String,
    state: String,
}

#[derive(Deserialize)]
struct CombinedStatus {
    statuses: Vec<RawStatus>,
}

#[derive(Deserialize)]
struct RawCheckApp {
    slug: Option<String>,
}

#[derive(Deserialize)]
struct RawCheckOutput {
    title: Option<String>,
    summary: Option<String>,
}

#[derive(Deserialize)]
struct RawCheckRun {
    name: String,
    status: String,
    conclusion: Option<String>,
    app: Option<RawCheckApp>,
    output: Option<RawCheckOutput>,
}

#[derive(Deserialize)]
struct CheckRunsResponse {
    check_runs: Vec<RawCheckRun>,
}

#[derive(Deserialize)]
struct Comparison {
    behind_by: u64,
}

fn parse_conclusion(s: &str) -> Option<Conclusion> {
    match s {
        "success" => Some(Conclusion::Success),
        "failure" => Some(Conclusion::Failure),
        "neutral" => Some(Conclusion::Neutral),
        "cancelled" => Some(Conclusion::Cancelled),
        "action_required" => Some(Conclusion::ActionRequired),
        _ => None,
    }
}

/// GitHub service using octocrab, with raw HTTP for the check and merge
/// endpoints where the exact status code and error message matter
pub struct GitHubService {
    client: Octocrab,
    config: PlatformConfig,
    /// Token for raw HTTP requests
    token: String,
    /// HTTP client for raw requests
    http_client: Client,
    /// API host for raw requests
    api_host: String,
}

impl GitHubService {
    /// Create a new GitHub service
    pub fn new(token: &str, config: PlatformConfig) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token.to_string());

        let api_host = if let Some(ref h) = config.host {
            let base_url = format!("https://{h}/api/v3");
            builder = builder
                .base_uri(&base_url)
                .map_err(|e| Error::GitHubApi(e.to_string()))?;
            format!("{h}/api/v3")
        } else {
            "api.github.com".to_string()
        };

        let client = builder
            .build()
            .map_err(|e| Error::GitHubApi(e.to_string()))?;

        let http_client = Client::builder()
            .user_agent("pullrules")
            .build()
            .map_err(|e| Error::GitHubApi(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            token: token.to_string(),
            http_client,
            api_host,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "https://{}/repos/{}/{}/{path}",
            self.api_host, self.config.owner, self.config.repo
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Turn a non-2xx response into an [`ApiError`] carrying the status and
    /// GitHub's `message` field
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            message: String,
        }

        let message = match response.text().await {
            Ok(text) => serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or(text),
            Err(_) => String::new(),
        };
        Err(ApiError {
            status: status.as_u16(),
            message,
        }
        .into())
    }

    async fn api_get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(reqwest::Method::GET, &self.repo_url(path))
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Request failed: {e}")))?;
        Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to parse response: {e}")))
    }

    /// Reviews consolidated to the latest state per reviewer
    async fn consolidated_reviews(&self, number: u64) -> Result<(Vec<String>, Vec<String>)> {
        let reviews: Vec<RawReview> =
            self.api_get(&format!("pulls/{number}/reviews?per_page=100")).await?;

        let mut latest: BTreeMap<String, String> = BTreeMap::new();
        for review in reviews {
            // COMMENTED reviews don't override an earlier APPROVED/CHANGES_REQUESTED
            if review.state == "APPROVED"
                || review.state == "CHANGES_REQUESTED"
                || review.state == "DISMISSED"
            {
                latest.insert(review.user.login, review.state);
            }
        }

        let approved = latest
            .iter()
            .filter(|(_, s)| *s == "APPROVED")
            .map(|(u, _)| u.clone())
            .collect();
        let changes_requested = latest
            .iter()
            .filter(|(_, s)| *s == "CHANGES_REQUESTED")
            .map(|(u, _)| u.clone())
            .collect();
        Ok((approved, changes_requested))
    }

    async fn is_behind(&self, base_ref: &str, head_sha: &str) -> Result<bool> {
        let comparison: Comparison = self
            .api_get(&format!("compare/{base_ref}...{head_sha}"))
            .await?;
        Ok(comparison.behind_by > 0)
    }
}

#[async_trait]
impl PlatformService for GitHubService {
    fn config(&self) -> &PlatformConfig {
        &self.config
    }

    async fn snapshot(&self, number: u64) -> Result<PullRequestSnapshot> {
        debug!(pull = number, "building snapshot");

        let pr: RawPull = self.api_get(&format!("pulls/{number}")).await?;

        let state = if pr.merged {
            PrState::Merged
        } else if pr.state == "closed" {
            PrState::Closed
        } else {
            PrState::Open
        };

        let files: Vec<RawFile> = self
            .api_get(&format!("pulls/{number}/files?per_page=100"))
            .await?;
        let commits: Vec<RawCommit> = self
            .api_get(&format!("pulls/{number}/commits?per_page=100"))
            .await?;
        let (approved_reviews_by, changes_requested_reviews_by) =
            self.consolidated_reviews(number).await?;

        // Both CI systems feed the status-* attributes: legacy commit
        // statuses and check runs.
        let combined: CombinedStatus = self
            .api_get(&format!("commits/{}/status", pr.head.sha))
            .await?;
        let mut status_success: Vec<String> = Vec::new();
        let mut status_failure: Vec<String> = Vec::new();
        for status in combined.statuses {
            match status.state.as_str() {
                "success" => status_success.push(status.context),
                "failure" | "error" => status_failure.push(status.context),
                _ => {}
            }
        }

        let check_runs: CheckRunsResponse = self
            .api_get(&format!("commits/{}/check-runs?per_page=100", pr.head.sha))
            .await?;
        let mut checks: BTreeMap<String, Option<String>> = BTreeMap::new();
        for run in check_runs.check_runs {
            let conclusion = (run.status == "completed")
                .then_some(run.conclusion)
                .flatten();
            match conclusion.as_deref() {
                Some("success") => status_success.push(run.name.clone()),
                Some("failure" | "timed_out") => status_failure.push(run.name.clone()),
                _ => {}
            }
            checks.insert(run.name, conclusion);
        }

        let behind = if state == PrState::Open {
            self.is_behind(&pr.base.ref_field, &pr.head.sha).await?
        } else {
            false
        };

        let same_repo = match (&pr.base.repo, &pr.head.repo) {
            (Some(base), Some(head)) => base.full_name == head.full_name,
            _ => false,
        };

        let snapshot = PullRequestSnapshot {
            number: pr.number,
            state,
            merged: pr.merged,
            merged_by: pr.merged_by.map(|u| u.login),
            merged_at: pr.merged_at,
            base_ref: pr.base.ref_field,
            base_repo: pr
                .base
                .repo
                .map(|r| r.full_name)
                .unwrap_or_default(),
            head_ref: pr.head.ref_field,
            head_sha: pr.head.sha,
            author: pr.user.login,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            files: files.into_iter().map(|f| f.filename).collect(),
            commits: commits.into_iter().map(|c| c.sha).collect(),
            approved_reviews_by,
            changes_requested_reviews_by,
            status_success,
            status_failure,
            checks,
            mergeable: pr.mergeable,
            rebaseable: pr.rebaseable,
            behind,
            base_is_modifiable: pr.maintainer_can_modify || same_repo,
            commit_message: pr.body.as_deref().and_then(CommitMessage::from_body),
            teams: BTreeMap::new(),
        };

        debug!(pull = number, state = %snapshot.state, behind = snapshot.behind, "built snapshot");
        Ok(snapshot)
    }

    async fn team_members(&self, team: &str) -> Result<Vec<String>> {
        debug!(team, "expanding team");
        let (org, slug) = team
            .strip_prefix('@')
            .and_then(|t| t.split_once('/'))
            .ok_or_else(|| {
                Error::Platform(format!("malformed team operand '{team}', expected @org/slug"))
            })?;

        let url = format!(
            "https://{}/orgs/{org}/teams/{slug}/members?per_page=100",
            self.api_host
        );
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Request failed: {e}")))?;
        let members: Vec<RawUser> = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to parse team members: {e}")))?;

        let logins: Vec<String> = members.into_iter().map(|m| m.login).collect();
        debug!(team, count = logins.len(), "expanded team");
        Ok(logins)
    }

    async fn list_checks(&self, head_sha: &str) -> Result<BTreeMap<String, PostedCheck>> {
        debug!(head_sha, "listing our checks");
        let response: CheckRunsResponse = self
            .api_get(&format!("commits/{head_sha}/check-runs?per_page=100"))
            .await?;

        let mut checks = BTreeMap::new();
        for run in response.check_runs {
            // Only checks published by our own app
            let ours = run
                .app
                .as_ref()
                .and_then(|a| a.slug.as_deref())
                .is_some_and(|slug| slug == self.config.bot_login);
            if !ours {
                continue;
            }
            let output = run.output.unwrap_or(RawCheckOutput {
                title: None,
                summary: None,
            });
            checks.insert(
                run.name,
                PostedCheck {
                    conclusion: run.conclusion.as_deref().and_then(parse_conclusion),
                    title: output.title.unwrap_or_default(),
                    summary: output.summary.unwrap_or_default(),
                },
            );
        }
        debug!(head_sha, count = checks.len(), "listed our checks");
        Ok(checks)
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
        debug!(head_sha, check = name, %status, "publishing check");
        let mut body = serde_json::json!({
            "name": name,
            "head_sha": head_sha,
            "status": status.to_string(),
            "output": {"title": title, "summary": summary},
        });
        if let Some(conclusion) = conclusion {
            body["conclusion"] = serde_json::json!(conclusion.to_string());
        }

        let response = self
            .request(reqwest::Method::POST, &self.repo_url("check-runs"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Request failed: {e}")))?;
        Self::check_response(response).await?;
        debug!(head_sha, check = name, "published check");
        Ok(())
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<PrComment>> {
        debug!(pull = number, "listing comments");
        let comments = self
            .client
            .issues(&self.config.owner, &self.config.repo)
            .list_comments(number)
            .send()
            .await?;

        let result: Vec<PrComment> = comments
            .items
            .into_iter()
            .map(|c| PrComment {
                author: c.user.login,
                body: c.body.unwrap_or_default(),
            })
            .collect();
        debug!(pull = number, count = result.len(), "listed comments");
        Ok(result)
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<()> {
        debug!(pull = number, "posting comment");
        self.client
            .issues(&self.config.owner, &self.config.repo)
            .create_comment(number, body)
            .await?;
        debug!(pull = number, "posted comment");
        Ok(())
    }

    async fn update_base_branch(&self, number: u64, head_sha: &str) -> Result<()> {
        debug!(pull = number, "updating head branch from base");
        let response = self
            .request(
                reqwest::Method::PUT,
                &self.repo_url(&format!("pulls/{number}/update-branch")),
            )
            .json(&serde_json::json!({"expected_head_sha": head_sha}))
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Request failed: {e}")))?;
        Self::check_response(response).await?;
        debug!(pull = number, "head branch update accepted");
        Ok(())
    }

    async fn merge_pull(
        &self,
        number: u64,
        head_sha: &str,
        method: MergeMethod,
        commit_message: Option<&CommitMessage>,
    ) -> Result<()> {
        debug!(pull = number, %method, "submitting merge");
        let mut body = serde_json::json!({
            "sha": head_sha,
            "merge_method": method.to_string(),
        });
        if let Some(cm) = commit_message {
            body["commit_title"] = serde_json::json!(cm.title);
            body["commit_message"] = serde_json::json!(cm.message);
        }

        let response = self
            .request(
                reqwest::Method::PUT,
                &self.repo_url(&format!("pulls/{number}/merge")),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("Request failed: {e}")))?;
        Self::check_response(response).await?;
        debug!(pull = number, "merge accepted");
        Ok(())
    }

    async fn list_closed_pulls(&self, base_ref: &str) -> Result<Vec<PullRequestSnapshot>> {
        debug!(base_ref, "listing closed pull requests");
        let pulls = self
            .client
            .pulls(&self.config.owner, &self.config.repo)
            .list()
            .state(octocrab::params::State::Closed)
            .base(base_ref)
            .send()
            .await?;

        // Only the fields embedded-pull detection needs
        let result: Vec<PullRequestSnapshot> = pulls
            .items
            .into_iter()
            .map(|pr| PullRequestSnapshot {
                number: pr.number,
                state: if pr.merged_at.is_some() {
                    PrState::Merged
                } else {
                    PrState::Closed
                },
                merged: pr.merged_at.is_some(),
                merged_at: pr.merged_at,
                ..PullRequestSnapshot::default()
            })
            .collect();
        debug!(base_ref, count = result.len(), "listed closed pull requests");
        Ok(result)
    }

    async fn list_pull_commits(&self, number: u64) -> Result<Vec<String>> {
        debug!(pull = number, "listing commits");
        let commits: Vec<RawCommit> = self
            .api_get(&format!("pulls/{number}/commits?per_page=100"))
            .await?;
        Ok(commits.into_iter().map(|c| c.sha).collect())
    }
}
