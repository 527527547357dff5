//! Merge action
//!
//! Merges the pull request once its rule fully matches. In strict mode the
//! head branch is first brought up to date with its base, either
//! synchronously or through the merge-train queue ("smart"), and the merge
//! happens on a later evaluation once CI has passed on the updated head.
//! Submission failures are classified on the API status and message: a
//! modified head cancels, a modified base re-syncs, branch protection (405)
//! stays pending, anything else is a failure.

use crate::actions::{Action, ActionFlags};
use crate::engine::EvaluationContext;
use crate::error::{Error, Result};
use crate::rules::Condition;
use crate::types::{
    ActionReport, Conclusion, EventSource, MergeMethod, PrState, PullRequestSnapshot,
    RebaseFallback, Strict,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Merge action configuration
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// How to merge once conditions hold
    pub method: MergeMethod,
    /// What to do when `method = rebase` but the PR is not rebaseable
    pub rebase_fallback: RebaseFallback,
    /// Whether (and how) to keep the head up to date with its base first
    pub strict: Strict,
    /// Method used for the strict base-branch update
    pub strict_method: MergeMethod,
}

/// The merge action. Once-only: a pull request is merged at most once, even
/// when several rules request it.
#[derive(Debug, Clone, Copy)]
pub struct MergeAction {
    config: MergeConfig,
}

impl MergeAction {
    /// Build from JSON configuration
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config =
            serde_json::from_value(config.clone()).map_err(|err| Error::InvalidAction {
                action: "merge".to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { config })
    }

    /// Build from an already validated configuration
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Terminal report when the pull request is already merged or closed,
    /// `None` while there is still work to do.
    fn merge_report(pull: &PullRequestSnapshot) -> Option<ActionReport> {
        if pull.merged {
            Some(ActionReport::success(
                "The pull request has been merged automatically",
                format!(
                    "The pull request has been merged automatically at `{}`",
                    pull.head_sha
                ),
            ))
        } else if pull.state == PrState::Closed {
            Some(ActionReport::cancelled(
                "The pull request has been closed manually",
                "",
            ))
        } else {
            None
        }
    }

    /// Bring the head branch up to date with its base
    async fn sync_with_base_branch(
        &self,
        ctxt: &EvaluationContext,
        pull: &PullRequestSnapshot,
    ) -> Result<ActionReport> {
        if !pull.base_is_modifiable {
            return Ok(ActionReport::failure(
                "Pull request can't be updated with latest base branch changes, \
                 owner doesn't allow modification",
                "",
            ));
        }
        if self.config.strict.is_smart() {
            ctxt.enqueue(self.config.strict_method).await;
            return Ok(ActionReport::pending(
                "Base branch will be updated soon",
                "The pull request base branch will be updated soon, and then merged.",
            ));
        }
        match ctxt
            .platform()
            .update_base_branch(pull.number, &pull.head_sha)
            .await
        {
            Ok(()) => Ok(ActionReport::pending(
                "Base branch updates done",
                "The pull request has been updated with its base branch and \
                 will be merged once CI passes.",
            )),
            Err(err) => {
                warn!(pull = pull.number, %err, "base branch update failed");
                Ok(ActionReport::failure(
                    "Base branch update has failed",
                    format!("GitHub error message: `{err}`"),
                ))
            }
        }
    }

    /// Submit the merge and classify the outcome
    async fn attempt_merge(
        &self,
        ctxt: &EvaluationContext,
        pull: &PullRequestSnapshot,
    ) -> Result<ActionReport> {
        let method = if self.config.method != MergeMethod::Rebase
            || pull.rebaseable.unwrap_or(false)
        {
            self.config.method
        } else {
            match self.config.rebase_fallback {
                RebaseFallback::Merge => MergeMethod::Merge,
                RebaseFallback::Squash => MergeMethod::Squash,
                RebaseFallback::None => {
                    return Ok(ActionReport::new(
                        Conclusion::ActionRequired,
                        "Automatic rebasing is not possible, manual intervention required",
                        "",
                    ));
                }
            }
        };

        debug!(pull = pull.number, %method, "submitting merge");
        let submitted = ctxt
            .platform()
            .merge_pull(
                pull.number,
                &pull.head_sha,
                method,
                pull.commit_message.as_ref(),
            )
            .await;

        // Whatever happened, re-read the pull request before deciding
        if let Err(err) = ctxt.refresh().await {
            warn!(pull = pull.number, %err, "failed to refresh after merge attempt");
        }
        let fresh = ctxt.pull().await;

        match submitted {
            Ok(()) => {
                info!(pull = pull.number, "merged");
                Ok(Self::merge_report(&fresh).unwrap_or_else(|| {
                    ActionReport::pending(
                        "Merge submitted",
                        "The merge has been submitted and is being processed.",
                    )
                }))
            }
            Err(_) if fresh.merged => {
                info!(pull = pull.number, "merged in the meantime");
                Ok(Self::merge_report(&fresh).unwrap_or_else(|| {
                    ActionReport::success("The pull request has been merged automatically", "")
                }))
            }
            Err(err) => self.handle_merge_error(ctxt, &fresh, err).await,
        }
    }

    async fn handle_merge_error(
        &self,
        ctxt: &EvaluationContext,
        pull: &PullRequestSnapshot,
        err: Error,
    ) -> Result<ActionReport> {
        let Some(api) = err.api_error() else {
            info!(pull = pull.number, %err, "merge failed");
            return Ok(ActionReport::failure(
                "The pull request could not be merged",
                format!("GitHub error message: `{err}`"),
            ));
        };

        if api.message.contains("Head branch was modified") {
            debug!(pull = pull.number, status = api.status, "head branch was modified");
            Ok(ActionReport::cancelled(
                "Head branch was modified in the meantime",
                "The head branch was modified, the merge action has been cancelled.",
            ))
        } else if api.message.contains("Base branch was modified") {
            // The base moved between the is-behind check and the merge call;
            // sync again and retry on the next evaluation.
            debug!(pull = pull.number, status = api.status, "base branch was modified, retrying");
            self.sync_with_base_branch(ctxt, pull).await
        } else if api.status == 405 {
            debug!(pull = pull.number, "waiting for branch protection to be validated");
            Ok(ActionReport::pending(
                "Waiting for the Branch Protection to be validated",
                format!(
                    "Branch Protection is enabled and is preventing the pull \
                     request from being merged automatically. It will be merged \
                     once branch protection settings validate it. \
                     (detail: {})",
                    api.message
                ),
            ))
        } else {
            info!(
                pull = pull.number,
                status = api.status,
                message = %api.message,
                "merge failed"
            );
            Ok(ActionReport::failure(
                "The pull request could not be merged",
                format!("GitHub error message: `{}`", api.message),
            ))
        }
    }

    /// Whether a strict merge should keep waiting for CI instead of
    /// cancelling: the pull request is open, every unmet condition is a
    /// status condition, and at least one relevant check is still running.
    fn required_statuses_in_progress(
        pull: &PullRequestSnapshot,
        missing_conditions: &[&Condition],
    ) -> bool {
        if pull.state != PrState::Open {
            return false;
        }
        if missing_conditions.is_empty()
            || !missing_conditions.iter().all(|c| c.is_status_condition())
        {
            return false;
        }
        // No checks reported yet means CI has not even started
        if pull.checks.is_empty() {
            return true;
        }
        let states: Vec<&Option<String>> = pull
            .checks
            .iter()
            .filter(|(name, _)| {
                missing_conditions.iter().any(|c| c.matches_element(name))
            })
            .map(|(_, state)| state)
            .collect();
        if states.is_empty() {
            return true;
        }
        states
            .iter()
            .any(|state| matches!(state.as_deref(), None | Some("pending")))
    }
}

#[async_trait]
impl Action for MergeAction {
    fn flags(&self) -> ActionFlags {
        ActionFlags {
            only_once: true,
            ..ActionFlags::default()
        }
    }

    async fn run(
        &self,
        ctxt: &EvaluationContext,
        _sources: &[EventSource],
        _missing_conditions: &[&Condition],
    ) -> Result<ActionReport> {
        let pull = ctxt.pull().await;
        debug!(pull = pull.number, config = ?self.config, "process merge");

        if let Some(report) = Self::merge_report(&pull) {
            if self.config.strict.is_smart() {
                ctxt.dequeue().await;
            }
            return Ok(report);
        }

        if self.config.strict.is_enabled() && pull.behind {
            self.sync_with_base_branch(ctxt, &pull).await
        } else {
            let report = self.attempt_merge(ctxt, &pull).await;
            // Whatever the outcome, the pull request no longer needs its
            // queue slot.
            if self.config.strict.is_smart() {
                ctxt.dequeue().await;
            }
            report
        }
    }

    async fn cancel(
        &self,
        ctxt: &EvaluationContext,
        _sources: &[EventSource],
        missing_conditions: &[&Condition],
    ) -> Result<ActionReport> {
        let pull = ctxt.pull().await;

        // The branch was just updated; don't stand down while the CI the
        // rule is waiting on is still running. The merge happens if all
        // rules match again once it finishes.
        if self.config.strict.is_enabled()
            && Self::required_statuses_in_progress(&pull, missing_conditions)
        {
            return Ok(ActionReport::pending(
                "Waiting for the CI to pass",
                "The pull request will be merged once the CI passes.",
            ));
        }

        if self.config.strict.is_smart() {
            ctxt.dequeue().await;
        }

        Ok(ActionReport::cancelled("The rule doesn't match anymore", ""))
    }

    async fn previously_satisfied(&self, ctxt: &EvaluationContext) -> bool {
        ctxt.pull().await.merged
    }
}
