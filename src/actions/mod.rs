//! Actions triggered by matched rules
//!
//! An action is a named effect (merge, comment) with two entry points: `run`
//! when its rule fully matches, `cancel` when the rule stops matching. Both
//! return an [`ActionReport`] describing what happened; the orchestrator in
//! [`crate::engine`] turns reports into posted checks and decides whether an
//! entry point needs to run at all.

pub mod comment;
pub mod merge;

pub use comment::CommentAction;
pub use merge::MergeAction;

use crate::engine::EvaluationContext;
use crate::error::{Error, Result};
use crate::rules::Condition;
use crate::types::{ActionReport, EventSource};
use async_trait::async_trait;
use std::sync::Arc;

/// Scheduling traits of an action, consulted by the orchestrator
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionFlags {
    /// Run at most once per pull request; later full matches re-report the
    /// recorded conclusion instead of re-running
    pub only_once: bool,
    /// Run on every evaluation while the rule matches, even when the
    /// previous conclusion is already the expected one
    pub always_run: bool,
    /// Post the check only for real outcomes, never for carried-forward
    /// "nothing to do" evaluations
    pub silent_report: bool,
}

/// One effect a rule can trigger
#[async_trait]
pub trait Action: Send + Sync {
    /// Scheduling flags; the default is run-till-success, reported loudly
    fn flags(&self) -> ActionFlags {
        ActionFlags::default()
    }

    /// Execute the action for a fully matched rule
    async fn run(
        &self,
        ctxt: &EvaluationContext,
        sources: &[EventSource],
        missing_conditions: &[&Condition],
    ) -> Result<ActionReport>;

    /// Undo or stand down when the rule no longer fully matches
    async fn cancel(
        &self,
        _ctxt: &EvaluationContext,
        _sources: &[EventSource],
        _missing_conditions: &[&Condition],
    ) -> Result<ActionReport> {
        Ok(ActionReport::cancelled("The rule doesn't match anymore", ""))
    }

    /// Whether the effect is already visible on the pull request, for
    /// once-only actions evaluated without a conclusion record. Errors while
    /// checking count as "not satisfied".
    async fn previously_satisfied(&self, _ctxt: &EvaluationContext) -> bool {
        false
    }
}

/// Instantiate an action from its kind name and JSON configuration.
///
/// The action set is closed; unknown kinds are a configuration error.
pub fn build(kind: &str, config: &serde_json::Value) -> Result<Arc<dyn Action>> {
    match kind {
        "merge" => Ok(Arc::new(MergeAction::from_config(config)?)),
        "comment" => Ok(Arc::new(CommentAction::from_config(config)?)),
        _ => Err(Error::InvalidAction {
            action: kind.to_string(),
            reason: "unknown action kind".to_string(),
        }),
    }
}
