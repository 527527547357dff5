//! Comment action
//!
//! Posts a fixed message when its rule matches. Silent: the posted comment
//! is the visible outcome, so no per-rule check is published. Duplicate
//! protection for summaries predating the conclusion record works by
//! scanning existing comments for an identical message from our bot.

use crate::actions::{Action, ActionFlags};
use crate::engine::EvaluationContext;
use crate::error::{Error, Result};
use crate::rules::Condition;
use crate::types::{ActionReport, EventSource};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommentConfig {
    message: String,
}

/// The comment action
#[derive(Debug, Clone)]
pub struct CommentAction {
    message: String,
}

impl CommentAction {
    /// Build from JSON configuration; `message` is required
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: CommentConfig =
            serde_json::from_value(config.clone()).map_err(|err| Error::InvalidAction {
                action: "comment".to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            message: config.message,
        })
    }

    /// Build with a literal message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Action for CommentAction {
    fn flags(&self) -> ActionFlags {
        ActionFlags {
            silent_report: true,
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
        match ctxt.platform().post_comment(pull.number, &self.message).await {
            Ok(()) => Ok(ActionReport::success("Comment posted", &self.message)),
            Err(err) => Ok(ActionReport::pending(
                "Unable to post comment",
                format!("GitHub error: `{err}`"),
            )),
        }
    }

    async fn previously_satisfied(&self, ctxt: &EvaluationContext) -> bool {
        let pull = ctxt.pull().await;
        let bot_login = ctxt.platform().config().bot_login.clone();
        match ctxt.platform().list_comments(pull.number).await {
            Ok(comments) => comments
                .iter()
                .any(|c| c.author == bot_login && c.body == self.message),
            Err(err) => {
                warn!(pull = pull.number, %err, "failed to list comments");
                false
            }
        }
    }
}
