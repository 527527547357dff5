//! Declarative pull-request automation.
//!
//! Repositories describe what should happen to their pull requests as rules:
//! a list of conditions over a pull-request snapshot plus the actions to run
//! once every condition holds. On each webhook event the [`engine`] rebuilds
//! the snapshot, matches the rules, runs or cancels actions, and publishes
//! one check per rule×action pair. The engine keeps no state of its own:
//! everything it needs to stay idempotent is replayed out of the conclusion
//! record embedded in the Summary check it posted last time.
//!
//! ```no_run
//! use pullrules::actions;
//! use pullrules::engine;
//! use pullrules::platform::{GitHubService, InMemoryQueue, PlatformConfig, PlatformService};
//! use pullrules::rules::{Rule, RuleSet};
//! use pullrules::types::EventSource;
//! use std::sync::Arc;
//!
//! # async fn example() -> pullrules::Result<()> {
//! let merge = actions::build("merge", &serde_json::json!({"strict": true}))?;
//! let rules = RuleSet::new(vec![
//!     Rule::new("merge on approval", &["base=main", "#approved-reviews-by>=2"])?
//!         .with_action("merge", merge),
//! ]);
//!
//! let config = PlatformConfig {
//!     owner: "acme".into(),
//!     repo: "widgets".into(),
//!     bot_login: "acme-bot".into(),
//!     host: None,
//! };
//! let platform = Arc::new(GitHubService::new("<token>", config)?);
//! let queue = Arc::new(InMemoryQueue::new());
//!
//! let pull = platform.snapshot(1234).await?;
//! let sources = vec![EventSource::PullRequest { action: "synchronize".into() }];
//! engine::handle(&rules, platform, queue, pull, &sources).await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod engine;
pub mod error;
pub mod platform;
pub mod rules;
pub mod types;

pub use error::{ApiError, Error, Result};
pub use platform::{MergeQueue, PlatformService};
pub use rules::{Rule, RuleSet};
