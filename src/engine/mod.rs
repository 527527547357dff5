//! Event-driven orchestrator
//!
//! [`handle`] is the single entry point: given the rule set, a fresh
//! snapshot and the events that triggered this evaluation, it matches rules,
//! replays the previous conclusion record out of the Summary check, decides
//! per rule×action whether anything needs to run, executes, publishes one
//! check per rule×action, and re-posts the Summary with the updated record
//! embedded. The engine itself stores nothing; repeating an evaluation with
//! no state change on the pull request is a no-op.

pub mod conclusions;

pub use conclusions::ConclusionSet;

use crate::error::Result;
use crate::platform::{MergeQueue, PlatformService};
use crate::rules::{Condition, Rule, RuleMatch, RuleSet};
use crate::types::{
    CheckStatus, Conclusion, EventSource, MergeMethod, PostedCheck, PullRequestSnapshot,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Name of the synthetic check carrying the rule overview and the
/// conclusion record
pub const SUMMARY_NAME: &str = "Summary";

/// Per-evaluation handle shared with actions: the platform client, the merge
/// queue, and a refreshable snapshot of the pull request being evaluated.
pub struct EvaluationContext {
    platform: Arc<dyn PlatformService>,
    queue: Arc<dyn MergeQueue>,
    pull: RwLock<PullRequestSnapshot>,
}

impl EvaluationContext {
    /// Bundle a snapshot with its platform and queue
    pub fn new(
        platform: Arc<dyn PlatformService>,
        queue: Arc<dyn MergeQueue>,
        pull: PullRequestSnapshot,
    ) -> Self {
        Self {
            platform,
            queue,
            pull: RwLock::new(pull),
        }
    }

    /// The platform client
    pub fn platform(&self) -> &dyn PlatformService {
        self.platform.as_ref()
    }

    /// Current snapshot (cloned; actions may refresh it mid-run)
    pub async fn pull(&self) -> PullRequestSnapshot {
        self.pull.read().await.clone()
    }

    /// Re-fetch the snapshot, keeping the invocation's team expansion
    pub async fn refresh(&self) -> Result<()> {
        let (number, teams) = {
            let pull = self.pull.read().await;
            (pull.number, pull.teams.clone())
        };
        let mut fresh = self.platform.snapshot(number).await?;
        fresh.teams = teams;
        *self.pull.write().await = fresh;
        Ok(())
    }

    /// Queue this pull request for a merge-train update. Queue errors are
    /// logged, not propagated: the next evaluation retries.
    pub async fn enqueue(&self, method: MergeMethod) {
        let number = self.pull.read().await.number;
        if let Err(err) = self.queue.enqueue(number, method).await {
            warn!(pull = number, %err, "failed to enqueue pull request");
        }
    }

    /// Remove this pull request from the merge train, idempotently
    pub async fn dequeue(&self) {
        let number = self.pull.read().await.number;
        if let Err(err) = self.queue.dequeue(number).await {
            warn!(pull = number, %err, "failed to dequeue pull request");
        }
    }
}

/// Evaluate one pull request against the rule set.
///
/// Everything downstream of the initial reads is best-effort per check:
/// a failing action or a failing check publication never aborts the other
/// rule×action pairs.
pub async fn handle(
    rule_set: &RuleSet,
    platform: Arc<dyn PlatformService>,
    queue: Arc<dyn MergeQueue>,
    mut pull: PullRequestSnapshot,
    sources: &[EventSource],
) -> Result<ConclusionSet> {
    // Teams referenced by conditions are expanded once, up front, so
    // condition evaluation stays pure.
    for team in rule_set.required_teams() {
        if pull.teams.contains_key(&team) {
            continue;
        }
        match platform.team_members(&team).await {
            Ok(members) => {
                pull.teams.insert(team, members);
            }
            Err(err) => {
                warn!(%team, %err, "failed to expand team, its conditions will not match");
            }
        }
    }

    let rule_match = rule_set.get_pull_request_rule(&pull);
    info!(
        pull = pull.number,
        matching = rule_match.matching_rules.len(),
        ignored = rule_match.ignored_rules.len(),
        events = ?sources.iter().map(EventSource::event_type).collect::<Vec<_>>(),
        "rules evaluated"
    );

    let checks = platform.list_checks(&pull.head_sha).await?;
    let summary_check = checks.get(SUMMARY_NAME);
    let previous = ConclusionSet::decode(summary_check.map(|c| c.summary.as_str()));

    let ctxt = EvaluationContext::new(Arc::clone(&platform), queue, pull);
    let conclusions = run_actions(&ctxt, sources, &rule_match, &checks, &previous).await;

    post_summary(&ctxt, sources, &rule_match, summary_check, &conclusions).await;

    Ok(conclusions)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Run,
    Cancel,
}

impl Method {
    const fn name(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Cancel => "cancel",
        }
    }

    /// Conclusions that mean the entry point already had its say
    const fn expected_conclusions(self) -> [Conclusion; 2] {
        match self {
            Self::Run => [Conclusion::Success, Conclusion::Failure],
            Self::Cancel => [Conclusion::Neutral, Conclusion::Cancelled],
        }
    }
}

fn previous_conclusion(
    previous: &ConclusionSet,
    check_name: &str,
    checks: &BTreeMap<String, PostedCheck>,
) -> Conclusion {
    if let Some(conclusion) = previous.get(check_name) {
        return conclusion;
    }
    // Fall back to the published check itself when the record predates it
    if let Some(check) = checks.get(check_name) {
        if let Some(conclusion) = check.conclusion {
            return conclusion;
        }
    }
    Conclusion::Neutral
}

/// The per-rule×action state machine
async fn run_actions(
    ctxt: &EvaluationContext,
    sources: &[EventSource],
    rule_match: &RuleMatch<'_>,
    checks: &BTreeMap<String, PostedCheck>,
    previous: &ConclusionSet,
) -> ConclusionSet {
    let user_refresh = sources.iter().any(EventSource::is_refresh);
    let forced_refresh = sources.iter().any(EventSource::is_forced_refresh);

    let mut actions_ran: HashSet<&str> = HashSet::new();
    let mut conclusions = ConclusionSet::default();

    for matched in &rule_match.matching_rules {
        for (kind, action) in &matched.rule.actions {
            let check_name = format!("Rule: {} ({kind})", matched.rule.name);
            let flags = action.flags();

            let done_by_another =
                flags.only_once && actions_ran.contains(kind.as_str());

            let method = if matched.is_complete() {
                actions_ran.insert(kind.as_str());
                Method::Run
            } else {
                Method::Cancel
            };
            let expected = method.expected_conclusions();

            // Without a trustworthy record, ask the action whether its
            // effect is already visible before re-running it. An action
            // kind already executed in this pass is excluded: its effect
            // belongs to the earlier rule, and the once-only branch below
            // must still publish its report.
            let prev = if previous.is_legacy()
                && !done_by_another
                && action.previously_satisfied(ctxt).await
            {
                Conclusion::Success
            } else {
                previous_conclusion(previous, &check_name, checks)
            };

            let need_to_be_run = flags.always_run
                || forced_refresh
                || (user_refresh && prev == Conclusion::Failure)
                || !expected.contains(&prev);

            let mut silent = flags.silent_report;
            let (report, executed) = if !need_to_be_run {
                silent = true;
                debug!(
                    check = %check_name,
                    method = method.name(),
                    previous = %prev,
                    "ignored, already in expected state"
                );
                (
                    crate::types::ActionReport::new(prev, "Already in expected state", ""),
                    false,
                )
            } else if done_by_another {
                debug!(check = %check_name, action = %kind, "ignored, already done by another rule");
                (
                    crate::types::ActionReport::success(
                        format!("Another {kind} action already ran"),
                        "",
                    ),
                    false,
                )
            } else {
                let report = match method {
                    Method::Run => action.run(ctxt, sources, &matched.missing_conditions).await,
                    Method::Cancel => {
                        action
                            .cancel(ctxt, sources, &matched.missing_conditions)
                            .await
                    }
                };
                let report = report.unwrap_or_else(|err| {
                    error!(check = %check_name, %err, "action failed");
                    crate::types::ActionReport::failure(format!("action '{kind}' failed"), " ")
                });
                (report, true)
            };

            if executed && method == Method::Run && report.conclusion != Conclusion::Pending {
                info!(
                    target: "pullrules::metrics",
                    action = %kind,
                    counter = "engine.actions.count",
                    "action executed"
                );
            }

            if !silent {
                let pull = ctxt.pull().await;
                let status = report.conclusion.check_status();
                let conclusion = match status {
                    CheckStatus::Completed => Some(report.conclusion),
                    CheckStatus::InProgress => None,
                };
                if let Err(err) = ctxt
                    .platform()
                    .set_check(
                        &pull.head_sha,
                        &check_name,
                        status,
                        conclusion,
                        &report.title,
                        &report.summary,
                    )
                    .await
                {
                    error!(check = %check_name, %err, "failed to post check");
                }
            }
            conclusions.set(check_name.as_str(), report.conclusion);

            info!(
                check = %check_name,
                method = method.name(),
                executed,
                previous = %prev,
                conclusion = %report.conclusion,
                title = %report.title,
                missing_conditions = ?matched
                    .missing_conditions
                    .iter()
                    .map(|c| c.source())
                    .collect::<Vec<_>>(),
                "action evaluated"
            );
        }
    }

    conclusions
}

/// Another merged pull request that contains all of this one's commits
async fn find_embedded_pull(
    ctxt: &EvaluationContext,
    pull: &PullRequestSnapshot,
) -> Option<u64> {
    let closed = match ctxt.platform().list_closed_pulls(&pull.base_ref).await {
        Ok(closed) => closed,
        Err(err) => {
            warn!(%err, "failed to list closed pull requests");
            return None;
        }
    };
    for other in closed {
        if other.number == pull.number {
            continue;
        }
        let commits = match ctxt.platform().list_pull_commits(other.number).await {
            Ok(commits) => commits,
            Err(err) => {
                warn!(pull = other.number, %err, "failed to list commits");
                continue;
            }
        };
        if pull.commits.iter().all(|c| commits.contains(c)) {
            return Some(other.number);
        }
    }
    None
}

/// Explain why a merged pull request was never merged by us, when a merge
/// rule exists but was still waiting on conditions.
async fn already_merged_summary(
    ctxt: &EvaluationContext,
    pull: &PullRequestSnapshot,
    sources: &[EventSource],
    rule_match: &RuleMatch<'_>,
) -> String {
    let closed_by_merge = pull.merged
        && !sources.is_empty()
        && sources.iter().all(|s| {
            matches!(s, EventSource::PullRequest { action } if action == "closed")
        });
    if !closed_by_merge {
        return String::new();
    }

    let mut merge_rule_found = false;
    let mut merge_rule_active = false;
    for matched in &rule_match.matching_rules {
        if matched.rule.actions.iter().any(|(k, _)| k == "merge") {
            merge_rule_found = true;
            if matched.is_complete() {
                merge_rule_active = true;
            }
        }
    }
    // An active merge rule already reports the merge in its own check
    if !merge_rule_found || merge_rule_active {
        return String::new();
    }

    match find_embedded_pull(ctxt, pull).await {
        Some(other) => format!(
            "⚠️ The pull request has been closed by GitHub \
             because its commits are also part of #{other}\n\n"
        ),
        None => {
            let merged_by = pull.merged_by.as_deref().unwrap_or("unknown");
            format!("⚠️ The pull request has been merged manually by @{merged_by}\n\n")
        }
    }
}

fn summary_rules(rules: &[(&Rule, &[&Condition])]) -> String {
    let mut out = String::new();
    for (rule, missing) in rules {
        if rule.hidden {
            continue;
        }
        out.push_str(&format!("#### Rule: {}", rule.name));
        let kinds: Vec<&str> = rule.actions.iter().map(|(k, _)| k.as_str()).collect();
        out.push_str(&format!(" ({})", kinds.join(", ")));
        for cond in &rule.conditions {
            let checked = if missing.contains(&cond) { " " } else { "X" };
            out.push_str(&format!("\n- [{checked}] `{cond}`"));
        }
        out.push_str("\n\n");
    }
    out
}

/// Build the Summary check title and body
async fn gen_summary(
    ctxt: &EvaluationContext,
    pull: &PullRequestSnapshot,
    sources: &[EventSource],
    rule_match: &RuleMatch<'_>,
) -> (String, String) {
    let mut summary = String::new();
    summary.push_str(&already_merged_summary(ctxt, pull, sources, rule_match).await);

    let matching: Vec<(&Rule, &[&Condition])> = rule_match
        .matching_rules
        .iter()
        .map(|m| (m.rule, m.missing_conditions.as_slice()))
        .collect();
    summary.push_str(&summary_rules(&matching));

    if let Some(cm) = &pull.commit_message {
        summary.push_str("<hr />The merge or squash commit message will be:\n\n");
        summary.push_str("```\n");
        summary.push_str(&format!("{}\n\n{}\n", cm.title, cm.message));
        summary.push_str("```\n\n");
    }

    summary.push_str("<hr />\n");

    let ignored_visible = rule_match
        .ignored_rules
        .iter()
        .filter(|i| !i.rule.hidden)
        .count();
    if ignored_visible > 0 {
        summary.push_str("<details>\n");
        if ignored_visible == 1 {
            summary.push_str(&format!("<summary>{ignored_visible} not applicable rule</summary>\n\n"));
        } else {
            summary.push_str(&format!("<summary>{ignored_visible} not applicable rules</summary>\n\n"));
        }
        let ignored: Vec<(&Rule, &[&Condition])> = rule_match
            .ignored_rules
            .iter()
            .map(|i| (i.rule, i.failed_conditions.as_slice()))
            .collect();
        summary.push_str(&summary_rules(&ignored));
        summary.push_str("</details>\n");
    }

    let completed = rule_match
        .matching_rules
        .iter()
        .filter(|m| m.is_complete())
        .count();
    let potential = rule_match.matching_rules.len() - completed;

    let mut title_parts = Vec::new();
    match completed {
        0 => {}
        1 => title_parts.push("1 rule matches".to_string()),
        n => title_parts.push(format!("{n} rules match")),
    }
    match potential {
        0 => {}
        1 => title_parts.push("1 potential rule".to_string()),
        n => title_parts.push(format!("{n} potential rules")),
    }
    if title_parts.is_empty() {
        title_parts.push("no rules match, no planned actions".to_string());
    }

    (title_parts.join(" and "), summary)
}

/// Publish the Summary check, skipping the write when nothing changed so a
/// replayed evaluation leaves no trace.
async fn post_summary(
    ctxt: &EvaluationContext,
    sources: &[EventSource],
    rule_match: &RuleMatch<'_>,
    summary_check: Option<&PostedCheck>,
    conclusions: &ConclusionSet,
) {
    let pull = ctxt.pull().await;
    let (title, mut summary) = gen_summary(ctxt, &pull, sources, rule_match).await;
    summary.push('\n');
    summary.push_str(&conclusions.encode());

    let unchanged = summary_check
        .is_some_and(|check| check.title == title && check.summary == summary);
    if unchanged {
        debug!(pull = pull.number, %title, "summary unchanged");
        return;
    }

    debug!(pull = pull.number, %title, "summary changed, publishing");
    if let Err(err) = ctxt
        .platform()
        .set_check(
            &pull.head_sha,
            SUMMARY_NAME,
            CheckStatus::Completed,
            Some(Conclusion::Success),
            &title,
            &summary,
        )
        .await
    {
        error!(pull = pull.number, %err, "failed to post summary");
    }
}
