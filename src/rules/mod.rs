//! Rule sets and rule matching
//!
//! A rule bundles a name, a condition list, and the actions to run once all
//! conditions hold. Matching a rule set against a pull-request snapshot
//! partitions it in two passes: structural conditions (base, head, author,
//! repository, files) decide whether a rule can ever apply to this pull
//! request, dynamic conditions decide whether it applies right now.

pub mod condition;

pub use condition::{Attribute, Condition, Operator};

use crate::actions::Action;
use crate::error::Result;
use crate::types::PullRequestSnapshot;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// A named rule: conditions plus the actions it triggers
#[derive(Clone)]
pub struct Rule {
    /// Display name, disambiguated by [`RuleSet::new`] on collision
    pub name: String,
    /// Hidden rules run actions but are omitted from summaries
    pub hidden: bool,
    /// All conditions, structural and dynamic
    pub conditions: Vec<Condition>,
    /// Actions keyed by kind, in declaration order
    pub actions: Vec<(String, Arc<dyn Action>)>,
}

impl Rule {
    /// Build a rule from textual conditions. Actions are attached with
    /// [`Rule::with_action`].
    pub fn new(name: impl Into<String>, conditions: &[&str]) -> Result<Self> {
        let conditions = conditions
            .iter()
            .map(|raw| Condition::parse(raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: name.into(),
            hidden: false,
            conditions,
            actions: Vec::new(),
        })
    }

    /// Attach an action to this rule
    pub fn with_action(mut self, kind: impl Into<String>, action: Arc<dyn Action>) -> Self {
        self.actions.push((kind.into(), action));
        self
    }

    /// Mark this rule as hidden in summaries
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("hidden", &self.hidden)
            .field("conditions", &self.conditions)
            .field(
                "actions",
                &self.actions.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// An ordered collection of rules with unique display names
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Build a rule set, suffixing colliding names with `#1`, `#2`, ... in
    /// declaration order so check names stay distinguishable.
    pub fn new(mut rules: Vec<Rule>) -> Self {
        let names: Vec<String> = rules.iter().map(|r| r.name.clone()).collect();
        let mut seen: Vec<&str> = Vec::new();
        for (i, rule) in rules.iter_mut().enumerate() {
            let total = names.iter().filter(|n| *n == &names[i]).count();
            if total > 1 {
                let nth = seen.iter().filter(|n| **n == names[i]).count() + 1;
                rule.name = format!("{} #{nth}", names[i]);
            }
            seen.push(&names[i]);
        }
        Self { rules }
    }

    /// All rules, in declaration order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Every team operand (`@org/team`) referenced by any condition.
    /// The caller expands these onto the snapshot before matching.
    pub fn required_teams(&self) -> BTreeSet<String> {
        self.rules
            .iter()
            .flat_map(|r| &r.conditions)
            .filter_map(|c| c.team_operand())
            .map(str::to_string)
            .collect()
    }

    /// Match every rule against a snapshot.
    ///
    /// Rules failing a structural condition land in `ignored_rules`; the
    /// rest land in `matching_rules` with whichever dynamic conditions are
    /// still unmet recorded in source order.
    pub fn get_pull_request_rule<'a>(
        &'a self,
        pull: &PullRequestSnapshot,
    ) -> RuleMatch<'a> {
        let mut matching_rules = Vec::new();
        let mut ignored_rules = Vec::new();
        for rule in &self.rules {
            let failed: Vec<&Condition> = rule
                .conditions
                .iter()
                .filter(|c| !c.evaluate(pull))
                .collect();
            if failed.iter().any(|c| c.is_structural()) {
                debug!(rule = %rule.name, pull = pull.number, "rule ignored, structural mismatch");
                ignored_rules.push(IgnoredRule {
                    rule,
                    failed_conditions: failed,
                });
            } else {
                matching_rules.push(MatchedRule {
                    rule,
                    missing_conditions: failed,
                });
            }
        }
        RuleMatch {
            rules: &self.rules,
            matching_rules,
            ignored_rules,
        }
    }
}

/// A rule whose structural conditions all hold
#[derive(Debug)]
pub struct MatchedRule<'a> {
    /// The matched rule
    pub rule: &'a Rule,
    /// Dynamic conditions not yet satisfied, in source order
    pub missing_conditions: Vec<&'a Condition>,
}

impl MatchedRule<'_> {
    /// Whether every condition holds and the actions should run
    pub fn is_complete(&self) -> bool {
        self.missing_conditions.is_empty()
    }
}

/// A rule permanently disqualified for this pull request
#[derive(Debug)]
pub struct IgnoredRule<'a> {
    /// The disqualified rule
    pub rule: &'a Rule,
    /// All failed conditions, structural ones included
    pub failed_conditions: Vec<&'a Condition>,
}

/// Result of matching a rule set against one snapshot
#[derive(Debug)]
pub struct RuleMatch<'a> {
    /// The full rule set, for reference
    pub rules: &'a [Rule],
    /// Rules that apply to this pull request (possibly with unmet dynamic
    /// conditions)
    pub matching_rules: Vec<MatchedRule<'a>>,
    /// Rules that can never apply to this pull request
    pub ignored_rules: Vec<IgnoredRule<'a>>,
}
