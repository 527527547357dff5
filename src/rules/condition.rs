//! Condition grammar: parsing and pure evaluation
//!
//! A condition is a predicate over one attribute of a pull-request snapshot,
//! written as `[-][#]<attribute><op><operand>`:
//!
//! - `-` negates the whole condition
//! - `#` counts matching elements of a multi-valued attribute
//! - operators: `=`/`:` (equality), `>=` (threshold, `#` only), `~=` (regex)
//!
//! Parsing happens at rule-load time; anything malformed (unknown attribute,
//! bad regex, non-numeric threshold) is a configuration error there, never a
//! surprise at evaluation time. Evaluation is pure: team operands compare
//! against member sets already expanded onto the snapshot.

use crate::error::{Error, Result};
use crate::types::PullRequestSnapshot;
use regex::Regex;
use tracing::debug;

/// One attribute of the pull-request snapshot a condition can test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// Base branch ref
    Base,
    /// Head branch ref
    Head,
    /// PR author login
    Author,
    /// Base repository name
    Repository,
    /// Changed file paths
    Files,
    /// Applied label names
    Label,
    /// Whether the PR is merged
    Merged,
    /// Reviewers whose latest review approves
    ApprovedReviewsBy,
    /// Reviewers whose latest review requests changes
    ChangesRequestedReviewsBy,
    /// Status contexts reporting success
    StatusSuccess,
    /// Status contexts reporting failure
    StatusFailure,
}

impl Attribute {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "base" => Some(Self::Base),
            "head" => Some(Self::Head),
            "author" => Some(Self::Author),
            "repository" => Some(Self::Repository),
            "files" => Some(Self::Files),
            "label" => Some(Self::Label),
            "merged" => Some(Self::Merged),
            "approved-reviews-by" => Some(Self::ApprovedReviewsBy),
            "changes-requested-reviews-by" => Some(Self::ChangesRequestedReviewsBy),
            "status-success" => Some(Self::StatusSuccess),
            "status-failure" => Some(Self::StatusFailure),
            _ => None,
        }
    }

    /// Structural attributes are expected stable for the lifetime of a pull
    /// request: a false evaluation permanently disqualifies the rule.
    /// Everything else may flip on a later event.
    pub const fn is_structural(self) -> bool {
        matches!(
            self,
            Self::Base | Self::Head | Self::Author | Self::Repository | Self::Files
        )
    }

    /// Whether this is a check/status attribute (`status-*`), used by the
    /// merge action to decide whether CI is still worth waiting for.
    pub const fn is_status(self) -> bool {
        matches!(self, Self::StatusSuccess | Self::StatusFailure)
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=` or `:`
    Eq,
    /// `>=` (count conditions only)
    Ge,
    /// `~=`
    Regex,
}

/// A parsed, immediately evaluable condition
#[derive(Debug, Clone)]
pub struct Condition {
    raw: String,
    negated: bool,
    count: bool,
    attribute: Attribute,
    operator: Operator,
    operand: String,
    regex: Option<Regex>,
    threshold: Option<u64>,
}

/// Snapshot attribute value, borrowed for one evaluation
enum AttrValue<'a> {
    Str(&'a str),
    Bool(bool),
    List(&'a [String]),
}

impl Condition {
    /// Parse a condition from its textual form.
    ///
    /// All syntax problems surface here as [`Error::InvalidCondition`].
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidCondition {
            condition: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = raw.trim();
        let negated = rest.starts_with('-');
        if negated {
            rest = &rest[1..];
        }
        let count = rest.starts_with('#');
        if count {
            rest = &rest[1..];
        }

        // Two-character operators first so "~=" doesn't parse as "=".
        let (attr_name, operator, operand) = if let Some((a, o)) = rest.split_once("~=") {
            (a, Operator::Regex, o)
        } else if let Some((a, o)) = rest.split_once(">=") {
            (a, Operator::Ge, o)
        } else if let Some((a, o)) = rest.split_once('=') {
            (a, Operator::Eq, o)
        } else if let Some((a, o)) = rest.split_once(':') {
            (a, Operator::Eq, o)
        } else {
            return Err(invalid("missing operator"));
        };

        let attribute =
            Attribute::parse(attr_name).ok_or_else(|| invalid("unknown attribute"))?;

        if operand.is_empty() {
            return Err(invalid("empty operand"));
        }

        let mut regex = None;
        let mut threshold = None;
        match operator {
            Operator::Regex => {
                if count {
                    return Err(invalid("'#' cannot be combined with '~='"));
                }
                regex = Some(Regex::new(operand).map_err(|e| invalid(&e.to_string()))?);
            }
            Operator::Ge => {
                if !count {
                    return Err(invalid("'>=' requires a count attribute ('#')"));
                }
                threshold = Some(
                    operand
                        .parse::<u64>()
                        .map_err(|_| invalid("threshold is not a number"))?,
                );
            }
            Operator::Eq => {
                if count {
                    threshold = Some(
                        operand
                            .parse::<u64>()
                            .map_err(|_| invalid("threshold is not a number"))?,
                    );
                }
            }
        }

        Ok(Self {
            raw: raw.trim().to_string(),
            negated,
            count,
            attribute,
            operator,
            operand: operand.to_string(),
            regex,
            threshold,
        })
    }

    /// The condition as originally written
    pub fn source(&self) -> &str {
        &self.raw
    }

    /// The attribute this condition tests
    pub const fn attribute(&self) -> Attribute {
        self.attribute
    }

    /// Whether a false evaluation permanently disqualifies the rule
    pub const fn is_structural(&self) -> bool {
        self.attribute.is_structural()
    }

    /// Whether this condition tests a check/status attribute
    pub const fn is_status_condition(&self) -> bool {
        self.attribute.is_status()
    }

    /// Team operand (`@org/team`), when this condition uses one
    pub fn team_operand(&self) -> Option<&str> {
        self.operand.starts_with('@').then_some(self.operand.as_str())
    }

    /// Evaluate against a snapshot. Pure; all inputs are already resolved.
    pub fn evaluate(&self, pull: &PullRequestSnapshot) -> bool {
        let value = self.attribute_value(pull);
        let result = if self.count {
            self.evaluate_count(&value)
        } else {
            self.evaluate_match(&value, pull)
        };
        if self.negated { !result } else { result }
    }

    /// Whether a single element (e.g. a check name) satisfies this
    /// condition's operator and operand, negation included.
    pub fn matches_element(&self, element: &str) -> bool {
        let matched = match self.operator {
            Operator::Eq => element == self.operand,
            Operator::Regex => self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(element)),
            Operator::Ge => false,
        };
        if self.negated { !matched } else { matched }
    }

    fn attribute_value<'a>(&self, pull: &'a PullRequestSnapshot) -> AttrValue<'a> {
        match self.attribute {
            Attribute::Base => AttrValue::Str(&pull.base_ref),
            Attribute::Head => AttrValue::Str(&pull.head_ref),
            Attribute::Author => AttrValue::Str(&pull.author),
            Attribute::Repository => AttrValue::Str(&pull.base_repo),
            Attribute::Files => AttrValue::List(&pull.files),
            Attribute::Label => AttrValue::List(&pull.labels),
            Attribute::Merged => AttrValue::Bool(pull.merged),
            Attribute::ApprovedReviewsBy => AttrValue::List(&pull.approved_reviews_by),
            Attribute::ChangesRequestedReviewsBy => {
                AttrValue::List(&pull.changes_requested_reviews_by)
            }
            Attribute::StatusSuccess => AttrValue::List(&pull.status_success),
            Attribute::StatusFailure => AttrValue::List(&pull.status_failure),
        }
    }

    fn evaluate_count(&self, value: &AttrValue<'_>) -> bool {
        let n = match value {
            AttrValue::List(items) => items.len() as u64,
            AttrValue::Str(_) => 1,
            AttrValue::Bool(b) => u64::from(*b),
        };
        // parse() guarantees a threshold for count conditions
        let threshold = self.threshold.unwrap_or(0);
        match self.operator {
            Operator::Eq => n == threshold,
            Operator::Ge => n >= threshold,
            Operator::Regex => false,
        }
    }

    fn evaluate_match(&self, value: &AttrValue<'_>, pull: &PullRequestSnapshot) -> bool {
        // Team operands compare against the pre-expanded member set.
        if let Some(team) = self.team_operand() {
            let Some(members) = pull.teams.get(team) else {
                debug!(team, condition = %self.raw, "team operand not expanded, matching nothing");
                return false;
            };
            return match value {
                AttrValue::Str(s) => members.iter().any(|m| m == s),
                AttrValue::List(items) => items.iter().any(|i| members.contains(i)),
                AttrValue::Bool(_) => false,
            };
        }

        match self.operator {
            Operator::Eq => match value {
                AttrValue::Str(s) => *s == self.operand,
                AttrValue::List(items) => items.iter().any(|i| i == &self.operand),
                AttrValue::Bool(b) => (self.operand == "true") == *b,
            },
            Operator::Regex => {
                let re = match &self.regex {
                    Some(re) => re,
                    None => return false,
                };
                match value {
                    AttrValue::Str(s) => re.is_match(s),
                    AttrValue::List(items) => items.iter().any(|i| re.is_match(i)),
                    AttrValue::Bool(_) => false,
                }
            }
            Operator::Ge => false,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
