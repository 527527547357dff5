//! Conclusion store: per-check outcomes carried inside the Summary body
//!
//! The engine keeps no database. The outcome of every `Rule: ... (...)` check
//! from the previous evaluation is serialized as base64-wrapped JSON inside
//! an HTML comment, appended as the final line of the Summary check body, and
//! decoded back on the next event. A summary that exists but carries no
//! decodable marker predates this scheme; the decoder flags it so callers can
//! fall back to per-action duplicate detection.

use crate::types::Conclusion;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::BTreeMap;
use tracing::debug;

/// Previous-evaluation outcomes, keyed by check name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConclusionSet {
    entries: BTreeMap<String, Conclusion>,
    legacy: bool,
}

impl ConclusionSet {
    /// Decode the store from a previous Summary body, if any.
    ///
    /// `None` (no summary posted yet) and a summary whose last line is not a
    /// well-formed marker both yield an empty set with the legacy flag on:
    /// in either case no trustworthy record exists and duplicate suppression
    /// must not assume one.
    pub fn decode(summary_body: Option<&str>) -> Self {
        let Some(body) = summary_body else {
            return Self {
                entries: BTreeMap::new(),
                legacy: true,
            };
        };
        let entries = body
            .trim_end()
            .lines()
            .next_back()
            .and_then(Self::decode_marker);
        match entries {
            Some(entries) => Self {
                entries,
                legacy: false,
            },
            None => {
                debug!("summary carries no conclusion marker, treating as legacy");
                Self {
                    entries: BTreeMap::new(),
                    legacy: true,
                }
            }
        }
    }

    fn decode_marker(line: &str) -> Option<BTreeMap<String, Conclusion>> {
        let payload = line.strip_prefix("<!-- ")?.strip_suffix(" -->")?;
        let bytes = BASE64.decode(payload).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Encode the store as a marker line. Deterministic for a given set of
    /// entries, so re-posting an unchanged summary is a byte-level no-op.
    pub fn encode(&self) -> String {
        // BTreeMap ordering makes the JSON stable
        let json = serde_json::to_vec(&self.entries).unwrap_or_default();
        format!("<!-- {} -->", BASE64.encode(json))
    }

    /// Previous conclusion recorded for a check name
    pub fn get(&self, check_name: &str) -> Option<Conclusion> {
        self.entries.get(check_name).copied()
    }

    /// Record this evaluation's conclusion for a check name
    pub fn set(&mut self, check_name: impl Into<String>, conclusion: Conclusion) {
        self.entries.insert(check_name.into(), conclusion);
    }

    /// Whether no decodable record existed (first run or pre-marker summary)
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Recorded check names and conclusions, in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Conclusion)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
