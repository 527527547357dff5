//! Error types for pullrules

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structured client-side API failure.
///
/// Carries the raw HTTP status and the upstream error message so callers can
/// classify outcomes (e.g. branch-protection 405) on typed fields instead of
/// sniffing exception text. Substring matching on `message` remains only
/// where GitHub offers no structured error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("GitHub returned {status}: {message}")]
pub struct ApiError {
    /// HTTP status code of the failed request
    pub status: u16,
    /// Upstream error message, verbatim
    pub message: String,
}

/// Errors that can occur in pullrules
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed condition in the rule configuration (load time, never
    /// evaluation time)
    #[error("invalid condition '{condition}': {reason}")]
    InvalidCondition {
        /// The raw condition source
        condition: String,
        /// Why it failed to parse
        reason: String,
    },

    /// Unknown action kind or invalid action configuration (load time)
    #[error("invalid action '{action}': {reason}")]
    InvalidAction {
        /// The action kind name
        action: String,
        /// Why it failed to load
        reason: String,
    },

    /// GitHub API errors without a useful status code
    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    /// Client-side API failure with structured status and message
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Generic platform error (alternate backends, test doubles)
    #[error("platform error: {0}")]
    Platform(String),
}

impl From<octocrab::Error> for Error {
    fn from(err: octocrab::Error) -> Self {
        Self::GitHubApi(err.to_string())
    }
}

impl Error {
    /// The structured API failure, when this error carries one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }
}
