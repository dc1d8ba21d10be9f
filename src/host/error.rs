//! Remote host error types.
//!
//! Errors are categorised for retry decisions:
//!
//! - **Transient** errors are retriable (5xx, rate limits, network blips,
//!   known propagation delays)
//! - **Permanent** errors need a human (most 4xx, unmergeable PRs, auth)
//! - **SHA mismatch** on a guarded merge means the PR head moved after we
//!   looked at it; the caller must re-read the PR rather than retry blindly

use std::fmt;
use thiserror::Error;

use crate::types::{PrNumber, Sha};

/// The kind of host error, categorised for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorKind {
    /// Safe to retry with backoff (only for idempotent calls).
    Transient,

    /// Requires human intervention.
    Permanent,

    /// The PR head changed between the readiness check and the merge.
    ShaMismatch,
}

impl HostErrorKind {
    /// Returns true if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, HostErrorKind::Transient)
    }
}

/// A remote host error with categorisation for retry decisions.
#[derive(Debug, Error)]
pub struct HostError {
    pub kind: HostErrorKind,

    /// The HTTP status code, if known.
    pub status_code: Option<u16>,

    pub message: String,

    /// The underlying octocrab error, if any.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "host error (HTTP {}): {}", code, self.message),
            None => write!(f, "host error: {}", self.message),
        }
    }
}

impl HostError {
    /// Creates a permanent error without an octocrab source.
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: HostErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error without an octocrab source.
    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: HostErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a permanent "not found" error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: HostErrorKind::Permanent,
            status_code: Some(404),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a SHA mismatch error for a guarded merge.
    pub fn sha_mismatch(pr: PrNumber, expected: &Sha, source: Option<octocrab::Error>) -> Self {
        Self {
            kind: HostErrorKind::ShaMismatch,
            status_code: Some(409),
            message: format!(
                "head of PR {} moved away from {} before the merge",
                pr,
                expected.short()
            ),
            source,
        }
    }

    /// Returns true if the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == HostErrorKind::Transient
    }

    /// Categorises an octocrab error.
    ///
    /// Categorisation looks at the HTTP status code and at message patterns for
    /// known GitHub responses.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let message = err.to_string();
        let status_code = extract_status_code(&message);

        if is_transient_message(&message) {
            return Self {
                kind: HostErrorKind::Transient,
                status_code,
                message,
                source: Some(err),
            };
        }

        // 409 is not automatically a SHA mismatch: merge conflicts are 409 too.
        // The merge call site inspects the message to tell them apart.
        let kind = match status_code {
            Some(429) => HostErrorKind::Transient,
            Some(403) if is_rate_limit_error(&message) => HostErrorKind::Transient,
            Some(code) if (500..600).contains(&code) => HostErrorKind::Transient,
            Some(_) => HostErrorKind::Permanent,
            None if is_network_error(&message) => HostErrorKind::Transient,
            None => HostErrorKind::Permanent,
        };

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }
}

/// Extracts an HTTP status code from an error message.
///
/// octocrab does not expose a stable status accessor across all error
/// variants, so this matches the message text. An unrecognised format yields
/// `None`, which categorises conservatively.
fn extract_status_code(message: &str) -> Option<u16> {
    if let Some(idx) = message.find("status: ") {
        let digits: String = message[idx + 8..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }

    let lower = message.to_lowercase();
    if lower.contains("not found") || lower.contains("reference does not exist") {
        return Some(404);
    }

    [409u16, 422, 403, 401, 429, 500, 502, 503]
        .into_iter()
        .find(|code| message.contains(&code.to_string()))
}

/// Checks if an error message indicates a condition that resolves on retry.
fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();

    (lower.contains("required status check") && lower.contains("expected"))
        || lower.contains("base branch was modified")
        || lower.contains("try again")
}

fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("secondary rate") || lower.contains("abuse")
}

fn is_network_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timeout", "timed out", "connection", "network", "dns"]
        .iter()
        .any(|marker| lower.contains(marker))
}
