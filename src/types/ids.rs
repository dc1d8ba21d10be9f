//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different identifiers (e.g. using a
//! release key where a branch name from the host is expected) and make the code
//! more self-documenting.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A pull request number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PrNumber {
    fn from(n: u64) -> Self {
        PrNumber(n)
    }
}

/// Error returned when a string is not a 40-character hex SHA.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid SHA {0:?}: expected 40 hex characters")]
pub struct InvalidSha(pub String);

/// A git commit SHA (40 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(String);

impl Sha {
    /// Parses a SHA, normalising to lowercase.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, InvalidSha> {
        let s = s.as_ref().trim();
        if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Sha(s.to_ascii_lowercase()))
        } else {
            Err(InvalidSha(s.to_string()))
        }
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        RepoId {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parses `owner/repo`, also accepting a `https://github.com/` prefix.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s
            .strip_prefix("https://github.com/")
            .or_else(|| s.strip_prefix("github.com/"))
            .unwrap_or(s);
        let s = s.strip_suffix(".git").unwrap_or(s);
        let (owner, repo) = s.split_once('/')?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(RepoId::new(owner, repo))
    }

    /// The HTTPS clone URL, without credentials.
    pub fn https_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Prefix of every date-derived release key.
pub const RELEASE_KEY_PREFIX: &str = "release-";

/// Identifies one release attempt.
///
/// The integration branch is named exactly after the key, so the key alone is
/// enough to find a release's progress on the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseKey(String);

impl ReleaseKey {
    /// Uses an explicit key verbatim (e.g. `release-20260218-hotfix`).
    pub fn new(key: impl Into<String>) -> Self {
        ReleaseKey(key.into())
    }

    /// The key for the given calendar date: `release-YYYYMMDD`.
    pub fn for_date(date: NaiveDate) -> Self {
        ReleaseKey(format!("{}{}", RELEASE_KEY_PREFIX, date.format("%Y%m%d")))
    }

    /// The key for today's UTC date.
    pub fn today() -> Self {
        Self::for_date(Utc::now().date_naive())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the integration branch for this release.
    pub fn branch_name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
