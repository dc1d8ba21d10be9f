//! Candidate change (pull request) types and the host data attached to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PrNumber, Sha};

/// The state of a candidate pull request.
///
/// `Merged` always carries the merge commit SHA: a merged PR on the host always
/// has one, and a non-merged PR never does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateState {
    Open,

    Merged {
        /// The commit created on the base branch by the merge.
        merge_commit_sha: Sha,
        /// When the host recorded the merge. Used to recover merge order.
        merged_at: Option<DateTime<Utc>>,
    },

    Closed,
}

impl CandidateState {
    pub fn is_open(&self) -> bool {
        matches!(self, CandidateState::Open)
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, CandidateState::Merged { .. })
    }

    pub fn merge_commit_sha(&self) -> Option<&Sha> {
        match self {
            CandidateState::Merged {
                merge_commit_sha, ..
            } => Some(merge_commit_sha),
            _ => None,
        }
    }
}

/// The host's tri-state mergeability flag.
///
/// The host computes mergeability lazily after every change to the head or the
/// base, so `Unknown` is a normal, transient answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mergeability {
    Mergeable,
    Conflicting,
    Unknown,
}

impl From<Option<bool>> for Mergeability {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => Mergeability::Mergeable,
            Some(false) => Mergeability::Conflicting,
            None => Mergeability::Unknown,
        }
    }
}

/// A pull request eligible for inclusion in a release batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateChange {
    pub number: PrNumber,
    pub title: String,
    /// The source branch name.
    pub head_ref: String,
    /// The source branch tip.
    pub head_sha: Sha,
    /// The branch the PR currently targets.
    pub base_ref: String,
    pub state: CandidateState,
    pub mergeable: Mergeability,
}

impl CandidateChange {
    /// Returns true if the PR already targets `branch`.
    pub fn targets(&self, branch: &str) -> bool {
        self.base_ref == branch
    }
}

/// A single review verdict as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

impl ReviewState {
    /// Parses the host's review state string. Unrecognised values are treated
    /// as comments, which carry no verdict.
    pub fn from_api_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "APPROVED" => ReviewState::Approved,
            "CHANGES_REQUESTED" => ReviewState::ChangesRequested,
            "DISMISSED" => ReviewState::Dismissed,
            "PENDING" => ReviewState::Pending,
            _ => ReviewState::Commented,
        }
    }

    /// Whether this review replaces the reviewer's previous verdict.
    ///
    /// A plain comment after an approval does not withdraw the approval;
    /// a dismissal does.
    pub fn is_verdict(&self) -> bool {
        matches!(
            self,
            ReviewState::Approved | ReviewState::ChangesRequested | ReviewState::Dismissed
        )
    }
}

/// A submitted review on a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: String,
    pub state: ReviewState,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Execution status of a CI check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

impl CheckStatus {
    pub fn from_api_str(s: &str) -> Self {
        match s {
            "completed" => CheckStatus::Completed,
            "in_progress" => CheckStatus::InProgress,
            _ => CheckStatus::Queued,
        }
    }
}

/// A CI check run for a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckStatus,
    /// The host's conclusion string (`success`, `failure`, ...), once completed.
    pub conclusion: Option<String>,
}

impl CheckRun {
    /// Returns true if the run finished without a failing conclusion.
    ///
    /// `neutral` and `skipped` runs do not block a release.
    pub fn succeeded(&self) -> bool {
        self.status == CheckStatus::Completed
            && matches!(
                self.conclusion.as_deref(),
                Some("success") | Some("neutral") | Some("skipped")
            )
    }
}

/// Result of comparing two refs on the host (`base...head`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareStatus {
    Identical,
    /// `head` contains `base` plus more commits.
    Ahead,
    /// `base` contains `head` plus more commits.
    Behind,
    Diverged,
}

impl CompareStatus {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s {
            "identical" => Some(CompareStatus::Identical),
            "ahead" => Some(CompareStatus::Ahead),
            "behind" => Some(CompareStatus::Behind),
            "diverged" => Some(CompareStatus::Diverged),
            _ => None,
        }
    }

    /// Returns true if `base` is reachable from `head`.
    pub fn base_is_ancestor(&self) -> bool {
        matches!(self, CompareStatus::Identical | CompareStatus::Ahead)
    }
}

/// A candidate that has been merged into the integration branch.
///
/// Only appended after a successful merge and never mutated; a list of these
/// is always in actual merge order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub number: PrNumber,
    pub title: String,
    pub merge_commit_sha: Sha,
}
