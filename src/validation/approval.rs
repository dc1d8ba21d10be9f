//! Review approval check.

use std::collections::BTreeMap;

use crate::types::{Review, ReviewState};

/// Outcome of the approval check for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalStatus {
    Approved,
    /// No reviewer's current verdict is an approval.
    NotApproved,
    /// These reviewers' current verdict is "changes requested".
    ChangesRequested(Vec<String>),
}

impl ApprovalStatus {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalStatus::Approved)
    }
}

/// Reduces a review history to each reviewer's current verdict.
///
/// The most recent verdict-bearing review per reviewer wins. Plain comments
/// never replace a verdict; a dismissal clears it. Reviews are ordered by
/// submission time, with unsubmitted ones first (they never carry a verdict).
pub fn latest_verdicts(reviews: &[Review]) -> BTreeMap<&str, ReviewState> {
    let mut ordered: Vec<&Review> = reviews.iter().collect();
    ordered.sort_by_key(|r| r.submitted_at);

    let mut verdicts = BTreeMap::new();
    for review in ordered {
        if review.state.is_verdict() {
            verdicts.insert(review.reviewer.as_str(), review.state);
        }
    }
    verdicts
}

/// At least one current approval and no current change request.
pub fn approval_status(reviews: &[Review]) -> ApprovalStatus {
    let verdicts = latest_verdicts(reviews);

    let blocking: Vec<String> = verdicts
        .iter()
        .filter(|(_, state)| **state == ReviewState::ChangesRequested)
        .map(|(reviewer, _)| reviewer.to_string())
        .collect();
    if !blocking.is_empty() {
        return ApprovalStatus::ChangesRequested(blocking);
    }

    if verdicts.values().any(|s| *s == ReviewState::Approved) {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::NotApproved
    }
}
