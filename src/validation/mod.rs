//! Pre-merge readiness checks.
//!
//! Every candidate is checked independently and every failure is collected,
//! so one report names everything that blocks the batch. Results are computed
//! from the host on each call and never cached.

pub mod approval;
pub mod ci;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ReleaseError;
use crate::host::RemoteHost;
use crate::types::{CandidateChange, PrNumber, SkipChecks};

pub use approval::{ApprovalStatus, approval_status, latest_verdicts};
pub use ci::{CiStatus, ci_status};

/// Why a candidate is not ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationFailure {
    NotApproved,
    ChangesRequested { reviewers: Vec<String> },
    CiPending { checks: Vec<String> },
    CiFailed { checks: Vec<String> },
    /// Part of the reason vocabulary for reports built by callers.
    /// [`validate`] never produces it: mergeability is re-checked right
    /// before each merge instead.
    HasConflict,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationFailure::NotApproved => write!(f, "not approved"),
            ValidationFailure::ChangesRequested { reviewers } => {
                write!(f, "changes requested by {}", reviewers.join(", "))
            }
            ValidationFailure::CiPending { checks } => {
                write!(f, "CI pending ({})", checks.join(", "))
            }
            ValidationFailure::CiFailed { checks } => {
                write!(f, "CI failed ({})", checks.join(", "))
            }
            ValidationFailure::HasConflict => write!(f, "has merge conflicts"),
        }
    }
}

/// All failures for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub candidate: PrNumber,
    pub title: String,
    pub reasons: Vec<ValidationFailure>,
}

/// Every candidate that failed validation, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub failures: Vec<CandidateFailure>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_candidates(&self) -> Vec<PrNumber> {
        self.failures.iter().map(|f| f.candidate).collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} candidate(s) failed validation", self.failures.len())?;
        for failure in &self.failures {
            let reasons: Vec<String> = failure.reasons.iter().map(|r| r.to_string()).collect();
            write!(
                f,
                "\n  {} {}: {}",
                failure.candidate,
                failure.title,
                reasons.join("; ")
            )?;
        }
        Ok(())
    }
}

/// Checks one candidate, returning its failures (empty = ready).
pub async fn check_candidate<H: RemoteHost>(
    host: &H,
    candidate: &CandidateChange,
    skip: SkipChecks,
) -> Result<Vec<ValidationFailure>, ReleaseError> {
    let mut reasons = Vec::new();

    if !skip.reviews {
        let reviews = host.list_reviews(candidate.number).await?;
        match approval_status(&reviews) {
            ApprovalStatus::Approved => {}
            ApprovalStatus::NotApproved => reasons.push(ValidationFailure::NotApproved),
            ApprovalStatus::ChangesRequested(reviewers) => {
                reasons.push(ValidationFailure::ChangesRequested { reviewers })
            }
        }
    }

    if !skip.ci {
        let runs = host.get_ci_checks(candidate.head_sha.as_str()).await?;
        match ci_status(&runs) {
            CiStatus::Success => {}
            CiStatus::Pending(checks) => reasons.push(ValidationFailure::CiPending { checks }),
            CiStatus::Failed(checks) => reasons.push(ValidationFailure::CiFailed { checks }),
        }
    }

    Ok(reasons)
}

/// Validates every candidate, returning them unchanged if all pass.
///
/// With every check skipped the host is not contacted at all.
pub async fn validate<H: RemoteHost>(
    host: &H,
    candidates: Vec<CandidateChange>,
    skip: SkipChecks,
) -> Result<Vec<CandidateChange>, ReleaseError> {
    if skip.is_all() {
        return Ok(candidates);
    }

    let mut report = ValidationReport::default();
    for candidate in &candidates {
        let reasons = check_candidate(host, candidate, skip).await?;
        if !reasons.is_empty() {
            tracing::info!(pr = %candidate.number, reasons = reasons.len(), "candidate failed validation");
            report.failures.push(CandidateFailure {
                candidate: candidate.number,
                title: candidate.title.clone(),
                reasons,
            });
        }
    }

    if report.is_empty() {
        Ok(candidates)
    } else {
        Err(ReleaseError::Validation(report))
    }
}
