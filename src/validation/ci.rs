//! CI check-run evaluation.

use crate::types::{CheckRun, CheckStatus};

/// Aggregate CI state of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiStatus {
    /// Every run finished successfully (vacuously true with no runs).
    Success,
    /// These runs have not finished.
    Pending(Vec<String>),
    /// These runs finished without success.
    Failed(Vec<String>),
}

/// Any unfinished run makes the whole commit pending, even if another run has
/// already failed: the failure may be retried and the verdict is not final.
pub fn ci_status(runs: &[CheckRun]) -> CiStatus {
    let pending: Vec<String> = runs
        .iter()
        .filter(|r| r.status != CheckStatus::Completed)
        .map(|r| r.name.clone())
        .collect();
    if !pending.is_empty() {
        return CiStatus::Pending(pending);
    }

    let failed: Vec<String> = runs
        .iter()
        .filter(|r| !r.succeeded())
        .map(|r| r.name.clone())
        .collect();
    if failed.is_empty() {
        CiStatus::Success
    } else {
        CiStatus::Failed(failed)
    }
}
