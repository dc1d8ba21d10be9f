//! Reconstructs how far a release got, from the remote host alone.
//!
//! Nothing is stored between runs. The integration branch, the candidates
//! merged into it and the release pull request are the whole record. A merge
//! only counts if its commit is still reachable from the branch tip, so a
//! branch that was force-reset does not claim merges it no longer contains.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ReleaseError;
use crate::host::RemoteHost;
use crate::types::{
    CandidateChange, CandidateState, MergedRecord, PrNumber, ReleaseKey, ResumePoint, RunMode,
};

/// What the remote host shows for one release key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteProgress {
    pub branch_exists: bool,
    /// Verified merges, in merge order.
    pub verified: Vec<MergedRecord>,
    pub release_request: Option<PrNumber>,
}

impl RemoteProgress {
    pub fn is_verified(&self, pr: PrNumber) -> bool {
        self.verified.iter().any(|r| r.number == pr)
    }
}

/// Where a run should pick up, and with what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumePlan {
    pub point: ResumePoint,
    pub progress: RemoteProgress,
    /// Requested candidates not yet merged, in requested order.
    pub remaining: Vec<PrNumber>,
}

/// Classifies progress for `requested`.
///
/// With nothing requested the run discovers its candidates, so any verified
/// merge means the batch got as far as merging.
pub fn classify(requested: &[PrNumber], progress: &RemoteProgress) -> ResumePoint {
    if !progress.branch_exists {
        return ResumePoint::Setup;
    }
    if progress.release_request.is_some() {
        return ResumePoint::Done;
    }

    let merged = requested
        .iter()
        .filter(|pr| progress.is_verified(**pr))
        .count();

    if requested.is_empty() {
        return if progress.verified.is_empty() {
            ResumePoint::ChangeBases
        } else {
            ResumePoint::CreateRelease
        };
    }

    if merged == requested.len() {
        ResumePoint::CreateRelease
    } else if merged > 0 {
        ResumePoint::MergeRemaining
    } else {
        ResumePoint::ChangeBases
    }
}

/// Reads remote progress for `key` without changing anything.
pub async fn inspect<H: RemoteHost>(
    host: &H,
    key: &ReleaseKey,
    base_branch: &str,
) -> Result<RemoteProgress, ReleaseError> {
    let branch = key.branch_name();
    if !host.branch_exists(branch).await? {
        return Ok(RemoteProgress::default());
    }

    let mut merged = host.list_merged_targeting(branch).await?;
    merged.sort_by_key(|c| (merged_at(c), c.number));

    let mut verified = Vec::with_capacity(merged.len());
    for candidate in merged {
        let Some(sha) = candidate.state.merge_commit_sha().cloned() else {
            continue;
        };
        let status = host.compare(sha.as_str(), branch).await?;
        if status.base_is_ancestor() {
            verified.push(MergedRecord {
                number: candidate.number,
                title: candidate.title,
                merge_commit_sha: sha,
            });
        } else {
            tracing::info!(
                pr = %candidate.number,
                sha = %sha.short(),
                ?status,
                "merge commit not on integration branch; not counting it"
            );
        }
    }

    let release_request = host
        .find_open(branch, base_branch)
        .await?
        .map(|c| c.number);

    Ok(RemoteProgress {
        branch_exists: true,
        verified,
        release_request,
    })
}

fn merged_at(candidate: &CandidateChange) -> Option<DateTime<Utc>> {
    match &candidate.state {
        CandidateState::Merged { merged_at, .. } => *merged_at,
        _ => None,
    }
}

/// Builds a resume plan. In [`RunMode::Force`] the integration branch is
/// deleted first and the plan always starts from [`ResumePoint::Setup`].
pub async fn reconstruct<H: RemoteHost>(
    host: &H,
    key: &ReleaseKey,
    base_branch: &str,
    requested: &[PrNumber],
    mode: RunMode,
) -> Result<ResumePlan, ReleaseError> {
    if mode == RunMode::Force {
        let branch = key.branch_name();
        match host.delete_branch(branch).await {
            Ok(()) => tracing::warn!(branch, "deleted integration branch for a forced restart"),
            Err(e) if e.is_not_found() => tracing::debug!(branch, "integration branch already absent"),
            Err(e) => return Err(e.into()),
        }
        return Ok(ResumePlan {
            point: ResumePoint::Setup,
            progress: RemoteProgress::default(),
            remaining: requested.to_vec(),
        });
    }

    let progress = inspect(host, key, base_branch).await?;
    let point = classify(requested, &progress);
    let remaining = requested
        .iter()
        .copied()
        .filter(|pr| !progress.is_verified(*pr))
        .collect();

    tracing::info!(
        key = %key,
        %point,
        verified = progress.verified.len(),
        "reconstructed release progress"
    );

    Ok(ResumePlan {
        point,
        progress,
        remaining,
    })
}
