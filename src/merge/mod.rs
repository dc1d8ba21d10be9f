//! Sequential merge of a batch into the integration branch.
//!
//! Candidates are merged one at a time in caller order. Each merge moves the
//! integration branch, so every candidate after the first is brought up to
//! date and re-checked before its own merge.
//!
//! # Mergeability polling
//!
//! The host computes mergeability lazily, so a fresh query often answers
//! "unknown". We poll a bounded number of times. What exhaustion means depends
//! on why we were polling:
//!
//! - after a branch update: the update never settled, a
//!   [`ReleaseError::BranchUpdateTimeout`]
//! - before a merge: still unknown is treated as a conflict (fail-safe), never
//!   as success
//!
//! # Point of no return
//!
//! The first successful merge cannot be undone. A failure after it carries the
//! records merged so far; see [`MergeFailure::into_error`].

use std::time::Duration;

use crate::config::PollSettings;
use crate::error::ReleaseError;
use crate::events::{EventSink, ReleaseEvent};
use crate::host::{HostError, RemoteHost};
use crate::types::{CandidateChange, CandidateState, MergedRecord, Mergeability, PrNumber, Sha};

/// A merge batch that stopped partway.
#[derive(Debug)]
pub struct MergeFailure {
    /// Candidates merged before the failure, in merge order.
    pub merged: Vec<MergedRecord>,
    pub failed: PrNumber,
    pub cause: ReleaseError,
}

impl MergeFailure {
    /// The cause itself if nothing was merged, otherwise
    /// [`ReleaseError::Irreversible`].
    pub fn into_error(self) -> ReleaseError {
        if self.merged.is_empty() {
            self.cause
        } else {
            ReleaseError::Irreversible {
                merged: self.merged,
                failed: self.failed,
                cause: Box::new(self.cause),
            }
        }
    }
}

/// Result of polling a candidate's mergeability.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollResult {
    /// Mergeable at this head.
    Mergeable(Sha),
    Conflicting,
    /// Still unknown after every attempt.
    Unresolved,
}

/// Merges candidates one at a time.
pub struct MergeEngine<'a, H: RemoteHost> {
    host: &'a H,
    polling: PollSettings,
    skip_conflicts: bool,
    events: &'a dyn EventSink,
}

impl<'a, H: RemoteHost> MergeEngine<'a, H> {
    pub fn new(host: &'a H, polling: PollSettings, events: &'a dyn EventSink) -> Self {
        MergeEngine {
            host,
            polling,
            skip_conflicts: false,
            events,
        }
    }

    /// Skips the pre-merge mergeability poll. The post-update poll still runs.
    pub fn skip_conflicts(mut self, skip: bool) -> Self {
        self.skip_conflicts = skip;
        self
    }

    /// Merges `candidates` in order, stopping at the first failure.
    ///
    /// `already_merged` counts candidates merged into the branch by an earlier
    /// run; if non-zero, even the first candidate here is brought up to date.
    pub async fn merge_all(
        &self,
        candidates: &[CandidateChange],
        already_merged: usize,
    ) -> Result<Vec<MergedRecord>, MergeFailure> {
        let mut merged = Vec::with_capacity(candidates.len());

        for (index, candidate) in candidates.iter().enumerate() {
            let needs_update = index + already_merged > 0;
            match self.merge_one(candidate, needs_update).await {
                Ok(record) => {
                    tracing::info!(
                        pr = %record.number,
                        sha = %record.merge_commit_sha.short(),
                        position = index + 1,
                        total = candidates.len(),
                        "merged candidate"
                    );
                    self.events.emit(ReleaseEvent::CandidateMerged {
                        candidate: record.number,
                        merge_commit_sha: record.merge_commit_sha.clone(),
                    });
                    merged.push(record);
                }
                Err(cause) => {
                    tracing::warn!(pr = %candidate.number, merged = merged.len(), error = %cause, "merge batch stopped");
                    return Err(MergeFailure {
                        merged,
                        failed: candidate.number,
                        cause,
                    });
                }
            }
        }

        Ok(merged)
    }

    async fn merge_one(
        &self,
        candidate: &CandidateChange,
        needs_update: bool,
    ) -> Result<MergedRecord, ReleaseError> {
        let pr = candidate.number;
        let mut head = candidate.head_sha.clone();

        if needs_update {
            let stale = match self.request_update(pr).await? {
                UpdateRequest::Started => Some(&candidate.head_sha),
                UpdateRequest::UpToDate => None,
            };
            head = match self
                .poll(
                    pr,
                    self.polling.update_interval,
                    self.polling.update_attempts,
                    stale,
                )
                .await?
            {
                PollResult::Mergeable(sha) => sha,
                PollResult::Conflicting => {
                    return Err(ReleaseError::Conflict {
                        candidate: pr,
                        detail: "conflicts with the integration branch after a branch update"
                            .to_string(),
                    });
                }
                PollResult::Unresolved => {
                    return Err(ReleaseError::BranchUpdateTimeout { candidate: pr });
                }
            };
        }

        if !self.skip_conflicts {
            head = match self
                .poll(
                    pr,
                    self.polling.mergeable_interval,
                    self.polling.mergeable_attempts,
                    None,
                )
                .await?
            {
                PollResult::Mergeable(sha) => sha,
                PollResult::Conflicting => {
                    return Err(ReleaseError::Conflict {
                        candidate: pr,
                        detail: "host reports the candidate as not mergeable".to_string(),
                    });
                }
                PollResult::Unresolved => {
                    return Err(ReleaseError::Conflict {
                        candidate: pr,
                        detail: format!(
                            "mergeability still unknown after {} checks",
                            self.polling.mergeable_attempts
                        ),
                    });
                }
            };
        }

        let merge_commit_sha = self.host.merge(pr, &head).await?;
        Ok(MergedRecord {
            number: pr,
            title: candidate.title.clone(),
            merge_commit_sha,
        })
    }

    /// Asks the host to update the candidate's branch. A reported conflict is
    /// a [`ReleaseError::Conflict`].
    async fn request_update(&self, pr: PrNumber) -> Result<UpdateRequest, ReleaseError> {
        match self.host.request_branch_update(pr).await {
            Ok(()) => Ok(UpdateRequest::Started),
            Err(e) => match classify_update_error(&e) {
                UpdateError::AlreadyUpToDate => {
                    tracing::debug!(pr = %pr, "branch already up to date");
                    Ok(UpdateRequest::UpToDate)
                }
                UpdateError::Conflict => Err(ReleaseError::Conflict {
                    candidate: pr,
                    detail: e.message,
                }),
                UpdateError::Other => Err(e.into()),
            },
        }
    }

    /// Queries first, then sleeps between attempts. Readings taken while the
    /// head is still `stale` count as unresolved.
    async fn poll(
        &self,
        pr: PrNumber,
        interval: Duration,
        attempts: u32,
        stale: Option<&Sha>,
    ) -> Result<PollResult, ReleaseError> {
        for attempt in 1..=attempts {
            let candidate = self.host.get_candidate(pr).await?;
            if !candidate.state.is_open() {
                return Err(ReleaseError::CandidateNotOpen {
                    candidate: pr,
                    state: describe_state(&candidate.state).to_string(),
                });
            }

            let updating = stale == Some(&candidate.head_sha);
            match candidate.mergeable {
                Mergeability::Mergeable if !updating => {
                    return Ok(PollResult::Mergeable(candidate.head_sha));
                }
                Mergeability::Conflicting if !updating => return Ok(PollResult::Conflicting),
                _ => {
                    tracing::trace!(pr = %pr, attempt, attempts, updating, "mergeability unsettled");
                    if attempt < attempts {
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        }
        Ok(PollResult::Unresolved)
    }
}

pub(crate) fn describe_state(state: &CandidateState) -> &'static str {
    match state {
        CandidateState::Open => "open",
        CandidateState::Merged { .. } => "merged",
        CandidateState::Closed => "closed",
    }
}

/// How the host answered a branch update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateRequest {
    /// The update runs asynchronously; the head will move.
    Started,
    UpToDate,
}

#[derive(Debug, PartialEq, Eq)]
enum UpdateError {
    AlreadyUpToDate,
    Conflict,
    Other,
}

fn classify_update_error(err: &HostError) -> UpdateError {
    let lower = err.message.to_lowercase();
    if lower.contains("up to date") || lower.contains("no new commits") {
        UpdateError::AlreadyUpToDate
    } else if lower.contains("conflict") {
        UpdateError::Conflict
    } else {
        UpdateError::Other
    }
}
