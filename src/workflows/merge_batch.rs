//! MergeBatch: pick candidates, validate them, point them at the integration
//! branch and merge them in order.
//!
//! `sequential_merge` is the point of no return. Everything before it rolls
//! back; nothing after it does.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{Services, retry_transient};
use crate::error::ReleaseError;
use crate::host::{RemoteHost, RetryConfig};
use crate::merge::{MergeEngine, describe_state};
use crate::saga::{Saga, SagaBuilder, SelfFailurePolicy, Step};
use crate::types::{CandidateChange, MergedRecord, PrNumber, ReleaseKey, RunOptions, Sha};
use crate::validation::{self, approval_status};
use crate::vcs::LocalVcs;

pub struct MergeContext<'a, V: LocalVcs, H: RemoteHost> {
    pub services: Services<'a, V, H>,
    pub key: ReleaseKey,
    pub workdir: PathBuf,
    pub options: RunOptions,
    /// Explicit candidates in merge order. Empty means discover.
    pub requested: Vec<PrNumber>,
    /// Candidates an earlier run already merged into the branch.
    pub already_merged: usize,

    pub candidates: Vec<CandidateChange>,
    /// Candidates this run retargeted, with the base each had before.
    pub retargeted: Vec<(PrNumber, String)>,
    /// Candidates whose base could not be put back; they still target the
    /// integration branch.
    pub unrestored: Vec<(PrNumber, String)>,
    /// Merged by this run, in merge order.
    pub merged: Vec<MergedRecord>,
    /// Local tip after syncing with the remote branch.
    pub tip: Option<Sha>,
}

impl<'a, V: LocalVcs, H: RemoteHost> MergeContext<'a, V, H> {
    pub fn new(
        services: Services<'a, V, H>,
        key: ReleaseKey,
        workdir: PathBuf,
        options: RunOptions,
        requested: Vec<PrNumber>,
    ) -> Self {
        MergeContext {
            services,
            key,
            workdir,
            options,
            requested,
            already_merged: 0,
            candidates: Vec::new(),
            retargeted: Vec::new(),
            unrestored: Vec::new(),
            merged: Vec::new(),
            tip: None,
        }
    }

    pub fn with_already_merged(mut self, count: usize) -> Self {
        self.already_merged = count;
        self
    }

    fn branch(&self) -> &str {
        self.key.branch_name()
    }

    /// Describes [`unrestored`](Self::unrestored), if anything is left.
    pub fn unrestored_summary(&self) -> Option<String> {
        if self.unrestored.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .unrestored
            .iter()
            .map(|(pr, base)| format!("{} -> {}", pr, base))
            .collect();
        Some(format!("could not restore bases: {}", pairs.join(", ")))
    }
}

pub fn merge_batch_saga<'a, V: LocalVcs + 'a, H: RemoteHost + 'a>(
    retry: RetryConfig,
) -> Saga<MergeContext<'a, V, H>> {
    SagaBuilder::new("merge_batch")
        .step(FetchCandidates { retry })
        .step(ValidateCandidates { retry })
        .step(ChangeBases)
        .irreversible(SequentialMerge)
        .step(SyncLocal)
        .build()
}

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

/// Loads the requested candidates, or discovers approved ones targeting base.
pub struct FetchCandidates {
    retry: RetryConfig,
}

impl FetchCandidates {
    async fn requested<H: RemoteHost>(
        host: &H,
        requested: &[PrNumber],
    ) -> Result<Vec<CandidateChange>, ReleaseError> {
        let mut candidates = Vec::with_capacity(requested.len());
        for pr in requested {
            let candidate = host.get_candidate(*pr).await?;
            if !candidate.state.is_open() {
                return Err(ReleaseError::CandidateNotOpen {
                    candidate: *pr,
                    state: describe_state(&candidate.state).to_string(),
                });
            }
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    async fn discover<H: RemoteHost>(
        host: &H,
        base: &str,
    ) -> Result<Vec<CandidateChange>, ReleaseError> {
        let mut open = host.list_candidates(base).await?;
        open.sort_by_key(|c| c.number);

        let mut approved = Vec::new();
        for candidate in open {
            let reviews = host.list_reviews(candidate.number).await?;
            if approval_status(&reviews).is_approved() {
                approved.push(candidate);
            } else {
                tracing::debug!(pr = %candidate.number, "skipping unapproved candidate");
            }
        }
        Ok(approved)
    }
}

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<MergeContext<'a, V, H>> for FetchCandidates {
    fn name(&self) -> &'static str {
        "fetch_candidates"
    }

    async fn run(&self, ctx: &mut MergeContext<'a, V, H>) -> Result<(), ReleaseError> {
        let host = ctx.services.host;
        let candidates = if ctx.requested.is_empty() {
            Self::discover(host, ctx.services.base_branch()).await?
        } else {
            Self::requested(host, &ctx.requested).await?
        };
        if candidates.is_empty() {
            return Err(ReleaseError::NoCandidates);
        }
        tracing::info!(
            count = candidates.len(),
            discovered = ctx.requested.is_empty(),
            "candidates selected"
        );
        ctx.candidates = candidates;
        Ok(())
    }

    fn on_self_failure(&self, error: &ReleaseError, attempt: u32) -> SelfFailurePolicy {
        retry_transient(&self.retry, error, attempt)
    }
}

pub struct ValidateCandidates {
    retry: RetryConfig,
}

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<MergeContext<'a, V, H>> for ValidateCandidates {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn run(&self, ctx: &mut MergeContext<'a, V, H>) -> Result<(), ReleaseError> {
        let candidates = ctx.candidates.clone();
        ctx.candidates =
            validation::validate(ctx.services.host, candidates, ctx.options.skip).await?;
        Ok(())
    }

    fn on_self_failure(&self, error: &ReleaseError, attempt: u32) -> SelfFailurePolicy {
        retry_transient(&self.retry, error, attempt)
    }
}

/// Retargets every candidate at the integration branch.
pub struct ChangeBases;

impl ChangeBases {
    pub const NAME: &'static str = "change_bases";

    /// Retargets `retargeted` back to their previous bases, newest first.
    /// Keeps going past failures, moving each failed pair to `unrestored`.
    async fn restore<H: RemoteHost>(
        host: &H,
        retargeted: &mut Vec<(PrNumber, String)>,
        unrestored: &mut Vec<(PrNumber, String)>,
    ) -> Result<(), ReleaseError> {
        let mut failures = Vec::new();
        while let Some((pr, previous)) = retargeted.pop() {
            match host.retarget(pr, &previous).await {
                Ok(()) => tracing::info!(pr = %pr, base = %previous, "restored base"),
                Err(e) => {
                    tracing::warn!(pr = %pr, base = %previous, error = %e, "could not restore base");
                    failures.push(format!("{} -> {}: {}", pr, previous, e));
                    unrestored.push((pr, previous));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ReleaseError::CompensationFailure(format!(
                "could not restore bases: {}",
                failures.join("; ")
            )))
        }
    }
}

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<MergeContext<'a, V, H>> for ChangeBases {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, ctx: &mut MergeContext<'a, V, H>) -> Result<(), ReleaseError> {
        let host = ctx.services.host;
        let branch = ctx.key.branch_name().to_string();

        for index in 0..ctx.candidates.len() {
            let candidate = &ctx.candidates[index];
            if candidate.targets(&branch) {
                continue;
            }
            let pr = candidate.number;
            let previous = candidate.base_ref.clone();

            if let Err(e) = host.retarget(pr, &branch).await {
                tracing::warn!(pr = %pr, error = %e, "retarget failed; restoring earlier candidates");
                if let Err(restore) =
                    Self::restore(host, &mut ctx.retargeted, &mut ctx.unrestored).await
                {
                    tracing::warn!(error = %restore, "partial retarget rollback failed");
                }
                return Err(e.into());
            }
            tracing::info!(pr = %pr, from = %previous, to = %branch, "retargeted candidate");
            ctx.retargeted.push((pr, previous));
            ctx.candidates[index].base_ref = branch.clone();
        }
        Ok(())
    }

    fn has_undo(&self) -> bool {
        true
    }

    async fn undo(&self, ctx: &mut MergeContext<'a, V, H>) -> Result<(), ReleaseError> {
        Self::restore(ctx.services.host, &mut ctx.retargeted, &mut ctx.unrestored).await
    }
}

/// Merges the batch. Crossing this step cannot be undone.
pub struct SequentialMerge;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<MergeContext<'a, V, H>> for SequentialMerge {
    fn name(&self) -> &'static str {
        "sequential_merge"
    }

    async fn run(&self, ctx: &mut MergeContext<'a, V, H>) -> Result<(), ReleaseError> {
        let services = ctx.services;
        let engine = MergeEngine::new(services.host, services.config.polling, services.events)
            .skip_conflicts(ctx.options.skip.conflicts);

        match engine.merge_all(&ctx.candidates, ctx.already_merged).await {
            Ok(records) => {
                ctx.merged.extend(records);
                Ok(())
            }
            Err(failure) => {
                ctx.merged.extend(failure.merged.iter().cloned());
                if !failure.merged.is_empty() {
                    tracing::warn!(
                        branch = ctx.branch(),
                        merged = failure.merged.len(),
                        "merge failed past the point of no return; resume or abandon the branch"
                    );
                }
                Err(failure.into_error())
            }
        }
    }
}

/// Brings the working copy to the integration branch's new tip.
pub struct SyncLocal;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<MergeContext<'a, V, H>> for SyncLocal {
    fn name(&self) -> &'static str {
        "sync_local"
    }

    async fn run(&self, ctx: &mut MergeContext<'a, V, H>) -> Result<(), ReleaseError> {
        let ws = ctx.services.workspace(&ctx.workdir);
        ws.fetch(ctx.branch())?;
        ws.reset_hard(&format!("origin/{}", ctx.branch()))?;
        ctx.tip = Some(ws.rev_parse("HEAD")?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PollSettings, ReleaseConfig};
    use crate::events::NoopSink;
    use crate::host::HostError;
    use crate::test_utils::{MockHost, MockVcs, open_candidate, review};
    use crate::types::{Mergeability, RepoId, ReviewState, SkipChecks};
    use crate::vcs::Credential;

    const KEY: &str = "release-20260218";

    fn config() -> ReleaseConfig {
        ReleaseConfig::new(RepoId::new("acme", "widgets"), Credential::new("t"))
            .with_polling(PollSettings::immediate())
            .with_step_retry(RetryConfig::new(
                2,
                std::time::Duration::ZERO,
                std::time::Duration::ZERO,
                2.0,
            ))
    }

    fn approved(host: &MockHost, numbers: &[u64]) {
        for n in numbers {
            host.add_candidate(open_candidate(*n, "main"));
            host.set_reviews(*n, vec![review("alice", ReviewState::Approved, 1)]);
        }
    }

    fn context<'a>(
        vcs: &'a MockVcs,
        host: &'a MockHost,
        config: &'a ReleaseConfig,
        requested: &[u64],
    ) -> MergeContext<'a, MockVcs, MockHost> {
        let services = Services {
            vcs,
            host,
            config,
            events: &NoopSink,
        };
        MergeContext::new(
            services,
            ReleaseKey::new(KEY),
            PathBuf::from("/tmp/unused"),
            RunOptions::default(),
            requested.iter().copied().map(PrNumber).collect(),
        )
    }

    #[tokio::test]
    async fn requested_batch_is_merged_in_order() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[12, 13]);
        let mut ctx = context(&vcs, &host, &config, &[13, 12]);

        merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap();

        assert_eq!(host.merge_order(), vec![PrNumber(13), PrNumber(12)]);
        assert_eq!(ctx.merged.len(), 2);
        assert_eq!(host.candidate(12).unwrap().base_ref, KEY);
        assert!(ctx.tip.is_some());
        assert!(vcs.calls().contains(&format!("reset origin/{}", KEY)));
    }

    #[tokio::test]
    async fn discovery_keeps_only_approved_candidates() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[12]);
        host.add_candidate(open_candidate(14, "main"));
        let mut ctx = context(&vcs, &host, &config, &[]);

        merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap();

        assert_eq!(host.merge_order(), vec![PrNumber(12)]);
        assert_eq!(host.candidate(14).unwrap().base_ref, "main");
    }

    #[tokio::test]
    async fn nothing_to_release_fails() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        let mut ctx = context(&vcs, &host, &config, &[]);

        let failure = merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ReleaseError::NoCandidates));
    }

    #[tokio::test]
    async fn closed_candidate_is_rejected() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[12]);
        host.set_state(12, crate::types::CandidateState::Closed);
        let mut ctx = context(&vcs, &host, &config, &[12]);

        let failure = merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            ReleaseError::CandidateNotOpen { ref state, .. } if state == "closed"
        ));
    }

    #[tokio::test]
    async fn validation_failure_stops_before_retargeting() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[12]);
        host.add_candidate(open_candidate(13, "main"));
        let mut ctx = context(&vcs, &host, &config, &[12, 13]);

        let failure = merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap_err();

        assert_eq!(failure.step, "validate");
        assert!(matches!(failure.error, ReleaseError::Validation(_)));
        assert!(host.calls().iter().all(|c| !c.starts_with("retarget")));
    }

    #[tokio::test]
    async fn transient_validation_errors_are_retried() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[12]);
        host.fail_next("list_reviews", HostError::transient_without_source("502"));
        let mut ctx = context(&vcs, &host, &config, &[12]);

        merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap();
        assert_eq!(host.count_calls("list_reviews #12"), 2);
    }

    #[tokio::test]
    async fn partial_retarget_rolls_itself_back() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[12, 13, 14]);
        host.fail_next("retarget #14", HostError::permanent_without_source("422"));
        let mut ctx = context(&vcs, &host, &config, &[12, 13, 14]);

        let failure = merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap_err();

        assert_eq!(failure.step, "change_bases");
        for n in [12, 13, 14] {
            assert_eq!(host.candidate(n).unwrap().base_ref, "main");
        }
        assert!(ctx.retargeted.is_empty());
        assert!(host.merge_order().is_empty());
    }

    #[tokio::test]
    async fn failed_self_rollback_is_remembered() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[12, 13, 14]);
        host.fail_next(
            &format!("retarget #14 {}", KEY),
            HostError::permanent_without_source("422"),
        );
        host.fail_next("retarget #12 main", HostError::transient_without_source("502"));
        let mut ctx = context(&vcs, &host, &config, &[12, 13, 14]);

        let failure = merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap_err();

        assert_eq!(failure.step, ChangeBases::NAME);
        assert_eq!(ctx.unrestored, vec![(PrNumber(12), "main".to_string())]);
        assert_eq!(host.candidate(12).unwrap().base_ref, KEY);
        assert_eq!(host.candidate(13).unwrap().base_ref, "main");
        assert_eq!(
            ctx.unrestored_summary().as_deref(),
            Some("could not restore bases: #12 -> main")
        );
    }

    #[tokio::test]
    async fn conflict_before_any_merge_restores_bases() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[12, 13]);
        host.set_mergeable(12, Mergeability::Unknown);
        let mut ctx = context(&vcs, &host, &config, &[12, 13]);

        let failure = merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap_err();

        assert!(!failure.past_point_of_no_return);
        assert!(matches!(failure.error, ReleaseError::Conflict { .. }));
        assert_eq!(failure.undone, vec!["change_bases"]);
        assert_eq!(host.candidate(12).unwrap().base_ref, "main");
        assert_eq!(host.candidate(13).unwrap().base_ref, "main");
    }

    #[tokio::test]
    async fn failure_after_a_merge_keeps_everything_in_place() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[12, 13]);
        host.set_mergeable(13, Mergeability::Conflicting);
        let mut ctx = context(&vcs, &host, &config, &[12, 13]);

        let failure = merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap_err();

        assert!(failure.past_point_of_no_return);
        assert!(failure.undone.is_empty());
        assert_eq!(failure.error.merged()[0].number, PrNumber(12));
        assert_eq!(ctx.merged.len(), 1);
        assert_eq!(host.candidate(13).unwrap().base_ref, KEY);
    }

    #[tokio::test]
    async fn candidates_already_on_the_branch_are_not_retargeted() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        host.add_candidate(open_candidate(13, KEY));
        let mut ctx = context(&vcs, &host, &config, &[13]);
        ctx.options.skip = SkipChecks::ALL;

        merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap();

        assert!(host.calls().iter().all(|c| !c.starts_with("retarget")));
        assert!(ctx.retargeted.is_empty());
    }

    #[tokio::test]
    async fn resumed_batch_updates_its_first_candidate() {
        let (vcs, host, config) = (MockVcs::new(), MockHost::new(), config());
        approved(&host, &[13]);
        let mut ctx = context(&vcs, &host, &config, &[13]).with_already_merged(1);

        merge_batch_saga(config.step_retry)
            .run(&mut ctx, &NoopSink)
            .await
            .unwrap();
        assert_eq!(host.count_calls("request_branch_update #13"), 1);
    }
}
