//! The release orchestrator: `deploy`, `resume` and `check_state`.
//!
//! A run works out where to start from remote state, then drives the Setup,
//! MergeBatch and PublishRelease sagas in order, skipping whatever an earlier
//! run already finished. The working copy is removed when the run ends.

mod report;


use tracing::instrument;

pub use report::{DeployFailure, DeployReport, StateSnapshot, render_failure};

use crate::config::ReleaseConfig;
use crate::error::ReleaseError;
use crate::events::{EventSink, NoopSink, ReleaseEvent};
use crate::host::RemoteHost;
use crate::resume::{self, RemoteProgress, ResumePlan};
use crate::saga::{CompensationFailure, Saga, SagaFailure};
use crate::types::{
    MergedRecord, Phase, PrNumber, ReleaseKey, ReleaseRun, ResumeMode, ResumePoint, RunMode,
    RunOptions,
};
use crate::vcs::LocalVcs;
use crate::workflows::merge_batch::ChangeBases;
use crate::workflows::setup::remove_workspace;
use crate::workflows::{
    MergeContext, PublishContext, Services, SetupContext, SetupMode, delete_remote_branch,
    merge_batch_saga, publish_saga, setup_saga,
};

/// Name recorded when a failed fresh run removes the branch it created.
const TEARDOWN_STEP: &str = "teardown_integration_branch";

/// Runs releases for one repository.
pub struct Orchestrator<V: LocalVcs, H: RemoteHost> {
    config: ReleaseConfig,
    vcs: V,
    host: H,
    events: Box<dyn EventSink>,
}

impl<V: LocalVcs, H: RemoteHost> Orchestrator<V, H> {
    pub fn new(config: ReleaseConfig, vcs: V, host: H) -> Self {
        Orchestrator {
            config,
            vcs,
            host,
            events: Box::new(NoopSink),
        }
    }

    pub fn with_events(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Box::new(sink);
        self
    }

    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    /// Starts a new release. Refuses if the integration branch already exists.
    #[instrument(skip(self, options))]
    pub async fn deploy(
        &self,
        candidates: Vec<PrNumber>,
        options: RunOptions,
    ) -> Result<DeployReport, DeployFailure> {
        self.run(release_run(candidates, options), RunMode::Fresh)
            .await
    }

    /// Continues a release from whatever the remote host shows, or with
    /// [`ResumeMode::Force`] throws the integration branch away and restarts.
    #[instrument(skip(self, options))]
    pub async fn resume(
        &self,
        candidates: Vec<PrNumber>,
        options: RunOptions,
        mode: ResumeMode,
    ) -> Result<DeployReport, DeployFailure> {
        self.run(release_run(candidates, options), mode.into()).await
    }

    /// Reports progress for `key` without changing anything.
    #[instrument(skip(self))]
    pub async fn check_state(&self, key: &ReleaseKey) -> Result<StateSnapshot, ReleaseError> {
        let progress = resume::inspect(&self.host, key, &self.config.base_branch).await?;
        let point = resume::classify(&[], &progress);
        let RemoteProgress {
            branch_exists,
            verified,
            release_request,
        } = progress;
        Ok(StateSnapshot {
            key: key.clone(),
            exists: branch_exists,
            point,
            merged: verified,
            release_request,
        })
    }

    fn services(&self) -> Services<'_, V, H> {
        Services {
            vcs: &self.vcs,
            host: &self.host,
            config: &self.config,
            events: self.events.as_ref(),
        }
    }

    #[instrument(skip_all, fields(key = %run.key, ?mode))]
    async fn run(&self, run: ReleaseRun, mode: RunMode) -> Result<DeployReport, DeployFailure> {
        let result = self.run_phases(&run, mode).await;

        if !run.options.keep_workspace {
            let dir = self.config.workspace_dir(run.key.as_str());
            if let Err(e) = remove_workspace(&dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "could not remove working directory");
            }
        }

        match &result {
            Ok(report) => tracing::info!(
                merged = report.merged.len(),
                release_request = ?report.release_request,
                "release run finished"
            ),
            Err(failure) => tracing::warn!(
                phase = %failure.phase,
                past_point_of_no_return = failure.past_point_of_no_return(),
                error = %failure.error,
                "release run failed"
            ),
        }
        result
    }

    async fn plan(&self, run: &ReleaseRun, mode: RunMode) -> Result<ResumePlan, ReleaseError> {
        if mode != RunMode::Fresh {
            return resume::reconstruct(
                &self.host,
                &run.key,
                &self.config.base_branch,
                &run.requested,
                mode,
            )
            .await;
        }

        if self.host.branch_exists(run.branch()).await? {
            return Err(ReleaseError::ReleaseInProgress {
                branch: run.branch().to_string(),
            });
        }
        Ok(ResumePlan {
            point: ResumePoint::Setup,
            progress: RemoteProgress::default(),
            remaining: run.requested.clone(),
        })
    }

    async fn run_phases(&self, run: &ReleaseRun, mode: RunMode) -> Result<DeployReport, DeployFailure> {
        let key = run.key.clone();
        let plan = self
            .plan(run, mode)
            .await
            .map_err(|e| DeployFailure::before_any_phase(key.clone(), e))?;
        let started_at = plan.point;
        let mut merged = plan.progress.verified;

        if started_at == ResumePoint::Done {
            tracing::info!(release_request = ?plan.progress.release_request, "release already published");
            return Ok(DeployReport {
                key,
                started_at,
                merged,
                release_request: plan.progress.release_request,
                version: None,
            });
        }

        let services = self.services();

        // ─── Setup ──────────────────────────────────────────────────────────
        let setup_mode = if started_at == ResumePoint::Setup {
            SetupMode::Create
        } else {
            SetupMode::Attach
        };
        let mut setup = SetupContext::new(services, key.clone());
        self.run_phase(&key, Phase::Setup, setup_saga(setup_mode), &mut setup)
            .await
            .map_err(|f| failure(&key, Phase::Setup, f, merged.clone()))?;
        let workdir = setup.workdir;

        // ─── MergeBatch ─────────────────────────────────────────────────────
        if matches!(
            started_at,
            ResumePoint::Setup | ResumePoint::ChangeBases | ResumePoint::MergeRemaining
        ) {
            let mut batch = MergeContext::new(
                services,
                key.clone(),
                workdir.clone(),
                run.options.clone(),
                plan.remaining,
            )
            .with_already_merged(merged.len());

            let outcome = self
                .run_phase(
                    &key,
                    Phase::MergeBatch,
                    merge_batch_saga(self.config.step_retry),
                    &mut batch,
                )
                .await;
            let unrestored = batch.unrestored_summary();
            merged.extend(batch.merged);

            if let Err(f) = outcome {
                let mut failure = failure(&key, Phase::MergeBatch, f, merged);
                // A rollback that failed inside ChangeBases itself never
                // reaches the saga's compensation list.
                if let Some(error) = unrestored
                    && !failure
                        .compensation_failures
                        .iter()
                        .any(|cf| cf.step == ChangeBases::NAME)
                {
                    failure.compensation_failures.push(CompensationFailure {
                        step: ChangeBases::NAME,
                        error,
                    });
                }

                if setup_mode == SetupMode::Create && !failure.past_point_of_no_return() {
                    if failure.compensation_failures.is_empty() {
                        self.teardown(&key, &mut failure).await;
                    } else {
                        tracing::warn!(
                            branch = key.branch_name(),
                            "keeping integration branch; some candidates may still target it"
                        );
                    }
                }
                return Err(failure);
            }
        }

        // ─── PublishRelease ─────────────────────────────────────────────────
        let mut publish = PublishContext::new(
            services,
            key.clone(),
            workdir,
            run.options.reviewers.clone(),
            merged.clone(),
        );
        self.run_phase(&key, Phase::PublishRelease, publish_saga(), &mut publish)
            .await
            .map_err(|f| failure(&key, Phase::PublishRelease, f, merged.clone()))?;

        Ok(DeployReport {
            key,
            started_at,
            merged,
            release_request: publish.release_request,
            version: publish.version,
        })
    }

    async fn run_phase<C: Send>(
        &self,
        key: &ReleaseKey,
        phase: Phase,
        saga: Saga<C>,
        ctx: &mut C,
    ) -> Result<(), SagaFailure> {
        let events = self.events.as_ref();
        events.emit(ReleaseEvent::PhaseStarted {
            key: key.clone(),
            phase,
        });
        match saga.run(ctx, events).await {
            Ok(report) => {
                tracing::debug!(%phase, steps = report.records.len(), "phase complete");
                events.emit(ReleaseEvent::PhaseSucceeded {
                    key: key.clone(),
                    phase,
                });
                Ok(())
            }
            Err(f) => {
                events.emit(ReleaseEvent::PhaseFailed {
                    key: key.clone(),
                    phase,
                    error: f.error.to_string(),
                });
                Err(f)
            }
        }
    }

    /// Removes the integration branch a fresh run pushed, once the batch has
    /// failed without merging anything and every base was restored.
    async fn teardown(&self, key: &ReleaseKey, failure: &mut DeployFailure) {
        match delete_remote_branch(&self.host, key.branch_name()).await {
            Ok(()) => {
                tracing::info!(branch = key.branch_name(), "removed integration branch");
                failure.undone.push(TEARDOWN_STEP);
            }
            Err(e) => {
                tracing::warn!(branch = key.branch_name(), error = %e, "could not remove integration branch");
                failure.compensation_failures.push(CompensationFailure {
                    step: TEARDOWN_STEP,
                    error: e.to_string(),
                });
            }
        }
    }
}

fn release_run(candidates: Vec<PrNumber>, options: RunOptions) -> ReleaseRun {
    let key = options
        .release_key
        .clone()
        .unwrap_or_else(ReleaseKey::today);
    ReleaseRun::new(key, candidates, options)
}

fn failure(
    key: &ReleaseKey,
    phase: Phase,
    f: SagaFailure,
    merged: Vec<MergedRecord>,
) -> DeployFailure {
    DeployFailure {
        key: key.clone(),
        phase,
        error: f.error,
        undone: f.undone,
        compensation_failures: f.compensation_failures,
        merged,
    }
}
