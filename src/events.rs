//! Progress notifications.
//!
//! The orchestrator and saga engine report what they are doing through an
//! [`EventSink`]. Dashboards and chat notifiers live outside this crate and
//! plug in here; the default sink discards everything.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{Phase, PrNumber, ReleaseKey, Sha};

/// Something that happened during a release run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReleaseEvent {
    PhaseStarted {
        key: ReleaseKey,
        phase: Phase,
    },
    PhaseSucceeded {
        key: ReleaseKey,
        phase: Phase,
    },
    PhaseFailed {
        key: ReleaseKey,
        phase: Phase,
        error: String,
    },
    StepStarted {
        step: String,
    },
    StepSucceeded {
        step: String,
    },
    StepFailed {
        step: String,
        error: String,
        attempt: u32,
    },
    StepUndone {
        step: String,
    },
    UndoFailed {
        step: String,
        error: String,
    },
    CandidateMerged {
        candidate: PrNumber,
        merge_commit_sha: Sha,
    },
}

/// Receives release events. Must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ReleaseEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: ReleaseEvent) {
        (**self).emit(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: ReleaseEvent) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ReleaseEvent) {
        match event {
            ReleaseEvent::PhaseStarted { key, phase } => {
                tracing::info!(key = %key, %phase, "phase started")
            }
            ReleaseEvent::PhaseSucceeded { key, phase } => {
                tracing::info!(key = %key, %phase, "phase succeeded")
            }
            ReleaseEvent::PhaseFailed { key, phase, error } => {
                tracing::warn!(key = %key, %phase, %error, "phase failed")
            }
            ReleaseEvent::StepStarted { step } => tracing::debug!(%step, "step started"),
            ReleaseEvent::StepSucceeded { step } => tracing::info!(%step, "step succeeded"),
            ReleaseEvent::StepFailed {
                step,
                error,
                attempt,
            } => tracing::warn!(%step, %error, attempt, "step failed"),
            ReleaseEvent::StepUndone { step } => tracing::info!(%step, "step undone"),
            ReleaseEvent::UndoFailed { step, error } => {
                tracing::warn!(%step, %error, "undo failed")
            }
            ReleaseEvent::CandidateMerged {
                candidate,
                merge_commit_sha,
            } => tracing::info!(pr = %candidate, sha = %merge_commit_sha.short(), "candidate merged"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = ReleaseEvent::PhaseStarted {
            key: ReleaseKey::new("release-20260218"),
            phase: Phase::MergeBatch,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "phase_started");
        assert_eq!(json["phase"], "merge_batch");
        assert_eq!(json["key"], "release-20260218");
    }

    #[test]
    fn sinks_accept_events() {
        let event = ReleaseEvent::StepUndone {
            step: "push_branch".to_string(),
        };
        NoopSink.emit(event.clone());
        TracingSink.emit(event);
    }
}
