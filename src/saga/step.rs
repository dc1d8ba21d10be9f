//! The unit of work a saga is built from.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ReleaseError;

/// What a step wants done about its own failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfFailurePolicy {
    /// Run the step again after the delay.
    Retry { after: Duration },
    /// Let the saga fail and unwind.
    GiveUp,
}

/// One step of a saga over context `C`.
///
/// Steps read their inputs from the context and write their outputs back into
/// it. `undo` is compensation: the engine calls it only when a *later* step
/// fails, never for the step's own failure. A step that fails partway through
/// is responsible for cleaning up its own partial work before returning.
#[async_trait]
pub trait Step<C: Send>: Send + Sync {
    /// Stable identifier used in reports and events.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut C) -> Result<(), ReleaseError>;

    /// Whether [`undo`](Step::undo) does anything. Steps that report `false`
    /// are skipped during unwind.
    fn has_undo(&self) -> bool {
        false
    }

    async fn undo(&self, _ctx: &mut C) -> Result<(), ReleaseError> {
        Ok(())
    }

    /// Called after each failed attempt (`attempt` starts at 1).
    fn on_self_failure(&self, _error: &ReleaseError, _attempt: u32) -> SelfFailurePolicy {
        SelfFailurePolicy::GiveUp
    }
}
