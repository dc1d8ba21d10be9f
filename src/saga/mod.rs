//! Saga engine: ordered steps with reverse-order compensation.
//!
//! # Semantics
//!
//! 1. Steps run strictly in order, one at a time, over a shared context.
//! 2. A failing step may ask to be retried (its own policy). Once it gives
//!    up, every previously completed step that registered an `undo` is undone,
//!    newest first, exactly once. Undo failures are recorded and the unwind
//!    continues.
//! 3. Steps at or after the point of no return never register an `undo`.
//!    Once such a step has completed, or when the error itself says an
//!    irreversible action happened, nothing is unwound at all.

pub mod engine;
pub mod step;


pub use engine::{
    CompensationFailure, Saga, SagaBuilder, SagaFailure, SagaReport, StepOutcome, StepRecord,
};
pub use step::{SelfFailurePolicy, Step};
