//! Core domain types for the release orchestrator.
//!
//! This module contains the fundamental types used throughout the crate,
//! designed to encode invariants via the type system.

pub mod candidate;
pub mod ids;
pub mod release;

pub use candidate::{
    CandidateChange, CandidateState, CheckRun, CheckStatus, CompareStatus, MergedRecord,
    Mergeability, Review, ReviewState,
};
pub use ids::{InvalidSha, PrNumber, RELEASE_KEY_PREFIX, ReleaseKey, RepoId, Sha};
pub use release::{Phase, ReleaseRun, ResumeMode, ResumePoint, RunMode, RunOptions, SkipChecks};
