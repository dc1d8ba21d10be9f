//! Release Train - batch-merges approved pull requests into a dated
//! integration branch and opens a single release pull request against base.
//!
//! Every run is a sequence of sagas (Setup, MergeBatch, PublishRelease). Work
//! done before the first merge is rolled back on failure; once anything has
//! been merged the run can only be resumed, and resume works out where to
//! pick up from remote state alone.

pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod merge;
pub mod orchestrator;
pub mod resume;
pub mod saga;
pub mod types;
pub mod validation;
pub mod vcs;
pub mod version;
pub mod workflows;

#[cfg(test)]
pub mod test_utils;

pub use config::ReleaseConfig;
pub use error::{ErrorKind, ReleaseError};
pub use orchestrator::{DeployFailure, DeployReport, Orchestrator, StateSnapshot, render_failure};
