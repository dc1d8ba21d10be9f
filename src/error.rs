//! The closed error taxonomy for release runs.
//!
//! Steps return [`ReleaseError`]; only the saga engine decides whether to stop
//! and unwind. [`ErrorKind`] is the coarse bucket callers branch on.

use std::path::PathBuf;

use thiserror::Error;

use crate::host::{HostError, HostErrorKind};
use crate::types::{MergedRecord, PrNumber};
use crate::validation::ValidationReport;
use crate::vcs::VcsError;
use crate::version::VersionError;

/// Coarse classification of a [`ReleaseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// May succeed if tried again later.
    Transient,
    /// One or more candidates are not ready.
    Validation,
    /// A candidate cannot be merged into the integration branch.
    Conflict,
    /// Some candidates were merged before the failure; rollback is impossible.
    Irreversible,
    CompensationFailure,
    /// Needs a human.
    Permanent,
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Validation(ValidationReport),

    #[error("{candidate} conflicts with the integration branch: {detail}")]
    Conflict { candidate: PrNumber, detail: String },

    #[error("{candidate} did not become mergeable after a branch update")]
    BranchUpdateTimeout { candidate: PrNumber },

    #[error("merging {failed} failed after {} candidate(s) were merged: {cause}", .merged.len())]
    Irreversible {
        merged: Vec<MergedRecord>,
        failed: PrNumber,
        #[source]
        cause: Box<ReleaseError>,
    },

    #[error("compensation failed: {0}")]
    CompensationFailure(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("no candidates to release")]
    NoCandidates,

    #[error("{candidate} is not open ({state})")]
    CandidateNotOpen { candidate: PrNumber, state: String },

    #[error("integration branch {branch} already exists; resume it or force a restart")]
    ReleaseInProgress { branch: String },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReleaseError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReleaseError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReleaseError::Transient(_) => ErrorKind::Transient,
            ReleaseError::Validation(_) => ErrorKind::Validation,
            ReleaseError::Conflict { .. } | ReleaseError::BranchUpdateTimeout { .. } => {
                ErrorKind::Conflict
            }
            ReleaseError::Irreversible { .. } => ErrorKind::Irreversible,
            ReleaseError::CompensationFailure(_) => ErrorKind::CompensationFailure,
            ReleaseError::Host(e) => match e.kind {
                HostErrorKind::Transient => ErrorKind::Transient,
                // The head moved under us; re-reading on resume fixes it.
                HostErrorKind::ShaMismatch => ErrorKind::Transient,
                HostErrorKind::Permanent => ErrorKind::Permanent,
            },
            ReleaseError::Vcs(_)
            | ReleaseError::Version(_)
            | ReleaseError::NoCandidates
            | ReleaseError::CandidateNotOpen { .. }
            | ReleaseError::ReleaseInProgress { .. }
            | ReleaseError::Io { .. } => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// True if the failure happened after at least one merge, so the saga must
    /// not compensate.
    pub fn is_past_point_of_no_return(&self) -> bool {
        matches!(self, ReleaseError::Irreversible { .. })
    }

    /// Candidates merged before this error, if any.
    pub fn merged(&self) -> &[MergedRecord] {
        match self {
            ReleaseError::Irreversible { merged, .. } => merged,
            _ => &[],
        }
    }
}
