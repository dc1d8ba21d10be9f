//! Release run types: what was asked for, and how far it has got.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{PrNumber, ReleaseKey};

/// Which readiness checks to bypass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipChecks {
    /// Skip the approval check.
    pub reviews: bool,
    /// Skip the CI check.
    pub ci: bool,
    /// Skip the pre-merge mergeability poll.
    pub conflicts: bool,
}

impl SkipChecks {
    /// Nothing skipped.
    pub const NONE: Self = Self {
        reviews: false,
        ci: false,
        conflicts: false,
    };

    /// Everything skipped; validation is bypassed entirely.
    pub const ALL: Self = Self {
        reviews: true,
        ci: true,
        conflicts: true,
    };

    pub fn is_all(&self) -> bool {
        self.reviews && self.ci && self.conflicts
    }
}

/// Run-scoped options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub skip: SkipChecks,
    /// Logins to request review of the release PR from. Empty = no request.
    pub reviewers: Vec<String>,
    /// Overrides the date-derived release key.
    pub release_key: Option<ReleaseKey>,
    /// Keep the working directory after the run ends.
    pub keep_workspace: bool,
}

/// One release attempt. Immutable once started and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRun {
    pub key: ReleaseKey,
    /// Requested candidates in merge order. Empty means "discover".
    pub requested: Vec<PrNumber>,
    pub options: RunOptions,
}

impl ReleaseRun {
    pub fn new(key: ReleaseKey, requested: Vec<PrNumber>, options: RunOptions) -> Self {
        ReleaseRun {
            key,
            requested,
            options,
        }
    }

    pub fn branch(&self) -> &str {
        self.key.branch_name()
    }
}

/// How the orchestrator treats existing remote state for a release key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Start a new release; refuse if the integration branch exists.
    Fresh,
    /// Continue from whatever the remote host shows.
    Resume,
    /// Abandon the existing integration branch and start over.
    Force,
}

/// Resume flavour accepted by the public `resume` operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    #[default]
    Soft,
    Force,
}

impl From<ResumeMode> for RunMode {
    fn from(mode: ResumeMode) -> Self {
        match mode {
            ResumeMode::Soft => RunMode::Resume,
            ResumeMode::Force => RunMode::Force,
        }
    }
}

/// How far a release has progressed, derived from remote state only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePoint {
    /// No integration branch: start from the beginning.
    Setup,
    /// Branch exists, nothing verified-merged yet.
    ChangeBases,
    /// Some requested candidates are merged, some are not.
    MergeRemaining,
    /// Every requested candidate is merged; no release PR yet.
    CreateRelease,
    /// A release PR already exists.
    Done,
}

impl fmt::Display for ResumePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResumePoint::Setup => "setup",
            ResumePoint::ChangeBases => "change-bases",
            ResumePoint::MergeRemaining => "merge-remaining",
            ResumePoint::CreateRelease => "create-release",
            ResumePoint::Done => "done",
        };
        f.write_str(s)
    }
}

/// One of the three sagas a release is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    MergeBatch,
    PublishRelease,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Setup => "setup",
            Phase::MergeBatch => "merge-batch",
            Phase::PublishRelease => "publish-release",
        };
        f.write_str(s)
    }
}
