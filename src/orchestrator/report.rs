//! What a run hands back to its caller, and how failures are rendered.

use std::fmt;

use serde::Serialize;

use crate::error::{ErrorKind, ReleaseError};
use crate::saga::CompensationFailure;
use crate::types::{MergedRecord, Phase, PrNumber, ReleaseKey, ResumePoint};
use crate::version::Version;

/// A completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub key: ReleaseKey,
    /// Where the run picked up.
    pub started_at: ResumePoint,
    /// Every candidate in the release, in merge order.
    pub merged: Vec<MergedRecord>,
    pub release_request: Option<PrNumber>,
    pub version: Option<Version>,
}

impl fmt::Display for DeployReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "release {} ", self.key)?;
        match self.release_request {
            Some(pr) => write!(f, "is open as {}", pr)?,
            None => f.write_str("has no release pull request")?,
        }
        if let Some(v) = self.version {
            write!(f, " (v{})", v)?;
        }
        writeln!(f, "; started at {}", self.started_at)?;
        for record in &self.merged {
            writeln!(
                f,
                "  {} {} ({})",
                record.number,
                record.title,
                record.merge_commit_sha.short()
            )?;
        }
        Ok(())
    }
}

/// A run that stopped.
#[derive(Debug)]
pub struct DeployFailure {
    pub key: ReleaseKey,
    pub phase: Phase,
    pub error: ReleaseError,
    /// Steps rolled back, in the order they were undone.
    pub undone: Vec<&'static str>,
    pub compensation_failures: Vec<CompensationFailure>,
    /// Everything merged into the integration branch so far, in merge order.
    pub merged: Vec<MergedRecord>,
}

impl DeployFailure {
    pub(crate) fn before_any_phase(key: ReleaseKey, error: ReleaseError) -> Self {
        DeployFailure {
            key,
            phase: Phase::Setup,
            error,
            undone: Vec::new(),
            compensation_failures: Vec::new(),
            merged: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// True once anything is merged; the branch can only be resumed or
    /// abandoned from here.
    pub fn past_point_of_no_return(&self) -> bool {
        !self.merged.is_empty() || self.error.is_past_point_of_no_return()
    }
}

impl fmt::Display for DeployFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_failure(self))
    }
}

impl std::error::Error for DeployFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// The user-facing account of a failed run.
pub fn render_failure(failure: &DeployFailure) -> String {
    let mut out = format!(
        "release {} failed during {}: {}\n",
        failure.key, failure.phase, failure.error
    );

    if !failure.undone.is_empty() {
        out.push_str(&format!("rolled back: {}\n", failure.undone.join(", ")));
    }

    if !failure.compensation_failures.is_empty() {
        out.push_str("could not roll back:\n");
        for cf in &failure.compensation_failures {
            out.push_str(&format!("  {}: {}\n", cf.step, cf.error));
        }
    }

    if failure.past_point_of_no_return() {
        out.push_str("already merged into the integration branch:\n");
        for record in &failure.merged {
            out.push_str(&format!("  {} {}\n", record.number, record.title));
        }
        out.push_str(&format!(
            "merges cannot be undone; resume release {} or abandon branch {} by hand\n",
            failure.key,
            failure.key.branch_name()
        ));
    } else if failure.kind() == ErrorKind::Transient {
        out.push_str("the failure looks temporary; retrying may succeed\n");
    }

    out
}

/// What the remote host shows for one release key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub key: ReleaseKey,
    pub exists: bool,
    pub point: ResumePoint,
    pub merged: Vec<MergedRecord>,
    pub release_request: Option<PrNumber>,
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.exists {
            return writeln!(f, "release {}: no integration branch", self.key);
        }
        writeln!(f, "release {}: {}", self.key, self.point)?;
        for record in &self.merged {
            writeln!(f, "  merged {} {}", record.number, record.title)?;
        }
        if let Some(pr) = self.release_request {
            writeln!(f, "  release pull request {}", pr)?;
        }
        Ok(())
    }
}
