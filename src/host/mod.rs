//! The remote code host: pull requests, reviews, CI, and remote branches.
//!
//! [`RemoteHost`] is the seam the workflows are written against.
//! [`OctocrabClient`] implements it for GitHub; tests use an in-memory mock.
//!
//! Read-only methods retry transient failures internally. Mutating methods
//! never do.

mod client;
mod error;
mod github;
mod retry;

use std::future::Future;

pub use client::OctocrabClient;
pub use error::{HostError, HostErrorKind};
pub use retry::{RetryConfig, RetryPolicy, retry_with_backoff};

use crate::types::{CandidateChange, CheckRun, CompareStatus, PrNumber, Review, Sha};

pub type HostResult<T> = Result<T, HostError>;

/// A request to open a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

/// Operations against the remote code host, scoped to one repository.
pub trait RemoteHost: Send + Sync {
    // ─── Reads ──────────────────────────────────────────────────────────────

    /// Fetches one pull request, including its mergeability flag.
    fn get_candidate(
        &self,
        pr: PrNumber,
    ) -> impl Future<Output = HostResult<CandidateChange>> + Send;

    /// Lists open pull requests targeting `base`.
    fn list_candidates(
        &self,
        base: &str,
    ) -> impl Future<Output = HostResult<Vec<CandidateChange>>> + Send;

    /// Lists merged pull requests whose base is `branch`, in any order.
    fn list_merged_targeting(
        &self,
        branch: &str,
    ) -> impl Future<Output = HostResult<Vec<CandidateChange>>> + Send;

    /// Finds an open pull request from `head` into `base`.
    fn find_open(
        &self,
        head: &str,
        base: &str,
    ) -> impl Future<Output = HostResult<Option<CandidateChange>>> + Send;

    fn list_reviews(&self, pr: PrNumber) -> impl Future<Output = HostResult<Vec<Review>>> + Send;

    /// CI check runs reported for a commit or branch ref.
    fn get_ci_checks(
        &self,
        git_ref: &str,
    ) -> impl Future<Output = HostResult<Vec<CheckRun>>> + Send;

    fn branch_exists(&self, branch: &str) -> impl Future<Output = HostResult<bool>> + Send;

    /// Compares `base...head`.
    fn compare(
        &self,
        base: &str,
        head: &str,
    ) -> impl Future<Output = HostResult<CompareStatus>> + Send;

    // ─── Writes ─────────────────────────────────────────────────────────────

    /// Changes the branch a pull request targets.
    fn retarget(
        &self,
        pr: PrNumber,
        new_base: &str,
    ) -> impl Future<Output = HostResult<()>> + Send;

    /// Asks the host to bring the PR's source branch up to date with its base.
    fn request_branch_update(&self, pr: PrNumber) -> impl Future<Output = HostResult<()>> + Send;

    /// Squash-merges a pull request, refusing if its head is no longer
    /// `expected_head`. Returns the merge commit.
    fn merge(
        &self,
        pr: PrNumber,
        expected_head: &Sha,
    ) -> impl Future<Output = HostResult<Sha>> + Send;

    fn open_pull_request(
        &self,
        request: &NewPullRequest,
    ) -> impl Future<Output = HostResult<PrNumber>> + Send;

    fn set_description(
        &self,
        pr: PrNumber,
        body: &str,
    ) -> impl Future<Output = HostResult<()>> + Send;

    fn request_review(
        &self,
        pr: PrNumber,
        reviewers: &[String],
    ) -> impl Future<Output = HostResult<()>> + Send;

    fn close_pull_request(&self, pr: PrNumber) -> impl Future<Output = HostResult<()>> + Send;

    /// Deletes a remote branch. An absent branch yields a not-found error.
    fn delete_branch(&self, branch: &str) -> impl Future<Output = HostResult<()>> + Send;
}
