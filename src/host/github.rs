//! [`RemoteHost`] for GitHub, via octocrab.
//!
//! Pull request reads use octocrab's typed builders. Everything else goes
//! through raw REST routes with small response structs, which keeps us
//! independent of how completely octocrab models each endpoint.

use chrono::{DateTime, Utc};
use octocrab::models::IssueState;
use octocrab::models::pulls::PullRequest;
use serde::{Deserialize, Serialize};

use super::client::OctocrabClient;
use super::error::HostError;
use super::retry::{RetryPolicy, retry_with_backoff};
use super::{HostResult, NewPullRequest, RemoteHost};
use crate::types::{
    CandidateChange, CandidateState, CheckRun, CheckStatus, CompareStatus, Mergeability, PrNumber,
    Review, ReviewState, Sha,
};

const PER_PAGE: u8 = 100;

/// Upper bound on pages fetched by any list call.
const MAX_PAGES: u32 = 10;

// ─── Response Types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MergeResponse {
    sha: String,
    merged: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    user: Option<UserResponse>,
    state: String,
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CheckRunsResponse {
    total_count: u64,
    check_runs: Vec<CheckRunResponse>,
}

#[derive(Debug, Deserialize)]
struct CheckRunResponse {
    name: String,
    status: String,
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPull {
    number: u64,
}

#[derive(Serialize)]
struct PageParams {
    per_page: u8,
    page: u32,
}

// ─── Conversions ──────────────────────────────────────────────────────────────

fn parse_sha(raw: &str, what: &str) -> HostResult<Sha> {
    Sha::parse(raw)
        .map_err(|e| HostError::permanent_without_source(format!("invalid {}: {}", what, e)))
}

/// Converts an octocrab pull request into a candidate.
///
/// A merged PR whose merge commit is not yet visible is a transient error: the
/// host fills `merge_commit_sha` in shortly after the merge.
fn to_candidate(pull: PullRequest) -> HostResult<CandidateChange> {
    let number = PrNumber(pull.number);
    let state = match pull.merged_at {
        Some(merged_at) => {
            let raw = pull.merge_commit_sha.as_deref().ok_or_else(|| {
                HostError::transient_without_source(format!(
                    "PR {} is merged but merge_commit_sha is not yet available",
                    number
                ))
            })?;
            CandidateState::Merged {
                merge_commit_sha: parse_sha(raw, "merge commit SHA")?,
                merged_at: Some(merged_at),
            }
        }
        None if pull.state == Some(IssueState::Closed) => CandidateState::Closed,
        None => CandidateState::Open,
    };

    Ok(CandidateChange {
        number,
        title: pull.title.unwrap_or_default(),
        head_sha: parse_sha(&pull.head.sha, "head SHA")?,
        head_ref: pull.head.ref_field,
        base_ref: pull.base.ref_field,
        state,
        mergeable: Mergeability::from(pull.mergeable),
    })
}

/// GitHub reports a moved head on a guarded merge with this message.
pub(super) fn is_sha_mismatch_error(err_str: &str) -> bool {
    err_str.to_lowercase().contains("head branch was modified")
}

/// Which pull requests a list call wants.
#[derive(Clone, Copy)]
enum PullFilter<'a> {
    OpenInto(&'a str),
    ClosedInto(&'a str),
    OpenFrom { head: &'a str, base: &'a str },
}

// ─── Single-attempt calls ─────────────────────────────────────────────────────

async fn fetch_pull(client: &OctocrabClient, pr: PrNumber) -> HostResult<CandidateChange> {
    let pull = client
        .inner()
        .pulls(client.owner(), client.repo_name())
        .get(pr.0)
        .await
        .map_err(HostError::from_octocrab)?;
    to_candidate(pull)
}

async fn fetch_pulls(
    client: &OctocrabClient,
    filter: PullFilter<'_>,
) -> HostResult<Vec<CandidateChange>> {
    let mut all = Vec::new();

    for page in 1..=MAX_PAGES {
        let handler = client.inner().pulls(client.owner(), client.repo_name());
        let builder = handler.list().per_page(PER_PAGE).page(page);
        let builder = match filter {
            PullFilter::OpenInto(base) => builder
                .state(octocrab::params::State::Open)
                .base(base.to_string()),
            PullFilter::ClosedInto(base) => builder
                .state(octocrab::params::State::Closed)
                .base(base.to_string()),
            PullFilter::OpenFrom { head, base } => builder
                .state(octocrab::params::State::Open)
                .head(format!("{}:{}", client.owner(), head))
                .base(base.to_string()),
        };
        let items = builder
            .send()
            .await
            .map_err(HostError::from_octocrab)?
            .items;
        let is_last_page = items.len() < PER_PAGE as usize;

        for pull in items {
            if matches!(filter, PullFilter::ClosedInto(_)) && pull.merged_at.is_none() {
                continue;
            }
            all.push(to_candidate(pull)?);
        }

        if is_last_page {
            return Ok(all);
        }
    }

    tracing::warn!(
        pages = MAX_PAGES,
        found = all.len(),
        "hit pagination limit listing pull requests; results may be incomplete"
    );
    Ok(all)
}

async fn fetch_reviews(client: &OctocrabClient, pr: PrNumber) -> HostResult<Vec<Review>> {
    let url = client.route(&format!("pulls/{}/reviews", pr.0));
    let mut reviews = Vec::new();

    for page in 1..=MAX_PAGES {
        let params = PageParams {
            per_page: PER_PAGE,
            page,
        };
        let items: Vec<ReviewResponse> = client
            .inner()
            .get(&url, Some(&params))
            .await
            .map_err(HostError::from_octocrab)?;
        let is_last_page = items.len() < PER_PAGE as usize;

        reviews.extend(items.into_iter().filter_map(|r| {
            Some(Review {
                reviewer: r.user?.login,
                state: ReviewState::from_api_str(&r.state),
                submitted_at: r.submitted_at,
            })
        }));

        if is_last_page {
            break;
        }
    }

    Ok(reviews)
}

async fn fetch_checks(client: &OctocrabClient, git_ref: &str) -> HostResult<Vec<CheckRun>> {
    let url = client.route(&format!(
        "commits/{}/check-runs",
        urlencoding::encode(git_ref)
    ));
    let mut runs = Vec::new();

    for page in 1..=MAX_PAGES {
        let params = PageParams {
            per_page: PER_PAGE,
            page,
        };
        let response: CheckRunsResponse = client
            .inner()
            .get(&url, Some(&params))
            .await
            .map_err(HostError::from_octocrab)?;
        let received = response.check_runs.len();

        runs.extend(response.check_runs.into_iter().map(|r| CheckRun {
            name: r.name,
            status: CheckStatus::from_api_str(&r.status),
            conclusion: r.conclusion,
        }));

        if received < PER_PAGE as usize || runs.len() as u64 >= response.total_count {
            break;
        }
    }

    Ok(runs)
}

async fn fetch_branch_exists(client: &OctocrabClient, branch: &str) -> HostResult<bool> {
    let url = client.route(&format!("branches/{}", urlencoding::encode(branch)));
    let result: Result<serde_json::Value, _> = client.inner().get(&url, None::<&()>).await;

    match result {
        Ok(_) => Ok(true),
        Err(e) => {
            let err = HostError::from_octocrab(e);
            if err.is_not_found() {
                Ok(false)
            } else {
                Err(err)
            }
        }
    }
}

async fn fetch_compare(client: &OctocrabClient, base: &str, head: &str) -> HostResult<CompareStatus> {
    let url = client.route(&format!(
        "compare/{}...{}",
        urlencoding::encode(base),
        urlencoding::encode(head)
    ));
    let response: CompareResponse = client
        .inner()
        .get(&url, None::<&()>)
        .await
        .map_err(HostError::from_octocrab)?;

    CompareStatus::from_api_str(&response.status).ok_or_else(|| {
        HostError::permanent_without_source(format!(
            "unrecognised compare status {:?}",
            response.status
        ))
    })
}

// ─── RemoteHost ───────────────────────────────────────────────────────────────

impl RemoteHost for OctocrabClient {
    async fn get_candidate(&self, pr: PrNumber) -> HostResult<CandidateChange> {
        retry_with_backoff(self.read_retry(), RetryPolicy::RetryTransient, || {
            fetch_pull(self, pr)
        })
        .await
    }

    async fn list_candidates(&self, base: &str) -> HostResult<Vec<CandidateChange>> {
        retry_with_backoff(self.read_retry(), RetryPolicy::RetryTransient, || {
            fetch_pulls(self, PullFilter::OpenInto(base))
        })
        .await
    }

    async fn list_merged_targeting(&self, branch: &str) -> HostResult<Vec<CandidateChange>> {
        retry_with_backoff(self.read_retry(), RetryPolicy::RetryTransient, || {
            fetch_pulls(self, PullFilter::ClosedInto(branch))
        })
        .await
    }

    async fn find_open(&self, head: &str, base: &str) -> HostResult<Option<CandidateChange>> {
        let found = retry_with_backoff(self.read_retry(), RetryPolicy::RetryTransient, || {
            fetch_pulls(self, PullFilter::OpenFrom { head, base })
        })
        .await?;
        Ok(found.into_iter().next())
    }

    async fn list_reviews(&self, pr: PrNumber) -> HostResult<Vec<Review>> {
        retry_with_backoff(self.read_retry(), RetryPolicy::RetryTransient, || {
            fetch_reviews(self, pr)
        })
        .await
    }

    async fn get_ci_checks(&self, git_ref: &str) -> HostResult<Vec<CheckRun>> {
        retry_with_backoff(self.read_retry(), RetryPolicy::RetryTransient, || {
            fetch_checks(self, git_ref)
        })
        .await
    }

    async fn branch_exists(&self, branch: &str) -> HostResult<bool> {
        retry_with_backoff(self.read_retry(), RetryPolicy::RetryTransient, || {
            fetch_branch_exists(self, branch)
        })
        .await
    }

    async fn compare(&self, base: &str, head: &str) -> HostResult<CompareStatus> {
        retry_with_backoff(self.read_retry(), RetryPolicy::RetryTransient, || {
            fetch_compare(self, base, head)
        })
        .await
    }

    async fn retarget(&self, pr: PrNumber, new_base: &str) -> HostResult<()> {
        self.inner()
            .pulls(self.owner(), self.repo_name())
            .update(pr.0)
            .base(new_base.to_string())
            .send()
            .await
            .map_err(HostError::from_octocrab)?;
        Ok(())
    }

    async fn request_branch_update(&self, pr: PrNumber) -> HostResult<()> {
        let url = self.route(&format!("pulls/{}/update-branch", pr.0));
        let _: serde_json::Value = self
            .inner()
            .put(&url, Some(&serde_json::json!({})))
            .await
            .map_err(HostError::from_octocrab)?;
        Ok(())
    }

    async fn merge(&self, pr: PrNumber, expected_head: &Sha) -> HostResult<Sha> {
        #[derive(Serialize)]
        struct MergeRequest<'a> {
            merge_method: &'static str,
            sha: &'a str,
        }

        let url = self.route(&format!("pulls/{}/merge", pr.0));
        let request = MergeRequest {
            merge_method: "squash",
            sha: expected_head.as_str(),
        };

        let result: Result<MergeResponse, _> = self.inner().put(&url, Some(&request)).await;
        match result {
            Ok(response) if response.merged => parse_sha(&response.sha, "merge commit SHA"),
            Ok(response) => Err(HostError::permanent_without_source(format!(
                "merge of {} returned merged=false: {}",
                pr,
                response.message.as_deref().unwrap_or("unknown reason")
            ))),
            Err(e) if is_sha_mismatch_error(&e.to_string()) => {
                Err(HostError::sha_mismatch(pr, expected_head, Some(e)))
            }
            Err(e) => Err(HostError::from_octocrab(e)),
        }
    }

    async fn open_pull_request(&self, request: &NewPullRequest) -> HostResult<PrNumber> {
        #[derive(Serialize)]
        struct CreatePull<'a> {
            title: &'a str,
            head: &'a str,
            base: &'a str,
            body: &'a str,
        }

        let url = self.route("pulls");
        let body = CreatePull {
            title: &request.title,
            head: &request.head,
            base: &request.base,
            body: &request.body,
        };
        let created: CreatedPull = self
            .inner()
            .post(&url, Some(&body))
            .await
            .map_err(HostError::from_octocrab)?;
        Ok(PrNumber(created.number))
    }

    async fn set_description(&self, pr: PrNumber, body: &str) -> HostResult<()> {
        let url = self.route(&format!("pulls/{}", pr.0));
        let _: serde_json::Value = self
            .inner()
            .patch(&url, Some(&serde_json::json!({ "body": body })))
            .await
            .map_err(HostError::from_octocrab)?;
        Ok(())
    }

    async fn request_review(&self, pr: PrNumber, reviewers: &[String]) -> HostResult<()> {
        let url = self.route(&format!("pulls/{}/requested_reviewers", pr.0));
        let _: serde_json::Value = self
            .inner()
            .post(&url, Some(&serde_json::json!({ "reviewers": reviewers })))
            .await
            .map_err(HostError::from_octocrab)?;
        Ok(())
    }

    async fn close_pull_request(&self, pr: PrNumber) -> HostResult<()> {
        let url = self.route(&format!("pulls/{}", pr.0));
        let _: serde_json::Value = self
            .inner()
            .patch(&url, Some(&serde_json::json!({ "state": "closed" })))
            .await
            .map_err(HostError::from_octocrab)?;
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> HostResult<()> {
        self.inner()
            .repos(self.owner(), self.repo_name())
            .delete_ref(&octocrab::params::repos::Reference::Branch(
                branch.to_string(),
            ))
            .await
            .map_err(HostError::from_octocrab)
    }
}
