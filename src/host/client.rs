//! Octocrab client wrapper scoped to one repository.

use octocrab::Octocrab;

use super::retry::RetryConfig;
use crate::types::RepoId;

/// A GitHub API client scoped to a specific repository.
#[derive(Clone)]
pub struct OctocrabClient {
    client: Octocrab,
    repo: RepoId,
    /// Backoff applied to read-only calls.
    read_retry: RetryConfig,
}

impl OctocrabClient {
    pub fn new(client: Octocrab, repo: RepoId) -> Self {
        Self {
            client,
            repo,
            read_retry: RetryConfig::DEFAULT,
        }
    }

    /// Creates a client authenticated with a token.
    pub fn from_token(token: impl Into<String>, repo: RepoId) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client, repo))
    }

    pub fn with_read_retry(mut self, config: RetryConfig) -> Self {
        self.read_retry = config;
        self
    }

    pub fn inner(&self) -> &Octocrab {
        &self.client
    }

    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    pub fn owner(&self) -> &str {
        &self.repo.owner
    }

    pub fn repo_name(&self) -> &str {
        &self.repo.repo
    }

    pub fn read_retry(&self) -> RetryConfig {
        self.read_retry
    }

    /// Builds a `/repos/{owner}/{repo}/...` route.
    pub(super) fn route(&self, tail: &str) -> String {
        format!("/repos/{}/{}/{}", self.owner(), self.repo_name(), tail)
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient")
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}
