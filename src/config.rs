//! Configuration for release runs.
//!
//! Everything has a default except the repository and the access token.
//! [`ReleaseConfig::from_env`] reads `RELEASE_TRAIN_*` variables; the CLI
//! layers its flags on top.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::host::RetryConfig;
use crate::types::RepoId;
use crate::vcs::{CommitIdentity, Credential};
use crate::version::{VersionFiles, VersionMirror};

/// Default branch releases are cut from and merged back into.
pub const DEFAULT_BASE_BRANCH: &str = "main";

/// Default interval between mergeability polls after a branch update (2 seconds).
const DEFAULT_UPDATE_POLL_INTERVAL_MS: u64 = 2_000;

/// Default number of polls after a branch update before giving up.
const DEFAULT_UPDATE_POLL_ATTEMPTS: u32 = 10;

/// Default interval between pre-merge mergeability polls (1 second).
const DEFAULT_MERGEABLE_POLL_INTERVAL_MS: u64 = 1_000;

/// Default number of pre-merge mergeability polls.
const DEFAULT_MERGEABLE_POLL_ATTEMPTS: u32 = 5;

const DEFAULT_COMMITTER_NAME: &str = "release-train";
const DEFAULT_COMMITTER_EMAIL: &str = "release-train@users.noreply.github.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid repository {0:?}: expected owner/repo")]
    InvalidRepo(String),

    #[error("invalid value {value:?} for {var}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Timing of the merge engine's mergeability polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub update_interval: Duration,
    pub update_attempts: u32,
    pub mergeable_interval: Duration,
    pub mergeable_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl PollSettings {
    pub fn new() -> Self {
        PollSettings {
            update_interval: Duration::from_millis(DEFAULT_UPDATE_POLL_INTERVAL_MS),
            update_attempts: DEFAULT_UPDATE_POLL_ATTEMPTS,
            mergeable_interval: Duration::from_millis(DEFAULT_MERGEABLE_POLL_INTERVAL_MS),
            mergeable_attempts: DEFAULT_MERGEABLE_POLL_ATTEMPTS,
        }
    }

    /// Polls without sleeping. For tests.
    pub fn immediate() -> Self {
        PollSettings {
            update_interval: Duration::ZERO,
            mergeable_interval: Duration::ZERO,
            ..Self::new()
        }
    }
}

/// Everything a release run needs that is not per-run.
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    pub repo: RepoId,
    pub credential: Credential,
    pub base_branch: String,
    /// Working copies are created under this directory, one per release key.
    pub workspace_root: PathBuf,
    pub version_files: VersionFiles,
    pub polling: PollSettings,
    /// Backoff for steps that retry transient host failures.
    pub step_retry: RetryConfig,
    pub committer: CommitIdentity,
}

impl ReleaseConfig {
    pub fn new(repo: RepoId, credential: Credential) -> Self {
        ReleaseConfig {
            repo,
            credential,
            base_branch: DEFAULT_BASE_BRANCH.to_string(),
            workspace_root: std::env::temp_dir().join("release-train"),
            version_files: VersionFiles::default(),
            polling: PollSettings::new(),
            step_retry: RetryConfig::DEFAULT,
            committer: CommitIdentity {
                name: DEFAULT_COMMITTER_NAME.to_string(),
                email: DEFAULT_COMMITTER_EMAIL.to_string(),
            },
        }
    }

    pub fn with_base_branch(mut self, branch: impl Into<String>) -> Self {
        self.base_branch = branch.into();
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_version_files(mut self, files: VersionFiles) -> Self {
        self.version_files = files;
        self
    }

    pub fn with_polling(mut self, polling: PollSettings) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_step_retry(mut self, retry: RetryConfig) -> Self {
        self.step_retry = retry;
        self
    }

    pub fn with_committer(mut self, committer: CommitIdentity) -> Self {
        self.committer = committer;
        self
    }

    /// The URL the working copy is cloned from, without credentials.
    pub fn clone_url(&self) -> String {
        self.repo.https_url()
    }

    /// The working copy directory for one release.
    pub fn workspace_dir(&self, key: &str) -> PathBuf {
        self.workspace_root
            .join(format!("{}-{}", self.repo.owner, self.repo.repo))
            .join(key)
    }

    /// Reads configuration from the environment.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `RELEASE_TRAIN_REPO` | required |
    /// | `RELEASE_TRAIN_TOKEN` or `GITHUB_TOKEN` | required |
    /// | `RELEASE_TRAIN_BASE_BRANCH` | `main` |
    /// | `RELEASE_TRAIN_WORKSPACE` | `$TMPDIR/release-train` |
    /// | `RELEASE_TRAIN_VERSION_FILE` | `VERSION` |
    /// | `RELEASE_TRAIN_VERSION_MIRRORS` | `package.json` (comma-separated) |
    /// | `RELEASE_TRAIN_UPDATE_POLL_MS` / `_ATTEMPTS` | 2000 / 10 |
    /// | `RELEASE_TRAIN_MERGEABLE_POLL_MS` / `_ATTEMPTS` | 1000 / 5 |
    /// | `RELEASE_TRAIN_GIT_NAME` / `RELEASE_TRAIN_GIT_EMAIL` | bot identity |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading from an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_repo = lookup("RELEASE_TRAIN_REPO").ok_or(ConfigError::Missing("RELEASE_TRAIN_REPO"))?;
        let repo = RepoId::parse(&raw_repo).ok_or(ConfigError::InvalidRepo(raw_repo))?;
        let token = lookup("RELEASE_TRAIN_TOKEN")
            .or_else(|| lookup("GITHUB_TOKEN"))
            .ok_or(ConfigError::Missing("RELEASE_TRAIN_TOKEN"))?;

        let mut config = ReleaseConfig::new(repo, Credential::new(token));

        if let Some(base) = lookup("RELEASE_TRAIN_BASE_BRANCH") {
            config.base_branch = base;
        }
        if let Some(root) = lookup("RELEASE_TRAIN_WORKSPACE") {
            config.workspace_root = PathBuf::from(root);
        }
        if let Some(file) = lookup("RELEASE_TRAIN_VERSION_FILE") {
            config.version_files.canonical = PathBuf::from(file);
        }
        if let Some(mirrors) = lookup("RELEASE_TRAIN_VERSION_MIRRORS") {
            config.version_files.mirrors = mirrors
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(VersionMirror::infer)
                .collect();
        }
        if let Some(name) = lookup("RELEASE_TRAIN_GIT_NAME") {
            config.committer.name = name;
        }
        if let Some(email) = lookup("RELEASE_TRAIN_GIT_EMAIL") {
            config.committer.email = email;
        }

        let polling = &mut config.polling;
        if let Some(ms) = parse_number::<u64>(&lookup, "RELEASE_TRAIN_UPDATE_POLL_MS")? {
            polling.update_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_number(&lookup, "RELEASE_TRAIN_UPDATE_POLL_ATTEMPTS")? {
            polling.update_attempts = n;
        }
        if let Some(ms) = parse_number::<u64>(&lookup, "RELEASE_TRAIN_MERGEABLE_POLL_MS")? {
            polling.mergeable_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_number(&lookup, "RELEASE_TRAIN_MERGEABLE_POLL_ATTEMPTS")? {
            polling.mergeable_attempts = n;
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}
