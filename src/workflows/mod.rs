//! The three sagas a release is built from.
//!
//! - [`setup`]: working copy and integration branch
//! - [`merge_batch`]: pick, validate, retarget and merge candidates
//! - [`publish`]: version bump and the release pull request
//!
//! Each saga has its own context. Collaborators are borrowed through
//! [`Services`]; step structs themselves hold only configuration.

pub mod merge_batch;
pub mod publish;
pub mod setup;

use std::path::Path;

use crate::config::ReleaseConfig;
use crate::error::ReleaseError;
use crate::events::EventSink;
use crate::host::{RemoteHost, RetryConfig};
use crate::saga::SelfFailurePolicy;
use crate::vcs::{LocalVcs, Workspace};

pub use merge_batch::{MergeContext, merge_batch_saga};
pub use publish::{PublishContext, publish_saga, release_notes};
pub use setup::{SetupContext, SetupMode, setup_saga};

/// Collaborators shared by every step of a run.
pub struct Services<'a, V: LocalVcs, H: RemoteHost> {
    pub vcs: &'a V,
    pub host: &'a H,
    pub config: &'a ReleaseConfig,
    pub events: &'a dyn EventSink,
}

impl<V: LocalVcs, H: RemoteHost> Clone for Services<'_, V, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V: LocalVcs, H: RemoteHost> Copy for Services<'_, V, H> {}

impl<'a, V: LocalVcs, H: RemoteHost> Services<'a, V, H> {
    /// A credentialed view of the working copy at `dir`.
    pub fn workspace(&self, dir: &Path) -> Workspace<'a, V> {
        Workspace::new(self.vcs, dir, &self.config.credential)
    }

    pub fn base_branch(&self) -> &'a str {
        &self.config.base_branch
    }
}

/// Retries transient failures on the configured backoff schedule.
pub(crate) fn retry_transient(
    retry: &RetryConfig,
    error: &ReleaseError,
    attempt: u32,
) -> SelfFailurePolicy {
    if error.is_transient() && attempt <= retry.max_retries {
        SelfFailurePolicy::Retry {
            after: retry.delay_for_attempt(attempt - 1),
        }
    } else {
        SelfFailurePolicy::GiveUp
    }
}

/// Deletes a remote branch, treating "already gone" as success.
pub(crate) async fn delete_remote_branch<H: RemoteHost>(
    host: &H,
    branch: &str,
) -> Result<(), ReleaseError> {
    match host.delete_branch(branch).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            tracing::debug!(branch, "remote branch already absent");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transient_errors_retry_until_budget_runs_out() {
        let retry = RetryConfig::new(2, Duration::from_secs(1), Duration::from_secs(10), 2.0);
        let err = ReleaseError::Transient("502".into());

        assert_eq!(
            retry_transient(&retry, &err, 1),
            SelfFailurePolicy::Retry {
                after: Duration::from_secs(1)
            }
        );
        assert_eq!(
            retry_transient(&retry, &err, 2),
            SelfFailurePolicy::Retry {
                after: Duration::from_secs(2)
            }
        );
        assert_eq!(retry_transient(&retry, &err, 3), SelfFailurePolicy::GiveUp);
    }

    #[test]
    fn permanent_errors_give_up_at_once() {
        let err = ReleaseError::NoCandidates;
        assert_eq!(
            retry_transient(&RetryConfig::DEFAULT, &err, 1),
            SelfFailurePolicy::GiveUp
        );
    }
}
