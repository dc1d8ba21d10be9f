//! PublishRelease: bump the version, push it, and open the release pull
//! request with the merged candidates as its description.
//!
//! The bump is skipped when the integration branch already carries a version
//! different from the base branch's, which is what a resumed run finds after
//! an earlier run got past the push.

use std::path::PathBuf;

use async_trait::async_trait;

use super::Services;
use crate::error::ReleaseError;
use crate::host::{NewPullRequest, RemoteHost};
use crate::saga::{Saga, SagaBuilder, Step};
use crate::types::{MergedRecord, PrNumber, ReleaseKey, Sha};
use crate::vcs::{LocalVcs, PushMode};
use crate::version::{self, Version, VersionBump};

pub struct PublishContext<'a, V: LocalVcs, H: RemoteHost> {
    pub services: Services<'a, V, H>,
    pub key: ReleaseKey,
    pub workdir: PathBuf,
    pub reviewers: Vec<String>,
    /// Every candidate in the release, in merge order.
    pub merged: Vec<MergedRecord>,

    /// The version being released.
    pub version: Option<Version>,
    /// Set only if this run bumped the version.
    pub bump: Option<VersionBump>,
    pub pre_commit_head: Option<Sha>,
    pub release_commit: Option<Sha>,
    pub pushed: bool,
    pub release_request: Option<PrNumber>,
}

impl<'a, V: LocalVcs, H: RemoteHost> PublishContext<'a, V, H> {
    pub fn new(
        services: Services<'a, V, H>,
        key: ReleaseKey,
        workdir: PathBuf,
        reviewers: Vec<String>,
        merged: Vec<MergedRecord>,
    ) -> Self {
        PublishContext {
            services,
            key,
            workdir,
            reviewers,
            merged,
            version: None,
            bump: None,
            pre_commit_head: None,
            release_commit: None,
            pushed: false,
            release_request: None,
        }
    }

    fn branch(&self) -> &str {
        self.key.branch_name()
    }
}

pub fn publish_saga<'a, V: LocalVcs + 'a, H: RemoteHost + 'a>() -> Saga<PublishContext<'a, V, H>> {
    SagaBuilder::new("publish_release")
        .step(BumpVersion)
        .step(CommitBump)
        .step(PushBump)
        .step(OpenReleaseRequest)
        .step(DescribeRelease)
        .step(RequestReview)
        .build()
}

/// The release pull request description.
pub fn release_notes(key: &ReleaseKey, version: Option<Version>, merged: &[MergedRecord]) -> String {
    let mut notes = format!("## Release {}\n\n", key);
    if let Some(v) = version {
        notes.push_str(&format!("Version: {}\n\n", v));
    }
    notes.push_str("Included changes:\n");
    for record in merged {
        notes.push_str(&format!("- {} {}\n", record.number, record.title));
    }
    notes
}

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

pub struct BumpVersion;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<PublishContext<'a, V, H>> for BumpVersion {
    fn name(&self) -> &'static str {
        "bump_version"
    }

    async fn run(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        let files = &ctx.services.config.version_files;
        let ws = ctx.services.workspace(&ctx.workdir);

        let current = version::read_version(&ctx.workdir, files)?;
        let base_rev = format!("origin/{}", ctx.services.base_branch());
        let base_contents = ws.show_file(&base_rev, &files.canonical_git_path())?;
        let released = version::parse_canonical(&files.canonical, &base_contents)?;

        if current != released {
            tracing::info!(version = %current, base = %released, "version already bumped on the integration branch");
            ctx.version = Some(current);
            return Ok(());
        }

        let bump = version::bump_patch(&ctx.workdir, files)?;
        tracing::info!(from = %bump.from, to = %bump.to, "bumped version");
        ctx.version = Some(bump.to);
        ctx.bump = Some(bump);
        Ok(())
    }

    fn has_undo(&self) -> bool {
        true
    }

    async fn undo(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        if ctx.bump.take().is_some() {
            ctx.services.workspace(&ctx.workdir).reset_hard("HEAD")?;
        }
        Ok(())
    }
}

pub struct CommitBump;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<PublishContext<'a, V, H>> for CommitBump {
    fn name(&self) -> &'static str {
        "commit_bump"
    }

    async fn run(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        let Some(bump) = ctx.bump else {
            return Ok(());
        };
        let ws = ctx.services.workspace(&ctx.workdir);
        let before = ws.rev_parse("HEAD")?;
        ws.commit_all(
            &format!("Bump version to {}", bump.to),
            &ctx.services.config.committer,
        )?;
        ctx.pre_commit_head = Some(before);
        ctx.release_commit = Some(ws.rev_parse("HEAD")?);
        Ok(())
    }

    fn has_undo(&self) -> bool {
        true
    }

    async fn undo(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        if let Some(before) = &ctx.pre_commit_head {
            ctx.services
                .workspace(&ctx.workdir)
                .reset_hard(before.as_str())?;
        }
        Ok(())
    }
}

pub struct PushBump;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<PublishContext<'a, V, H>> for PushBump {
    fn name(&self) -> &'static str {
        "push_bump"
    }

    async fn run(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        if ctx.release_commit.is_none() {
            return Ok(());
        }
        ctx.services
            .workspace(&ctx.workdir)
            .push(ctx.branch(), &PushMode::Normal)?;
        ctx.pushed = true;
        Ok(())
    }

    fn has_undo(&self) -> bool {
        true
    }

    /// Puts the remote branch back where it was, unless someone pushed on top.
    async fn undo(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        if !ctx.pushed {
            return Ok(());
        }
        let (Some(expected), Some(previous)) = (&ctx.release_commit, &ctx.pre_commit_head) else {
            return Ok(());
        };
        let lease = PushMode::ForceWithLease {
            expected: expected.clone(),
            source: previous.to_string(),
        };
        ctx.services
            .workspace(&ctx.workdir)
            .push(ctx.branch(), &lease)?;
        ctx.pushed = false;
        Ok(())
    }
}

pub struct OpenReleaseRequest;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<PublishContext<'a, V, H>> for OpenReleaseRequest {
    fn name(&self) -> &'static str {
        "open_release_request"
    }

    async fn run(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        let title = match ctx.version {
            Some(v) => format!("Release {} (v{})", ctx.key, v),
            None => format!("Release {}", ctx.key),
        };
        let request = NewPullRequest {
            title,
            head: ctx.branch().to_string(),
            base: ctx.services.base_branch().to_string(),
            body: String::new(),
        };
        let pr = ctx.services.host.open_pull_request(&request).await?;
        tracing::info!(pr = %pr, "opened release pull request");
        ctx.release_request = Some(pr);
        Ok(())
    }

    fn has_undo(&self) -> bool {
        true
    }

    async fn undo(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        if let Some(pr) = ctx.release_request.take() {
            ctx.services.host.close_pull_request(pr).await?;
        }
        Ok(())
    }
}

pub struct DescribeRelease;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<PublishContext<'a, V, H>> for DescribeRelease {
    fn name(&self) -> &'static str {
        "describe_release"
    }

    async fn run(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        let Some(pr) = ctx.release_request else {
            return Ok(());
        };
        let body = release_notes(&ctx.key, ctx.version, &ctx.merged);
        ctx.services.host.set_description(pr, &body).await?;
        Ok(())
    }
}

pub struct RequestReview;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<PublishContext<'a, V, H>> for RequestReview {
    fn name(&self) -> &'static str {
        "request_review"
    }

    async fn run(&self, ctx: &mut PublishContext<'a, V, H>) -> Result<(), ReleaseError> {
        let (Some(pr), false) = (ctx.release_request, ctx.reviewers.is_empty()) else {
            return Ok(());
        };
        ctx.services.host.request_review(pr, &ctx.reviewers).await?;
        tracing::info!(pr = %pr, reviewers = ?ctx.reviewers, "requested review");
        Ok(())
    }
}
