//! Setup: a fresh working copy with the integration branch checked out.
//!
//! In [`SetupMode::Create`] the branch is cut from the base branch and pushed.
//! In [`SetupMode::Attach`] it already exists remotely and is only checked out.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{Services, delete_remote_branch};
use crate::error::ReleaseError;
use crate::host::RemoteHost;
use crate::saga::{Saga, SagaBuilder, Step};
use crate::types::{ReleaseKey, Sha};
use crate::vcs::{LocalVcs, PushMode};

/// Whether the integration branch is created or attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupMode {
    Create,
    Attach,
}

pub struct SetupContext<'a, V: LocalVcs, H: RemoteHost> {
    pub services: Services<'a, V, H>,
    pub key: ReleaseKey,
    pub workdir: PathBuf,
    /// Local tip of the integration branch once it is checked out.
    pub head: Option<Sha>,
}

impl<'a, V: LocalVcs, H: RemoteHost> SetupContext<'a, V, H> {
    pub fn new(services: Services<'a, V, H>, key: ReleaseKey) -> Self {
        let workdir = services.config.workspace_dir(key.as_str());
        SetupContext {
            services,
            key,
            workdir,
            head: None,
        }
    }

    fn branch(&self) -> &str {
        self.key.branch_name()
    }
}

pub fn setup_saga<'a, V: LocalVcs + 'a, H: RemoteHost + 'a>(
    mode: SetupMode,
) -> Saga<SetupContext<'a, V, H>> {
    let builder = SagaBuilder::new("setup")
        .step(CreateWorkspace)
        .step(CloneRepository);
    match mode {
        SetupMode::Create => builder
            .step(FetchBase)
            .step(CreateIntegrationBranch)
            .step(PushIntegrationBranch)
            .build(),
        SetupMode::Attach => builder
            .step(FetchIntegrationBranch)
            .step(CheckoutIntegrationBranch)
            .build(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

/// Creates an empty working directory, replacing one left by a crashed run.
pub struct CreateWorkspace;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<SetupContext<'a, V, H>> for CreateWorkspace {
    fn name(&self) -> &'static str {
        "create_workspace"
    }

    async fn run(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        let dir = &ctx.workdir;
        if tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tracing::info!(dir = %dir.display(), "replacing stale working directory");
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(|e| ReleaseError::io(dir, e))?;
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ReleaseError::io(dir, e))
    }

    fn has_undo(&self) -> bool {
        true
    }

    async fn undo(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        remove_workspace(&ctx.workdir).await
    }
}

/// Removes a working directory. Absent is fine.
pub(crate) async fn remove_workspace(dir: &std::path::Path) -> Result<(), ReleaseError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ReleaseError::io(dir, e)),
    }
}

pub struct CloneRepository;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<SetupContext<'a, V, H>> for CloneRepository {
    fn name(&self) -> &'static str {
        "clone_repository"
    }

    async fn run(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        let url = ctx.services.config.clone_url();
        ctx.services.workspace(&ctx.workdir).clone_from(&url)?;
        tracing::info!(repo = %ctx.services.config.repo, "cloned repository");
        Ok(())
    }
}

pub struct FetchBase;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<SetupContext<'a, V, H>> for FetchBase {
    fn name(&self) -> &'static str {
        "fetch_base"
    }

    async fn run(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        let base = ctx.services.base_branch();
        ctx.services.workspace(&ctx.workdir).fetch(base)?;
        Ok(())
    }
}

pub struct CreateIntegrationBranch;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<SetupContext<'a, V, H>> for CreateIntegrationBranch {
    fn name(&self) -> &'static str {
        "create_integration_branch"
    }

    async fn run(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        let ws = ctx.services.workspace(&ctx.workdir);
        let start = format!("origin/{}", ctx.services.base_branch());
        ws.create_branch(ctx.branch(), &start)?;
        ctx.head = Some(ws.rev_parse("HEAD")?);
        Ok(())
    }

    fn has_undo(&self) -> bool {
        true
    }

    async fn undo(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        ctx.services
            .workspace(&ctx.workdir)
            .delete_local_branch(ctx.branch())?;
        ctx.head = None;
        Ok(())
    }
}

pub struct PushIntegrationBranch;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<SetupContext<'a, V, H>> for PushIntegrationBranch {
    fn name(&self) -> &'static str {
        "push_integration_branch"
    }

    async fn run(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        ctx.services
            .workspace(&ctx.workdir)
            .push(ctx.branch(), &PushMode::Normal)?;
        tracing::info!(branch = ctx.branch(), "pushed integration branch");
        Ok(())
    }

    fn has_undo(&self) -> bool {
        true
    }

    async fn undo(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        delete_remote_branch(ctx.services.host, ctx.branch()).await
    }
}

pub struct FetchIntegrationBranch;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<SetupContext<'a, V, H>> for FetchIntegrationBranch {
    fn name(&self) -> &'static str {
        "fetch_integration_branch"
    }

    async fn run(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        let ws = ctx.services.workspace(&ctx.workdir);
        ws.fetch(ctx.services.base_branch())?;
        ws.fetch(ctx.branch())?;
        Ok(())
    }
}

pub struct CheckoutIntegrationBranch;

#[async_trait]
impl<'a, V: LocalVcs, H: RemoteHost> Step<SetupContext<'a, V, H>> for CheckoutIntegrationBranch {
    fn name(&self) -> &'static str {
        "checkout_integration_branch"
    }

    async fn run(&self, ctx: &mut SetupContext<'a, V, H>) -> Result<(), ReleaseError> {
        let ws = ctx.services.workspace(&ctx.workdir);
        let start = format!("origin/{}", ctx.branch());
        ws.create_branch(ctx.branch(), &start)?;
        ctx.head = Some(ws.rev_parse("HEAD")?);
        tracing::info!(branch = ctx.branch(), "attached to existing integration branch");
        Ok(())
    }
}
