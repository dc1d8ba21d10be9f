use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use release_train::events::TracingSink;
use release_train::host::{OctocrabClient, RetryConfig};
use release_train::types::{PrNumber, ReleaseKey, ResumeMode, RunOptions, SkipChecks};
use release_train::vcs::GitCli;
use release_train::{DeployFailure, DeployReport, Orchestrator, ReleaseConfig, render_failure};

#[derive(Debug, Parser)]
#[command(name = "release-train", version, about = "Batch-merge approved pull requests into a release")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new release. With no pull requests, every approved one
    /// targeting the base branch is included.
    Deploy {
        #[arg(value_name = "PR")]
        prs: Vec<u64>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Continue a release that stopped partway.
    Resume {
        #[arg(value_name = "PR")]
        prs: Vec<u64>,
        #[command(flatten)]
        run: RunArgs,
        /// Delete the integration branch and start over.
        #[arg(long)]
        force: bool,
    },
    /// Show how far a release got.
    Status {
        #[arg(long, env = "RELEASE_TRAIN_KEY")]
        key: Option<String>,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    skip_reviews: bool,
    #[arg(long)]
    skip_ci: bool,
    #[arg(long)]
    skip_conflicts: bool,
    /// Skip every validation check.
    #[arg(long)]
    skip_all: bool,
    /// Reviewer to request on the release pull request. Repeatable.
    #[arg(long = "reviewer", value_delimiter = ',')]
    reviewers: Vec<String>,
    /// Release key; defaults to today's date.
    #[arg(long, env = "RELEASE_TRAIN_KEY")]
    key: Option<String>,
    /// Leave the working copy on disk after the run.
    #[arg(long)]
    keep_workspace: bool,
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        let skip = if self.skip_all {
            SkipChecks::ALL
        } else {
            SkipChecks {
                reviews: self.skip_reviews,
                ci: self.skip_ci,
                conflicts: self.skip_conflicts,
            }
        };
        RunOptions {
            skip,
            reviewers: self.reviewers,
            release_key: self.key.map(ReleaseKey::new),
            keep_workspace: self.keep_workspace,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "release_train=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = ReleaseConfig::from_env().context("reading configuration")?;
    let host = OctocrabClient::from_token(config.credential.token(), config.repo.clone())
        .context("building GitHub client")?;

    let code = match cli.command {
        Command::Deploy { prs, run } => {
            let orchestrator = Orchestrator::new(config, GitCli::new(), host).with_events(TracingSink);
            let result = orchestrator.deploy(pr_numbers(prs), run.into_options()).await;
            finish(&orchestrator, result)
        }
        Command::Resume { prs, run, force } => {
            let host = host.with_read_retry(RetryConfig::RECONSTRUCT);
            let orchestrator = Orchestrator::new(config, GitCli::new(), host).with_events(TracingSink);
            let mode = if force {
                ResumeMode::Force
            } else {
                ResumeMode::Soft
            };
            let result = orchestrator
                .resume(pr_numbers(prs), run.into_options(), mode)
                .await;
            finish(&orchestrator, result)
        }
        Command::Status { key } => {
            let host = host.with_read_retry(RetryConfig::RECONSTRUCT);
            let orchestrator = Orchestrator::new(config, GitCli::new(), host);
            let key = key.map(ReleaseKey::new).unwrap_or_else(ReleaseKey::today);
            let snapshot = orchestrator
                .check_state(&key)
                .await
                .map_err(|e| anyhow::anyhow!(orchestrator.config().credential.redact(&e.to_string())))?;
            print!("{}", snapshot);
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

fn pr_numbers(prs: Vec<u64>) -> Vec<PrNumber> {
    prs.into_iter().map(PrNumber).collect()
}

fn finish<H: release_train::host::RemoteHost>(
    orchestrator: &Orchestrator<GitCli, H>,
    result: Result<DeployReport, DeployFailure>,
) -> ExitCode {
    match result {
        Ok(report) => {
            print!("{}", report);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            let text = render_failure(&failure);
            eprint!("{}", orchestrator.config().credential.redact(&text));
            ExitCode::FAILURE
        }
    }
}
