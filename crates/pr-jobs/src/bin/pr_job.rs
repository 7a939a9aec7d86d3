//! pr-job - launch, cancel and annotate pull-request build jobs.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kube::ResourceExt;
use pr_jobs::{
    JobCanceller, JobClient, JobConfig, JobLauncher, KubeJobClient, StatusReporter, TriggerContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pr-job")]
#[command(about = "Manage pull-request build jobs on Kubernetes")]
#[command(version)]
struct Cli {
    /// YAML config file; falls back to LINE_IMAGE / DRY_RUN / JOB_NAMESPACE
    #[arg(long, global = true, env = "PR_JOB_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new build attempt for a pull request
    Launch {
        #[arg(long)]
        job_name: String,

        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Abort every running attempt of a job for a pull request
    Cancel {
        #[arg(long)]
        job_name: String,

        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Update the state, description and url annotations of a job
    SetStatus {
        /// Job identity (the Kubernetes object name)
        #[arg(long)]
        job: String,

        #[arg(long)]
        state: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        url: String,
    },
}

#[derive(Args)]
struct TriggerArgs {
    #[arg(long)]
    owner: String,

    #[arg(long)]
    repo: String,

    #[arg(long)]
    pr: u64,

    #[arg(long, default_value = "")]
    base_ref: String,

    #[arg(long, default_value = "")]
    base_sha: String,

    #[arg(long, default_value = "")]
    pull_sha: String,

    #[arg(long, default_value = "")]
    author: String,
}

impl From<TriggerArgs> for TriggerContext {
    fn from(args: TriggerArgs) -> Self {
        Self {
            owner: args.owner,
            repo: args.repo,
            number: args.pr,
            base_ref: args.base_ref,
            base_sha: args.base_sha,
            head_sha: args.pull_sha,
            author: args.author,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn load_config(path: Option<&PathBuf>, launching: bool) -> Result<JobConfig> {
    let config = match path {
        Some(path) => JobConfig::from_mounted_file(path)?,
        None if launching => JobConfig::from_env()?,
        None => JobConfig::namespace_from_env(),
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let launching = matches!(cli.command, Commands::Launch { .. });
    let config =
        load_config(cli.config.as_ref(), launching).context("Failed to load configuration")?;

    let kube_client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let client: Arc<dyn JobClient> = Arc::new(KubeJobClient::new(kube_client, &config.namespace));

    match cli.command {
        Commands::Launch { job_name, trigger } => {
            config.validate()?;
            let ctx = TriggerContext::from(trigger);
            let job = JobLauncher::new(client)
                .launch(&ctx, &job_name, &config.launch_settings())
                .await
                .with_context(|| format!("Failed to launch {job_name} for PR #{}", ctx.number))?;
            println!("{}", job.name_any());
        }
        Commands::Cancel { job_name, trigger } => {
            let ctx = TriggerContext::from(trigger);
            let report = JobCanceller::new(client)
                .with_policy(config.cancel.clone())
                .cancel(&ctx, &job_name)
                .await
                .with_context(|| format!("Failed to cancel {job_name} for PR #{}", ctx.number))?;
            info!(
                matched = report.matched,
                aborted = report.aborted,
                skipped = report.skipped,
                "Cancel finished"
            );
        }
        Commands::SetStatus {
            job,
            state,
            description,
            url,
        } => {
            StatusReporter::new(client)
                .set_status(&job, &state, &description, &url)
                .await
                .with_context(|| format!("Failed to set status on {job}"))?;
        }
    }

    Ok(())
}
