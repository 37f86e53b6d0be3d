use std::{path::Path, str::FromStr, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;

use coverbase::{
    config::Config,
    datasets::{AddressDatasetPipeline, DatasetPipeline, VehicleDatasetPipeline},
    snowflake::JobId,
    updater::{DatasetKind, StateMachineJobStore, UpdaterManifest, UpdaterRunner},
};

use super::print_json;

#[derive(Subcommand)]
pub enum UpdaterCommands {
    /// Queue and run a dataset updater job
    Run(UpdaterRunArgs),
    /// Resume a previously persisted job from its last written state
    Resume(UpdaterJobArgs),
    /// Show one job's persisted record
    Status(UpdaterJobArgs),
    /// List all updater jobs
    List,
    /// Request cooperative cancellation of a job
    Cancel(UpdaterJobArgs),
    /// Block until a job reaches a terminal state
    Wait(UpdaterWaitArgs),
}

#[derive(Args)]
pub struct UpdaterRunArgs {
    /// Dataset to ingest: address or vehicle
    pub dataset: String,
    /// Source URL; defaults to the configured dataset URL
    #[arg(long)]
    pub url: Option<String>,
    /// Import even when the content hash was seen before
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct UpdaterJobArgs {
    pub job_id: String,
}

#[derive(Args)]
pub struct UpdaterWaitArgs {
    pub job_id: String,
    /// Poll interval in seconds; defaults from config
    #[arg(long)]
    pub poll_secs: Option<u64>,
}

pub async fn run(command: UpdaterCommands, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    config.ensure_data_dir()?;
    let jobs = Arc::new(StateMachineJobStore::open(
        &config.job_store_path(),
        config.snowflake_worker_id,
    )?);
    let runner = UpdaterRunner::new(
        Arc::clone(&jobs),
        config.download_dir(),
        config.archive_dir(),
        config.reference_dir(),
    );

    match command {
        UpdaterCommands::Run(args) => {
            let dataset = DatasetKind::from_str(&args.dataset)?;
            let url = match args.url {
                Some(url) => url,
                None => default_url(&config, dataset)?,
            };
            let manifest = UpdaterManifest {
                dataset,
                url,
                force_update: args.force,
                delimiter: parse_delimiter(&config.updater.delimiter)?,
                // Vehicle aborts page an operator; the address feed is
                // monitored upstream.
                notify_on_abort: dataset == DatasetKind::Vehicle,
            };
            let job = jobs.create(&manifest)?;
            let pipeline = pipeline_for(dataset);
            let finished = runner
                .run(job.id, pipeline.as_ref(), &CancellationToken::new())
                .await?;
            print_json(&finished)
        }
        UpdaterCommands::Resume(args) => {
            let id = parse_job_id(&args.job_id)?;
            let job = jobs.get(id)?;
            let pipeline = pipeline_for(job.dataset);
            let finished = runner
                .resume_job(id, pipeline.as_ref(), &CancellationToken::new())
                .await?;
            print_json(&finished)
        }
        UpdaterCommands::Status(args) => {
            let id = parse_job_id(&args.job_id)?;
            print_json(&jobs.get(id)?)
        }
        UpdaterCommands::List => print_json(&jobs.list()?),
        UpdaterCommands::Cancel(args) => {
            let id = parse_job_id(&args.job_id)?;
            print_json(&jobs.request_cancel(id)?)
        }
        UpdaterCommands::Wait(args) => {
            let id = parse_job_id(&args.job_id)?;
            let poll = Duration::from_secs(
                args.poll_secs.unwrap_or(config.updater.poll_interval_secs).max(1),
            );
            let finished = runner
                .wait_for_completion(id, poll, &CancellationToken::new())
                .await?;
            print_json(&finished)
        }
    }
}

fn pipeline_for(dataset: DatasetKind) -> Box<dyn DatasetPipeline> {
    match dataset {
        DatasetKind::Address => Box::new(AddressDatasetPipeline),
        DatasetKind::Vehicle => Box::new(VehicleDatasetPipeline),
    }
}

fn default_url(config: &Config, dataset: DatasetKind) -> Result<String> {
    let url = match dataset {
        DatasetKind::Address => &config.updater.address_dataset_url,
        DatasetKind::Vehicle => &config.updater.vehicle_dataset_url,
    };
    if url.trim().is_empty() {
        bail!(
            "no URL configured for the {dataset} dataset; pass --url or set it in the config file"
        );
    }
    Ok(url.clone())
}

fn parse_delimiter(raw: &str) -> Result<char> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(delimiter), None) if delimiter.is_ascii() => Ok(delimiter),
        _ => bail!("delimiter must be a single ASCII character, got '{raw}'"),
    }
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    JobId::from_str(raw.trim()).map_err(|_| anyhow::anyhow!("invalid job id '{raw}'"))
}
