use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    datasets::{DatasetPipeline, StageContext},
    error::{CoverError, Result},
    snowflake::JobId,
};

use super::{next_state, JobError, StateMachineJobStore, UpdaterJob, UpdaterState, UpdaterTrigger};

enum StageOutcome {
    Advance(UpdaterTrigger),
    /// The download produced nothing to process; not an error.
    AbortDownload(String),
}

/// Drives one updater job through its pipeline stages.
///
/// The runner owns sequencing and persistence only: each stage is an opaque
/// async unit of work on the [`DatasetPipeline`], and the persisted state
/// string is written back after every transition, so a crashed process can
/// re-enter the last written state and continue forward.
pub struct UpdaterRunner {
    jobs: Arc<StateMachineJobStore>,
    download_dir: PathBuf,
    archive_dir: PathBuf,
    reference_dir: PathBuf,
}

impl UpdaterRunner {
    pub fn new(
        jobs: Arc<StateMachineJobStore>,
        download_dir: PathBuf,
        archive_dir: PathBuf,
        reference_dir: PathBuf,
    ) -> Self {
        Self {
            jobs,
            download_dir,
            archive_dir,
            reference_dir,
        }
    }

    pub fn jobs(&self) -> &Arc<StateMachineJobStore> {
        &self.jobs
    }

    /// Runs the job from its current state to a terminal state.
    ///
    /// Cancellation is cooperative: the token and the job's persisted cancel
    /// flag are checked at the start of every stage, and stages check the
    /// token again before external calls. Stage failures are caught,
    /// serialized onto the job record, and end the run in `Aborted`.
    pub async fn run(
        &self,
        id: JobId,
        pipeline: &dyn DatasetPipeline,
        cancel: &CancellationToken,
    ) -> Result<UpdaterJob> {
        loop {
            let job = self.jobs.get(id)?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            if job.cancel_requested || cancel.is_cancelled() {
                let cancelled = self.transition(&job, UpdaterTrigger::Cancel, pipeline)?;
                info!(job = %id, "updater job cancelled");
                return Ok(cancelled);
            }

            let manifest = job.manifest()?;
            match self.execute_stage(&job, &manifest, pipeline, cancel).await {
                Ok(StageOutcome::Advance(trigger)) => {
                    self.transition(&job, trigger, pipeline)?;
                }
                Ok(StageOutcome::AbortDownload(reason)) => {
                    warn!(job = %id, %reason, "updater download aborted");
                    let aborted =
                        self.transition(&job, UpdaterTrigger::DownloadAborted, pipeline)?;
                    return Ok(aborted);
                }
                Err(CoverError::Cancelled) => {
                    let cancelled = self.transition(&job, UpdaterTrigger::Cancel, pipeline)?;
                    info!(job = %id, "updater job cancelled mid-stage");
                    return Ok(cancelled);
                }
                Err(err) => {
                    let stage_error = JobError {
                        stage: job.state.as_str().to_string(),
                        message: err.to_string(),
                        occurred_at: Utc::now(),
                    };
                    let serialized = serde_json::to_string(&stage_error)?;
                    self.jobs.update(id, |record| {
                        record.error = Some(serialized);
                    })?;
                    let aborted = self.transition(&job, UpdaterTrigger::Abort, pipeline)?;
                    error!(job = %id, stage = %job.state, %err, "updater stage failed");
                    if manifest.notify_on_abort {
                        warn!(
                            job = %id,
                            dataset = %job.dataset,
                            "operator notification: updater job aborted"
                        );
                    }
                    return Ok(aborted);
                }
            }
        }
    }

    /// Re-enters the job at its persisted state name and continues forward.
    ///
    /// Nothing is replayed: the in-memory machine is rebuilt purely from the
    /// persisted manifest and state string.
    pub async fn resume_job(
        &self,
        id: JobId,
        pipeline: &dyn DatasetPipeline,
        cancel: &CancellationToken,
    ) -> Result<UpdaterJob> {
        let job = self.jobs.get(id)?;
        info!(job = %id, state = %job.state, "resuming updater job");
        self.run(id, pipeline, cancel).await
    }

    /// Polls the persisted state until the job reaches a terminal state.
    /// Returns [`CoverError::Cancelled`] when the token fires first.
    pub async fn wait_for_completion(
        &self,
        id: JobId,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<UpdaterJob> {
        loop {
            let job = self.jobs.get(id)?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(CoverError::Cancelled),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    fn transition(
        &self,
        job: &UpdaterJob,
        trigger: UpdaterTrigger,
        pipeline: &dyn DatasetPipeline,
    ) -> Result<UpdaterJob> {
        let next = next_state(job.state, trigger, pipeline.builds_search_index())?;
        self.jobs.update_current_state(job.id, next)
    }

    async fn execute_stage(
        &self,
        job: &UpdaterJob,
        manifest: &super::UpdaterManifest,
        pipeline: &dyn DatasetPipeline,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        let ctx = StageContext {
            job,
            manifest,
            work_dir: self.download_dir.join(job.id.to_string()),
            archive_dir: self.archive_dir.clone(),
            reference_dir: self.reference_dir.clone(),
            cancel,
        };

        match job.state {
            UpdaterState::Queued => Ok(StageOutcome::Advance(UpdaterTrigger::Start)),
            UpdaterState::Downloading => {
                let outcome = pipeline.download(&ctx).await?;
                if outcome.files.is_empty() {
                    return Ok(StageOutcome::AbortDownload(
                        "download yielded no files".to_string(),
                    ));
                }
                if !manifest.force_update
                    && self.jobs.has_seen_hash(job.dataset, &outcome.content_hash)?
                {
                    return Ok(StageOutcome::AbortDownload(format!(
                        "content hash {} was already imported",
                        outcome.content_hash
                    )));
                }
                self.jobs.update(job.id, |record| {
                    record.is_downloaded = true;
                    record.content_hash = Some(outcome.content_hash.clone());
                })?;
                Ok(StageOutcome::Advance(UpdaterTrigger::DownloadCompleted))
            }
            UpdaterState::Extracting => {
                pipeline.extract(&ctx).await?;
                self.jobs.update(job.id, |record| {
                    record.is_extracted = true;
                })?;
                Ok(StageOutcome::Advance(UpdaterTrigger::ExtractionCompleted))
            }
            UpdaterState::CreatingTablesAndSchema => {
                pipeline.create_tables_and_schema(&ctx).await?;
                Ok(StageOutcome::Advance(UpdaterTrigger::SchemaCreated))
            }
            UpdaterState::ImportingData => {
                let rows = pipeline.import_data(&ctx).await?;
                if let Some(hash) = &job.content_hash {
                    self.jobs.record_hash(job.dataset, hash)?;
                }
                info!(job = %job.id, rows, "dataset import completed");
                Ok(StageOutcome::Advance(UpdaterTrigger::ImportCompleted))
            }
            UpdaterState::BuildingSearchIndex => {
                pipeline.build_search_index(&ctx).await?;
                Ok(StageOutcome::Advance(UpdaterTrigger::SearchIndexBuilt))
            }
            UpdaterState::ArchivingFiles => {
                pipeline.archive_files(&ctx).await?;
                Ok(StageOutcome::Advance(UpdaterTrigger::FilesArchived))
            }
            UpdaterState::CleanUp => {
                pipeline.clean_up(&ctx).await?;
                Ok(StageOutcome::Advance(UpdaterTrigger::CleanUpCompleted))
            }
            UpdaterState::Completed | UpdaterState::Cancelled | UpdaterState::Aborted => {
                Err(CoverError::InvalidTransition {
                    state: job.state.as_str(),
                    trigger: "run",
                })
            }
        }
    }
}
