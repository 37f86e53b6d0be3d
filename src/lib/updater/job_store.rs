use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};

use crate::{
    error::{CoverError, Result},
    snowflake::{JobId, JobIdGenerator},
};

use super::{DatasetKind, UpdaterJob, UpdaterManifest, UpdaterState};

const SEP: u8 = 0x1F;
const PREFIX_JOB: &str = "job";
const PREFIX_STATUS: &str = "status";
const PREFIX_HASH: &str = "hash";

/// Persistence for updater jobs: the job record itself, a state index kept in
/// the same write batch, and the registry of already-imported content hashes.
pub struct StateMachineJobStore {
    db: DBWithThreadMode<MultiThreaded>,
    id_generator: Mutex<JobIdGenerator>,
}

impl StateMachineJobStore {
    pub fn open(path: &Path, worker_id: u16) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&options, path)
            .map_err(|err| CoverError::Storage(err.to_string()))?;
        Ok(Self {
            db,
            id_generator: Mutex::new(JobIdGenerator::new(worker_id)),
        })
    }

    /// Creates a queued job from a manifest.
    pub fn create(&self, manifest: &UpdaterManifest) -> Result<UpdaterJob> {
        let id = self.id_generator.lock().next_id();
        let job = UpdaterJob {
            id,
            dataset: manifest.dataset,
            state: UpdaterState::Queued,
            manifest: serde_json::to_string(manifest)?,
            dataset_url: manifest.url.clone(),
            is_downloaded: false,
            is_extracted: false,
            cancel_requested: false,
            content_hash: None,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        };

        let mut batch = WriteBatch::default();
        batch.put(job_key(id), serde_json::to_vec(&job)?);
        batch.put(status_key(job.state, id), []);
        self.db
            .write(batch)
            .map_err(|err| CoverError::Storage(err.to_string()))?;

        metrics::counter!("coverbase_updater_jobs_created_total", "dataset" => job.dataset.as_str())
            .increment(1);

        Ok(job)
    }

    pub fn get(&self, id: JobId) -> Result<UpdaterJob> {
        let value = self
            .db
            .get(job_key(id))
            .map_err(|err| CoverError::Storage(err.to_string()))?
            .ok_or_else(|| CoverError::JobNotFound(id.to_string()))?;
        let job: UpdaterJob = serde_json::from_slice(&value)?;
        Ok(job)
    }

    /// All jobs in id order (ids are time-ordered, so this is creation order).
    pub fn list(&self) -> Result<Vec<UpdaterJob>> {
        let prefix = segmented_key(&[PREFIX_JOB]);
        let mut scan_from = prefix.clone();
        scan_from.push(SEP);
        let iter = self
            .db
            .iterator(IteratorMode::From(scan_from.as_slice(), Direction::Forward));

        let mut jobs = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|err| CoverError::Storage(err.to_string()))?;
            if !key.starts_with(scan_from.as_slice()) {
                break;
            }
            let job: UpdaterJob = serde_json::from_slice(&value)?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    pub fn list_by_state(&self, state: UpdaterState) -> Result<Vec<UpdaterJob>> {
        let mut prefix = segmented_key(&[PREFIX_STATUS, state.as_str()]);
        prefix.push(SEP);
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_slice(), Direction::Forward));

        let mut jobs = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|err| CoverError::Storage(err.to_string()))?;
            if !key.starts_with(prefix.as_slice()) {
                break;
            }
            let id = parse_job_id(&key[prefix.len()..])?;
            jobs.push(self.get(id)?);
        }
        Ok(jobs)
    }

    /// Applies a mutation and persists it, keeping the state index in sync.
    /// The current-state string is written back before the caller proceeds,
    /// which is what makes crashed runs resumable.
    pub fn update<F>(&self, id: JobId, mutate: F) -> Result<UpdaterJob>
    where
        F: FnOnce(&mut UpdaterJob),
    {
        let mut job = self.get(id)?;
        let previous_state = job.state;
        mutate(&mut job);

        let mut batch = WriteBatch::default();
        if job.state != previous_state {
            batch.delete(status_key(previous_state, id));
            batch.put(status_key(job.state, id), []);
            metrics::counter!(
                "coverbase_updater_transitions_total",
                "state" => job.state.as_str()
            )
            .increment(1);
        }
        batch.put(job_key(id), serde_json::to_vec(&job)?);
        self.db
            .write(batch)
            .map_err(|err| CoverError::Storage(err.to_string()))?;
        Ok(job)
    }

    pub fn update_current_state(&self, id: JobId, state: UpdaterState) -> Result<UpdaterJob> {
        self.update(id, |job| {
            job.state = state;
            if state.is_terminal() && job.end_time.is_none() {
                job.end_time = Some(Utc::now());
            }
        })
    }

    /// Marks the job for cooperative cancellation; the runner observes the
    /// flag at the next stage boundary.
    pub fn request_cancel(&self, id: JobId) -> Result<UpdaterJob> {
        self.update(id, |job| {
            job.cancel_requested = true;
        })
    }

    /// Whether this dataset content hash was imported before.
    pub fn has_seen_hash(&self, dataset: DatasetKind, hash: &str) -> Result<bool> {
        let value = self
            .db
            .get(hash_key(dataset, hash))
            .map_err(|err| CoverError::Storage(err.to_string()))?;
        Ok(value.is_some())
    }

    pub fn record_hash(&self, dataset: DatasetKind, hash: &str) -> Result<()> {
        self.db
            .put(hash_key(dataset, hash), Utc::now().to_rfc3339().as_bytes())
            .map_err(|err| CoverError::Storage(err.to_string()))?;
        Ok(())
    }
}

fn segmented_key(segments: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    for (index, segment) in segments.iter().enumerate() {
        if index > 0 {
            key.push(SEP);
        }
        key.extend_from_slice(segment.as_bytes());
    }
    key
}

fn job_key(id: JobId) -> Vec<u8> {
    let id = format!("{:020}", id.as_u64());
    segmented_key(&[PREFIX_JOB, &id])
}

fn status_key(state: UpdaterState, id: JobId) -> Vec<u8> {
    let id = format!("{:020}", id.as_u64());
    segmented_key(&[PREFIX_STATUS, state.as_str(), &id])
}

fn hash_key(dataset: DatasetKind, hash: &str) -> Vec<u8> {
    segmented_key(&[PREFIX_HASH, dataset.as_str(), hash])
}

fn parse_job_id(raw: &[u8]) -> Result<JobId> {
    let text = std::str::from_utf8(raw)
        .map_err(|err| CoverError::Storage(format!("malformed job id key: {err}")))?;
    let value = text
        .parse::<u64>()
        .map_err(|err| CoverError::Storage(format!("malformed job id key: {err}")))?;
    Ok(JobId::from_u64(value))
}
