pub mod address;
pub mod vehicle;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{CoverError, Result},
    updater::{DatasetKind, UpdaterJob, UpdaterManifest},
};

pub use address::AddressDatasetPipeline;
pub use vehicle::VehicleDatasetPipeline;

/// Everything a stage needs: the job being run, its manifest, the working
/// directories, and the cooperative cancellation token.
pub struct StageContext<'a> {
    pub job: &'a UpdaterJob,
    pub manifest: &'a UpdaterManifest,
    /// Scratch directory for this job; removed by the clean-up stage.
    pub work_dir: PathBuf,
    /// Where processed source files end up.
    pub archive_dir: PathBuf,
    /// Where imported reference databases live.
    pub reference_dir: PathBuf,
    pub cancel: &'a CancellationToken,
}

impl StageContext<'_> {
    pub fn download_dir(&self) -> PathBuf {
        self.work_dir.join("download")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.work_dir.join("extracted")
    }

    /// Cancellation checkpoint; stages call this before external work.
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CoverError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub files: Vec<PathBuf>,
    /// Hash of the downloaded content, used to skip already-imported drops.
    pub content_hash: String,
}

/// The stages of one dataset's ingest pipeline. Each method is an opaque
/// async unit of work; the updater runner owns sequencing, persistence, and
/// failure handling.
#[async_trait]
pub trait DatasetPipeline: Send + Sync {
    fn dataset(&self) -> DatasetKind;

    /// Whether this dataset runs the search index stage after import.
    fn builds_search_index(&self) -> bool {
        false
    }

    async fn download(&self, ctx: &StageContext<'_>) -> Result<DownloadOutcome>;

    async fn extract(&self, ctx: &StageContext<'_>) -> Result<()>;

    async fn create_tables_and_schema(&self, ctx: &StageContext<'_>) -> Result<()>;

    /// Imports the extracted delimiter-separated files. Returns row count.
    async fn import_data(&self, ctx: &StageContext<'_>) -> Result<u64>;

    async fn build_search_index(&self, ctx: &StageContext<'_>) -> Result<()>;

    async fn archive_files(&self, ctx: &StageContext<'_>) -> Result<()>;

    async fn clean_up(&self, ctx: &StageContext<'_>) -> Result<()>;
}

/// Best-effort file name for a dataset URL.
pub(crate) fn file_name_from_url(url: &str, fallback: &str) -> String {
    url.rsplit('/')
        .next()
        .map(|segment| segment.split(['?', '#']).next().unwrap_or(segment))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
