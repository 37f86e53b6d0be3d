pub mod job_store;
pub mod runner;

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{CoverError, Result},
    snowflake::JobId,
};

pub use job_store::StateMachineJobStore;
pub use runner::UpdaterRunner;

/// Third-party reference datasets the updater knows how to ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Address,
    Vehicle,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Address => "address",
            DatasetKind::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = CoverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "address" => Ok(DatasetKind::Address),
            "vehicle" => Ok(DatasetKind::Vehicle),
            other => Err(CoverError::Dataset(format!("unknown dataset '{other}'"))),
        }
    }
}

/// Pipeline states. The current state's name is persisted after every
/// transition so a crashed process resumes from the last written state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdaterState {
    Queued,
    Downloading,
    Extracting,
    CreatingTablesAndSchema,
    ImportingData,
    BuildingSearchIndex,
    ArchivingFiles,
    CleanUp,
    Completed,
    Cancelled,
    Aborted,
}

impl UpdaterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdaterState::Queued => "queued",
            UpdaterState::Downloading => "downloading",
            UpdaterState::Extracting => "extracting",
            UpdaterState::CreatingTablesAndSchema => "creating_tables_and_schema",
            UpdaterState::ImportingData => "importing_data",
            UpdaterState::BuildingSearchIndex => "building_search_index",
            UpdaterState::ArchivingFiles => "archiving_files",
            UpdaterState::CleanUp => "clean_up",
            UpdaterState::Completed => "completed",
            UpdaterState::Cancelled => "cancelled",
            UpdaterState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdaterState::Completed | UpdaterState::Cancelled | UpdaterState::Aborted
        )
    }
}

impl fmt::Display for UpdaterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdaterState {
    type Err = CoverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(UpdaterState::Queued),
            "downloading" => Ok(UpdaterState::Downloading),
            "extracting" => Ok(UpdaterState::Extracting),
            "creating_tables_and_schema" => Ok(UpdaterState::CreatingTablesAndSchema),
            "importing_data" => Ok(UpdaterState::ImportingData),
            "building_search_index" => Ok(UpdaterState::BuildingSearchIndex),
            "archiving_files" => Ok(UpdaterState::ArchivingFiles),
            "clean_up" => Ok(UpdaterState::CleanUp),
            "completed" => Ok(UpdaterState::Completed),
            "cancelled" => Ok(UpdaterState::Cancelled),
            "aborted" => Ok(UpdaterState::Aborted),
            other => Err(CoverError::InvalidJobState(other.to_string())),
        }
    }
}

/// Named triggers fired when a stage's unit of work finishes (or is cut
/// short).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterTrigger {
    Start,
    DownloadCompleted,
    /// The download yielded nothing new: zero files, or a content hash that
    /// was already imported and the manifest does not force an update.
    DownloadAborted,
    ExtractionCompleted,
    SchemaCreated,
    ImportCompleted,
    SearchIndexBuilt,
    FilesArchived,
    CleanUpCompleted,
    Cancel,
    Abort,
}

impl UpdaterTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdaterTrigger::Start => "start",
            UpdaterTrigger::DownloadCompleted => "download_completed",
            UpdaterTrigger::DownloadAborted => "download_aborted",
            UpdaterTrigger::ExtractionCompleted => "extraction_completed",
            UpdaterTrigger::SchemaCreated => "schema_created",
            UpdaterTrigger::ImportCompleted => "import_completed",
            UpdaterTrigger::SearchIndexBuilt => "search_index_built",
            UpdaterTrigger::FilesArchived => "files_archived",
            UpdaterTrigger::CleanUpCompleted => "clean_up_completed",
            UpdaterTrigger::Cancel => "cancel",
            UpdaterTrigger::Abort => "abort",
        }
    }
}

/// Pure transition table. Firing a trigger that is undefined for the current
/// state, or any trigger from a terminal state, is an error.
pub fn next_state(
    state: UpdaterState,
    trigger: UpdaterTrigger,
    builds_search_index: bool,
) -> Result<UpdaterState> {
    use UpdaterState as S;
    use UpdaterTrigger as T;

    if state.is_terminal() {
        return Err(CoverError::InvalidTransition {
            state: state.as_str(),
            trigger: trigger.as_str(),
        });
    }

    let next = match (state, trigger) {
        (_, T::Cancel) => S::Cancelled,
        (_, T::Abort) => S::Aborted,
        (S::Queued, T::Start) => S::Downloading,
        (S::Downloading, T::DownloadCompleted) => S::Extracting,
        (S::Downloading, T::DownloadAborted) => S::Aborted,
        (S::Extracting, T::ExtractionCompleted) => S::CreatingTablesAndSchema,
        (S::CreatingTablesAndSchema, T::SchemaCreated) => S::ImportingData,
        (S::ImportingData, T::ImportCompleted) => {
            if builds_search_index {
                S::BuildingSearchIndex
            } else {
                S::ArchivingFiles
            }
        }
        (S::BuildingSearchIndex, T::SearchIndexBuilt) => S::ArchivingFiles,
        (S::ArchivingFiles, T::FilesArchived) => S::CleanUp,
        (S::CleanUp, T::CleanUpCompleted) => S::Completed,
        _ => {
            return Err(CoverError::InvalidTransition {
                state: state.as_str(),
                trigger: trigger.as_str(),
            })
        }
    };
    Ok(next)
}

/// Serialized instructions for one updater run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterManifest {
    pub dataset: DatasetKind,
    pub url: String,
    /// Re-import even when the downloaded content hash was seen before.
    #[serde(default)]
    pub force_update: bool,
    /// Field delimiter for the delimiter-separated import.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Log an operator notification when the run aborts.
    #[serde(default)]
    pub notify_on_abort: bool,
}

fn default_delimiter() -> char {
    ','
}

/// Error captured from a failed stage, serialized onto the job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub stage: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Persisted record of one updater run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterJob {
    pub id: JobId,
    pub dataset: DatasetKind,
    pub state: UpdaterState,
    /// Serialized [`UpdaterManifest`].
    pub manifest: String,
    pub dataset_url: String,
    pub is_downloaded: bool,
    pub is_extracted: bool,
    /// Cooperative cancellation flag, observed at stage boundaries.
    pub cancel_requested: bool,
    pub content_hash: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Serialized [`JobError`] from an aborted run.
    pub error: Option<String>,
}

impl UpdaterJob {
    pub fn manifest(&self) -> Result<UpdaterManifest> {
        let manifest = serde_json::from_str(&self.manifest)?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_without_search_index() {
        let steps = [
            (UpdaterState::Queued, UpdaterTrigger::Start, UpdaterState::Downloading),
            (
                UpdaterState::Downloading,
                UpdaterTrigger::DownloadCompleted,
                UpdaterState::Extracting,
            ),
            (
                UpdaterState::Extracting,
                UpdaterTrigger::ExtractionCompleted,
                UpdaterState::CreatingTablesAndSchema,
            ),
            (
                UpdaterState::CreatingTablesAndSchema,
                UpdaterTrigger::SchemaCreated,
                UpdaterState::ImportingData,
            ),
            (
                UpdaterState::ImportingData,
                UpdaterTrigger::ImportCompleted,
                UpdaterState::ArchivingFiles,
            ),
            (
                UpdaterState::ArchivingFiles,
                UpdaterTrigger::FilesArchived,
                UpdaterState::CleanUp,
            ),
            (
                UpdaterState::CleanUp,
                UpdaterTrigger::CleanUpCompleted,
                UpdaterState::Completed,
            ),
        ];
        for (state, trigger, expected) in steps {
            assert_eq!(next_state(state, trigger, false).expect("transition"), expected);
        }
    }

    #[test]
    fn search_index_stage_participates_when_declared() {
        let next = next_state(
            UpdaterState::ImportingData,
            UpdaterTrigger::ImportCompleted,
            true,
        )
        .expect("transition");
        assert_eq!(next, UpdaterState::BuildingSearchIndex);

        let after = next_state(
            UpdaterState::BuildingSearchIndex,
            UpdaterTrigger::SearchIndexBuilt,
            true,
        )
        .expect("transition");
        assert_eq!(after, UpdaterState::ArchivingFiles);
    }

    #[test]
    fn empty_download_aborts_rather_than_extracting() {
        let next = next_state(
            UpdaterState::Downloading,
            UpdaterTrigger::DownloadAborted,
            false,
        )
        .expect("transition");
        assert_eq!(next, UpdaterState::Aborted);
    }

    #[test]
    fn cancel_and_abort_exit_from_any_active_state() {
        for state in [
            UpdaterState::Queued,
            UpdaterState::Downloading,
            UpdaterState::ImportingData,
            UpdaterState::CleanUp,
        ] {
            assert_eq!(
                next_state(state, UpdaterTrigger::Cancel, false).expect("cancel"),
                UpdaterState::Cancelled
            );
            assert_eq!(
                next_state(state, UpdaterTrigger::Abort, true).expect("abort"),
                UpdaterState::Aborted
            );
        }
    }

    #[test]
    fn terminal_states_reject_every_trigger() {
        for state in [
            UpdaterState::Completed,
            UpdaterState::Cancelled,
            UpdaterState::Aborted,
        ] {
            let err = next_state(state, UpdaterTrigger::Cancel, false).unwrap_err();
            assert!(matches!(err, CoverError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn undefined_triggers_are_rejected() {
        let err = next_state(
            UpdaterState::Extracting,
            UpdaterTrigger::DownloadCompleted,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CoverError::InvalidTransition { .. }));
    }

    #[test]
    fn state_names_round_trip() {
        for state in [
            UpdaterState::Queued,
            UpdaterState::CreatingTablesAndSchema,
            UpdaterState::BuildingSearchIndex,
            UpdaterState::Aborted,
        ] {
            let parsed: UpdaterState = state.as_str().parse().expect("parse");
            assert_eq!(parsed, state);
        }
        assert!("meditating".parse::<UpdaterState>().is_err());
    }
}
