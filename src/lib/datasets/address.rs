use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{
    error::{CoverError, Result},
    updater::DatasetKind,
};

use super::{file_name_from_url, DatasetPipeline, DownloadOutcome, StageContext};

const REFERENCE_DB: &str = "address.sqlite";

/// Ingest pipeline for the national address reference dataset: gzip CSV drop,
/// SQLite destination, plus a lookup index over locality and postcode.
pub struct AddressDatasetPipeline;

impl AddressDatasetPipeline {
    fn database_path(ctx: &StageContext<'_>) -> PathBuf {
        ctx.reference_dir.join(REFERENCE_DB)
    }
}

#[async_trait]
impl DatasetPipeline for AddressDatasetPipeline {
    fn dataset(&self) -> DatasetKind {
        DatasetKind::Address
    }

    fn builds_search_index(&self) -> bool {
        true
    }

    async fn download(&self, ctx: &StageContext<'_>) -> Result<DownloadOutcome> {
        ctx.ensure_not_cancelled()?;

        let response = reqwest::get(&ctx.manifest.url).await?;
        if !response.status().is_success() {
            return Err(CoverError::Dataset(format!(
                "download of {} failed with status {}",
                ctx.manifest.url,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(DownloadOutcome {
                files: Vec::new(),
                content_hash: String::new(),
            });
        }

        let content_hash = hex_digest(&bytes);
        let dir = ctx.download_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(file_name_from_url(&ctx.manifest.url, "addresses.csv.gz"));
        fs::write(&path, &bytes)?;
        info!(file = %path.display(), bytes = bytes.len(), "address dataset downloaded");

        Ok(DownloadOutcome {
            files: vec![path],
            content_hash,
        })
    }

    async fn extract(&self, ctx: &StageContext<'_>) -> Result<()> {
        ctx.ensure_not_cancelled()?;
        extract_downloads(&ctx.download_dir(), &ctx.extracted_dir())
    }

    async fn create_tables_and_schema(&self, ctx: &StageContext<'_>) -> Result<()> {
        ctx.ensure_not_cancelled()?;
        fs::create_dir_all(&ctx.reference_dir)?;
        let connection = Connection::open(Self::database_path(ctx))?;
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS addresses (
                address_id TEXT PRIMARY KEY,
                street     TEXT NOT NULL,
                locality   TEXT NOT NULL,
                state      TEXT NOT NULL,
                postcode   TEXT NOT NULL,
                latitude   REAL,
                longitude  REAL
            );",
        )?;
        Ok(())
    }

    async fn import_data(&self, ctx: &StageContext<'_>) -> Result<u64> {
        ctx.ensure_not_cancelled()?;
        let mut connection = Connection::open(Self::database_path(ctx))?;
        let tx = connection.transaction()?;
        // Full refresh: the drop is authoritative, and rerunning a resumed
        // import must not duplicate rows.
        tx.execute("DELETE FROM addresses", [])?;

        let mut imported = 0u64;
        for path in csv_files(&ctx.extracted_dir())? {
            ctx.ensure_not_cancelled()?;
            let mut reader = ReaderBuilder::new()
                .has_headers(true)
                .delimiter(ctx.manifest.delimiter as u8)
                .from_path(&path)?;
            let headers = reader.headers()?.clone();
            let id_col = find_column(&headers, &["address_id", "address_detail_pid", "id"]);
            let street_col = find_column(&headers, &["street", "street_name", "address_line"]);
            let locality_col = find_column(&headers, &["locality", "suburb", "locality_name"]);
            let state_col = find_column(&headers, &["state", "state_abbreviation"]);
            let postcode_col = find_column(&headers, &["postcode", "postal_code"]);
            let latitude_col = find_column(&headers, &["latitude", "lat"]);
            let longitude_col = find_column(&headers, &["longitude", "lon", "lng"]);

            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO addresses
                    (address_id, street, locality, state, postcode, latitude, longitude)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (index, record) in reader.records().enumerate() {
                let record = record?;
                let field = |col: Option<usize>| {
                    col.and_then(|c| record.get(c)).unwrap_or("").to_string()
                };
                let id = match id_col.and_then(|c| record.get(c)) {
                    Some(value) if !value.is_empty() => value.to_string(),
                    _ => format!("{}:{index}", path_stem(&path)),
                };
                insert.execute(rusqlite::params![
                    id,
                    field(street_col),
                    field(locality_col),
                    field(state_col),
                    field(postcode_col),
                    parse_coordinate(field(latitude_col)),
                    parse_coordinate(field(longitude_col)),
                ])?;
                imported += 1;
            }
        }
        tx.commit()?;
        info!(rows = imported, "address dataset imported");
        Ok(imported)
    }

    async fn build_search_index(&self, ctx: &StageContext<'_>) -> Result<()> {
        ctx.ensure_not_cancelled()?;
        let connection = Connection::open(Self::database_path(ctx))?;
        connection.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_addresses_locality
                 ON addresses (locality, postcode);
             CREATE INDEX IF NOT EXISTS idx_addresses_street
                 ON addresses (street);",
        )?;
        Ok(())
    }

    async fn archive_files(&self, ctx: &StageContext<'_>) -> Result<()> {
        ctx.ensure_not_cancelled()?;
        archive_downloads(ctx, DatasetKind::Address)
    }

    async fn clean_up(&self, ctx: &StageContext<'_>) -> Result<()> {
        remove_work_dir(&ctx.work_dir)
    }
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Unpacks every `.gz` download into the extraction directory; anything else
/// is copied through as-is.
pub(crate) fn extract_downloads(download_dir: &Path, extracted_dir: &Path) -> Result<()> {
    fs::create_dir_all(extracted_dir)?;
    for entry in fs::read_dir(download_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().is_some_and(|ext| ext == "gz") {
            let target = extracted_dir.join(path_stem(&path));
            let mut decoder = GzDecoder::new(File::open(&path)?);
            let mut output = File::create(&target)?;
            io::copy(&mut decoder, &mut output)?;
        } else {
            let target = extracted_dir.join(entry.file_name());
            fs::copy(&path, target)?;
        }
    }
    Ok(())
}

/// Moves downloaded files into a per-job archive directory.
pub(crate) fn archive_downloads(ctx: &StageContext<'_>, dataset: DatasetKind) -> Result<()> {
    let target_dir = ctx
        .archive_dir
        .join(dataset.as_str())
        .join(ctx.job.start_time.format("%Y%m%dT%H%M%S").to_string());
    fs::create_dir_all(&target_dir)?;
    let download_dir = ctx.download_dir();
    if !download_dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(&download_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            let target = target_dir.join(entry.file_name());
            fs::copy(&path, &target)?;
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

pub(crate) fn remove_work_dir(work_dir: &Path) -> Result<()> {
    if work_dir.exists() {
        fs::remove_dir_all(work_dir)?;
    }
    Ok(())
}

pub(crate) fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn find_column(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        candidates
            .iter()
            .any(|candidate| header.trim().eq_ignore_ascii_case(candidate))
    })
}

pub(crate) fn path_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

fn parse_coordinate(raw: String) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}
