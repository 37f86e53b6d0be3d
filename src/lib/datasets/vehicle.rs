use std::{fs, path::PathBuf};

use async_trait::async_trait;
use csv::ReaderBuilder;
use rusqlite::Connection;
use tracing::info;

use crate::{
    error::{CoverError, Result},
    updater::DatasetKind,
};

use super::{
    address::{
        archive_downloads, csv_files, extract_downloads, find_column, hex_digest, path_stem,
        remove_work_dir,
    },
    file_name_from_url, DatasetPipeline, DownloadOutcome, StageContext,
};

const REFERENCE_DB: &str = "vehicle.sqlite";

/// Ingest pipeline for the vehicle reference dataset (makes, families, and
/// model years used for rating). No search index stage; lookups key on the
/// vehicle code directly.
pub struct VehicleDatasetPipeline;

impl VehicleDatasetPipeline {
    fn database_path(ctx: &StageContext<'_>) -> PathBuf {
        ctx.reference_dir.join(REFERENCE_DB)
    }
}

#[async_trait]
impl DatasetPipeline for VehicleDatasetPipeline {
    fn dataset(&self) -> DatasetKind {
        DatasetKind::Vehicle
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
        let path = dir.join(file_name_from_url(&ctx.manifest.url, "vehicles.csv.gz"));
        fs::write(&path, &bytes)?;
        info!(file = %path.display(), bytes = bytes.len(), "vehicle dataset downloaded");

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
            "CREATE TABLE IF NOT EXISTS vehicles (
                vehicle_code TEXT PRIMARY KEY,
                make         TEXT NOT NULL,
                family       TEXT NOT NULL,
                year         INTEGER,
                body_style   TEXT,
                transmission TEXT,
                engine       TEXT
            );",
        )?;
        Ok(())
    }

    async fn import_data(&self, ctx: &StageContext<'_>) -> Result<u64> {
        ctx.ensure_not_cancelled()?;
        let mut connection = Connection::open(Self::database_path(ctx))?;
        let tx = connection.transaction()?;
        tx.execute("DELETE FROM vehicles", [])?;

        let mut imported = 0u64;
        for path in csv_files(&ctx.extracted_dir())? {
            ctx.ensure_not_cancelled()?;
            let mut reader = ReaderBuilder::new()
                .has_headers(true)
                .delimiter(ctx.manifest.delimiter as u8)
                .from_path(&path)?;
            let headers = reader.headers()?.clone();
            let code_col = find_column(&headers, &["vehicle_code", "vehicle_key", "code"]);
            let make_col = find_column(&headers, &["make", "manufacturer"]);
            let family_col = find_column(&headers, &["family", "model"]);
            let year_col = find_column(&headers, &["year", "year_group"]);
            let body_col = find_column(&headers, &["body_style", "body"]);
            let transmission_col = find_column(&headers, &["transmission", "gear_type"]);
            let engine_col = find_column(&headers, &["engine", "engine_description"]);

            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO vehicles
                    (vehicle_code, make, family, year, body_style, transmission, engine)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (index, record) in reader.records().enumerate() {
                let record = record?;
                let field = |col: Option<usize>| {
                    col.and_then(|c| record.get(c)).unwrap_or("").to_string()
                };
                let code = match code_col.and_then(|c| record.get(c)) {
                    Some(value) if !value.is_empty() => value.to_string(),
                    _ => format!("{}:{index}", path_stem(&path)),
                };
                let year = field(year_col).trim().parse::<i64>().ok();
                insert.execute(rusqlite::params![
                    code,
                    field(make_col),
                    field(family_col),
                    year,
                    field(body_col),
                    field(transmission_col),
                    field(engine_col),
                ])?;
                imported += 1;
            }
        }
        tx.commit()?;
        info!(rows = imported, "vehicle dataset imported");
        Ok(imported)
    }

    async fn build_search_index(&self, _ctx: &StageContext<'_>) -> Result<()> {
        // Not part of this dataset's pipeline.
        Ok(())
    }

    async fn archive_files(&self, ctx: &StageContext<'_>) -> Result<()> {
        ctx.ensure_not_cancelled()?;
        archive_downloads(ctx, DatasetKind::Vehicle)
    }

    async fn clean_up(&self, ctx: &StageContext<'_>) -> Result<()> {
        remove_work_dir(&ctx.work_dir)
    }
}
