pub mod config;
pub mod organisation;
pub mod portal;
pub mod property;
pub mod summary;
pub mod updater;

use std::{path::Path, sync::Arc};

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use coverbase::{
    aggregate::TenantId, config::Config, repository::AggregateRepository, store::EventStore,
};

pub(crate) struct Platform {
    pub config: Config,
    pub repository: AggregateRepository,
}

pub(crate) fn open_platform(config_path: Option<&Path>) -> Result<Platform> {
    let config = Config::load_or_default(config_path)?;
    config.ensure_data_dir()?;
    let store = Arc::new(EventStore::open(config.event_store_path())?);
    let repository = AggregateRepository::with_snapshot_interval(store, config.snapshot_interval);
    Ok(Platform { config, repository })
}

pub(crate) fn tenant(raw: &str) -> Result<TenantId> {
    Ok(TenantId::new(raw)?)
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Ok(Uuid::parse_str(raw.trim())?)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
