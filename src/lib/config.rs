use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{CoverError, Result};

pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 100;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

const DATA_DIR_ENV: &str = "COVERBASE_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for the event store, job store, and reference data.
    pub data_dir: PathBuf,
    /// A snapshot is cut every this-many committed events per aggregate.
    pub snapshot_interval: u64,
    /// Worker id folded into updater job ids.
    pub snowflake_worker_id: u16,
    pub updater: UpdaterConfig,
    pub summary: SummaryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Working directory for in-flight downloads; defaults under `data_dir`.
    pub download_dir: Option<PathBuf>,
    /// Directory where processed dataset files are archived.
    pub archive_dir: Option<PathBuf>,
    /// Poll interval used by wait-for-completion, in seconds.
    pub poll_interval_secs: u64,
    /// Source URL for the national address reference dataset.
    pub address_dataset_url: String,
    /// Source URL for the vehicle reference dataset.
    pub vehicle_dataset_url: String,
    /// Field delimiter for dataset imports.
    pub delimiter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Time zone applied when a summary query does not name one.
    pub default_time_zone: String,
    /// Extra alias -> IANA name entries seeded into the time zone registry.
    pub time_zone_aliases: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            snowflake_worker_id: 0,
            updater: UpdaterConfig::default(),
            summary: SummaryConfig::default(),
        }
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            archive_dir: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            address_dataset_url: String::new(),
            vehicle_dataset_url: String::new(),
            delimiter: ",".to_string(),
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert("AET".to_string(), "Australia/Melbourne".to_string());
        aliases.insert("AWST".to_string(), "Australia/Perth".to_string());
        Self {
            default_time_zone: "Etc/UTC".to_string(),
            time_zone_aliases: aliases,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Loads the config at `path` (or the default location), falling back to
    /// defaults when no file exists yet.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        if resolved.exists() {
            Self::load(&resolved)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn event_store_path(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    pub fn job_store_path(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn reference_dir(&self) -> PathBuf {
        self.data_dir.join("reference")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.updater
            .download_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("downloads"))
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.updater
            .archive_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("archive"))
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| CoverError::Config("unable to determine the user config directory".into()))?;
    Ok(base.join("coverbase").join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("coverbase"))
        .unwrap_or_else(|| PathBuf::from(".coverbase"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.data_dir = dir.path().join("data");
        config.updater.address_dataset_url = "https://example.test/addresses.csv.gz".into();
        config.save(&path).expect("save config");

        let loaded = Config::load(&path).expect("load config");
        assert_eq!(loaded.data_dir, config.data_dir);
        assert_eq!(
            loaded.updater.address_dataset_url,
            "https://example.test/addresses.csv.gz"
        );
        assert_eq!(loaded.snapshot_interval, DEFAULT_SNAPSHOT_INTERVAL);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nope.toml");
        let config = Config::load_or_default(Some(&path)).expect("defaults");
        assert_eq!(config.snapshot_interval, DEFAULT_SNAPSHOT_INTERVAL);
        assert_eq!(config.updater.delimiter, ",");
    }

    #[test]
    fn derived_paths_hang_off_data_dir() {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/tmp/cb");
        assert_eq!(config.event_store_path(), PathBuf::from("/tmp/cb/events"));
        assert_eq!(config.download_dir(), PathBuf::from("/tmp/cb/downloads"));
        config.updater.download_dir = Some(PathBuf::from("/var/dl"));
        assert_eq!(config.download_dir(), PathBuf::from("/var/dl"));
    }
}
