use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use coverbase::config::{default_config_path, Config};

use super::print_json;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the current configuration to disk
    Init,
    /// Update one configuration value
    Set(ConfigSetArgs),
}

#[derive(Args)]
pub struct ConfigSetArgs {
    /// One of: data_dir, download_dir, archive_dir, address_url, vehicle_url,
    /// snapshot_interval, default_time_zone
    pub key: String,
    pub value: String,
}

pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<()> {
    let resolved = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    let mut config = Config::load_or_default(Some(&resolved))?;

    match command {
        ConfigCommands::Show => print_json(&config),
        ConfigCommands::Init => {
            config.save(&resolved)?;
            println!("configuration written to {}", resolved.display());
            Ok(())
        }
        ConfigCommands::Set(args) => {
            apply(&mut config, &args.key, &args.value)?;
            config.save(&resolved)?;
            print_json(&config)
        }
    }
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = PathBuf::from(value),
        "download_dir" => config.updater.download_dir = Some(PathBuf::from(value)),
        "archive_dir" => config.updater.archive_dir = Some(PathBuf::from(value)),
        "address_url" => config.updater.address_dataset_url = value.to_string(),
        "vehicle_url" => config.updater.vehicle_dataset_url = value.to_string(),
        "snapshot_interval" => config.snapshot_interval = value.parse()?,
        "default_time_zone" => config.summary.default_time_zone = value.to_string(),
        other => bail!("unknown configuration key '{other}'"),
    }
    Ok(())
}
