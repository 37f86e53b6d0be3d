mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{
    config::ConfigCommands, organisation::OrganisationCommands, portal::PortalCommands,
    property::PropertyCommands, summary::SummaryArgs, updater::UpdaterCommands,
};

#[derive(Parser)]
#[command(author, version, about = "Coverbase policy administration CLI")]
struct Cli {
    /// Path to the configuration file. Defaults to ~/.config/coverbase/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage organisations
    Organisation {
        #[command(subcommand)]
        command: OrganisationCommands,
    },
    /// Manage portals
    Portal {
        #[command(subcommand)]
        command: PortalCommands,
    },
    /// Manage additional property definitions
    Property {
        #[command(subcommand)]
        command: PropertyCommands,
    },
    /// Generate a periodic dashboard summary
    Summary(SummaryArgs),
    /// Run and inspect reference dataset updater jobs
    Updater {
        #[command(subcommand)]
        command: UpdaterCommands,
    },
    /// Inspect or update the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    coverbase::logging::init()?;

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Organisation { command } => commands::organisation::run(command, config_path),
        Commands::Portal { command } => commands::portal::run(command, config_path),
        Commands::Property { command } => commands::property::run(command, config_path),
        Commands::Summary(args) => commands::summary::run(args, config_path),
        Commands::Updater { command } => commands::updater::run(command, config_path).await,
        Commands::Config { command } => commands::config::run(command, config_path),
    }
}
