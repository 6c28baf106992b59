//! Config generator command line interface
//!
//! # Usage
//!
//! ```bash
//! # Service configs and permissions.json
//! config-generator configGeneratorConfig.json all
//!
//! # Only the QGIS projects
//! config-generator configGeneratorConfig.json qgs
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use config_generator::generator::ConfigGenerator;
use config_generator::run_log::RunLog;
use config_generator::settings::RunSettings;

#[derive(Parser)]
#[command(name = "config-generator")]
#[command(version)]
#[command(about = "Generate service configs, permissions and QGIS projects from the ConfigDB")]
#[command(long_about = None)]
struct Cli {
    /// Path to configGeneratorConfig.json
    settings: PathBuf,

    /// What to generate
    #[arg(value_enum)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
#[value(rename_all = "snake_case")]
enum Command {
    /// Service configs and permissions
    All,
    /// Service configs only
    ServiceConfigs,
    /// permissions.json only
    Permissions,
    /// QGIS projects
    Qgs,
}

async fn run(cli: Cli) -> anyhow::Result<RunLog> {
    let settings = RunSettings::load(&cli.settings)
        .with_context(|| format!("Loading settings from {}", cli.settings.display()))?;
    let generator = ConfigGenerator::connect(settings)
        .await
        .context("Setting up the config generator")?;

    let log = match cli.command {
        Command::All => generator.write_all().await?,
        Command::ServiceConfigs => generator.write_configs().await?,
        Command::Permissions => generator.write_permissions().await?,
        Command::Qgs => generator.write_qgs().await?,
    };
    Ok(log)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,config_generator=debug".into()),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(log) => {
            if log.has_errors() {
                eprintln!("Finished with errors, see log above");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
