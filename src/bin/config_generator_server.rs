//! Config generator HTTP server
//!
//! Environment:
//! - CONFIG_GENERATOR_CONFIG - settings file (default `configGeneratorConfig.json`)
//! - BIND_ADDR               - listen address (default `0.0.0.0:5010`)

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config_generator::generator::ConfigGenerator;
use config_generator::server::router;
use config_generator::settings::RunSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,config_generator=debug,tower_http=debug".into()),
        )
        .init();

    let settings_path = std::env::var("CONFIG_GENERATOR_CONFIG")
        .unwrap_or_else(|_| "configGeneratorConfig.json".to_string());
    let settings = RunSettings::load(&settings_path)
        .with_context(|| format!("Loading settings from {}", settings_path))?;
    let generator = ConfigGenerator::connect(settings)
        .await
        .context("Setting up the config generator")?;

    let app = router(Arc::new(generator));

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5010".to_string());
    info!("Config generator listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Binding {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
