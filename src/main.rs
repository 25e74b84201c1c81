use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

mod cli;

use products_api::{config, init_tracing, server, telemetry::Telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = cli::Cli::parse();
    let config = config::load_config()?;

    match args.get_command() {
        cli::Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        cli::Commands::Start => run(config).await,
    }
}

async fn run(config: config::Config) -> Result<()> {
    // An exporter that cannot be built must not keep the API down
    let (telemetry, init_error) = match Telemetry::initialize(&config.telemetry) {
        Ok(telemetry) => (telemetry, None),
        Err(e) => (Telemetry::disabled(&config.telemetry), Some(e)),
    };
    let telemetry = Arc::new(telemetry);

    init_tracing(&telemetry, &config.log_level);

    if let Some(e) = init_error {
        error!(error = %e, "Failed to initialize telemetry, continuing without export");
    }
    info!(
        service_name = %config.telemetry.service_name,
        environment = %config.telemetry.environment,
        exporting = telemetry.is_exporting(),
        "Starting Products API"
    );

    let served = server::start_server(&config, telemetry.clone()).await;
    if let Err(e) = &served {
        error!(error = %e, "Server error");
    }

    if let Err(e) = telemetry
        .shutdown(config.telemetry.shutdown_timeout())
        .await
    {
        warn!(error = %e, "Error shutting down telemetry");
    }

    info!("Products API stopped");
    served
}
