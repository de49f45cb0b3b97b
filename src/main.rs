//! vault-unsealer - unseal Vault clusters across datacenters

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use vault_unsealer::{
    config::{Args, Command, UnsealerConfig},
    key_resolver,
    logging::{init_tracing, TracingReporter},
    run,
    vault::VaultConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format);

    let config = match UnsealerConfig::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let command = args.command();
    info!("Config file: {}", args.config.display());
    info!(
        "Datacenters: {}",
        if config.selector.is_empty() {
            "all"
        } else {
            config.selector.as_str()
        }
    );
    info!("Protocol: {}", config.connect.protocol);
    if let Some(ref ca_path) = config.connect.ca_path {
        info!("CA bundle: {}", ca_path.display());
    }
    info!("Command: {:?}", command);

    let connector = VaultConnector::load(&config.connect).await;
    let outcome = run(
        &config,
        command,
        Arc::new(connector),
        key_resolver(&config),
        Arc::new(TracingReporter),
    )
    .await;

    if outcome.has_failures() && args.fail_on_error {
        error!("{} of {} host(s) failed", outcome.failed, outcome.hosts);
        std::process::exit(1);
    }

    Ok(())
}
