//! chaos-dns binary entry point.

use chaos_dns::resolver::KubePodResolver;
use chaos_dns::{telemetry, ChaosDnsServer, Config};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// DNS-level fault injection service for container clusters.
#[derive(Parser, Debug)]
#[command(name = "chaos-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "chaos-dns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("CHAOS_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        control_port = config.control.port,
        "Starting chaos-dns"
    );

    let resolver = Arc::new(KubePodResolver::from_config(&config.kubernetes).await?);

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        signal.cancel();
    });

    let server = ChaosDnsServer::new(config, resolver);
    if let Err(e) = server.run(shutdown).await {
        error!("chaos-dns error: {}", e);
        return Err(e.into());
    }

    info!("chaos-dns shutdown complete");
    Ok(())
}
