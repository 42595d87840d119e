use clap::Parser;
use lumen_config::{ConfigLoader, LoggingConfig};
use lumen_core::{Observability, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing lumen.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new(&args.config_dir).load_validated()?;
    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing(&config.logging);
    info!(
        "Starting {} ({}) with config dir: {}",
        config.system.name,
        config.system.environment,
        args.config_dir.display()
    );

    let service = Arc::new(Observability::with_http_transport(config).await?);
    let dispatcher = service.spawn_dispatcher().await?;
    let scheduler = Scheduler::from_service(service.clone())?.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    scheduler.shutdown().await;
    dispatcher.abort();

    let health = service.health().await;
    info!(
        status = %health.status,
        active_alerts = health.active_alerts,
        "Lumen stopped"
    );
    Ok(())
}
