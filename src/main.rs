use anyhow::Context;
use bacnet_events::{Config, EventEngine, LoggingTransport, SystemClock};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bacnet_events::init()?;

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "bacnet-events".to_string());
    let config_path = match args.next() {
        Some(path) if path == "--version" => {
            bacnet_events::print_system_info();
            return Ok(());
        }
        Some(path) => path,
        None => {
            error!("Usage: {} <config.yaml>", program);
            std::process::exit(1);
        }
    };

    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;
    info!(
        "Loaded {} objects, {} enrollments, {} notification classes",
        config.objects.len(),
        config.enrollments.len(),
        config.notification_classes.len()
    );

    let clock = Arc::new(SystemClock::new()?);
    let engine = EventEngine::new(config, clock, Arc::new(LoggingTransport::new()))
        .context("building event engine")?;
    engine.start();

    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Received shutdown signal");
    engine.stop();
    engine.flush().await;

    let stats = engine.stats();
    info!(
        "Final stats: {} in alarm, {} notifications sent, {} failed",
        stats.in_alarm, stats.notifications_sent, stats.notification_failures
    );
    Ok(())
}
