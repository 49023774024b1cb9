use anyhow::Result;
use shelfguard_app::TelemetryStack;
use shelfguard_core::TelemetryConfig;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Shelfguard v{}", env!("CARGO_PKG_VERSION"));

    let config = TelemetryConfig::from_env();
    let stack = Arc::new(TelemetryStack::initialize(config)?);
    stack.start_background_tasks();

    info!("Telemetry pipeline running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    stack.shutdown();

    let report = stack.security_stats();
    info!(
        inspected = report["monitor"]["inspected"].as_u64().unwrap_or(0),
        dispatched = report["dispatcher"]["dispatched"].as_u64().unwrap_or(0),
        "Shutdown complete"
    );
    Ok(())
}
