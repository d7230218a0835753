//! panel-fleet - VPN panel fleet manager with Hexagonal Architecture
//!
//! This is the composition root that wires together all the components.

use panel_fleet::config::load_config;
use panel_fleet::infrastructure::{health_failures, shutdown_signal, ShutdownController};
use panel_fleet::FleetManager;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from file + environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting panel-fleet backends={} strategy={} (hexagonal architecture)",
        cfg.backends.len(),
        cfg.selection_strategy
    );

    // ===== COMPOSITION ROOT =====

    // 1. Build panel clients, registry and monitor
    let manager = FleetManager::from_config(&cfg)?;

    // 2. Initial probe so the first snapshots exist before the loop starts
    let health = manager.fleet_health().await;
    match health_failures(&health) {
        Some(e) => tracing::warn!("initial probe: {}", e),
        None => tracing::info!("initial probe: all {} backends healthy", health.len()),
    }

    // 3. Periodic monitoring until a signal arrives
    let shutdown = ShutdownController::new();
    manager.start_health_monitoring(&shutdown)?;

    shutdown_signal(shutdown).await;
    manager.stop_health_monitoring().await;
    tracing::info!("panel-fleet stopped");

    Ok(())
}
