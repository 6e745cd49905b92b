// =============================================================================
// Boreas Perp Sentinel — Main Entry Point
// =============================================================================
//
// Wires config -> exchange client -> position store -> exit manager, resumes
// exit-strategy state for every open position, then runs the monitoring and
// reconciliation loops until ctrl-c. Shutdown is requested between position
// iterations, never mid-close.
// =============================================================================

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use boreas_bot::config::RuntimeConfig;
use boreas_bot::exit::manager::ExitStrategyManager;
use boreas_bot::monitor;
use boreas_bot::okx::{ExchangeApi, OkxClient};
use boreas_bot::position::store::PositionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Boreas Perp Sentinel — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // ── 2. Exchange client ───────────────────────────────────────────────
    let api_key = std::env::var("OKX_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("OKX_API_SECRET").unwrap_or_default();
    let passphrase = std::env::var("OKX_PASSPHRASE").unwrap_or_default();
    if api_key.is_empty() || api_secret.is_empty() {
        warn!("OKX credentials missing — signed endpoints will fail");
    }
    let exchange: Arc<dyn ExchangeApi> =
        Arc::new(OkxClient::new(api_key, api_secret, passphrase));

    // ── 3. Position book & exit manager ──────────────────────────────────
    let store = Arc::new(PositionStore::load(&config.positions_file)?);

    let mut manager = ExitStrategyManager::from_configs(
        config.strategy_configs(),
        Arc::clone(&exchange),
        Arc::clone(&store),
    )?;

    // Resume: re-seed trailing extrema, ladder progress, and resting orders
    // for every position that survived the restart.
    let open = store.open_positions();
    info!(open = open.len(), "resuming open positions");
    manager.init_open_positions(&open).await;

    // ── 4. Background tasks ──────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor_handle = tokio::spawn(monitor::run_exit_monitor(
        manager,
        Arc::clone(&exchange),
        Arc::clone(&store),
        config.monitor_interval_secs,
        shutdown_rx.clone(),
    ));

    let reconciler_handle = tokio::spawn(monitor::run_reconciler(
        Arc::clone(&exchange),
        Arc::clone(&store),
        config.reconcile_interval_secs,
        shutdown_rx,
    ));

    info!(
        monitor_interval_secs = config.monitor_interval_secs,
        reconcile_interval_secs = config.reconcile_interval_secs,
        "engine running — ctrl-c to stop"
    );

    // ── 5. Shutdown ──────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested — finishing the current iteration");
    let _ = shutdown_tx.send(true);

    let _ = monitor_handle.await;
    let _ = reconciler_handle.await;

    info!("Boreas stopped cleanly");
    Ok(())
}
