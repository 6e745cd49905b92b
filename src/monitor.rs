// =============================================================================
// Exit Monitor Loop — periodic evaluation of every open position
// =============================================================================
//
// Runs as a background Tokio task, waking every N seconds to:
//   1. Iterate all open positions sequentially (no intra-tick parallelism).
//   2. Fetch the mark price; a missing price skips the position this tick.
//   3. Update position extrema and unrealised PnL, persisting them.
//   4. Run the exit manager; settle exchange-side fills exactly once.
//
// Shutdown is observed between position iterations only, never mid-close, so
// a cancel cannot leave a resting order gone but the accounting unrun.
// =============================================================================

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::execution::{settle_external_fill, PositionCloser};
use crate::exit::manager::ExitStrategyManager;
use crate::okx::ExchangeApi;
use crate::position::reconcile::reconcile_once;
use crate::position::store::PositionStore;

/// One pass over the open book.
pub async fn run_once(
    manager: &mut ExitStrategyManager,
    exchange: &Arc<dyn ExchangeApi>,
    store: &Arc<PositionStore>,
    closer: &PositionCloser,
    shutdown: &watch::Receiver<bool>,
) {
    let open_positions = store.open_positions();
    if open_positions.is_empty() {
        debug!("exit monitor: no open positions");
        return;
    }

    debug!(count = open_positions.len(), "exit monitor: evaluating positions");

    for mut position in open_positions {
        // Cancellation is honoured only between iterations.
        if *shutdown.borrow() {
            return;
        }

        let price = match exchange.get_mark_price(&position.symbol).await {
            Ok(price) => price,
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "mark price fetch failed — skipping");
                continue;
            }
        };
        if price <= 0.0 {
            warn!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                price,
                "invalid mark price — skipping exit evaluation"
            );
            continue;
        }

        position.update_extrema(price);
        position.recompute_unrealized(price);
        if let Err(e) = store.save_position(&position) {
            warn!(symbol = %position.symbol, error = %e, "failed to persist tick update");
        }

        let (triggered, signal) = manager
            .check_exit_conditions(&mut position, price, closer)
            .await;

        if let Some(signal) = signal {
            // The exchange already filled this exit; run the fuller
            // close-accounting path exactly once, then drop the resources.
            if let Err(e) = settle_external_fill(&position, &signal, price, store) {
                warn!(
                    symbol = %position.symbol,
                    position_id = %position.position_id,
                    error = %e,
                    "external fill settlement failed"
                );
            }
            manager
                .clean_position_resources(&position.symbol, &position.position_id)
                .await;
        } else if triggered {
            debug!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                "exit executed this tick"
            );
        }
    }
}

/// Run the exit monitor until `shutdown` flips to true. Spawn once at
/// engine startup.
pub async fn run_exit_monitor(
    mut manager: ExitStrategyManager,
    exchange: Arc<dyn ExchangeApi>,
    store: Arc<PositionStore>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs, "exit monitor started");

    let closer = PositionCloser::new(Arc::clone(&exchange), Arc::clone(&store));
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        run_once(&mut manager, &exchange, &store, &closer, &shutdown).await;
    }

    info!("exit monitor stopped");
}

/// Run the reconciliation loop until `shutdown` flips to true.
pub async fn run_reconciler(
    exchange: Arc<dyn ExchangeApi>,
    store: Arc<PositionStore>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs, "reconciler started");

    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = reconcile_once(exchange.as_ref(), &store).await {
            warn!(error = %e, "reconciliation cycle failed");
        }
    }

    info!("reconciler stopped");
}
