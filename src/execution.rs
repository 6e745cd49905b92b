// =============================================================================
// Close execution — reduce-only market closes and close accounting
// =============================================================================
//
// `PositionCloser` is the close executor handed to the exit manager: it
// places the opposing reduce-only market order sized by the requested
// fraction, then settles local accounting against the store.
//
// `settle_external_fill` is the fuller accounting path for exits that
// already executed on the exchange (a resting take-profit filled): no order
// is placed, accounting runs exactly once.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::exit::manager::CloseExecutor;
use crate::exit::signal::ExitSignal;
use crate::okx::ExchangeApi;
use crate::position::model::Position;
use crate::position::store::PositionStore;

/// Close fractions at or above this are treated as a full close.
const FULL_CLOSE_THRESHOLD: f64 = 1.0 - 1e-9;

// ---------------------------------------------------------------------------
// PositionCloser
// ---------------------------------------------------------------------------

pub struct PositionCloser {
    exchange: Arc<dyn ExchangeApi>,
    store: Arc<PositionStore>,
}

impl PositionCloser {
    pub fn new(exchange: Arc<dyn ExchangeApi>, store: Arc<PositionStore>) -> Self {
        Self { exchange, store }
    }
}

#[async_trait]
impl CloseExecutor for PositionCloser {
    async fn execute_close(
        &self,
        symbol: &str,
        position: &Position,
        close_percentage: f64,
    ) -> (bool, String) {
        let fraction = close_percentage.clamp(0.0, 1.0);
        let close_size = position.size() * fraction;
        if close_size <= 0.0 {
            return (false, "nothing to close".to_string());
        }

        let order_id = match self
            .exchange
            .place_market_close(symbol, position.direction, close_size)
            .await
        {
            Ok(order_id) => order_id,
            Err(e) => {
                warn!(symbol, error = %e, "market close placement failed");
                return (false, format!("close order failed: {e}"));
            }
        };

        // Accounting uses the current mark price; when it is unavailable the
        // PnL accrual is skipped and the next reconciliation sync repairs it.
        let fill_price = self.exchange.get_mark_price(symbol).await.unwrap_or(0.0);
        if fill_price <= 0.0 {
            warn!(
                symbol,
                position_id = %position.position_id,
                "mark price unavailable during close accounting — PnL deferred to reconciliation"
            );
        }

        let now_ms = Utc::now().timestamp_millis();
        let result = if fraction >= FULL_CLOSE_THRESHOLD {
            self.store
                .mark_closed(symbol, &position.position_id, fill_price, now_ms)
                .map(|_| ())
        } else {
            match self.store.find(symbol, &position.position_id) {
                Some(mut stored) if !stored.closed => {
                    stored.apply_partial_close(fill_price, fraction, now_ms);
                    self.store.save_position(&stored)
                }
                _ => Ok(()),
            }
        };

        if let Err(e) = result {
            warn!(symbol, error = %e, "close accounting persistence failed");
            return (true, format!("order {order_id} placed, accounting failed: {e}"));
        }

        info!(
            symbol,
            position_id = %position.position_id,
            order_id = %order_id,
            fraction,
            fill_price,
            "close executed"
        );
        (true, format!("order {order_id} placed"))
    }
}

// ---------------------------------------------------------------------------
// External-fill settlement
// ---------------------------------------------------------------------------

/// Settle a `need_cleanup` exit: the exchange already filled the order, so
/// only the local accounting runs. The known fill price from the signal is
/// preferred over the current mark price.
pub fn settle_external_fill(
    position: &Position,
    signal: &ExitSignal,
    fallback_price: f64,
    store: &PositionStore,
) -> anyhow::Result<()> {
    let fill_price = signal.exit_price.unwrap_or(fallback_price);
    let now_ms = Utc::now().timestamp_millis();

    let closed = store.mark_closed(&position.symbol, &position.position_id, fill_price, now_ms)?;
    match closed {
        Some(closed) => {
            info!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                kind = %signal.kind,
                fill_price,
                realized_pnl = closed.realized_pnl,
                "exchange-side exit settled"
            );
        }
        None => {
            // Already settled earlier; the exactly-once guarantee held.
            warn!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                "external fill settlement found position already closed"
            );
        }
    }
    Ok(())
}
