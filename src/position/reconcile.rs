// =============================================================================
// Reconciliation — compare the local position book against the exchange
// =============================================================================
//
// SAFETY POLICY: this module corrects local bookkeeping only. It will never
// place, cancel, or close anything on the exchange; drift it cannot resolve
// locally is logged for the operator.
//
// Realised-PnL merge rule: local accumulation is authoritative between syncs.
// An exchange-reported value REPLACES the local one only when the exchange
// record's update timestamp lies within `SYNC_TOLERANCE_MS` of the locally
// recorded close event — otherwise the exchange has not yet observed our
// latest close and its number is stale; keep ours and retry next cycle.
// =============================================================================

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::okx::{ExchangeApi, ExchangePosition};
use crate::position::model::Position;
use crate::position::store::PositionStore;

/// How close (ms) the exchange update time must be to our recorded close
/// event before its realised-PnL figure replaces the local one.
const SYNC_TOLERANCE_MS: i64 = 60_000;

/// Ignore realised-PnL differences below this (fee rounding noise).
const PNL_EPS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Summary of a single reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Local open positions that matched an exchange record.
    pub matched: u32,
    /// Positions whose quantity sign was corrected.
    pub sign_corrections: u32,
    /// Positions whose realised PnL was synced from the exchange.
    pub pnl_synced: u32,
    /// Local open positions with no matching exchange record.
    pub missing_on_exchange: u32,
    /// Exchange positions with no local record.
    pub orphans: u32,
    /// ISO-8601 timestamp of this run.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Merge rule (pure, unit-tested)
// ---------------------------------------------------------------------------

/// Decide whether the exchange's realised-PnL figure should replace the local
/// accumulation for `position`.
fn should_sync_pnl(position: &Position, exchange: &ExchangePosition) -> bool {
    if (exchange.realized_pnl - position.realized_pnl).abs() <= PNL_EPS {
        return false;
    }
    // Without a local close event there is nothing the exchange could be
    // lagging behind; accept its figure.
    let Some(close_time) = position.close_time else {
        return true;
    };
    (exchange.updated_ms - close_time).abs() <= SYNC_TOLERANCE_MS
}

/// Apply exchange-reported state to a single local position. Returns
/// (sign_corrected, pnl_synced).
fn merge_exchange_state(position: &mut Position, exchange: &ExchangePosition) -> (bool, bool) {
    // Quantity-sign consistency: correct the sign, never the direction.
    let sign_corrected = position.normalize();

    let pnl_synced = if should_sync_pnl(position, exchange) {
        debug!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            local = position.realized_pnl,
            exchange = exchange.realized_pnl,
            "realised PnL synced from exchange"
        );
        position.realized_pnl = exchange.realized_pnl;
        true
    } else {
        false
    };

    (sign_corrected, pnl_synced)
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Run one reconciliation cycle:
///
/// 1. Fetch positions from the exchange.
/// 2. For each local open position, correct quantity-sign drift and apply
///    the realised-PnL merge rule.
/// 3. Warn about local positions missing on the exchange and about orphan
///    exchange exposures.
pub async fn reconcile_once(
    exchange: &dyn ExchangeApi,
    store: &PositionStore,
) -> Result<ReconcileReport> {
    let now = Utc::now().to_rfc3339();
    debug!(timestamp = %now, "reconciliation cycle started");

    let exchange_positions = exchange
        .get_positions()
        .await
        .context("reconcile: failed to fetch exchange positions")?;

    let mut matched = 0u32;
    let mut sign_corrections = 0u32;
    let mut pnl_synced = 0u32;
    let mut missing_on_exchange = 0u32;

    for mut local in store.open_positions() {
        let remote = exchange_positions
            .iter()
            .find(|e| e.symbol == local.symbol && e.direction == local.direction);

        match remote {
            Some(remote) => {
                matched += 1;
                let (signed, synced) = merge_exchange_state(&mut local, remote);
                if signed {
                    sign_corrections += 1;
                }
                if synced {
                    pnl_synced += 1;
                }
                if signed || synced {
                    store.save_position(&local)?;
                }
            }
            None => {
                missing_on_exchange += 1;
                warn!(
                    symbol = %local.symbol,
                    position_id = %local.position_id,
                    "local open position has NO matching exchange record — possible drift"
                );
            }
        }
    }

    // Orphans: exchange exposures with no local record.
    let local_open = store.open_positions();
    let mut orphans = 0u32;
    for remote in &exchange_positions {
        let known = local_open
            .iter()
            .any(|p| p.symbol == remote.symbol && p.direction == remote.direction);
        if !known && remote.quantity.abs() > 0.0 {
            orphans += 1;
            warn!(
                symbol = %remote.symbol,
                direction = %remote.direction,
                quantity = remote.quantity,
                "orphan exchange position — no matching local record"
            );
        }
    }

    let report = ReconcileReport {
        matched,
        sign_corrections,
        pnl_synced,
        missing_on_exchange,
        orphans,
        timestamp: now,
    };

    info!(
        matched,
        sign_corrections,
        pnl_synced,
        missing_on_exchange,
        orphans,
        "reconciliation cycle completed"
    );

    Ok(report)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn local(realized: f64, close_time: Option<i64>) -> Position {
        let mut p = Position::open("BTC-USDT-SWAP", Direction::Long, 100.0, 1.0, 1, None);
        p.realized_pnl = realized;
        p.close_time = close_time;
        p
    }

    fn remote(realized: f64, updated_ms: i64) -> ExchangePosition {
        ExchangePosition {
            symbol: "BTC-USDT-SWAP".to_string(),
            direction: Direction::Long,
            quantity: 1.0,
            avg_entry_price: 100.0,
            realized_pnl: realized,
            updated_ms,
        }
    }

    #[test]
    fn equal_pnl_is_not_synced() {
        let p = local(5.0, Some(1_000_000));
        assert!(!should_sync_pnl(&p, &remote(5.0, 1_000_000)));
    }

    #[test]
    fn stale_exchange_value_is_retained_locally() {
        // Local close event at t=1_000_000; exchange record updated long
        // before it — the exchange has not observed our close yet.
        let p = local(25.0, Some(1_000_000));
        assert!(!should_sync_pnl(&p, &remote(10.0, 1_000_000 - 300_000)));
    }

    #[test]
    fn proximate_exchange_value_replaces_local() {
        let p = local(25.0, Some(1_000_000));
        assert!(should_sync_pnl(&p, &remote(24.5, 1_000_000 + 30_000)));

        let mut p = local(25.0, Some(1_000_000));
        let r = remote(24.5, 1_000_000 + 30_000);
        let (_, synced) = merge_exchange_state(&mut p, &r);
        assert!(synced);
        assert_eq!(p.realized_pnl, 24.5);
    }

    #[test]
    fn no_local_close_event_accepts_exchange_value() {
        let p = local(0.0, None);
        assert!(should_sync_pnl(&p, &remote(3.0, 42)));
    }

    #[test]
    fn merge_corrects_quantity_sign_not_direction() {
        let mut p = local(0.0, None);
        p.quantity = -1.0; // corrupted
        let r = remote(0.0, 0);
        let (signed, _) = merge_exchange_state(&mut p, &r);
        assert!(signed);
        assert_eq!(p.direction, Direction::Long);
        assert_eq!(p.quantity, 1.0);
    }
}
