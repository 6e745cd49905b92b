// =============================================================================
// Ordered take-profit / stop-loss — exchange-resident TP limit order
// =============================================================================
//
// On position init a reduce-only limit order is parked at the take-profit
// price and recorded in the arena. Each tick then polls that order:
//
//   - no longer resting (filled / canceled / unknown id) -> the exit already
//     executed on the exchange; emit a `need_cleanup` TAKE_PROFIT signal so
//     the caller runs the fuller close-accounting path exactly once and no
//     further order is placed;
//   - still resting -> evaluate a plain percentage stop-loss; a breach goes
//     down the normal path (the manager cancels the resting TP first to
//     avoid a double fill).
//
// Placement failure leaves the position without a resting order: degraded but
// not fatal, the stop-loss check still runs and a later init may succeed.
// =============================================================================

use tracing::{debug, info, warn};

use crate::exit::config::OrderedTpSlConfig;
use crate::exit::signal::{ExitSignal, TriggerKind};
use crate::exit::tracker::{PositionTracker, RestingOrder};
use crate::okx::ExchangeApi;
use crate::position::model::Position;
use crate::types::{round_to_tick, Direction};

pub const NAME: &str = "ordered_tp_sl";

#[derive(Debug, Clone)]
pub struct OrderedTpSlExit {
    pub config: OrderedTpSlConfig,
}

impl OrderedTpSlExit {
    pub fn new(config: OrderedTpSlConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Park the reduce-only take-profit limit order for `position` and record
    /// it in the arena. A no-op when one is already resting.
    pub async fn init_position_resources(
        &self,
        position: &Position,
        tracker: &mut PositionTracker,
        exchange: &dyn ExchangeApi,
        tick: Option<f64>,
    ) {
        if tracker.resting_order.is_some() {
            return;
        }

        let tp_pct = position
            .leverage_adjusted(position.effective_take_profit_pct(self.config.take_profit_pct));
        let raw_price = match position.direction {
            Direction::Long => position.entry_price * (1.0 + tp_pct),
            Direction::Short => position.entry_price * (1.0 - tp_pct),
        };
        let tp_price = round_to_tick(raw_price, tick.unwrap_or(0.0));

        match exchange
            .place_limit_order(
                &position.symbol,
                position.direction.closing_side(),
                position.direction,
                position.size(),
                tp_price,
                true,
            )
            .await
        {
            Ok(order_id) => {
                info!(
                    symbol = %position.symbol,
                    position_id = %position.position_id,
                    order_id = %order_id,
                    tp_price,
                    "take-profit limit order placed"
                );
                tracker.resting_order = Some(RestingOrder { order_id, tp_price });
            }
            Err(e) => {
                // Degraded: no resting TP, stop-loss checks still run.
                warn!(
                    symbol = %position.symbol,
                    position_id = %position.position_id,
                    error = %e,
                    "take-profit limit order placement failed"
                );
            }
        }
    }

    /// Cancel the resting take-profit order, if any. "Order not found /
    /// already filled" counts as successful cleanup.
    pub async fn clean_position_resources(
        &self,
        symbol: &str,
        tracker: &mut PositionTracker,
        exchange: &dyn ExchangeApi,
    ) {
        if let Some(resting) = tracker.resting_order.take() {
            match exchange.cancel_order(symbol, &resting.order_id).await {
                Ok(()) => debug!(
                    symbol,
                    order_id = %resting.order_id,
                    "resting take-profit cancelled on cleanup"
                ),
                Err(e) => warn!(
                    symbol,
                    order_id = %resting.order_id,
                    error = %e,
                    "resting take-profit cancel failed on cleanup"
                ),
            }
        }
    }

    pub async fn check(
        &self,
        position: &Position,
        current_price: f64,
        tracker: &mut PositionTracker,
        exchange: &dyn ExchangeApi,
    ) -> Option<ExitSignal> {
        if let Some(resting) = tracker.resting_order.clone() {
            let status = match exchange
                .get_order_status(&position.symbol, &resting.order_id)
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        symbol = %position.symbol,
                        order_id = %resting.order_id,
                        error = %e,
                        "order status poll failed — skipping tick"
                    );
                    return None;
                }
            };

            if !status.is_resting() {
                // The order already executed (or vanished) on the exchange;
                // nothing is left to cancel and no close order is placed.
                info!(
                    symbol = %position.symbol,
                    position_id = %position.position_id,
                    order_id = %resting.order_id,
                    %status,
                    tp_price = resting.tp_price,
                    "resting take-profit no longer on the book — settling"
                );
                tracker.resting_order = None;
                return Some(ExitSignal::already_filled(
                    TriggerKind::TakeProfit,
                    resting.tp_price,
                    format!("exchange-side take-profit order {} {status}", resting.order_id),
                ));
            }

            debug!(
                symbol = %position.symbol,
                order_id = %resting.order_id,
                %status,
                "take-profit order still resting"
            );
        }

        // Stop-loss check runs whether or not a TP order is resting.
        let sl_pct = position
            .leverage_adjusted(position.effective_stop_loss_pct(self.config.stop_loss_pct));
        let sl_target = match position.direction {
            Direction::Long => position.entry_price * (1.0 - sl_pct),
            Direction::Short => position.entry_price * (1.0 + sl_pct),
        };

        let breached = match position.direction {
            Direction::Long => current_price <= sl_target,
            Direction::Short => current_price >= sl_target,
        };
        if breached {
            info!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                price = current_price,
                sl_target,
                "stop loss triggered (ordered strategy)"
            );
            return Some(ExitSignal::close(
                TriggerKind::StopLoss,
                1.0,
                format!("price {current_price} past stop-loss target {sl_target:.8}"),
            ));
        }

        None
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::testutil::MockExchange;
    use crate::okx::OrderStatus;
    use crate::types::OrderSide;

    fn strategy() -> OrderedTpSlExit {
        OrderedTpSlExit::new(OrderedTpSlConfig {
            enabled: true,
            take_profit_pct: 0.05,
            stop_loss_pct: 0.03,
            ..OrderedTpSlConfig::default()
        })
        .unwrap()
    }

    fn long_1x() -> (Position, PositionTracker) {
        let p = Position::open("BTC-USDT-SWAP", Direction::Long, 100.0, 2.0, 1, None);
        let t = PositionTracker::seeded_from(&p);
        (p, t)
    }

    #[tokio::test]
    async fn init_places_reduce_only_limit_at_rounded_tp() {
        let s = strategy();
        let (p, mut t) = long_1x();
        let exchange = MockExchange::default();

        s.init_position_resources(&p, &mut t, &exchange, Some(0.5)).await;

        let orders = exchange.placed_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert!(orders[0].reduce_only);
        assert_eq!(orders[0].price, Some(105.0));
        assert_eq!(orders[0].size, 2.0);

        let resting = t.resting_order.as_ref().unwrap();
        assert_eq!(resting.tp_price, 105.0);

        // A second init is a no-op.
        s.init_position_resources(&p, &mut t, &exchange, Some(0.5)).await;
        assert_eq!(exchange.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn placement_failure_leaves_no_resting_order() {
        let s = strategy();
        let (p, mut t) = long_1x();
        let exchange = MockExchange::default();
        exchange.fail_limit_orders(true);

        s.init_position_resources(&p, &mut t, &exchange, None).await;
        assert!(t.resting_order.is_none());

        // The stop-loss check still protects the position.
        let sig = s.check(&p, 96.9, &mut t, &exchange).await.unwrap();
        assert_eq!(sig.kind, TriggerKind::StopLoss);
        assert!(!sig.need_cleanup);
    }

    #[tokio::test]
    async fn filled_order_emits_need_cleanup() {
        let s = strategy();
        let (p, mut t) = long_1x();
        let exchange = MockExchange::default();

        s.init_position_resources(&p, &mut t, &exchange, None).await;
        let order_id = t.resting_order.as_ref().unwrap().order_id.clone();
        exchange.set_order_status(&order_id, OrderStatus::Filled);

        let sig = s.check(&p, 104.0, &mut t, &exchange).await.unwrap();
        assert_eq!(sig.kind, TriggerKind::TakeProfit);
        assert!(sig.need_cleanup);
        assert!((sig.exit_price.unwrap() - 105.0).abs() < 1e-9);
        // The record is gone; nothing left to cancel.
        assert!(t.resting_order.is_none());
    }

    #[tokio::test]
    async fn unknown_order_also_settles() {
        let s = strategy();
        let (p, mut t) = long_1x();
        let exchange = MockExchange::default();

        s.init_position_resources(&p, &mut t, &exchange, None).await;
        let order_id = t.resting_order.as_ref().unwrap().order_id.clone();
        exchange.set_order_status(&order_id, OrderStatus::Unknown);

        let sig = s.check(&p, 101.0, &mut t, &exchange).await.unwrap();
        assert!(sig.need_cleanup);
    }

    #[tokio::test]
    async fn resting_order_with_sl_breach_goes_normal_path() {
        let s = strategy();
        let (p, mut t) = long_1x();
        let exchange = MockExchange::default();

        s.init_position_resources(&p, &mut t, &exchange, None).await;

        let sig = s.check(&p, 96.9, &mut t, &exchange).await.unwrap();
        assert_eq!(sig.kind, TriggerKind::StopLoss);
        assert!(!sig.need_cleanup);
        // The resting order stays recorded; the manager cancels it before
        // executing the close.
        assert!(t.resting_order.is_some());
    }

    #[tokio::test]
    async fn resting_order_no_breach_no_signal() {
        let s = strategy();
        let (p, mut t) = long_1x();
        let exchange = MockExchange::default();

        s.init_position_resources(&p, &mut t, &exchange, None).await;
        assert!(s.check(&p, 101.0, &mut t, &exchange).await.is_none());
    }

    #[tokio::test]
    async fn short_tp_price_below_entry() {
        let s = strategy();
        let p = Position::open("BTC-USDT-SWAP", Direction::Short, 100.0, 1.0, 1, None);
        let mut t = PositionTracker::seeded_from(&p);
        let exchange = MockExchange::default();

        s.init_position_resources(&p, &mut t, &exchange, None).await;
        let orders = exchange.placed_orders();
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert!((orders[0].price.unwrap() - 95.0).abs() < 1e-9);
    }
}
