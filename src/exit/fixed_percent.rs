// =============================================================================
// Fixed-percentage take-profit / stop-loss
// =============================================================================
//
// Stateless across ticks. Percentages represent account-level moves: with
// leverage above 1 they are divided by leverage before being applied to the
// price. Signal-level overrides win over the configured defaults.
// =============================================================================

use tracing::{debug, info};

use crate::exit::config::FixedPercentConfig;
use crate::exit::signal::{ExitSignal, TriggerKind};
use crate::position::model::Position;
use crate::types::{round_to_tick, Direction};

pub const NAME: &str = "fixed_percent";

#[derive(Debug, Clone)]
pub struct FixedPercentExit {
    pub config: FixedPercentConfig,
}

impl FixedPercentExit {
    pub fn new(config: FixedPercentConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Evaluate the fixed thresholds. `tick` is used for log-readable target
    /// prices only; trigger comparisons use the raw floats.
    pub fn check(
        &self,
        position: &Position,
        current_price: f64,
        tick: Option<f64>,
    ) -> Option<ExitSignal> {
        let tp_pct = position
            .leverage_adjusted(position.effective_take_profit_pct(self.config.take_profit_pct));
        let sl_pct = position
            .leverage_adjusted(position.effective_stop_loss_pct(self.config.stop_loss_pct));

        let entry = position.entry_price;
        let (tp_target, sl_target) = match position.direction {
            Direction::Long => (entry * (1.0 + tp_pct), entry * (1.0 - sl_pct)),
            Direction::Short => (entry * (1.0 - tp_pct), entry * (1.0 + sl_pct)),
        };

        let tick = tick.unwrap_or(0.0);
        debug!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            price = current_price,
            tp_target = round_to_tick(tp_target, tick),
            sl_target = round_to_tick(sl_target, tick),
            "fixed percent check"
        );

        let tp_hit = match position.direction {
            Direction::Long => current_price >= tp_target,
            Direction::Short => current_price <= tp_target,
        };
        if tp_hit {
            info!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                price = current_price,
                target = round_to_tick(tp_target, tick),
                "take profit triggered"
            );
            return Some(ExitSignal::close(
                TriggerKind::TakeProfit,
                1.0,
                format!("price {current_price} past take-profit target"),
            ));
        }

        let sl_hit = match position.direction {
            Direction::Long => current_price <= sl_target,
            Direction::Short => current_price >= sl_target,
        };
        if sl_hit {
            info!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                price = current_price,
                target = round_to_tick(sl_target, tick),
                "stop loss triggered"
            );
            return Some(ExitSignal::close(
                TriggerKind::StopLoss,
                1.0,
                format!("price {current_price} past stop-loss target"),
            ));
        }

        None
    }
}
