// =============================================================================
// Trailing stop with activation gate
// =============================================================================
//
// Tracks the best price reached since entry (arena field, restored from the
// persisted extrema on restart) and closes the position once price retraces
// `trailing_distance` from it — but only after the position has a minimum
// profit cushion of `activation_pct`. Both parameters are divided by leverage
// when leverage exceeds 1, mirroring the fixed-percent rule.
// =============================================================================

use tracing::{debug, info};

use crate::exit::config::TrailingStopConfig;
use crate::exit::signal::{ExitSignal, TriggerKind};
use crate::exit::tracker::PositionTracker;
use crate::position::model::Position;
use crate::types::Direction;

pub const NAME: &str = "trailing_stop";

#[derive(Debug, Clone)]
pub struct TrailingStopExit {
    pub config: TrailingStopConfig,
}

impl TrailingStopExit {
    pub fn new(config: TrailingStopConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn check(
        &self,
        position: &Position,
        current_price: f64,
        tracker: &mut PositionTracker,
    ) -> Option<ExitSignal> {
        // Update the extremum first so the stop only ever tightens.
        let extreme = tracker
            .trailing_extreme
            .get_or_insert(position.entry_price);
        if position.direction.improves(current_price, *extreme) {
            *extreme = current_price;
        }
        let extreme = *extreme;

        // Activation gate: the stop is armed only once the CURRENT profit
        // clears the leverage-adjusted cushion.
        let activation = position.leverage_adjusted(
            position.effective_trailing_activation(self.config.activation_pct),
        );
        let profit_pct = position.unleveraged_pnl_pct(current_price);
        if profit_pct < activation {
            return None;
        }

        let distance = position
            .leverage_adjusted(position.effective_trailing_distance(self.config.trailing_distance));
        let stop_price = match position.direction {
            Direction::Long => extreme * (1.0 - distance),
            Direction::Short => extreme * (1.0 + distance),
        };

        debug!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            price = current_price,
            extreme,
            stop_price,
            "trailing stop check"
        );

        let hit = match position.direction {
            Direction::Long => current_price <= stop_price,
            Direction::Short => current_price >= stop_price,
        };
        if hit {
            info!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                price = current_price,
                extreme,
                stop_price,
                "trailing stop triggered"
            );
            return Some(ExitSignal::close(
                TriggerKind::TrailingStop,
                1.0,
                format!("price {current_price} crossed trailing stop {stop_price:.8} from extreme {extreme}"),
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

    fn strategy() -> TrailingStopExit {
        TrailingStopExit::new(TrailingStopConfig {
            trailing_distance: 0.02,
            activation_pct: 0.01,
            ..TrailingStopConfig::default()
        })
        .unwrap()
    }

    fn long_1x() -> (Position, PositionTracker) {
        let p = Position::open("BTC-USDT-SWAP", Direction::Long, 100.0, 1.0, 1, None);
        let t = PositionTracker::seeded_from(&p);
        (p, t)
    }

    #[test]
    fn activation_gate_blocks_trigger() {
        let s = strategy();
        let (p, mut t) = long_1x();

        // Run price up past activation, then retrace below entry: the current
        // profit is under the gate, so no trigger regardless of retrace depth.
        assert!(s.check(&p, 103.0, &mut t).is_none());
        assert!(s.check(&p, 100.5, &mut t).is_none());
        assert_eq!(t.trailing_extreme, Some(103.0));
    }

    #[test]
    fn triggers_after_retrace_with_cushion() {
        let s = strategy();
        let (p, mut t) = long_1x();

        assert!(s.check(&p, 106.0, &mut t).is_none());
        // Stop sits at 106 * 0.98 = 103.88, still above the 1% activation.
        let sig = s.check(&p, 103.5, &mut t).unwrap();
        assert_eq!(sig.kind, TriggerKind::TrailingStop);
        assert!(sig.is_full_close());
    }

    #[test]
    fn short_mirrors() {
        let s = strategy();
        let p = Position::open("BTC-USDT-SWAP", Direction::Short, 100.0, 1.0, 1, None);
        let mut t = PositionTracker::seeded_from(&p);

        assert!(s.check(&p, 94.0, &mut t).is_none());
        assert_eq!(t.trailing_extreme, Some(94.0));
        // Stop at 94 * 1.02 = 95.88; price 96 crossed it with profit 4%.
        let sig = s.check(&p, 96.0, &mut t).unwrap();
        assert_eq!(sig.kind, TriggerKind::TrailingStop);
    }

    #[test]
    fn leverage_divides_distance_and_activation() {
        let s = strategy();
        let p = Position::open("BTC-USDT-SWAP", Direction::Long, 100.0, 1.0, 2, None);
        let mut t = PositionTracker::seeded_from(&p);

        // Effective: distance 1%, activation 0.5%.
        assert!(s.check(&p, 102.0, &mut t).is_none());
        // Stop at 102 * 0.99 = 100.98; 100.9 is below it and above 0.5% profit.
        let sig = s.check(&p, 100.9, &mut t).unwrap();
        assert_eq!(sig.kind, TriggerKind::TrailingStop);
    }

    #[test]
    fn extremum_restored_from_position() {
        let s = strategy();
        let mut p = Position::open("BTC-USDT-SWAP", Direction::Long, 100.0, 1.0, 1, None);
        p.high_price = Some(110.0); // persisted before a restart
        let mut t = PositionTracker::seeded_from(&p);

        // Stop from the restored extreme: 110 * 0.98 = 107.8.
        let sig = s.check(&p, 107.0, &mut t).unwrap();
        assert_eq!(sig.kind, TriggerKind::TrailingStop);
    }

    #[test]
    fn extremum_only_improves() {
        let s = strategy();
        let (p, mut t) = long_1x();
        s.check(&p, 105.0, &mut t);
        s.check(&p, 104.0, &mut t);
        assert_eq!(t.trailing_extreme, Some(105.0));
    }
}
