// =============================================================================
// Laddered take-profit — partial closes at successive profit rungs
// =============================================================================
//
// Leveraged PnL% is bucketed into rungs of `ladder_tp_step`; each new rung
// closes an additional `ladder_tp_pct` of the position, cumulatively capped
// at 1.0. Progress lives in the arena AND on the position
// (`ladder_closed_pct`), which is updated before the close executes so a
// concurrent load never observes a stale fraction.
//
// Opt-in per position: signal override, then the position flag, then the
// strategy default.
// =============================================================================

use tracing::{debug, info};

use crate::exit::config::LadderConfig;
use crate::exit::signal::{ExitSignal, TriggerKind};
use crate::exit::tracker::PositionTracker;
use crate::position::model::Position;

pub const NAME: &str = "ladder_tp";

/// Increments below this are treated as "already accounted for".
const MIN_INCREMENT: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct LadderExit {
    pub config: LadderConfig,
}

impl LadderExit {
    pub fn new(config: LadderConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn check(
        &self,
        position: &mut Position,
        current_price: f64,
        tracker: &mut PositionTracker,
    ) -> Option<ExitSignal> {
        if !position.ladder_enabled(self.config.default_opt_in) {
            return None;
        }

        let step = position.effective_ladder_step(self.config.ladder_tp_step);
        let pct_per_level = position.effective_ladder_pct(self.config.ladder_tp_pct);
        if step <= 0.0 || pct_per_level <= 0.0 {
            return None;
        }

        let pnl_pct = position.leveraged_pnl_pct(current_price);
        let level = (pnl_pct / step).floor() as i64;

        debug!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            pnl_pct,
            level,
            max_level = tracker.max_ladder_level,
            closed = tracker.ladder_closed_pct,
            "ladder check"
        );

        if level <= tracker.max_ladder_level || level <= 0 {
            return None;
        }

        let target = (level as f64 * pct_per_level).min(1.0);
        let increment = target - tracker.ladder_closed_pct;

        // The rung is spent (e.g. progress restored from disk); remember it
        // so it is not re-examined every tick.
        tracker.max_ladder_level = level;
        if increment <= MIN_INCREMENT {
            return None;
        }

        tracker.ladder_closed_pct = target;
        // Persisted before the close executes; a concurrent load sees the
        // updated fraction.
        position.ladder_closed_pct = target;

        info!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            level,
            close_percentage = increment,
            cumulative = target,
            "ladder take-profit triggered"
        );

        Some(ExitSignal::close(
            TriggerKind::LadderTp,
            increment,
            format!("ladder level {level} reached, closing {increment:.4} (cumulative {target:.4})"),
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn strategy() -> LadderExit {
        LadderExit::new(LadderConfig {
            ladder_tp_pct: 0.2,
            ladder_tp_step: 0.2,
            default_opt_in: false,
            ..LadderConfig::default()
        })
        .unwrap()
    }

    fn opted_in_long_2x() -> (Position, PositionTracker) {
        let mut p = Position::open("BTC-USDT-SWAP", Direction::Long, 100.0, 1.0, 2, None);
        p.ladder_tp = true;
        let t = PositionTracker::seeded_from(&p);
        (p, t)
    }

    #[test]
    fn opt_out_is_a_no_op() {
        let s = strategy();
        let mut p = Position::open("BTC-USDT-SWAP", Direction::Long, 100.0, 1.0, 2, None);
        let mut t = PositionTracker::seeded_from(&p);
        assert!(s.check(&mut p, 150.0, &mut t).is_none());
        assert_eq!(p.ladder_closed_pct, 0.0);
    }

    #[test]
    fn rung_sequence_scenario() {
        // step=0.2, pct=0.2, leverage=2, entry=100.
        let s = strategy();
        let (mut p, mut t) = opted_in_long_2x();

        // 111 -> 22% leveraged PnL -> level 1 -> close 0.2.
        let sig = s.check(&mut p, 111.0, &mut t).unwrap();
        assert_eq!(sig.kind, TriggerKind::LadderTp);
        assert!((sig.close_percentage - 0.2).abs() < 1e-9);
        assert!((p.ladder_closed_pct - 0.2).abs() < 1e-9);

        // Back to entry: nothing.
        assert!(s.check(&mut p, 100.0, &mut t).is_none());

        // 121 -> 42% -> level 2 -> another 0.2, cumulative 0.4.
        let sig = s.check(&mut p, 121.0, &mut t).unwrap();
        assert!((sig.close_percentage - 0.2).abs() < 1e-9);
        assert!((p.ladder_closed_pct - 0.4).abs() < 1e-9);
    }

    #[test]
    fn monotone_and_capped() {
        let s = strategy();
        let (mut p, mut t) = opted_in_long_2x();

        let mut total = 0.0;
        let mut last = 0.0;
        // A wild price path; the cumulative fraction must never decrease nor
        // exceed 1.0, and the per-trigger increments must sum to it.
        for price in [105.0, 111.0, 103.0, 125.0, 118.0, 160.0, 140.0, 210.0, 500.0] {
            if let Some(sig) = s.check(&mut p, price, &mut t) {
                total += sig.close_percentage;
            }
            assert!(p.ladder_closed_pct >= last);
            assert!(p.ladder_closed_pct <= 1.0);
            last = p.ladder_closed_pct;
        }
        assert!((total - p.ladder_closed_pct).abs() < 1e-9);
    }

    #[test]
    fn restored_progress_is_not_double_closed() {
        let s = strategy();
        let (mut p, _) = opted_in_long_2x();

        // Simulate a restart after level 1 already closed 0.2.
        p.ladder_closed_pct = 0.2;
        let mut t = PositionTracker::seeded_from(&p);

        // Level 1 again: target 0.2, increment 0 -> no trigger, rung spent.
        assert!(s.check(&mut p, 111.0, &mut t).is_none());
        assert_eq!(t.max_ladder_level, 1);

        // Level 2 still fires the next increment.
        let sig = s.check(&mut p, 121.0, &mut t).unwrap();
        assert!((sig.close_percentage - 0.2).abs() < 1e-9);
    }

    #[test]
    fn short_position_ladders_on_downmoves() {
        let s = strategy();
        let mut p = Position::open("BTC-USDT-SWAP", Direction::Short, 100.0, 1.0, 2, None);
        p.ladder_tp = true;
        let mut t = PositionTracker::seeded_from(&p);

        // 89 -> 22% leveraged PnL for a short.
        let sig = s.check(&mut p, 89.0, &mut t).unwrap();
        assert!((sig.close_percentage - 0.2).abs() < 1e-9);
        // Adverse move: no trigger.
        assert!(s.check(&mut p, 99.0, &mut t).is_none());
    }

    #[test]
    fn deep_jump_caps_at_full_close() {
        let s = strategy();
        let (mut p, mut t) = opted_in_long_2x();

        // 60 rungs at once: target capped at 1.0.
        let sig = s.check(&mut p, 700.0, &mut t).unwrap();
        assert!((sig.close_percentage - 1.0).abs() < 1e-9);
        assert_eq!(p.ladder_closed_pct, 1.0);
    }
}
