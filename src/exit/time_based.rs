// =============================================================================
// Time-based exit — close stale positions that never went anywhere
// =============================================================================
//
// After the position has been held for at least `timeframe × candle_count`,
// fetch the most recent `candle_count` bars and walk them newest to oldest.
// If no close in the window improved on the entry price in the position's
// favour, the position is cut. Equality counts as NOT profitable. A single
// favourable candle anywhere in the window cancels the trigger for this tick.
//
// Unavailable or short K-line history is a normal outcome: no trigger.
// =============================================================================

use tracing::{debug, info, warn};

use crate::exit::config::TimeBasedConfig;
use crate::exit::signal::{ExitSignal, TriggerKind};
use crate::okx::{Candle, ExchangeApi};
use crate::position::model::Position;
use crate::types::{minutes_to_bar, timeframe_minutes};

pub const NAME: &str = "time_based";

#[derive(Debug, Clone)]
pub struct TimeBasedExit {
    pub config: TimeBasedConfig,
    /// Minutes per bar, resolved once at construction.
    minutes: u32,
}

impl TimeBasedExit {
    pub fn new(config: TimeBasedConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let minutes = timeframe_minutes(&config.timeframe)?;
        Ok(Self { config, minutes })
    }

    /// Whether the position has been held long enough to judge.
    fn held_long_enough(&self, position: &Position, now_ms: i64) -> bool {
        let required_ms = self.minutes as i64 * self.config.candle_count as i64 * 60_000;
        now_ms - position.timestamp >= required_ms
    }

    /// Pure window rule, split out for tests: true when every close in the
    /// window failed to improve on entry in the position's favour.
    fn window_is_dead(position: &Position, candles: &[Candle]) -> bool {
        candles
            .iter()
            .rev()
            .all(|c| !position.direction.improves(c.close, position.entry_price))
    }

    pub async fn check(
        &self,
        position: &Position,
        now_ms: i64,
        exchange: &dyn ExchangeApi,
    ) -> Option<ExitSignal> {
        if !self.held_long_enough(position, now_ms) {
            return None;
        }

        let bar = minutes_to_bar(self.minutes);
        let count = self.config.candle_count as usize;
        let candles = match exchange.get_klines(&position.symbol, &bar, count).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!(
                    symbol = %position.symbol,
                    error = %e,
                    "time-based exit: kline fetch failed — skipping tick"
                );
                return None;
            }
        };

        // Not enough history yet.
        if candles.len() < count {
            debug!(
                symbol = %position.symbol,
                have = candles.len(),
                want = count,
                "time-based exit: insufficient candles"
            );
            return None;
        }

        let window = &candles[candles.len() - count..];
        if !Self::window_is_dead(position, window) {
            return None;
        }

        info!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            candles = count,
            bar = %bar,
            "time-based exit triggered — no favourable close in window"
        );
        Some(ExitSignal::close(
            TriggerKind::TimeBased,
            1.0,
            format!("no close improved on entry across the last {count} {bar} bars"),
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

    fn candle(close: f64) -> Candle {
        Candle {
            ts: 0,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
        }
    }

    fn strategy() -> TimeBasedExit {
        TimeBasedExit::new(TimeBasedConfig {
            timeframe: "15m".to_string(),
            candle_count: 3,
            ..TimeBasedConfig::default()
        })
        .unwrap()
    }

    fn long_entry_100() -> Position {
        Position::open("BTC-USDT-SWAP", Direction::Long, 100.0, 1.0, 1, None)
    }

    #[test]
    fn holding_period_gate() {
        let s = strategy();
        let mut p = long_entry_100();
        p.timestamp = 1_000_000;
        // 3 × 15m = 45 minutes.
        assert!(!s.held_long_enough(&p, 1_000_000 + 44 * 60_000));
        assert!(s.held_long_enough(&p, 1_000_000 + 45 * 60_000));
    }

    #[test]
    fn all_dead_closes_trigger() {
        let p = long_entry_100();
        let window = [candle(99.0), candle(98.5), candle(100.0)];
        // 100.0 == entry counts as not profitable (conservative tie-break).
        assert!(TimeBasedExit::window_is_dead(&p, &window));
    }

    #[test]
    fn one_favourable_close_cancels() {
        let p = long_entry_100();
        let window = [candle(99.0), candle(100.1), candle(98.0)];
        assert!(!TimeBasedExit::window_is_dead(&p, &window));
    }

    #[test]
    fn short_direction_mirrors() {
        let p = Position::open("BTC-USDT-SWAP", Direction::Short, 100.0, 1.0, 1, None);
        // For a short, a close BELOW entry is favourable.
        assert!(TimeBasedExit::window_is_dead(&p, &[candle(101.0), candle(100.0)]));
        assert!(!TimeBasedExit::window_is_dead(&p, &[candle(101.0), candle(99.9)]));
    }

    #[tokio::test]
    async fn insufficient_history_is_no_trigger() {
        use crate::exit::testutil::MockExchange;

        let s = strategy();
        let mut p = long_entry_100();
        p.timestamp = 0; // held forever

        let exchange = MockExchange::default();
        exchange.set_klines("BTC-USDT-SWAP", vec![candle(99.0)]); // want 3, have 1
        assert!(s.check(&p, i64::MAX / 2, &exchange).await.is_none());
    }

    #[tokio::test]
    async fn full_window_of_dead_closes_triggers() {
        use crate::exit::testutil::MockExchange;

        let s = strategy();
        let mut p = long_entry_100();
        p.timestamp = 0;

        let exchange = MockExchange::default();
        exchange.set_klines(
            "BTC-USDT-SWAP",
            vec![candle(99.0), candle(98.0), candle(99.5)],
        );
        let sig = s.check(&p, i64::MAX / 2, &exchange).await.unwrap();
        assert_eq!(sig.kind, TriggerKind::TimeBased);
        assert!(sig.is_full_close());
    }
}
