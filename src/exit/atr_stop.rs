// =============================================================================
// ATR chandelier stop — volatility-proportional trailing exit
// =============================================================================
//
// Stop distance is `ATR × multiplier` in price units, hung off the best price
// reached since entry (an extremum independent of the percentage trailing
// stop's). The ATR value is cached per symbol for 300 seconds so a busy tick
// loop does not refetch candles constantly.
//
// ATR unavailable (short history, bad data) means the strategy no-ops for the
// tick; it never raises.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::exit::config::AtrStopConfig;
use crate::exit::signal::{ExitSignal, TriggerKind};
use crate::exit::tracker::PositionTracker;
use crate::indicators::atr::calculate_atr;
use crate::okx::ExchangeApi;
use crate::position::model::Position;
use crate::types::{minutes_to_bar, timeframe_minutes, Direction};

pub const NAME: &str = "atr_stop";

/// How long a computed ATR value stays fresh.
const ATR_CACHE_TTL: Duration = Duration::from_secs(300);

/// Extra candles fetched beyond the period so Wilder smoothing has bars to
/// run over.
const ATR_EXTRA_CANDLES: usize = 10;

#[derive(Debug, Clone)]
pub struct AtrStopExit {
    pub config: AtrStopConfig,
    minutes: u32,
    /// Per-symbol ATR cache: value + computation time.
    atr_cache: HashMap<String, (f64, Instant)>,
}

impl AtrStopExit {
    pub fn new(config: AtrStopConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let minutes = timeframe_minutes(&config.timeframe)?;
        Ok(Self {
            config,
            minutes,
            atr_cache: HashMap::new(),
        })
    }

    /// Current ATR for `symbol`, from cache or recomputed. `None` when the
    /// exchange cannot provide enough history.
    async fn atr(&mut self, symbol: &str, exchange: &dyn ExchangeApi) -> Option<f64> {
        if let Some((value, at)) = self.atr_cache.get(symbol) {
            if at.elapsed() < ATR_CACHE_TTL {
                return Some(*value);
            }
        }

        let bar = minutes_to_bar(self.minutes);
        let want = self.config.atr_period + ATR_EXTRA_CANDLES;
        let candles = match exchange.get_klines(symbol, &bar, want).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol, error = %e, "ATR stop: kline fetch failed — skipping tick");
                return None;
            }
        };

        let value = calculate_atr(&candles, self.config.atr_period)?;
        self.atr_cache
            .insert(symbol.to_string(), (value, Instant::now()));
        debug!(symbol, atr = value, bar = %bar, "ATR refreshed");
        Some(value)
    }

    pub async fn check(
        &mut self,
        position: &Position,
        current_price: f64,
        tracker: &mut PositionTracker,
        exchange: &dyn ExchangeApi,
    ) -> Option<ExitSignal> {
        // Extremum update comes first so the stop tightens monotonically in
        // the favourable direction.
        let extreme = tracker.atr_extreme.get_or_insert(position.entry_price);
        if position.direction.improves(current_price, *extreme) {
            *extreme = current_price;
        }
        let extreme = *extreme;

        let atr = self.atr(&position.symbol, exchange).await?;
        let multiplier = position.effective_atr_multiplier(self.config.atr_multiplier);
        let stop_price = match position.direction {
            Direction::Long => extreme - atr * multiplier,
            Direction::Short => extreme + atr * multiplier,
        };

        debug!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            price = current_price,
            extreme,
            atr,
            stop_price,
            "ATR stop check"
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
                atr,
                stop_price,
                "ATR stop triggered"
            );
            return Some(ExitSignal::close(
                TriggerKind::AtrStop,
                1.0,
                format!("price {current_price} crossed ATR stop {stop_price:.8} (atr {atr:.8})"),
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
    use crate::okx::Candle;

    fn flat_candles(n: usize, base: f64, range: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                ts: i as i64,
                open: base,
                high: base + range / 2.0,
                low: base - range / 2.0,
                close: base,
                volume: 1.0,
            })
            .collect()
    }

    fn strategy() -> AtrStopExit {
        AtrStopExit::new(AtrStopConfig {
            timeframe: "15m".to_string(),
            atr_period: 14,
            atr_multiplier: 3.0,
            ..AtrStopConfig::default()
        })
        .unwrap()
    }

    fn long_1x() -> (Position, PositionTracker) {
        let p = Position::open("BTC-USDT-SWAP", crate::types::Direction::Long, 100.0, 1.0, 1, None);
        let t = PositionTracker::seeded_from(&p);
        (p, t)
    }

    #[tokio::test]
    async fn insufficient_candles_is_a_no_op() {
        let mut s = strategy();
        let (p, mut t) = long_1x();
        let exchange = MockExchange::default();
        exchange.set_klines("BTC-USDT-SWAP", flat_candles(5, 100.0, 2.0)); // < period
        assert!(s.check(&p, 50.0, &mut t, &exchange).await.is_none());
    }

    #[tokio::test]
    async fn stop_hangs_off_extremum() {
        let mut s = strategy();
        let (p, mut t) = long_1x();
        let exchange = MockExchange::default();
        // Constant range 2.0 -> ATR converges to 2.0; stop distance 6.0.
        exchange.set_klines("BTC-USDT-SWAP", flat_candles(30, 100.0, 2.0));

        // Run the extremum up to 120: stop ≈ 114.
        assert!(s.check(&p, 120.0, &mut t, &exchange).await.is_none());
        assert_eq!(t.atr_extreme, Some(120.0));

        let sig = s.check(&p, 113.5, &mut t, &exchange).await.unwrap();
        assert_eq!(sig.kind, TriggerKind::AtrStop);
        assert!(sig.is_full_close());
    }

    #[tokio::test]
    async fn short_stop_mirrors() {
        let mut s = strategy();
        let p = Position::open(
            "BTC-USDT-SWAP",
            crate::types::Direction::Short,
            100.0,
            1.0,
            1,
            None,
        );
        let mut t = PositionTracker::seeded_from(&p);
        let exchange = MockExchange::default();
        exchange.set_klines("BTC-USDT-SWAP", flat_candles(30, 100.0, 2.0));

        // Extremum down to 85: stop ≈ 91.
        assert!(s.check(&p, 85.0, &mut t, &exchange).await.is_none());
        let sig = s.check(&p, 91.5, &mut t, &exchange).await.unwrap();
        assert_eq!(sig.kind, TriggerKind::AtrStop);
    }

    #[tokio::test]
    async fn atr_value_is_cached_within_ttl() {
        let mut s = strategy();
        let (p, mut t) = long_1x();
        let exchange = MockExchange::default();
        exchange.set_klines("BTC-USDT-SWAP", flat_candles(30, 100.0, 2.0));

        assert!(s.check(&p, 120.0, &mut t, &exchange).await.is_none());

        // Replace the history with wildly different volatility: the cached
        // ATR (≈2.0) must still be used, so the stop stays ≈114.
        exchange.set_klines("BTC-USDT-SWAP", flat_candles(30, 100.0, 40.0));
        let sig = s.check(&p, 113.5, &mut t, &exchange).await;
        assert!(sig.is_some(), "cached ATR should keep the tight stop");
    }

    #[tokio::test]
    async fn signal_multiplier_override() {
        let mut s = strategy();
        let (mut p, mut t) = long_1x();
        p.signal = Some(crate::types::TradeSignal {
            atr_multiplier: Some(1.0),
            ..crate::types::TradeSignal::default()
        });
        let exchange = MockExchange::default();
        exchange.set_klines("BTC-USDT-SWAP", flat_candles(30, 100.0, 2.0));

        // Extremum 120, ATR 2.0, multiplier 1.0 -> stop ≈ 118.
        assert!(s.check(&p, 120.0, &mut t, &exchange).await.is_none());
        let sig = s.check(&p, 117.5, &mut t, &exchange).await.unwrap();
        assert_eq!(sig.kind, TriggerKind::AtrStop);
    }
}
