// =============================================================================
// ExitStrategy — the closed set of exit rules
// =============================================================================
//
// The six strategy kinds are a tagged enum dispatched through one interface,
// not trait objects: the set is closed by design and the manager holds them
// in a priority-ordered list.
// =============================================================================

use anyhow::Result;

use crate::exit::atr_stop::AtrStopExit;
use crate::exit::config::StrategyConfig;
use crate::exit::fixed_percent::FixedPercentExit;
use crate::exit::ladder::LadderExit;
use crate::exit::ordered_tp_sl::OrderedTpSlExit;
use crate::exit::signal::ExitSignal;
use crate::exit::time_based::TimeBasedExit;
use crate::exit::tracker::PositionTracker;
use crate::exit::trailing_stop::TrailingStopExit;
use crate::exit::{atr_stop, fixed_percent, ladder, ordered_tp_sl, time_based, trailing_stop};
use crate::okx::ExchangeApi;
use crate::position::model::Position;

#[derive(Debug, Clone)]
pub enum ExitStrategy {
    FixedPercent(FixedPercentExit),
    TrailingStop(TrailingStopExit),
    Ladder(LadderExit),
    TimeBased(TimeBasedExit),
    AtrStop(AtrStopExit),
    OrderedTpSl(OrderedTpSlExit),
}

impl ExitStrategy {
    /// Build a strategy from its validated config.
    pub fn from_config(config: StrategyConfig) -> Result<Self> {
        Ok(match config {
            StrategyConfig::FixedPercent(c) => Self::FixedPercent(FixedPercentExit::new(c)?),
            StrategyConfig::TrailingStop(c) => Self::TrailingStop(TrailingStopExit::new(c)?),
            StrategyConfig::Ladder(c) => Self::Ladder(LadderExit::new(c)?),
            StrategyConfig::TimeBased(c) => Self::TimeBased(TimeBasedExit::new(c)?),
            StrategyConfig::AtrStop(c) => Self::AtrStop(AtrStopExit::new(c)?),
            StrategyConfig::OrderedTpSl(c) => Self::OrderedTpSl(OrderedTpSlExit::new(c)?),
        })
    }

    /// Export the strategy's current configuration.
    pub fn to_config(&self) -> StrategyConfig {
        match self {
            Self::FixedPercent(s) => StrategyConfig::FixedPercent(s.config.clone()),
            Self::TrailingStop(s) => StrategyConfig::TrailingStop(s.config.clone()),
            Self::Ladder(s) => StrategyConfig::Ladder(s.config.clone()),
            Self::TimeBased(s) => StrategyConfig::TimeBased(s.config.clone()),
            Self::AtrStop(s) => StrategyConfig::AtrStop(s.config.clone()),
            Self::OrderedTpSl(s) => StrategyConfig::OrderedTpSl(s.config.clone()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FixedPercent(_) => fixed_percent::NAME,
            Self::TrailingStop(_) => trailing_stop::NAME,
            Self::Ladder(_) => ladder::NAME,
            Self::TimeBased(_) => time_based::NAME,
            Self::AtrStop(_) => atr_stop::NAME,
            Self::OrderedTpSl(_) => ordered_tp_sl::NAME,
        }
    }

    /// Lower runs first; ties broken by registration order.
    pub fn priority(&self) -> u32 {
        match self {
            Self::FixedPercent(s) => s.config.priority,
            Self::TrailingStop(s) => s.config.priority,
            Self::Ladder(s) => s.config.priority,
            Self::TimeBased(s) => s.config.priority,
            Self::AtrStop(s) => s.config.priority,
            Self::OrderedTpSl(s) => s.config.priority,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Self::FixedPercent(s) => s.config.enabled,
            Self::TrailingStop(s) => s.config.enabled,
            Self::Ladder(s) => s.config.enabled,
            Self::TimeBased(s) => s.config.enabled,
            Self::AtrStop(s) => s.config.enabled,
            Self::OrderedTpSl(s) => s.config.enabled,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            Self::FixedPercent(s) => s.config.enabled = enabled,
            Self::TrailingStop(s) => s.config.enabled = enabled,
            Self::Ladder(s) => s.config.enabled = enabled,
            Self::TimeBased(s) => s.config.enabled = enabled,
            Self::AtrStop(s) => s.config.enabled = enabled,
            Self::OrderedTpSl(s) => s.config.enabled = enabled,
        }
    }

    /// Evaluate the strategy for one position at one tick.
    ///
    /// `tracker` is the position's arena slot, `tick` the cached exchange
    /// tick size. Market-data failures are handled inside each strategy and
    /// surface as "no trigger".
    #[allow(clippy::too_many_arguments)]
    pub async fn check_exit_condition(
        &mut self,
        position: &mut Position,
        current_price: f64,
        now_ms: i64,
        tracker: &mut PositionTracker,
        exchange: &dyn ExchangeApi,
        tick: Option<f64>,
    ) -> Option<ExitSignal> {
        match self {
            Self::FixedPercent(s) => s.check(position, current_price, tick),
            Self::TrailingStop(s) => s.check(position, current_price, tracker),
            Self::Ladder(s) => s.check(position, current_price, tracker),
            Self::TimeBased(s) => s.check(position, now_ms, exchange).await,
            Self::AtrStop(s) => s.check(position, current_price, tracker, exchange).await,
            Self::OrderedTpSl(s) => s.check(position, current_price, tracker, exchange).await,
        }
    }

    /// Set up per-position resources (currently only the ordered strategy
    /// parks an exchange-side order; extrema and ladder progress are seeded
    /// when the arena slot is created).
    pub async fn init_position_resources(
        &self,
        position: &Position,
        tracker: &mut PositionTracker,
        exchange: &dyn ExchangeApi,
        tick: Option<f64>,
    ) {
        if let Self::OrderedTpSl(s) = self {
            s.init_position_resources(position, tracker, exchange, tick).await;
        }
    }

    /// Release per-position resources held outside the arena slot itself
    /// (the ordered strategy's exchange-side order).
    pub async fn clean_position_resources(
        &self,
        symbol: &str,
        tracker: &mut PositionTracker,
        exchange: &dyn ExchangeApi,
    ) {
        if let Self::OrderedTpSl(s) = self {
            s.clean_position_resources(symbol, tracker, exchange).await;
        }
    }
}
