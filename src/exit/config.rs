// =============================================================================
// Exit-strategy configuration — one explicit, validated struct per variant
// =============================================================================
//
// Every field carries a serde default so older config files keep loading as
// new fields appear. `validate()` runs at construction time; a strategy is
// never built from an invalid config.
// =============================================================================

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_take_profit_pct() -> f64 {
    0.05
}

fn default_stop_loss_pct() -> f64 {
    0.03
}

fn default_trailing_distance() -> f64 {
    0.02
}

fn default_trailing_activation() -> f64 {
    0.01
}

fn default_ladder_pct() -> f64 {
    0.2
}

fn default_ladder_step() -> f64 {
    0.2
}

fn default_timeframe() -> String {
    "15m".to_string()
}

fn default_candle_count() -> u32 {
    3
}

fn default_atr_period() -> usize {
    14
}

fn default_atr_multiplier() -> f64 {
    3.0
}

fn default_priority_fixed() -> u32 {
    10
}

fn default_priority_trailing() -> u32 {
    20
}

fn default_priority_ladder() -> u32 {
    30
}

fn default_priority_atr() -> u32 {
    40
}

fn default_priority_time() -> u32 {
    50
}

fn default_priority_ordered() -> u32 {
    5
}

// =============================================================================
// Per-variant configs
// =============================================================================

/// Fixed take-profit / stop-loss percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedPercentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority_fixed")]
    pub priority: u32,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
}

impl Default for FixedPercentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_priority_fixed(),
            take_profit_pct: default_take_profit_pct(),
            stop_loss_pct: default_stop_loss_pct(),
        }
    }
}

impl FixedPercentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.take_profit_pct <= 0.0 || self.stop_loss_pct <= 0.0 {
            bail!("fixed_percent: take_profit_pct and stop_loss_pct must be positive");
        }
        Ok(())
    }
}

/// Trailing stop with a minimum-profit activation gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority_trailing")]
    pub priority: u32,
    /// Retracement from the extremum that triggers the stop.
    #[serde(default = "default_trailing_distance")]
    pub trailing_distance: f64,
    /// Minimum profit before the stop is armed.
    #[serde(default = "default_trailing_activation")]
    pub activation_pct: f64,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_priority_trailing(),
            trailing_distance: default_trailing_distance(),
            activation_pct: default_trailing_activation(),
        }
    }
}

impl TrailingStopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trailing_distance <= 0.0 || self.trailing_distance >= 1.0 {
            bail!("trailing_stop: trailing_distance must be in (0, 1)");
        }
        if self.activation_pct < 0.0 {
            bail!("trailing_stop: activation_pct must be non-negative");
        }
        Ok(())
    }
}

/// Laddered take-profit: close an extra `ladder_tp_pct` of the position per
/// `ladder_tp_step` of leveraged profit. Opt-in per position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority_ladder")]
    pub priority: u32,
    #[serde(default = "default_ladder_pct")]
    pub ladder_tp_pct: f64,
    #[serde(default = "default_ladder_step")]
    pub ladder_tp_step: f64,
    /// Whether positions that carry no explicit opt-in participate.
    #[serde(default)]
    pub default_opt_in: bool,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_priority_ladder(),
            ladder_tp_pct: default_ladder_pct(),
            ladder_tp_step: default_ladder_step(),
            default_opt_in: false,
        }
    }
}

impl LadderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ladder_tp_pct <= 0.0 || self.ladder_tp_pct > 1.0 {
            bail!("ladder: ladder_tp_pct must be in (0, 1]");
        }
        if self.ladder_tp_step <= 0.0 {
            bail!("ladder: ladder_tp_step must be positive");
        }
        Ok(())
    }
}

/// Time-based exit: close when no candle in the recent window improved on the
/// entry price in the position's favour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBasedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority_time")]
    pub priority: u32,
    /// Bar timeframe, minutes or suffixed ("15m", "1H").
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_candle_count")]
    pub candle_count: u32,
}

impl Default for TimeBasedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_priority_time(),
            timeframe: default_timeframe(),
            candle_count: default_candle_count(),
        }
    }
}

impl TimeBasedConfig {
    pub fn validate(&self) -> Result<()> {
        crate::types::timeframe_minutes(&self.timeframe)?;
        if self.candle_count == 0 {
            bail!("time_based: candle_count must be positive");
        }
        Ok(())
    }
}

/// ATR chandelier stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtrStopConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority_atr")]
    pub priority: u32,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: f64,
}

impl Default for AtrStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_priority_atr(),
            timeframe: default_timeframe(),
            atr_period: default_atr_period(),
            atr_multiplier: default_atr_multiplier(),
        }
    }
}

impl AtrStopConfig {
    pub fn validate(&self) -> Result<()> {
        crate::types::timeframe_minutes(&self.timeframe)?;
        if self.atr_period == 0 {
            bail!("atr_stop: atr_period must be positive");
        }
        if self.atr_multiplier <= 0.0 {
            bail!("atr_stop: atr_multiplier must be positive");
        }
        Ok(())
    }
}

/// Exchange-resident take-profit limit order plus a local stop-loss check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedTpSlConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_priority_ordered")]
    pub priority: u32,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
}

impl Default for OrderedTpSlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: default_priority_ordered(),
            take_profit_pct: default_take_profit_pct(),
            stop_loss_pct: default_stop_loss_pct(),
        }
    }
}

impl OrderedTpSlConfig {
    pub fn validate(&self) -> Result<()> {
        if self.take_profit_pct <= 0.0 || self.stop_loss_pct <= 0.0 {
            bail!("ordered_tp_sl: take_profit_pct and stop_loss_pct must be positive");
        }
        Ok(())
    }
}

// =============================================================================
// StrategyConfig — the closed set
// =============================================================================

/// Tagged union over the six strategy configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    FixedPercent(FixedPercentConfig),
    TrailingStop(TrailingStopConfig),
    Ladder(LadderConfig),
    TimeBased(TimeBasedConfig),
    AtrStop(AtrStopConfig),
    OrderedTpSl(OrderedTpSlConfig),
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::FixedPercent(c) => c.validate(),
            Self::TrailingStop(c) => c.validate(),
            Self::Ladder(c) => c.validate(),
            Self::TimeBased(c) => c.validate(),
            Self::AtrStop(c) => c.validate(),
            Self::OrderedTpSl(c) => c.validate(),
        }
    }
}
