// =============================================================================
// Shared types used across the Boreas trading engine
// =============================================================================

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Direction of an exchange exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short. Used to sign-adjust PnL math.
    pub fn signum(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    /// The order side that reduces this exposure.
    pub fn closing_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }

    /// Whether `price` is a better (more favourable) level than `than`.
    pub fn improves(&self, price: f64, than: f64) -> bool {
        match self {
            Self::Long => price > than,
            Self::Short => price < than,
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Long
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order side
// ---------------------------------------------------------------------------

/// Side of an exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

// ---------------------------------------------------------------------------
// TradeSignal — the originating trade request attached to a position
// ---------------------------------------------------------------------------

/// Per-position overrides carried by the trade request that opened the
/// position. Any field left `None` falls back to the strategy-level default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    /// Where the request came from (webhook, scanner, manual).
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    #[serde(default)]
    pub trailing_distance: Option<f64>,
    #[serde(default)]
    pub trailing_activation_pct: Option<f64>,
    #[serde(default)]
    pub ladder_tp: Option<bool>,
    #[serde(default)]
    pub ladder_tp_pct: Option<f64>,
    #[serde(default)]
    pub ladder_tp_step: Option<f64>,
    #[serde(default)]
    pub atr_multiplier: Option<f64>,
}

// ---------------------------------------------------------------------------
// Timeframe helpers
// ---------------------------------------------------------------------------

/// Parse a timeframe string into minutes.
///
/// Accepts bare minutes ("30"), minute suffix ("15m"), hour suffix
/// ("1H"/"4h"), and day suffix ("1D").
pub fn timeframe_minutes(tf: &str) -> Result<u32> {
    let tf = tf.trim();
    if tf.is_empty() {
        bail!("empty timeframe");
    }

    let (num, unit) = match tf.chars().last() {
        Some(c) if c.is_ascii_digit() => (tf, 'm'),
        Some(c) => (&tf[..tf.len() - 1], c.to_ascii_lowercase()),
        None => bail!("empty timeframe"),
    };

    let n: u32 = num
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid timeframe '{tf}'"))?;
    if n == 0 {
        bail!("zero-length timeframe '{tf}'");
    }

    match unit {
        'm' => Ok(n),
        'h' => Ok(n * 60),
        'd' => Ok(n * 1440),
        _ => bail!("unsupported timeframe unit in '{tf}'"),
    }
}

/// Render minutes into the exchange bar notation ("15m", "1H", "4H", "1D").
///
/// Hours and days use upper-case suffixes, sub-hour bars lower-case, matching
/// the candle endpoint's expectations.
pub fn minutes_to_bar(minutes: u32) -> String {
    if minutes >= 1440 && minutes % 1440 == 0 {
        format!("{}D", minutes / 1440)
    } else if minutes >= 60 && minutes % 60 == 0 {
        format!("{}H", minutes / 60)
    } else {
        format!("{minutes}m")
    }
}

// ---------------------------------------------------------------------------
// Tick rounding
// ---------------------------------------------------------------------------

/// Round `price` to the exchange tick grid.
///
/// A zero or negative tick returns the price unchanged. Used for limit-order
/// prices and log-readable targets; trigger comparisons always use raw floats.
pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 || !tick.is_finite() || !price.is_finite() {
        return price;
    }
    (price / tick).round() * tick
}
