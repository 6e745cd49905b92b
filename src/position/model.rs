// =============================================================================
// Position — a held exchange exposure tracked until fully closed
// =============================================================================
//
// Life-cycle:
//   open  ->  (partial closes via ladder / external fills)*  ->  closed
//
// The tracking fields (`high_price`, `low_price`, `ladder_closed_pct`,
// `realized_pnl`) are the durable handoff across process restarts: exit
// strategies re-seed their in-memory state from them on startup.
// =============================================================================

use chrono::Utc;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::types::{Direction, TradeSignal};

/// Remaining size below this fraction of a contract is treated as fully
/// closed (guards float dust after repeated partial closes).
const RESIDUAL_SIZE_EPS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Lenient field deserializers
// ---------------------------------------------------------------------------
//
// Stored records may carry corrupted fields (a non-numeric sentinel written
// by an older build, an unknown direction string). Loading coerces these to
// safe defaults with a warning instead of refusing the whole book.

fn de_lenient_direction<'de, D>(deserializer: D) -> Result<Direction, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value.as_str().map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("long") => Ok(Direction::Long),
        Some("short") => Ok(Direction::Short),
        other => {
            warn!(raw = ?other, "unrecognised direction in stored position — coercing to long");
            Ok(Direction::Long)
        }
    }
}

fn de_lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => {
            warn!(raw = %value, "non-numeric field in stored position — coercing to 0.0");
            Ok(0.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A single tracked position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    // --- Identity ---
    pub symbol: String,
    /// Unique identifier (UUID v4).
    pub position_id: String,
    #[serde(deserialize_with = "de_lenient_direction")]
    pub direction: Direction,

    // --- Economics ---
    #[serde(deserialize_with = "de_lenient_f64")]
    pub entry_price: f64,
    /// Signed: positive for long, negative for short; |quantity| = size.
    #[serde(deserialize_with = "de_lenient_f64")]
    pub quantity: f64,
    pub leverage: u32,

    // --- Lifecycle ---
    /// Open time, ms epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_timestamp: Option<i64>,
    /// Most recent close event (partial or full), ms epoch. Reconciliation
    /// uses this for its timestamp-proximity gate.
    #[serde(default)]
    pub close_time: Option<i64>,

    // --- PnL ---
    /// Accumulated across partial closes; never decreased by local code.
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub realized_pnl: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub unrealized_pnl: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub pnl_amount: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub pnl_percentage: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub margin: f64,

    // --- Tracking (mutated by the monitor and exit strategies) ---
    #[serde(default)]
    pub high_price: Option<f64>,
    #[serde(default)]
    pub low_price: Option<f64>,
    /// Per-position ladder enable (the signal override wins over this).
    #[serde(default)]
    pub ladder_tp: bool,
    #[serde(default)]
    pub ladder_tp_pct: Option<f64>,
    #[serde(default)]
    pub ladder_tp_step: Option<f64>,
    /// Cumulative fraction already closed via the ladder rule, in [0, 1].
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub ladder_closed_pct: f64,

    // --- Association ---
    /// The originating trade request, carrying per-position overrides.
    #[serde(default)]
    pub signal: Option<TradeSignal>,
}

impl Position {
    /// Open a new position. `quantity` is unsigned size; the sign is derived
    /// from `direction`.
    pub fn open(
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        size: f64,
        leverage: u32,
        signal: Option<TradeSignal>,
    ) -> Self {
        let leverage = leverage.max(1);
        let size = size.abs();
        Self {
            symbol: symbol.to_string(),
            position_id: Uuid::new_v4().to_string(),
            direction,
            entry_price,
            quantity: size * direction.signum(),
            leverage,
            timestamp: Utc::now().timestamp_millis(),
            closed: false,
            exit_price: None,
            exit_timestamp: None,
            close_time: None,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            pnl_amount: 0.0,
            pnl_percentage: 0.0,
            margin: size * entry_price / leverage as f64,
            high_price: Some(entry_price),
            low_price: Some(entry_price),
            ladder_tp: false,
            ladder_tp_pct: None,
            ladder_tp_step: None,
            ladder_closed_pct: 0.0,
            signal,
        }
    }

    // -------------------------------------------------------------------------
    // Size / PnL helpers
    // -------------------------------------------------------------------------

    /// Absolute open size.
    pub fn size(&self) -> f64 {
        self.quantity.abs()
    }

    pub fn leverage_f(&self) -> f64 {
        self.leverage.max(1) as f64
    }

    /// Price return since entry, sign-adjusted for direction (a favourable
    /// move is positive for both longs and shorts).
    pub fn unleveraged_pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.direction.signum() * (price - self.entry_price) / self.entry_price
    }

    /// Unleveraged return multiplied by leverage — return on margin.
    pub fn leveraged_pnl_pct(&self, price: f64) -> f64 {
        self.unleveraged_pnl_pct(price) * self.leverage_f()
    }

    /// Divide a configured percentage by leverage so that it represents an
    /// account-level move rather than a price-level one.
    pub fn leverage_adjusted(&self, pct: f64) -> f64 {
        pct / self.leverage_f()
    }

    // -------------------------------------------------------------------------
    // Signal-override resolution (signal wins over the supplied default)
    // -------------------------------------------------------------------------

    pub fn effective_take_profit_pct(&self, default: f64) -> f64 {
        self.signal
            .as_ref()
            .and_then(|s| s.take_profit_pct)
            .unwrap_or(default)
    }

    pub fn effective_stop_loss_pct(&self, default: f64) -> f64 {
        self.signal
            .as_ref()
            .and_then(|s| s.stop_loss_pct)
            .unwrap_or(default)
    }

    pub fn effective_trailing_distance(&self, default: f64) -> f64 {
        self.signal
            .as_ref()
            .and_then(|s| s.trailing_distance)
            .unwrap_or(default)
    }

    pub fn effective_trailing_activation(&self, default: f64) -> f64 {
        self.signal
            .as_ref()
            .and_then(|s| s.trailing_activation_pct)
            .unwrap_or(default)
    }

    pub fn effective_atr_multiplier(&self, default: f64) -> f64 {
        self.signal
            .as_ref()
            .and_then(|s| s.atr_multiplier)
            .unwrap_or(default)
    }

    pub fn effective_ladder_pct(&self, default: f64) -> f64 {
        self.signal
            .as_ref()
            .and_then(|s| s.ladder_tp_pct)
            .or(self.ladder_tp_pct)
            .unwrap_or(default)
    }

    pub fn effective_ladder_step(&self, default: f64) -> f64 {
        self.signal
            .as_ref()
            .and_then(|s| s.ladder_tp_step)
            .or(self.ladder_tp_step)
            .unwrap_or(default)
    }

    /// Ladder opt-in, resolved signal -> position -> strategy default.
    pub fn ladder_enabled(&self, default: bool) -> bool {
        self.signal
            .as_ref()
            .and_then(|s| s.ladder_tp)
            .unwrap_or(self.ladder_tp || default)
    }

    // -------------------------------------------------------------------------
    // Tick updates
    // -------------------------------------------------------------------------

    /// Maintain running extrema since open. Called by the monitoring loop on
    /// every price tick.
    pub fn update_extrema(&mut self, price: f64) {
        if price <= 0.0 {
            return;
        }
        match self.high_price {
            Some(h) if price <= h => {}
            _ => self.high_price = Some(price),
        }
        match self.low_price {
            Some(l) if price >= l => {}
            _ => self.low_price = Some(price),
        }
    }

    /// Recompute the unrealised PnL fields against `price`.
    pub fn recompute_unrealized(&mut self, price: f64) {
        if price <= 0.0 {
            return;
        }
        self.unrealized_pnl =
            self.direction.signum() * (price - self.entry_price) * self.size();
        self.pnl_amount = self.realized_pnl + self.unrealized_pnl;
        self.pnl_percentage = self.leveraged_pnl_pct(price);
    }

    // -------------------------------------------------------------------------
    // Invariant enforcement
    // -------------------------------------------------------------------------

    /// Correct invariant violations in place. The quantity sign is made
    /// consistent with `direction` (the direction is never changed), and
    /// `ladder_closed_pct` is clamped to [0, 1]. Returns true if anything
    /// was corrected.
    pub fn normalize(&mut self) -> bool {
        let mut corrected = false;

        let expected_sign = self.direction.signum();
        if self.quantity != 0.0 && self.quantity.signum() != expected_sign {
            warn!(
                symbol = %self.symbol,
                position_id = %self.position_id,
                direction = %self.direction,
                quantity = self.quantity,
                "quantity sign inconsistent with direction — correcting sign"
            );
            self.quantity = self.quantity.abs() * expected_sign;
            corrected = true;
        }

        if !(0.0..=1.0).contains(&self.ladder_closed_pct) {
            warn!(
                symbol = %self.symbol,
                position_id = %self.position_id,
                ladder_closed_pct = self.ladder_closed_pct,
                "ladder_closed_pct out of range — clamping"
            );
            self.ladder_closed_pct = self.ladder_closed_pct.clamp(0.0, 1.0);
            corrected = true;
        }

        if self.leverage == 0 {
            warn!(
                symbol = %self.symbol,
                position_id = %self.position_id,
                "zero leverage in stored position — coercing to 1"
            );
            self.leverage = 1;
            corrected = true;
        }

        corrected
    }

    // -------------------------------------------------------------------------
    // Close accounting
    // -------------------------------------------------------------------------

    /// Apply a partial close of `fraction` of the REMAINING size at
    /// `fill_price`. Accumulates realised PnL and stamps `close_time`.
    /// Collapses into a full close when the residual size is dust.
    pub fn apply_partial_close(&mut self, fill_price: f64, fraction: f64, now_ms: i64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let close_size = self.size() * fraction;
        if close_size <= 0.0 {
            return;
        }

        if fill_price > 0.0 {
            self.realized_pnl +=
                self.direction.signum() * (fill_price - self.entry_price) * close_size;
        }

        let remaining = self.size() - close_size;
        if remaining <= RESIDUAL_SIZE_EPS {
            self.finish_close(fill_price, now_ms);
        } else {
            self.quantity = remaining * self.direction.signum();
            self.close_time = Some(now_ms);
        }
    }

    /// Apply a full close of the remaining size at `fill_price`.
    pub fn apply_full_close(&mut self, fill_price: f64, now_ms: i64) {
        if fill_price > 0.0 {
            self.realized_pnl +=
                self.direction.signum() * (fill_price - self.entry_price) * self.size();
        }
        self.finish_close(fill_price, now_ms);
    }

    fn finish_close(&mut self, fill_price: f64, now_ms: i64) {
        self.quantity = 0.0;
        self.closed = true;
        self.exit_price = (fill_price > 0.0).then_some(fill_price);
        self.exit_timestamp = Some(now_ms);
        self.close_time = Some(now_ms);
        self.unrealized_pnl = 0.0;
        self.pnl_amount = self.realized_pnl;
    }
}
