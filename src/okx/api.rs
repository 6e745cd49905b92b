// =============================================================================
// Exchange API contract — the engine's view of the exchange
// =============================================================================
//
// The exit subsystem never talks to OKX directly; it depends on this trait so
// tests can substitute an in-memory mock. Unavailable market data is a normal
// outcome, not an error: a mark price of 0.0 and a short candle list both mean
// "skip this tick".

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Direction, OrderSide};

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// A single OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, ms epoch.
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// Order status
// ---------------------------------------------------------------------------

/// Lifecycle state of an exchange order as reported by the order endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    /// The exchange returned a state we do not recognise, or the order id is
    /// unknown to it.
    Unknown,
}

impl OrderStatus {
    /// Whether the order is still working on the book.
    pub fn is_resting(&self) -> bool {
        matches!(self, Self::Open | Self::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::PartiallyFilled => write!(f, "partially_filled"),
            Self::Filled => write!(f, "filled"),
            Self::Canceled => write!(f, "canceled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange-reported position
// ---------------------------------------------------------------------------

/// A position snapshot as reported by the exchange, used by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub direction: Direction,
    /// Signed size as reported (positive long, negative short).
    pub quantity: f64,
    pub avg_entry_price: f64,
    /// Realised PnL the exchange has attributed to this position.
    pub realized_pnl: f64,
    /// Last update time of the record, ms epoch.
    pub updated_ms: i64,
}

// ---------------------------------------------------------------------------
// The trait
// ---------------------------------------------------------------------------

/// Everything the position/exit subsystem consumes from the exchange.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Current mark price. Returns 0.0 when the price is unavailable; callers
    /// treat that as "skip this tick".
    async fn get_mark_price(&self, symbol: &str) -> Result<f64>;

    /// The most recent `limit` candles for `bar` (e.g. "15m", "1H"), ordered
    /// oldest first. A shorter-than-requested list is a valid outcome meaning
    /// "not enough history yet".
    async fn get_klines(&self, symbol: &str, bar: &str, limit: usize) -> Result<Vec<Candle>>;

    /// Status of a previously placed order. An id the exchange no longer
    /// knows maps to `OrderStatus::Unknown`.
    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatus>;

    /// Place a limit order and return the exchange order id.
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        pos_side: Direction,
        size: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<String>;

    /// Place a reduce-only market order closing `size` of the position held
    /// in `pos_side` direction. Returns the exchange order id.
    async fn place_market_close(
        &self,
        symbol: &str,
        pos_side: Direction,
        size: f64,
    ) -> Result<String>;

    /// Cancel an order. "Order not found / already completed" is success.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// All positions currently held on the exchange.
    async fn get_positions(&self) -> Result<Vec<ExchangePosition>>;

    /// Price tick size for `symbol`, if the instrument is known.
    async fn get_tick_size(&self, symbol: &str) -> Result<Option<f64>>;
}
