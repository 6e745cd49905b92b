// =============================================================================
// Per-position tracking arena
// =============================================================================
//
// One struct per open position holds every strategy's tracking fields, keyed
// by (symbol, position_id) and owned by the manager. Strategies receive a
// mutable reference during evaluation; none of them manages its own map.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::position::model::Position;

/// Composite key identifying a tracked position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub symbol: String,
    pub position_id: String,
}

impl PositionKey {
    pub fn of(position: &Position) -> Self {
        Self {
            symbol: position.symbol.clone(),
            position_id: position.position_id.clone(),
        }
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.symbol, self.position_id)
    }
}

/// A resting exchange-side take-profit limit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingOrder {
    pub order_id: String,
    pub tp_price: f64,
}

/// All per-position strategy state, in one place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionTracker {
    /// Best price seen by the trailing stop (highest for long, lowest for
    /// short).
    pub trailing_extreme: Option<f64>,
    /// Best price seen by the ATR stop — an independent extremum.
    pub atr_extreme: Option<f64>,
    /// Last ladder rung reached.
    pub max_ladder_level: i64,
    /// Cumulative fraction closed via the ladder rule.
    pub ladder_closed_pct: f64,
    /// Resting take-profit limit order placed by the ordered strategy.
    pub resting_order: Option<RestingOrder>,
}

impl PositionTracker {
    /// Seed a tracker from the persisted position fields (restart recovery):
    /// extrema from `high_price`/`low_price` when present, else the entry
    /// price; ladder progress from `ladder_closed_pct`.
    pub fn seeded_from(position: &Position) -> Self {
        let extreme = match position.direction {
            crate::types::Direction::Long => position.high_price,
            crate::types::Direction::Short => position.low_price,
        }
        .or(Some(position.entry_price));

        Self {
            trailing_extreme: extreme,
            atr_extreme: extreme,
            max_ladder_level: 0,
            ladder_closed_pct: position.ladder_closed_pct.clamp(0.0, 1.0),
            resting_order: None,
        }
    }
}
