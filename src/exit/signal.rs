// =============================================================================
// Exit signals — what a strategy reports when it wants a position closed
// =============================================================================

use serde::{Deserialize, Serialize};

/// The rule that triggered an exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    TakeProfit,
    StopLoss,
    TrailingStop,
    LadderTp,
    TimeBased,
    AtrStop,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TakeProfit => write!(f, "TAKE_PROFIT"),
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::TrailingStop => write!(f, "TRAILING_STOP"),
            Self::LadderTp => write!(f, "LADDER_TP"),
            Self::TimeBased => write!(f, "TIME_BASED"),
            Self::AtrStop => write!(f, "ATR_BASED"),
        }
    }
}

/// A strategy's decision to close all or part of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub kind: TriggerKind,
    /// Fraction of the remaining size to close, in (0, 1].
    pub close_percentage: f64,
    /// True when an exchange-side order already filled: the caller must run
    /// the fuller close-accounting path exactly once, and no further order
    /// is placed.
    pub need_cleanup: bool,
    /// Human-readable trigger context for logs.
    pub reason: String,
    /// Known fill price, when the exit already executed on the exchange.
    pub exit_price: Option<f64>,
}

impl ExitSignal {
    /// A normal-path trigger: the manager invokes the close executor.
    pub fn close(kind: TriggerKind, close_percentage: f64, reason: impl Into<String>) -> Self {
        Self {
            kind,
            close_percentage,
            need_cleanup: false,
            reason: reason.into(),
            exit_price: None,
        }
    }

    /// An exchange-side fill already happened; the caller settles accounting.
    pub fn already_filled(kind: TriggerKind, fill_price: f64, reason: impl Into<String>) -> Self {
        Self {
            kind,
            close_percentage: 1.0,
            need_cleanup: true,
            reason: reason.into(),
            exit_price: Some(fill_price),
        }
    }

    pub fn is_full_close(&self) -> bool {
        self.close_percentage >= 1.0
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_kind_display() {
        assert_eq!(TriggerKind::TakeProfit.to_string(), "TAKE_PROFIT");
        assert_eq!(TriggerKind::AtrStop.to_string(), "ATR_BASED");
        assert_eq!(TriggerKind::LadderTp.to_string(), "LADDER_TP");
    }

    #[test]
    fn constructors() {
        let s = ExitSignal::close(TriggerKind::StopLoss, 1.0, "sl");
        assert!(!s.need_cleanup);
        assert!(s.is_full_close());
        assert!(s.exit_price.is_none());

        let f = ExitSignal::already_filled(TriggerKind::TakeProfit, 105.0, "tp filled");
        assert!(f.need_cleanup);
        assert_eq!(f.exit_price, Some(105.0));
    }
}
