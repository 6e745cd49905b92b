// =============================================================================
// Exit Management Module
// =============================================================================
//
// The six exit-strategy state machines, the per-position tracking arena, and
// the manager that evaluates them in priority order on every monitoring tick.

pub mod atr_stop;
pub mod config;
pub mod fixed_percent;
pub mod ladder;
pub mod manager;
pub mod ordered_tp_sl;
pub mod signal;
pub mod strategy;
pub mod time_based;
pub mod tracker;
pub mod trailing_stop;

#[cfg(test)]
pub mod testutil;

pub use manager::{CloseExecutor, ExitStrategyManager};
pub use signal::{ExitSignal, TriggerKind};
pub use strategy::ExitStrategy;
pub use tracker::{PositionKey, PositionTracker};
