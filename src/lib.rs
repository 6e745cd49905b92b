// =============================================================================
// Boreas Perp Sentinel — position lifecycle & exit-strategy engine
// =============================================================================
//
// The core subsystem: the `Position` data model and store, the priority-
// ordered exit-strategy manager, the six exit rules, and the background
// monitoring/reconciliation loops. The OKX client is the one concrete
// implementation of the `ExchangeApi` seam everything else depends on.

pub mod config;
pub mod execution;
pub mod exit;
pub mod indicators;
pub mod monitor;
pub mod okx;
pub mod position;
pub mod types;

pub use config::RuntimeConfig;
pub use exit::manager::{CloseExecutor, ExitStrategyManager};
pub use position::{Position, PositionStore};
