// =============================================================================
// ExitStrategyManager — priority-ordered evaluation with shared bookkeeping
// =============================================================================
//
// Owns the strategy list (kept sorted ascending by priority, registration
// order breaking ties), the per-position tracking arena, and the cross-
// strategy coordination rules:
//
//   - the first trigger wins; later strategies are not evaluated that tick;
//   - before a normal-path close, any resting take-profit order recorded for
//     the position is cancelled (no double fill);
//   - a `need_cleanup` signal is handed back to the caller untouched — the
//     exchange already filled the exit and the caller settles accounting
//     exactly once;
//   - ladder progress is persisted before the close executes;
//   - the arena slot is dropped the moment a full close succeeds.
//
// The manager is owned by the single monitoring task, so none of this needs
// locking.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::exit::config::StrategyConfig;
use crate::exit::signal::{ExitSignal, TriggerKind};
use crate::exit::strategy::ExitStrategy;
use crate::exit::tracker::{PositionKey, PositionTracker};
use crate::okx::ExchangeApi;
use crate::position::model::Position;
use crate::position::store::PositionStore;

// ---------------------------------------------------------------------------
// Close executor contract
// ---------------------------------------------------------------------------

/// The callback that actually closes (part of) a position on the exchange
/// and settles local accounting. Supplied by the monitoring loop.
#[async_trait]
pub trait CloseExecutor: Send + Sync {
    async fn execute_close(
        &self,
        symbol: &str,
        position: &Position,
        close_percentage: f64,
    ) -> (bool, String);
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct ExitStrategyManager {
    /// Sorted ascending by priority; stable sort keeps registration order
    /// for equal priorities.
    strategies: Vec<ExitStrategy>,
    trackers: HashMap<PositionKey, PositionTracker>,
    exchange: Arc<dyn ExchangeApi>,
    store: Arc<PositionStore>,
    /// Lazily populated per-symbol tick sizes.
    tick_sizes: HashMap<String, f64>,
}

impl ExitStrategyManager {
    pub fn new(exchange: Arc<dyn ExchangeApi>, store: Arc<PositionStore>) -> Self {
        Self {
            strategies: Vec::new(),
            trackers: HashMap::new(),
            exchange,
            store,
            tick_sizes: HashMap::new(),
        }
    }

    /// Build a manager with one strategy per config section.
    pub fn from_configs(
        configs: Vec<StrategyConfig>,
        exchange: Arc<dyn ExchangeApi>,
        store: Arc<PositionStore>,
    ) -> Result<Self> {
        let mut manager = Self::new(exchange, store);
        for config in configs {
            manager.add_strategy(ExitStrategy::from_config(config)?);
        }
        Ok(manager)
    }

    // -------------------------------------------------------------------------
    // Registry mutation (no side effects on positions)
    // -------------------------------------------------------------------------

    pub fn add_strategy(&mut self, strategy: ExitStrategy) {
        info!(
            name = strategy.name(),
            priority = strategy.priority(),
            enabled = strategy.enabled(),
            "exit strategy registered"
        );
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.priority());
    }

    pub fn remove_strategy(&mut self, name: &str) -> bool {
        let before = self.strategies.len();
        self.strategies.retain(|s| s.name() != name);
        before != self.strategies.len()
    }

    pub fn enable_strategy(&mut self, name: &str) -> bool {
        self.set_strategy_enabled(name, true)
    }

    pub fn disable_strategy(&mut self, name: &str) -> bool {
        self.set_strategy_enabled(name, false)
    }

    fn set_strategy_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.strategies.iter_mut().find(|s| s.name() == name) {
            Some(s) => {
                s.set_enabled(enabled);
                info!(name, enabled, "exit strategy toggled");
                true
            }
            None => false,
        }
    }

    /// Replace a registered strategy's parameters. The new config must be of
    /// the same kind as the strategy it replaces.
    pub fn update_strategy_params(&mut self, name: &str, params: StrategyConfig) -> Result<()> {
        let replacement = ExitStrategy::from_config(params)?;
        if replacement.name() != name {
            bail!(
                "config kind '{}' does not match strategy '{name}'",
                replacement.name()
            );
        }
        let Some(slot) = self.strategies.iter_mut().find(|s| s.name() == name) else {
            bail!("no strategy registered under '{name}'");
        };
        *slot = replacement;
        self.strategies.sort_by_key(|s| s.priority());
        info!(name, "exit strategy parameters updated");
        Ok(())
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    // -------------------------------------------------------------------------
    // Resource lifecycle
    // -------------------------------------------------------------------------

    /// Resolve (and cache) the tick size for a symbol.
    async fn tick_size_for(&mut self, symbol: &str) -> Option<f64> {
        if let Some(tick) = self.tick_sizes.get(symbol) {
            return Some(*tick);
        }
        match self.exchange.get_tick_size(symbol).await {
            Ok(Some(tick)) => {
                self.tick_sizes.insert(symbol.to_string(), tick);
                Some(tick)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(symbol, error = %e, "tick size lookup failed");
                None
            }
        }
    }

    /// Create the arena slot for a position (seeded from its persisted
    /// tracking fields) and let every enabled strategy set up its resources.
    ///
    /// Initializing a closed position is a defect in the caller.
    pub async fn init_position_resources(&mut self, position: &Position) {
        if position.closed {
            error!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                "init_position_resources called for a closed position — refusing"
            );
            return;
        }

        let key = PositionKey::of(position);
        let tick = self.tick_size_for(&position.symbol).await;
        let tracker = self
            .trackers
            .entry(key)
            .or_insert_with(|| PositionTracker::seeded_from(position));

        for strategy in &self.strategies {
            if strategy.enabled() {
                strategy
                    .init_position_resources(position, tracker, self.exchange.as_ref(), tick)
                    .await;
            }
        }
    }

    /// Startup resume: initialize resources for every open position loaded
    /// from the store. Closed positions are skipped.
    pub async fn init_open_positions(&mut self, positions: &[Position]) {
        for position in positions {
            if position.closed {
                continue;
            }
            self.init_position_resources(position).await;
        }
        info!(
            tracked = self.trackers.len(),
            "exit manager resumed open positions"
        );
    }

    /// Drop a position's arena slot, cancelling any resting order it holds.
    /// "Order already gone" counts as successful cleanup.
    pub async fn clean_position_resources(&mut self, symbol: &str, position_id: &str) {
        self.clean_symbol_resources(symbol, Some(position_id)).await;
    }

    /// Drop arena slots for `symbol` — all of them, or just `position_id` —
    /// letting every strategy release what it holds outside the arena.
    pub async fn clean_symbol_resources(&mut self, symbol: &str, position_id: Option<&str>) {
        let keys: Vec<PositionKey> = self
            .trackers
            .keys()
            .filter(|k| {
                k.symbol == symbol
                    && position_id.map_or(true, |id| k.position_id == id)
            })
            .cloned()
            .collect();

        for key in keys {
            if let Some(mut tracker) = self.trackers.remove(&key) {
                for strategy in &self.strategies {
                    strategy
                        .clean_position_resources(symbol, &mut tracker, self.exchange.as_ref())
                        .await;
                }
                debug!(%key, "position resources cleaned");
            }
        }
    }

    #[cfg(test)]
    pub fn tracker(&self, key: &PositionKey) -> Option<&PositionTracker> {
        self.trackers.get(key)
    }

    // -------------------------------------------------------------------------
    // The per-tick entry point
    // -------------------------------------------------------------------------

    /// Evaluate all enabled strategies for `position` in priority order and
    /// execute the first trigger.
    ///
    /// Returns `(true, None)` when a close was executed through `executor`,
    /// `(true, Some(signal))` when an exchange-side fill needs the caller's
    /// close-accounting path, and `(false, None)` otherwise. At most one
    /// strategy executes a close per call.
    pub async fn check_exit_conditions(
        &mut self,
        position: &mut Position,
        current_price: f64,
        executor: &dyn CloseExecutor,
    ) -> (bool, Option<ExitSignal>) {
        if position.closed {
            debug!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                "check_exit_conditions on a closed position — ignoring"
            );
            return (false, None);
        }
        if current_price <= 0.0 {
            return (false, None);
        }

        let key = PositionKey::of(position);
        let tick = self.tick_size_for(&position.symbol).await;
        let now_ms = Utc::now().timestamp_millis();

        // Split borrows: strategies and trackers are disjoint fields.
        let Self {
            strategies,
            trackers,
            exchange,
            ..
        } = &mut *self;
        let tracker = trackers
            .entry(key.clone())
            .or_insert_with(|| PositionTracker::seeded_from(position));

        let mut fired: Option<ExitSignal> = None;
        for strategy in strategies.iter_mut() {
            if !strategy.enabled() {
                continue;
            }
            let signal = strategy
                .check_exit_condition(position, current_price, now_ms, tracker, exchange.as_ref(), tick)
                .await;
            if let Some(signal) = signal {
                debug!(
                    strategy = strategy.name(),
                    kind = %signal.kind,
                    close_percentage = signal.close_percentage,
                    need_cleanup = signal.need_cleanup,
                    "exit strategy fired — short-circuiting"
                );
                fired = Some(signal);
                break;
            }
        }

        let Some(signal) = fired else {
            return (false, None);
        };

        // Exchange-side fill: hand back to the caller for the fuller
        // close-accounting path; no order is placed here.
        if signal.need_cleanup {
            return (true, Some(signal));
        }

        // Cancel any resting take-profit before closing, to avoid a double
        // fill. The cancel is attempted, not required; an idempotent "already
        // gone" result is success.
        if let Some(resting) = self
            .trackers
            .get_mut(&key)
            .and_then(|t| t.resting_order.take())
        {
            match self
                .exchange
                .cancel_order(&position.symbol, &resting.order_id)
                .await
            {
                Ok(()) => info!(
                    symbol = %position.symbol,
                    order_id = %resting.order_id,
                    "resting take-profit cancelled before close"
                ),
                Err(e) => warn!(
                    symbol = %position.symbol,
                    order_id = %resting.order_id,
                    error = %e,
                    "resting take-profit cancel failed — proceeding with close"
                ),
            }
        }

        // Ladder progress must be durable before the close executes.
        if signal.kind == TriggerKind::LadderTp {
            if let Err(e) = self.store.save_position(position) {
                warn!(
                    symbol = %position.symbol,
                    position_id = %position.position_id,
                    error = %e,
                    "failed to persist ladder progress before close"
                );
            }
        }

        let (success, message) = executor
            .execute_close(&position.symbol, position, signal.close_percentage)
            .await;

        if !success {
            error!(
                symbol = %position.symbol,
                position_id = %position.position_id,
                kind = %signal.kind,
                message = %message,
                "close execution failed — will retry on a later tick"
            );
            return (false, None);
        }

        info!(
            symbol = %position.symbol,
            position_id = %position.position_id,
            kind = %signal.kind,
            close_percentage = signal.close_percentage,
            reason = %signal.reason,
            message = %message,
            "exit executed"
        );

        // Full close: the position is done, drop its state now.
        if signal.is_full_close() {
            self.trackers.remove(&key);
        }

        (true, None)
    }
}

impl std::fmt::Debug for ExitStrategyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitStrategyManager")
            .field("strategies", &self.strategy_names())
            .field("tracked_positions", &self.trackers.len())
            .finish()
    }
}
