// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Every field carries a serde default so that adding new fields never breaks
// loading an older config file. Persistence uses the atomic tmp + rename
// pattern to prevent corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::exit::config::{
    AtrStopConfig, FixedPercentConfig, LadderConfig, OrderedTpSlConfig, StrategyConfig,
    TimeBasedConfig, TrailingStopConfig,
};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_positions_file() -> String {
    "positions.json".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Boreas engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds between exit-monitor ticks.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Seconds between reconciliation cycles.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Path of the persisted position book.
    #[serde(default = "default_positions_file")]
    pub positions_file: String,

    // --- Exit strategy sections ---------------------------------------------
    #[serde(default)]
    pub fixed_percent: FixedPercentConfig,
    #[serde(default)]
    pub trailing_stop: TrailingStopConfig,
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub time_based: TimeBasedConfig,
    #[serde(default)]
    pub atr_stop: AtrStopConfig,
    #[serde(default)]
    pub ordered_tp_sl: OrderedTpSlConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: default_monitor_interval_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            positions_file: default_positions_file(),
            fixed_percent: FixedPercentConfig::default(),
            trailing_stop: TrailingStopConfig::default(),
            ladder: LadderConfig::default(),
            time_based: TimeBasedConfig::default(),
            atr_stop: AtrStopConfig::default(),
            ordered_tp_sl: OrderedTpSlConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`, validating every
    /// strategy section. A missing file is an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        config.validate()?;

        info!(
            path = %path.display(),
            monitor_interval_secs = config.monitor_interval_secs,
            "runtime config loaded"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor_interval_secs == 0 {
            anyhow::bail!("monitor_interval_secs must be positive");
        }
        for section in self.strategy_configs() {
            section.validate()?;
        }
        Ok(())
    }

    /// The six strategy sections, ready for the exit manager.
    pub fn strategy_configs(&self) -> Vec<StrategyConfig> {
        vec![
            StrategyConfig::FixedPercent(self.fixed_percent.clone()),
            StrategyConfig::TrailingStop(self.trailing_stop.clone()),
            StrategyConfig::Ladder(self.ladder.clone()),
            StrategyConfig::TimeBased(self.time_based.clone()),
            StrategyConfig::AtrStop(self.atr_stop.clone()),
            StrategyConfig::OrderedTpSl(self.ordered_tp_sl.clone()),
        ]
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}
