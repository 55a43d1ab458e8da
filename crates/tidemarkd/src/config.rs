//! TOML configuration for the tidemark daemon.
//!
//! Every section is optional; a missing file yields the built-in defaults
//! (weekly repair, 30 s scheduling frequency, 30 days of history lookback).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, ensure};
use serde::Deserialize;
use tidemark_repair::SchedulerConfig;
use tidemark_types::{
    ConfigError, HistoryProvider, RepairConfiguration, RepairConfigurationBuilder,
    StaticRepairConfigurationProvider, TableReference, TargetRepairSize, parse_size,
};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Process identity and local storage.
    pub node: NodeSection,
    /// Default repair policy.
    pub repair: RepairSection,
    /// Distributed lock settings.
    pub lock: LockSection,
    /// Pass frequency and concurrency.
    pub scheduler: SchedulerSection,
    /// Per-table overrides, keyed by `"keyspace.table"`.
    pub tables: BTreeMap<String, TableSection>,
    /// Logging configuration.
    pub log: LogSection,
}

/// A duration written as `{ time = 7, unit = "days" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DurationSetting {
    pub time: u64,
    pub unit: String,
}

impl DurationSetting {
    pub fn new(time: u64, unit: &str) -> Self {
        Self {
            time,
            unit: unit.to_string(),
        }
    }

    pub fn to_duration(&self) -> Result<Duration, ConfigError> {
        let unit_ms: u64 = match self.unit.trim().to_ascii_lowercase().as_str() {
            "milliseconds" | "millis" | "ms" => 1,
            "seconds" | "secs" | "s" => 1_000,
            "minutes" | "mins" | "m" => 60_000,
            "hours" | "h" => 3_600_000,
            "days" | "d" => 86_400_000,
            other => return Err(ConfigError::UnknownTimeUnit(other.to_string())),
        };
        Ok(Duration::from_millis(self.time.saturating_mul(unit_ms)))
    }
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory holding the history and lock keyspaces.
    pub data_dir: PathBuf,
    /// Lock holder identity. Must be unique per process sharing a store.
    pub instance_id: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".tidemark"))
            .unwrap_or_else(|| PathBuf::from(".tidemark"));
        Self {
            data_dir,
            instance_id: String::new(),
        }
    }
}

/// `[repair]` section: the policy every table gets unless overridden.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RepairSection {
    pub interval: DurationSetting,
    pub parallelism: String,
    pub warning_time: DurationSetting,
    pub error_time: DurationSetting,
    pub unwind_ratio: f64,
    /// Upper bound per repair request (`"5m"`, `"1g"`); unset repairs
    /// whole vnodes.
    pub size_target: Option<String>,
    pub lock_type: String,
    /// How far back stored history is read on each pass.
    pub history_lookback: DurationSetting,
    pub history: HistorySection,
}

impl Default for RepairSection {
    fn default() -> Self {
        Self {
            interval: DurationSetting::new(7, "days"),
            parallelism: "parallel".to_string(),
            warning_time: DurationSetting::new(8, "days"),
            error_time: DurationSetting::new(10, "days"),
            unwind_ratio: 0.0,
            size_target: None,
            lock_type: "vnode".to_string(),
            history_lookback: DurationSetting::new(30, "days"),
            history: HistorySection::default(),
        }
    }
}

/// `[repair.history]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    /// `"internal"` or `"native"`.
    pub provider: String,
    pub keyspace: String,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            provider: "internal".to_string(),
            keyspace: "tidemark".to_string(),
        }
    }
}

/// `[lock]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LockSection {
    pub keyspace: String,
    /// Lease on every lock; renewed every third of it.
    pub lease: DurationSetting,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            keyspace: "tidemark".to_string(),
            lease: DurationSetting::new(10, "minutes"),
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub frequency: DurationSetting,
    pub max_concurrent_tables: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            frequency: DurationSetting::new(30, "seconds"),
            max_concurrent_tables: 4,
        }
    }
}

/// `[tables."ks.tbl"]` section. Unset fields inherit from `[repair]`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TableSection {
    /// `false` excludes the table from repair.
    pub enabled: bool,
    pub interval: Option<DurationSetting>,
    pub parallelism: Option<String>,
    pub warning_time: Option<DurationSetting>,
    pub error_time: Option<DurationSetting>,
    pub unwind_ratio: Option<f64>,
    pub size_target: Option<String>,
    pub lock_type: Option<String>,
}

impl Default for TableSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: None,
            parallelism: None,
            warning_time: None,
            error_time: None,
            unwind_ratio: None,
            size_target: None,
            lock_type: None,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn parse_size_target(s: &str) -> Result<TargetRepairSize, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "" | "full" => Ok(TargetRepairSize::Full),
        _ => parse_size(s).map(TargetRepairSize::Bytes),
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// The `[repair]` policy.
    pub fn default_policy(&self) -> Result<RepairConfiguration, ConfigError> {
        let r = &self.repair;
        let mut builder = RepairConfiguration::builder()
            .repair_interval(r.interval.to_duration()?)
            .parallelism(r.parallelism.parse()?)
            .warning_time(r.warning_time.to_duration()?)
            .error_time(r.error_time.to_duration()?)
            .unwind_ratio(r.unwind_ratio)
            .lock_type(r.lock_type.parse()?);
        if let Some(size) = &r.size_target {
            builder = builder.target_repair_size(parse_size_target(size)?);
        }
        builder.build()
    }

    fn apply_overrides(
        mut builder: RepairConfigurationBuilder,
        t: &TableSection,
    ) -> Result<RepairConfigurationBuilder, ConfigError> {
        if let Some(interval) = &t.interval {
            builder = builder.repair_interval(interval.to_duration()?);
        }
        if let Some(parallelism) = &t.parallelism {
            builder = builder.parallelism(parallelism.parse()?);
        }
        if let Some(warning) = &t.warning_time {
            builder = builder.warning_time(warning.to_duration()?);
        }
        if let Some(error) = &t.error_time {
            builder = builder.error_time(error.to_duration()?);
        }
        if let Some(ratio) = t.unwind_ratio {
            builder = builder.unwind_ratio(ratio);
        }
        if let Some(size) = &t.size_target {
            builder = builder.target_repair_size(parse_size_target(size)?);
        }
        if let Some(lock_type) = &t.lock_type {
            builder = builder.lock_type(lock_type.parse()?);
        }
        Ok(builder)
    }

    /// Effective policy of every `[tables]` entry; `None` for disabled ones.
    pub fn table_policies(
        &self,
    ) -> Result<Vec<(TableReference, Option<RepairConfiguration>)>, ConfigError> {
        let default = self.default_policy()?;
        self.tables
            .iter()
            .map(|(name, section)| {
                let table: TableReference = name.parse()?;
                if !section.enabled {
                    return Ok((table, None));
                }
                let policy = Self::apply_overrides(default.to_builder(), section)?.build()?;
                Ok((table, Some(policy)))
            })
            .collect()
    }

    /// Policy provider: `[repair]` for every table, `[tables]` on top.
    pub fn policies(&self) -> Result<StaticRepairConfigurationProvider, ConfigError> {
        let mut provider = StaticRepairConfigurationProvider::new(self.default_policy()?);
        for (table, policy) in self.table_policies()? {
            provider = match policy {
                Some(policy) => provider.with_table(table, policy),
                None => provider.disable(table),
            };
        }
        Ok(provider)
    }

    pub fn history_provider(&self) -> Result<HistoryProvider, ConfigError> {
        self.repair.history.provider.parse()
    }

    pub fn scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        let config = SchedulerConfig {
            frequency: self.scheduler.frequency.to_duration()?,
            max_concurrent_tables: self.scheduler.max_concurrent_tables,
            lease: self.lock.lease.to_duration()?,
            history_lookback: self.repair.history_lookback.to_duration()?,
        };
        ensure!(
            !config.frequency.is_zero(),
            "scheduler frequency must be greater than zero"
        );
        ensure!(
            config.max_concurrent_tables > 0,
            "max_concurrent_tables must be at least 1"
        );
        ensure!(
            config.lease >= Duration::from_secs(3),
            "lock lease must be at least 3 seconds"
        );
        Ok(config)
    }

    /// Lock holder identity; falls back to the host name.
    pub fn instance_id(&self) -> String {
        if !self.node.instance_id.is_empty() {
            return self.node.instance_id.clone();
        }
        std::env::var("HOSTNAME").unwrap_or_else(|_| format!("tidemark-{}", std::process::id()))
    }

    pub fn history_path(&self) -> PathBuf {
        self.node.data_dir.join(&self.repair.history.keyspace)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.node.data_dir.join(&self.lock.keyspace)
    }
}
