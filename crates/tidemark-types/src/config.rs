//! Repair policy: the validated, immutable [`RepairConfiguration`] and the
//! provider capability that hands one out per table.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, TableReference};

const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// How replicas participate in a repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairParallelism {
    /// One range at a time, oldest first.
    Sequential,
    /// Ranges with disjoint replica sets repaired together.
    #[default]
    Parallel,
    /// Like `Parallel`, but a group never spans more than one datacenter.
    DatacenterAware,
}

impl FromStr for RepairParallelism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "datacenter_aware" | "dc_parallel" => Ok(Self::DatacenterAware),
            other => Err(ConfigError::UnknownParallelism(other.to_string())),
        }
    }
}

impl fmt::Display for RepairParallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequential => "SEQUENTIAL",
            Self::Parallel => "PARALLEL",
            Self::DatacenterAware => "DATACENTER_AWARE",
        })
    }
}

/// Granularity of the distributed repair lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairLockType {
    /// Lock the exact replica set of each range.
    #[default]
    Vnode,
    /// Lock every datacenter the repair touches.
    Datacenter,
}

impl FromStr for RepairLockType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vnode" => Ok(Self::Vnode),
            "datacenter" => Ok(Self::Datacenter),
            other => Err(ConfigError::UnknownLockType(other.to_string())),
        }
    }
}

impl fmt::Display for RepairLockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vnode => "VNODE",
            Self::Datacenter => "DATACENTER",
        })
    }
}

/// Where completed-repair facts are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryProvider {
    /// The history keyspace owned by tidemark.
    #[default]
    Internal,
    /// The data store's own repair history.
    Native,
}

impl FromStr for HistoryProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internal" | "ecc" => Ok(Self::Internal),
            "native" | "cassandra" => Ok(Self::Native),
            other => Err(ConfigError::UnknownHistoryProvider(other.to_string())),
        }
    }
}

/// Upper bound on the data volume a single repair request covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetRepairSize {
    /// Repair whole vnodes regardless of size.
    #[default]
    Full,
    /// Split vnodes larger than this many bytes.
    Bytes(u64),
}

impl fmt::Display for TargetRepairSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Bytes(n) => write!(f, "{n} bytes"),
        }
    }
}

/// Immutable, validated repair policy for one table.
///
/// Only obtainable through [`RepairConfiguration::builder`] or
/// [`Default`], so every instance satisfies the validation rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairConfiguration {
    repair_interval_ms: u64,
    parallelism: RepairParallelism,
    warning_time_ms: u64,
    error_time_ms: u64,
    unwind_ratio: f64,
    target_repair_size: TargetRepairSize,
    lock_type: RepairLockType,
}

impl Default for RepairConfiguration {
    fn default() -> Self {
        Self {
            repair_interval_ms: 7 * MILLIS_PER_DAY,
            parallelism: RepairParallelism::Parallel,
            warning_time_ms: 8 * MILLIS_PER_DAY,
            error_time_ms: 10 * MILLIS_PER_DAY,
            unwind_ratio: 0.0,
            target_repair_size: TargetRepairSize::Full,
            lock_type: RepairLockType::Vnode,
        }
    }
}

impl RepairConfiguration {
    /// Start from the defaults.
    pub fn builder() -> RepairConfigurationBuilder {
        RepairConfigurationBuilder {
            inner: Self::default(),
        }
    }

    /// Start from this configuration.
    pub fn to_builder(&self) -> RepairConfigurationBuilder {
        RepairConfigurationBuilder {
            inner: self.clone(),
        }
    }

    /// How often every range must be repaired.
    pub fn repair_interval(&self) -> Duration {
        Duration::from_millis(self.repair_interval_ms)
    }

    /// Repair interval in milliseconds.
    pub fn repair_interval_ms(&self) -> i64 {
        self.repair_interval_ms as i64
    }

    pub fn parallelism(&self) -> RepairParallelism {
        self.parallelism
    }

    /// Unrepaired duration after which a job reports `WARNING`.
    pub fn warning_time_ms(&self) -> i64 {
        self.warning_time_ms as i64
    }

    /// Unrepaired duration after which a job reports `ERROR`.
    pub fn error_time_ms(&self) -> i64 {
        self.error_time_ms as i64
    }

    pub fn unwind_ratio(&self) -> f64 {
        self.unwind_ratio
    }

    pub fn target_repair_size(&self) -> TargetRepairSize {
        self.target_repair_size
    }

    pub fn lock_type(&self) -> RepairLockType {
        self.lock_type
    }
}

/// Milliseconds in `d`, saturating so that `build` can reject it.
fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Longest duration a policy may carry; repair times are compared as `i64`
/// epoch milliseconds.
const MAX_DURATION_MS: u64 = i64::MAX as u64;

/// Accumulates settings for a [`RepairConfiguration`]; [`build`] validates.
///
/// [`build`]: RepairConfigurationBuilder::build
#[derive(Debug, Clone)]
pub struct RepairConfigurationBuilder {
    inner: RepairConfiguration,
}

impl RepairConfigurationBuilder {
    pub fn repair_interval(mut self, interval: Duration) -> Self {
        self.inner.repair_interval_ms = saturating_millis(interval);
        self
    }

    pub fn parallelism(mut self, parallelism: RepairParallelism) -> Self {
        self.inner.parallelism = parallelism;
        self
    }

    pub fn warning_time(mut self, warning: Duration) -> Self {
        self.inner.warning_time_ms = saturating_millis(warning);
        self
    }

    pub fn error_time(mut self, error: Duration) -> Self {
        self.inner.error_time_ms = saturating_millis(error);
        self
    }

    pub fn unwind_ratio(mut self, ratio: f64) -> Self {
        self.inner.unwind_ratio = ratio;
        self
    }

    pub fn target_repair_size(mut self, size: TargetRepairSize) -> Self {
        self.inner.target_repair_size = size;
        self
    }

    pub fn lock_type(mut self, lock_type: RepairLockType) -> Self {
        self.inner.lock_type = lock_type;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<RepairConfiguration, ConfigError> {
        let c = self.inner;
        if c.repair_interval_ms == 0 {
            return Err(ConfigError::InvalidRepairInterval);
        }
        if c.warning_time_ms == 0 {
            return Err(ConfigError::InvalidWarningTime);
        }
        if c.error_time_ms == 0 {
            return Err(ConfigError::InvalidErrorTime);
        }
        for (name, ms) in [
            ("repair interval", c.repair_interval_ms),
            ("warning time", c.warning_time_ms),
            ("error time", c.error_time_ms),
        ] {
            if ms > MAX_DURATION_MS {
                return Err(ConfigError::DurationTooLarge(name));
            }
        }
        if !c.unwind_ratio.is_finite() || !(0.0..=1.0).contains(&c.unwind_ratio) {
            return Err(ConfigError::InvalidUnwindRatio(c.unwind_ratio));
        }
        if c.target_repair_size == TargetRepairSize::Bytes(0) {
            return Err(ConfigError::InvalidTargetSize);
        }
        Ok(c)
    }
}

/// Narrow capability: which policy applies to a table, if any.
///
/// `None` means the table is not scheduled for repair.
pub trait RepairConfigurationProvider: Send + Sync {
    fn for_table(&self, table: &TableReference) -> Option<RepairConfiguration>;
}

/// Global default plus per-table overrides, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticRepairConfigurationProvider {
    default: Option<RepairConfiguration>,
    tables: HashMap<TableReference, Option<RepairConfiguration>>,
}

impl StaticRepairConfigurationProvider {
    /// Every table not mentioned otherwise gets `default`.
    pub fn new(default: RepairConfiguration) -> Self {
        Self {
            default: Some(default),
            tables: HashMap::new(),
        }
    }

    /// Only explicitly configured tables are repaired.
    pub fn explicit_only() -> Self {
        Self::default()
    }

    /// Override the policy for one table.
    pub fn with_table(mut self, table: TableReference, config: RepairConfiguration) -> Self {
        self.tables.insert(table, Some(config));
        self
    }

    /// Exclude one table from repair.
    pub fn disable(mut self, table: TableReference) -> Self {
        self.tables.insert(table, None);
        self
    }
}

impl RepairConfigurationProvider for StaticRepairConfigurationProvider {
    fn for_table(&self, table: &TableReference) -> Option<RepairConfiguration> {
        match self.tables.get(table) {
            Some(entry) => entry.clone(),
            None => self.default.clone(),
        }
    }
}

/// Parse a human-readable size (`"5m"`, `"100k"`, `"2g"`, `"1024"`) into bytes.
///
/// Suffixes are case-insensitive and base-1024; an optional trailing `b`
/// (`"5mb"`) is accepted.
pub fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let trimmed = s.trim().to_ascii_lowercase();
    let body = trimmed.strip_suffix('b').unwrap_or(&trimmed);

    let (digits, multiplier) = match body.chars().last() {
        Some('k') => (&body[..body.len() - 1], 1024u64),
        Some('m') => (&body[..body.len() - 1], 1024 * 1024),
        Some('g') => (&body[..body.len() - 1], 1024 * 1024 * 1024),
        _ => (body, 1),
    };

    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| ConfigError::InvalidSize(s.to_string()))
}
