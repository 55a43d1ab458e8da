//! Error types for configuration and value parsing.

/// Errors raised while building or parsing repair configuration.
///
/// These are fatal at load time: a table whose policy fails validation is
/// never scheduled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The repair interval must be strictly positive.
    #[error("repair interval must be greater than zero")]
    InvalidRepairInterval,

    /// The warning threshold must be strictly positive.
    #[error("repair warning time must be greater than zero")]
    InvalidWarningTime,

    /// The error threshold must be strictly positive.
    #[error("repair error time must be greater than zero")]
    InvalidErrorTime,

    /// A duration does not fit in signed epoch milliseconds.
    #[error("{0} is too large: at most {max} ms", max = i64::MAX)]
    DurationTooLarge(&'static str),

    /// The unwind ratio must be a finite value in `[0, 1]`.
    #[error("unwind ratio must be within [0, 1], got {0}")]
    InvalidUnwindRatio(f64),

    /// A byte-sized repair target must be strictly positive.
    #[error("target repair size must be greater than zero")]
    InvalidTargetSize,

    /// A human-readable size string could not be parsed.
    #[error("invalid size '{0}': expected a number optionally suffixed by k, m or g")]
    InvalidSize(String),

    /// A `keyspace.table` string could not be parsed.
    #[error("invalid table reference '{0}': expected 'keyspace.table'")]
    InvalidTableReference(String),

    /// Unknown parallelism name.
    #[error("unknown repair parallelism '{0}': expected sequential, parallel or datacenter_aware")]
    UnknownParallelism(String),

    /// Unknown lock type name.
    #[error("unknown lock type '{0}': expected vnode or datacenter")]
    UnknownLockType(String),

    /// Unknown repair history provider.
    #[error("unknown history provider '{0}': expected internal or native")]
    UnknownHistoryProvider(String),

    /// Unknown duration unit.
    #[error("unknown time unit '{0}'")]
    UnknownTimeUnit(String),
}
