//! Error types for registry construction and configuration
//!
//! Only configuration problems surface as errors, and only synchronously at
//! construction time. Everything in normal running (counting, rate reads,
//! expiry sweeps, lost construction races, absent optional statistics) is
//! absorbed internally and never raised.

use thiserror::Error;

/// Fatal configuration errors raised while constructing a registry or
/// resolving an operation kind.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The outcome kind behind an operation is not a valid dense
    /// enumeration.
    #[error("outcome kind for operation '{operation}' is invalid: {reason}")]
    InvalidOutcomeKind { operation: String, reason: String },

    /// A required operation kind has no backing counter.
    #[error("required statistic '{operation}' not found")]
    RequiredStatisticMissing { operation: String },

    /// An operation kind resolved to more than one backing counter;
    /// ambiguous bindings are never silently resolved.
    #[error("duplicate statistics found for operation '{operation}' ({matches} matches)")]
    DuplicateStatistic { operation: String, matches: usize },

    /// Two operation kinds in one registry share a name.
    #[error("operation kind '{operation}' declared more than once")]
    DuplicateOperationKind { operation: String },

    /// The named operation kind is not part of this registry's closed
    /// enumeration.
    #[error("unknown operation kind '{operation}'")]
    UnknownOperation { operation: String },

    /// A discovered counter's outcome kind does not match the type the
    /// caller asked for.
    #[error("outcome type mismatch for operation '{operation}'")]
    OutcomeTypeMismatch { operation: String },

    /// The statistics configuration failed validation.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Validation errors for [`StatisticsConfig`](crate::config::StatisticsConfig).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("window_secs must be > 0")]
    ZeroWindow,

    #[error("history_size must be > 0")]
    ZeroHistorySize,

    #[error("history_interval_ms must be > 0")]
    ZeroHistoryInterval,

    #[error("time_to_disable_secs must be > 0")]
    ZeroTimeToDisable,
}
