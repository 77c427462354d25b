//! Library-wide error types.

use thiserror::Error;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, MonitoringError>;

/// Errors surfaced by the monitoring library.
///
/// Schema and registration errors indicate a misconfigured call site and are
/// returned synchronously. Probe timeouts and failures are expected runtime
/// conditions: `evaluate` folds them into the health snapshot instead of
/// propagating them.
#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error(
        "series {series} already declared with a different schema \
         (existing: {existing}, new: {requested})"
    )]
    SchemaConflict {
        series: String,
        existing: String,
        requested: String,
    },

    #[error("unknown series: {0} (declare it before observing)")]
    UnknownSeries(String),

    #[error("series {series} expects {expected} label value(s), got {got}")]
    LabelArityMismatch {
        series: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid sample for series {series}: {reason}")]
    InvalidSample { series: String, reason: String },

    #[error("health probe already registered: {0}")]
    DuplicateProbeName(String),

    #[error("health probe {name} timed out after {timeout_ms}ms")]
    ProbeTimeout { name: String, timeout_ms: u64 },

    #[error("health probe {name} failed: {message}")]
    ProbeFailure { name: String, message: String },

    #[error("monitoring context is shut down")]
    ContextClosed,

    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

impl MonitoringError {
    pub fn invalid_sample(series: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSample {
            series: series.into(),
            reason: reason.into(),
        }
    }
}
