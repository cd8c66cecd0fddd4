//! Error taxonomy for the incremental-computation core.
//!
//! None of these errors are recovered locally. Plan-time errors
//! (`Configuration`, `SchemaMismatch`) halt compilation; execution-time errors
//! (`ConsistencyViolation`, `InternalStateCorruption`) fail the query.

use arrow::error::ArrowError;
use datafusion_common::DataFusionError;

use crate::error_codes;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by classification, join metadata, resolution and aggregation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream semantic cannot be classified from declared metadata, or a
    /// configuration value is out of range.
    #[error("[{code}] configuration error: {0}", code = error_codes::CONFIGURATION)]
    Configuration(String),

    /// A column implied by the declared semantic is absent from the resolved
    /// schema, or has an unusable type.
    #[error(
        "[{code}] schema mismatch on stream '{stream}', column '{column}': {reason}",
        code = error_codes::SCHEMA_MISMATCH
    )]
    SchemaMismatch {
        /// Stream whose schema failed validation.
        stream: String,
        /// Offending column name.
        column: String,
        /// What was wrong with it.
        reason: String,
    },

    /// An explicit retraction has no matching retained row, or a row carries a
    /// delta or version value the changelog contract does not allow.
    #[error(
        "[{code}] changelog consistency violation on stream '{stream}': {reason}",
        code = error_codes::CONSISTENCY_VIOLATION
    )]
    ConsistencyViolation {
        /// Stream the offending row came from.
        stream: String,
        /// Description of the violation.
        reason: String,
    },

    /// Aggregate state disagrees with the registered aggregate functions.
    /// Indicates a planning bug; never retried.
    #[error(
        "[{code}] internal aggregate state corruption: {0}",
        code = error_codes::INTERNAL_STATE_CORRUPTION
    )]
    InternalStateCorruption(String),

    /// Arrow error while slicing, converting or assembling batches.
    #[error("[{code}] arrow error: {0}", code = error_codes::ARROW_ERROR)]
    Arrow(#[from] ArrowError),

    /// `DataFusion` accumulator or scalar conversion error.
    #[error("[{code}] datafusion error: {0}", code = error_codes::DATAFUSION_ERROR)]
    DataFusion(#[from] DataFusionError),
}

impl Error {
    /// Returns the stable `EBF-NNNN` code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => error_codes::CONFIGURATION,
            Self::SchemaMismatch { .. } => error_codes::SCHEMA_MISMATCH,
            Self::ConsistencyViolation { .. } => error_codes::CONSISTENCY_VIOLATION,
            Self::InternalStateCorruption(_) => error_codes::INTERNAL_STATE_CORRUPTION,
            Self::Arrow(_) => error_codes::ARROW_ERROR,
            Self::DataFusion(_) => error_codes::DATAFUSION_ERROR,
        }
    }

    /// Returns true for errors raised while compiling a plan, as opposed to
    /// errors raised while executing it.
    #[must_use]
    pub fn is_plan_time(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::SchemaMismatch { .. })
    }

    pub(crate) fn schema_mismatch(
        stream: &str,
        column: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            stream: stream.to_string(),
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn consistency(stream: &str, reason: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            stream: stream.to_string(),
            reason: reason.into(),
        }
    }
}
