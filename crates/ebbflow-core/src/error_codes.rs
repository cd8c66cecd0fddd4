//! Structured error code registry.
//!
//! Every error raised by the core carries a stable `EBF-NNNN` code that is
//! present in the rendered message (grep-able in logs) and never reused.
//!
//! # Code Ranges
//!
//! | Range | Category |
//! |-------|----------|
//! | `EBF-0xxx` | General / configuration |
//! | `EBF-3xxx` | Join metadata and changelog resolution |
//! | `EBF-5xxx` | Aggregation / emission |
//! | `EBF-7xxx` | DataFusion / Arrow interop |
//! | `EBF-8xxx` | Internal / should-not-happen |

// ── General / Configuration (EBF-0xxx) ──

/// Stream semantic cannot be classified, or a configuration value is invalid.
pub const CONFIGURATION: &str = "EBF-0001";

// ── Join (EBF-3xxx) ──

/// A column required by the declared semantic is missing or has the wrong type.
pub const SCHEMA_MISMATCH: &str = "EBF-3001";
/// A retraction has no matching prior row, or a row carries an invalid
/// delta / version value.
pub const CONSISTENCY_VIOLATION: &str = "EBF-3101";

// ── DataFusion / Arrow Interop (EBF-7xxx) ──

/// `DataFusion` accumulator or scalar error.
pub const DATAFUSION_ERROR: &str = "EBF-7001";
/// Arrow schema or record batch error.
pub const ARROW_ERROR: &str = "EBF-7002";

// ── Internal / Should-Not-Happen (EBF-8xxx) ──

/// Aggregate state layout disagrees with the registered aggregate functions.
pub const INTERNAL_STATE_CORRUPTION: &str = "EBF-8001";
