//! # Join-side changelog semantics
//!
//! Everything a hash join needs to apply changelog semantics to one input
//! side without a separate retraction stage:
//!
//! - [`JoinStreamDescription`]: column positions bound once per plan
//! - [`RetractionResolver`]: per-row insert / retract / upsert decisions
//! - [`ChangelogBatchBuilder`]: signed output batches
//!
//! ## Usage
//!
//! ```rust,ignore
//! let description = JoinStreamDescription::build(
//!     &stream, schema, semantic, JoinStrictness::All, &config,
//! )?
//! .into_shared();
//!
//! let mut resolver = RetractionResolver::new(Arc::clone(&description), &["k"])?;
//! for resolution in resolver.resolve_batch(&batch)? {
//!     builder.push_resolution(resolution);
//! }
//! ```

pub mod changelog;
pub mod description;
pub mod resolver;
pub mod retention;
pub mod strictness;

use datafusion_common::ScalarValue;

/// One row as scalar values, in schema order.
pub type Row = Vec<ScalarValue>;

pub use changelog::{ChangelogBatchBuilder, ChangelogRow};
pub use description::{JoinStreamDescription, KeyPositions};
pub use resolver::{Resolution, ResolverStats, RetractionResolver, RowLocator};
pub use retention::{RetainedRow, RetainedRows, RetentionKey};
pub use strictness::JoinStrictness;
