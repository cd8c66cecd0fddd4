//! # `ebbflow` core
//!
//! Incremental-computation core for streaming SQL: joins and aggregations
//! over changelog streams.
//!
//! This crate provides:
//! - Stream semantic classification (append, changelog, changelog-kv,
//!   versioned-kv) from declared engine metadata
//! - Per-side join metadata with column positions bound once per plan
//! - A retraction resolver deciding insert / retract / upsert per row
//! - Sharded aggregate state with strategy-driven emission, in final or
//!   intermediate (mergeable) form
//!
//! ## Changelog join side
//!
//! ```rust,ignore
//! let semantic = cache.get_or_classify(&stream)?;
//! let description = JoinStreamDescription::build(
//!     &stream, schema, semantic, JoinStrictness::Any, &config.join,
//! )?
//! .into_shared();
//! let mut resolver = RetractionResolver::new(description, &["k"])?;
//! let changelog = resolver.resolve(&row)?.into_changelog();
//! ```
//!
//! ## Windowed aggregation
//!
//! ```rust,ignore
//! let params = AggregateParams::builder("totals", schema)
//!     .group_by(["k"])
//!     .aggregate(AggregateCall::new("sum", ["v"]).with_alias("total"))
//!     .build(&config.aggregation)?;
//! let mut transform = EmitAggregatingTransform::new(params, &config.aggregation)?;
//! transform.consume(worker, &batch)?;
//! if let Some(chunk) = transform.on_tick(now_ms, &ctx)? {
//!     downstream.push(chunk.batch);
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Row counts are bounded by batch sizes
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]

pub mod aggregation;
pub mod chunk;
pub mod config;
pub mod error;
pub mod error_codes;
pub mod join;
pub mod semantic;

pub use aggregation::{
    AggregateCall, AggregateParams, EmitAggregatingTransform, EmitStrategy, ManyAggregatedData,
    UserDefinedEmitTransform,
};
pub use chunk::{ChunkContext, EmittedChunk};
pub use config::{AggregationConfig, CoreConfig, JoinConfig, ResultMode};
pub use error::{Error, Result};
pub use join::{
    ChangelogBatchBuilder, JoinStreamDescription, JoinStrictness, Resolution, RetractionResolver,
};
pub use semantic::{classify, SemanticCache, StreamDescriptor, StreamSemantic};
