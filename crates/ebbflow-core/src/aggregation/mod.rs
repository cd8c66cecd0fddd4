//! # Emit-strategy aggregation
//!
//! Per-worker aggregate state and the state machine that decides when it
//! becomes output.
//!
//! - [`AggregateParams`]: bound group-by columns and `DataFusion` aggregates
//! - [`ManyAggregatedData`]: one [`AggregationShard`] per worker
//! - [`EmitAggregatingTransform`]: accumulation and emission per [`EmitStrategy`]
//! - [`UserDefinedEmitTransform`]: single-shard variant with application
//!   triggers

pub mod emit;
pub mod function;
pub mod shard;
pub mod transform;
pub mod user_defined;
pub mod version;

pub use emit::{EmitStrategy, EmitTracker};
pub use function::{
    lookup_aggregate, AggFuncSpec, AggregateCall, AggregateParams, AggregateParamsBuilder,
    GroupByMode,
};
pub use shard::{AggregationShard, ManyAggregatedData};
pub use transform::{EmitAggregatingTransform, Phase};
pub use user_defined::UserDefinedEmitTransform;
pub use version::EmitVersionGenerator;
