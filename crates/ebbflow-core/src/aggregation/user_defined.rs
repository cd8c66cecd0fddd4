//! User-defined emission.
//!
//! Emission boundaries come from application grouping logic (a count, a
//! marker row, a session boundary) rather than from time. Deciding the
//! boundary needs cross-row state that cannot be partitioned ahead of time,
//! so this variant accumulates into a single shard on a single worker.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use super::emit::EmitStrategy;
use super::function::{AggregateParams, GroupByMode};
use super::transform::{EmitAggregatingTransform, Phase};
use crate::chunk::{ChunkContext, EmittedChunk};
use crate::config::AggregationConfig;
use crate::error::{Error, Result};

/// Single-shard aggregation finalized on explicit application triggers.
#[derive(Debug)]
pub struct UserDefinedEmitTransform {
    inner: EmitAggregatingTransform,
}

impl UserDefinedEmitTransform {
    /// Wraps `params` in a one-shard transform.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] unless `params` was bound for user-defined
    /// grouping.
    pub fn new(params: Arc<AggregateParams>) -> Result<Self> {
        if params.group_by_mode() != GroupByMode::UserDefined {
            return Err(Error::Configuration(format!(
                "aggregation '{}' is not in user-defined group-by mode",
                params.name()
            )));
        }
        let config = AggregationConfig {
            shards: 1,
            strategy: EmitStrategy::UserDefined,
            result_mode: params.result_mode(),
            emit_version: params.emit_version(),
        };
        Ok(Self {
            inner: EmitAggregatingTransform::new(params, &config)?,
        })
    }

    /// Folds `batch` into the current group.
    pub fn accumulate(&mut self, batch: &RecordBatch) -> Result<()> {
        self.inner.consume(0, batch).map(|_| ())
    }

    /// Emits the current group and starts the next one from an empty shard.
    /// Returns `None` when nothing was accumulated since the last trigger.
    pub fn finalize(&mut self, ctx: &ChunkContext) -> Result<Option<EmittedChunk>> {
        let chunk = self.inner.emit(ctx)?;
        debug_assert!(self.inner.data().is_empty(), "state leaked past a trigger");
        Ok(chunk)
    }

    /// Emits any remaining group and finishes.
    pub fn finish(&mut self, ctx: &ChunkContext) -> Result<Option<EmittedChunk>> {
        self.inner.finish(ctx)
    }

    /// Discards the current group without emitting.
    pub fn cancel(&mut self) {
        self.inner.cancel();
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.phase()
    }

    /// Schema of emitted batches.
    #[must_use]
    pub fn output_schema(&self) -> &SchemaRef {
        self.inner.output_schema()
    }

    /// Groups in the current, not yet emitted, group.
    #[must_use]
    pub fn pending_groups(&self) -> usize {
        self.inner.data().group_count()
    }
}
