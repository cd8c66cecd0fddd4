//! # Emit-Strategy Aggregating Transform
//!
//! Routes input batches into per-worker shards and, when the configured
//! [`EmitStrategy`] fires, converts shard state into one output chunk.
//!
//! ```text
//! consume(worker, batch) ──► shard[worker]          (Accumulating)
//!                                 │
//!      on_tick / row threshold /  │
//!      emit / finish              ▼
//!                      final: merge shards → evaluate → + _tp_version
//!                      intermediate: per-shard state rows (Finalizing)
//! ```
//!
//! Every conversion takes `&mut self`, so accumulation and finalization can
//! never overlap.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use super::emit::{EmitStrategy, EmitTracker};
use super::function::{AggregateParams, GroupByMode};
use super::shard::{AggregationShard, ManyAggregatedData};
use super::version::EmitVersionGenerator;
use crate::chunk::{ChunkContext, EmittedChunk};
use crate::config::{AggregationConfig, ResultMode};
use crate::error::{Error, Result};

/// Lifecycle phase of the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Input is folded into shards; nothing is emitted.
    Accumulating,
    /// Shard state is being converted into output.
    Finalizing,
    /// The final end-of-input emission has happened.
    Finished,
    /// The query was cancelled or failed; state was discarded.
    Cancelled,
}

/// Aggregating transform driven by an [`EmitStrategy`].
#[derive(Debug)]
pub struct EmitAggregatingTransform {
    params: Arc<AggregateParams>,
    data: ManyAggregatedData,
    tracker: EmitTracker,
    versions: EmitVersionGenerator,
    phase: Phase,
    /// Context ids for emissions the transform triggers itself.
    auto_generation: u64,
}

impl EmitAggregatingTransform {
    /// Creates a transform with `config.shards` empty shards.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `config` is invalid or disagrees with the
    /// mode `params` was built for.
    pub fn new(params: Arc<AggregateParams>, config: &AggregationConfig) -> Result<Self> {
        config.validate()?;
        let user_defined = matches!(config.strategy, EmitStrategy::UserDefined);
        if user_defined != (params.group_by_mode() == GroupByMode::UserDefined) {
            return Err(Error::Configuration(format!(
                "aggregation '{}' was bound for {:?} grouping but the emit strategy is {:?}",
                params.name(),
                params.group_by_mode(),
                config.strategy
            )));
        }
        if params.result_mode() != config.result_mode
            || params.emit_version() != config.emit_version
        {
            return Err(Error::Configuration(format!(
                "aggregation '{}' was bound with a different result mode or version setting",
                params.name()
            )));
        }

        let data = ManyAggregatedData::new(config.shards, Arc::clone(&params))?;
        tracing::debug!(
            operator = params.name(),
            shards = config.shards,
            strategy = ?config.strategy,
            result_mode = ?config.result_mode,
            "created emit aggregating transform"
        );
        Ok(Self {
            params,
            data,
            tracker: EmitTracker::new(config.strategy.clone()),
            versions: EmitVersionGenerator::default(),
            phase: Phase::Accumulating,
            auto_generation: 0,
        })
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Schema of emitted batches.
    #[must_use]
    pub fn output_schema(&self) -> &SchemaRef {
        self.params.output_schema()
    }

    /// Shared aggregation parameters.
    #[must_use]
    pub fn params(&self) -> &Arc<AggregateParams> {
        &self.params
    }

    /// The emit strategy.
    #[must_use]
    pub fn strategy(&self) -> &EmitStrategy {
        self.tracker.strategy()
    }

    /// Read access to the shards.
    #[must_use]
    pub fn data(&self) -> &ManyAggregatedData {
        &self.data
    }

    /// Last version attached to an emission, 0 if none.
    #[must_use]
    pub fn last_version(&self) -> i64 {
        self.versions.last()
    }

    /// Folds `batch` into the shard of `worker`. Under a row-count strategy
    /// this emits once the threshold is reached.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] after `finish`/`cancel` or for an unknown
    /// worker; schema and accumulator errors from the shard.
    pub fn consume(&mut self, worker: usize, batch: &RecordBatch) -> Result<Option<EmittedChunk>> {
        self.ensure_accumulating()?;
        self.data.accumulate(worker, batch)?;
        if self.tracker.on_rows(batch.num_rows() as u64) {
            self.auto_generation += 1;
            let ctx = ChunkContext::new(self.auto_generation);
            let reset = self.strategy().resets_state();
            return self.convert(ctx, reset);
        }
        Ok(None)
    }

    /// One exclusive writer per shard, for parallel accumulation outside
    /// [`consume`](Self::consume). Rows written this way do not count towards
    /// a row-count threshold.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] after `finish`/`cancel`.
    pub fn writers(&mut self) -> Result<std::slice::IterMut<'_, AggregationShard>> {
        self.ensure_accumulating()?;
        Ok(self.data.writers())
    }

    /// Advances time. Emits when a window or periodic boundary has passed.
    pub fn on_tick(&mut self, now_ms: u64, ctx: &ChunkContext) -> Result<Option<EmittedChunk>> {
        self.ensure_accumulating()?;
        if !self.tracker.on_tick(now_ms) {
            return Ok(None);
        }
        let reset = self.strategy().resets_state();
        self.convert(ctx.clone(), reset)
    }

    /// Emits now, regardless of the strategy. This is the trigger for
    /// user-defined emission; state is reset unless the strategy is
    /// periodic.
    pub fn emit(&mut self, ctx: &ChunkContext) -> Result<Option<EmittedChunk>> {
        self.ensure_accumulating()?;
        let reset = self.strategy().resets_state();
        self.convert(ctx.clone(), reset)
    }

    /// Input ended: emits whatever is left and finishes.
    pub fn finish(&mut self, ctx: &ChunkContext) -> Result<Option<EmittedChunk>> {
        self.ensure_accumulating()?;
        let chunk = self.convert(ctx.clone(), true)?;
        self.phase = Phase::Finished;
        Ok(chunk)
    }

    /// Discards all shard state without emitting.
    pub fn cancel(&mut self) {
        let groups = self.data.group_count();
        self.data.clear();
        self.tracker.reset();
        self.phase = Phase::Cancelled;
        tracing::debug!(
            operator = self.params.name(),
            discarded_groups = groups,
            "aggregation cancelled"
        );
    }

    fn ensure_accumulating(&self) -> Result<()> {
        match self.phase {
            Phase::Accumulating => Ok(()),
            phase => Err(Error::Configuration(format!(
                "aggregation '{}' cannot accept calls in phase {phase:?}",
                self.params.name()
            ))),
        }
    }

    fn convert(&mut self, ctx: ChunkContext, reset: bool) -> Result<Option<EmittedChunk>> {
        self.phase = Phase::Finalizing;
        match self.convert_shards(ctx, reset) {
            Ok(chunk) => {
                self.tracker.mark_emitted();
                self.phase = Phase::Accumulating;
                Ok(chunk)
            }
            Err(e) => {
                tracing::warn!(
                    operator = self.params.name(),
                    error = %e,
                    "aggregation conversion failed, discarding state"
                );
                self.data.clear();
                self.phase = Phase::Cancelled;
                Err(e)
            }
        }
    }

    fn convert_shards(&mut self, ctx: ChunkContext, reset: bool) -> Result<Option<EmittedChunk>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let mode = self.params.result_mode();
        let (batch, version) = match mode {
            ResultMode::Final => {
                let version = self
                    .params
                    .emit_version()
                    .then(|| self.versions.next_version());
                (self.data.convert_final(version, reset)?, version)
            }
            ResultMode::Intermediate => (self.data.convert_intermediate(reset)?, None),
        };
        let Some(batch) = batch else {
            return Ok(None);
        };

        tracing::debug!(
            operator = self.params.name(),
            context = ctx.id(),
            rows = batch.num_rows(),
            ?version,
            ?mode,
            reset,
            "emitted aggregation chunk"
        );
        Ok(Some(EmittedChunk {
            batch,
            context: ctx,
            mode,
            version,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::function::AggregateCall;
    use arrow::array::{Int64Array, StringArray, UInt64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    fn input() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("k", DataType::UInt64, false),
            Field::new("v", DataType::Int64, true),
        ]))
    }

    fn batch(keys: &[u64], values: &[i64]) -> RecordBatch {
        RecordBatch::try_new(
            input(),
            vec![
                Arc::new(UInt64Array::from(keys.to_vec())),
                Arc::new(Int64Array::from(values.to_vec())),
            ],
        )
        .unwrap()
    }

    fn transform(config: &AggregationConfig) -> EmitAggregatingTransform {
        let params = AggregateParams::builder("q", input())
            .group_by(["k"])
            .aggregate(AggregateCall::new("sum", ["v"]).with_alias("total"))
            .build(config)
            .unwrap();
        EmitAggregatingTransform::new(params, config).unwrap()
    }

    fn totals(chunk: &EmittedChunk) -> Vec<i64> {
        chunk
            .batch
            .column_by_name("total")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn test_end_of_stream_emits_only_at_finish() {
        let mut t = transform(&AggregationConfig::default());
        assert!(t.consume(0, &batch(&[1, 2], &[1, 2])).unwrap().is_none());
        assert!(t.on_tick(10_000, &ChunkContext::new(1)).unwrap().is_none());
        assert_eq!(t.phase(), Phase::Accumulating);

        let chunk = t.finish(&ChunkContext::new(9)).unwrap().unwrap();
        assert_eq!(chunk.context.id(), 9);
        assert_eq!(chunk.version, None);
        assert_eq!(totals(&chunk), vec![1, 2]);
        assert_eq!(t.phase(), Phase::Finished);
        assert!(t.consume(0, &batch(&[1], &[1])).is_err());
    }

    #[test]
    fn test_time_window_resets_after_emit() {
        let config = AggregationConfig {
            strategy: EmitStrategy::TimeWindow { interval_ms: 100 },
            emit_version: true,
            ..AggregationConfig::default()
        };
        let mut t = transform(&config);
        assert!(t.on_tick(0, &ChunkContext::new(0)).unwrap().is_none());
        t.consume(0, &batch(&[1], &[5])).unwrap();
        let first = t.on_tick(100, &ChunkContext::new(1)).unwrap().unwrap();
        assert_eq!(totals(&first), vec![5]);
        assert_eq!(first.version, Some(1));

        t.consume(0, &batch(&[1], &[7])).unwrap();
        let second = t.on_tick(200, &ChunkContext::new(2)).unwrap().unwrap();
        assert_eq!(totals(&second), vec![7]);
        assert_eq!(second.version, Some(2));

        assert!(t.on_tick(300, &ChunkContext::new(3)).unwrap().is_none());
        assert_eq!(t.last_version(), 2);
    }

    #[test]
    fn test_periodic_retains_state_and_bumps_version() {
        let config = AggregationConfig {
            strategy: EmitStrategy::Periodic { interval_ms: 10 },
            emit_version: true,
            ..AggregationConfig::default()
        };
        let mut t = transform(&config);
        t.on_tick(0, &ChunkContext::new(0)).unwrap();
        t.consume(0, &batch(&[1], &[5])).unwrap();
        let first = t.on_tick(10, &ChunkContext::new(1)).unwrap().unwrap();
        t.consume(0, &batch(&[1], &[1])).unwrap();
        let second = t.on_tick(20, &ChunkContext::new(2)).unwrap().unwrap();

        assert_eq!(totals(&first), vec![5]);
        assert_eq!(totals(&second), vec![6]);
        assert!(second.version > first.version);
    }

    #[test]
    fn test_periodic_distinct_count_keeps_running_state() {
        let schema: SchemaRef = Arc::new(Schema::new(vec![
            Field::new("k", DataType::UInt64, false),
            Field::new("s", DataType::Utf8, true),
        ]));
        let names = |values: &[&str]| {
            RecordBatch::try_new(
                Arc::clone(&schema),
                vec![
                    Arc::new(UInt64Array::from(vec![1u64; values.len()])),
                    Arc::new(StringArray::from(values.to_vec())),
                ],
            )
            .unwrap()
        };
        let config = AggregationConfig {
            strategy: EmitStrategy::Periodic { interval_ms: 10 },
            ..AggregationConfig::default()
        };
        let params = AggregateParams::builder("q", Arc::clone(&schema))
            .group_by(["k"])
            .aggregate(AggregateCall::new("count", ["s"]).distinct().with_alias("n"))
            .build(&config)
            .unwrap();
        let mut t = EmitAggregatingTransform::new(params, &config).unwrap();
        let distinct = |chunk: &EmittedChunk| {
            chunk
                .batch
                .column_by_name("n")
                .unwrap()
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap()
                .value(0)
        };

        t.on_tick(0, &ChunkContext::new(0)).unwrap();
        t.consume(0, &names(&["a", "b", "a"])).unwrap();
        let first = t.on_tick(10, &ChunkContext::new(1)).unwrap().unwrap();
        assert_eq!(distinct(&first), 2);

        t.consume(0, &names(&["c", "b"])).unwrap();
        let second = t.on_tick(20, &ChunkContext::new(2)).unwrap().unwrap();
        assert_eq!(distinct(&second), 3);

        let last = t.finish(&ChunkContext::new(3)).unwrap().unwrap();
        assert_eq!(distinct(&last), 3);
    }

    #[test]
    fn test_periodic_intermediate_is_rejected() {
        let config = AggregationConfig {
            strategy: EmitStrategy::Periodic { interval_ms: 10 },
            result_mode: ResultMode::Intermediate,
            ..AggregationConfig::default()
        };
        let err = AggregateParams::builder("q", input())
            .group_by(["k"])
            .aggregate(AggregateCall::new("sum", ["v"]))
            .build(&config)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_row_count_threshold_triggers_emission() {
        let config = AggregationConfig {
            strategy: EmitStrategy::RowCount { rows: 3 },
            ..AggregationConfig::default()
        };
        let mut t = transform(&config);
        assert!(t.consume(0, &batch(&[1, 1], &[1, 1])).unwrap().is_none());
        let chunk = t.consume(0, &batch(&[2], &[4])).unwrap().unwrap();
        assert_eq!(totals(&chunk), vec![2, 4]);
        assert_eq!(chunk.context.id(), 1);
        assert!(t.data().is_empty());
        assert!(t.consume(0, &batch(&[2], &[4])).unwrap().is_none());
    }

    #[test]
    fn test_intermediate_mode_emits_state_rows() {
        let config = AggregationConfig {
            shards: 2,
            result_mode: ResultMode::Intermediate,
            ..AggregationConfig::default()
        };
        let mut t = transform(&config);
        t.consume(0, &batch(&[1], &[1])).unwrap();
        t.consume(1, &batch(&[1], &[2])).unwrap();
        let chunk = t.emit(&ChunkContext::new(1)).unwrap().unwrap();
        assert_eq!(chunk.mode, ResultMode::Intermediate);
        assert_eq!(chunk.num_rows(), 2);
        assert_eq!(chunk.batch.schema(), *t.output_schema());
        assert!(chunk.version.is_none());
    }

    #[test]
    fn test_cancel_discards_state() {
        let mut t = transform(&AggregationConfig::default());
        t.consume(0, &batch(&[1], &[1])).unwrap();
        t.cancel();
        assert_eq!(t.phase(), Phase::Cancelled);
        assert!(t.data().is_empty());
        assert!(t.finish(&ChunkContext::new(1)).is_err());
    }

    #[test]
    fn test_mismatched_config_rejected() {
        let bound = AggregationConfig::default();
        let params = AggregateParams::builder("q", input())
            .aggregate(AggregateCall::new("sum", ["v"]))
            .build(&bound)
            .unwrap();
        let config = AggregationConfig {
            strategy: EmitStrategy::UserDefined,
            ..AggregationConfig::default()
        };
        assert!(matches!(
            EmitAggregatingTransform::new(Arc::clone(&params), &config),
            Err(Error::Configuration(_))
        ));
        let config = AggregationConfig {
            emit_version: true,
            ..AggregationConfig::default()
        };
        assert!(EmitAggregatingTransform::new(params, &config).is_err());
    }
}
