//! # Aggregation State Shards
//!
//! Per-worker aggregate state. Each [`AggregationShard`] maps a grouping key
//! (Arrow row-format bytes) to one `DataFusion` accumulator per aggregate
//! function. A shard is mutated only through `&mut`, so during accumulation
//! every worker owns exactly one shard and no locks are involved:
//!
//! ```rust,ignore
//! std::thread::scope(|s| {
//!     for (shard, batches) in data.writers().zip(partitions) {
//!         s.spawn(move || batches.iter().try_for_each(|b| shard.accumulate(b)));
//!     }
//! });
//! ```
//!
//! Conversion to output reads accumulator state through
//! `Accumulator::state`, so the same path serves final emissions (merged
//! across shards, then evaluated) and intermediate emissions (state rows).

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use arrow::array::{ArrayRef, Int64Array, UInt32Array};
use arrow::compute;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use arrow::row::RowConverter;
use datafusion_common::ScalarValue;
use datafusion_expr::Accumulator;

use super::function::AggregateParams;
use crate::error::{Error, Result};

/// Row-format bytes of the grouping columns; empty for global aggregates.
pub type GroupKey = Box<[u8]>;

/// One accumulator per aggregate function, in output order.
pub type Accumulators = Vec<Box<dyn Accumulator>>;

/// Intermediate state of one group: per aggregate, its state values.
type GroupStates = Vec<Vec<ScalarValue>>;

/// Aggregate state owned by one worker.
#[derive(Debug)]
pub struct AggregationShard {
    index: usize,
    params: Arc<AggregateParams>,
    converter: Option<RowConverter>,
    groups: AHashMap<GroupKey, Accumulators>,
    rows_accumulated: u64,
}

impl AggregationShard {
    fn new(index: usize, params: Arc<AggregateParams>) -> Result<Self> {
        let converter = params.group_row_converter()?;
        Ok(Self {
            index,
            params,
            converter,
            groups: AHashMap::new(),
            rows_accumulated: 0,
        })
    }

    /// Position of this shard among its siblings.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of groups held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the shard holds no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Rows accumulated since the shard was last cleared or drained.
    #[must_use]
    pub fn rows_accumulated(&self) -> u64 {
        self.rows_accumulated
    }

    /// Folds `batch` into the group accumulators.
    ///
    /// Uses Arrow's `RowConverter` to build binary-comparable group keys in
    /// one pass, then updates each group's accumulators with a `take` of its
    /// rows.
    ///
    /// # Errors
    ///
    /// [`Error::SchemaMismatch`] if `batch` does not match the input schema;
    /// Arrow/DataFusion errors from key conversion or accumulator updates.
    pub fn accumulate(&mut self, batch: &RecordBatch) -> Result<()> {
        self.check_input(batch)?;
        if batch.num_rows() == 0 {
            return Ok(());
        }

        let group_columns: Vec<ArrayRef> = self
            .params
            .group_by_positions()
            .iter()
            .map(|&p| Arc::clone(batch.column(p)))
            .collect();
        let group_indices = self.group_rows(&group_columns, batch.num_rows())?;

        for (key, indices) in group_indices {
            let accs = match self.groups.entry(key) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(create_accumulators(&self.params)?)
                }
            };
            let index_array = UInt32Array::from(indices);
            for (acc, spec) in accs.iter_mut().zip(self.params.aggregates()) {
                let inputs = spec
                    .input_positions()
                    .iter()
                    .map(|&p| compute::take(batch.column(p), &index_array, None))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                acc.update_batch(&inputs)?;
            }
        }

        self.rows_accumulated += batch.num_rows() as u64;
        Ok(())
    }

    /// Merges intermediate state rows, as emitted in
    /// [`ResultMode::Intermediate`](crate::config::ResultMode), into this
    /// shard.
    ///
    /// # Errors
    ///
    /// [`Error::InternalStateCorruption`] if the batch layout disagrees with
    /// the registered aggregate functions.
    pub fn merge_intermediate(&mut self, batch: &RecordBatch) -> Result<()> {
        let schema = self.params.intermediate_schema();
        if batch.num_columns() != schema.fields().len() {
            return Err(Error::InternalStateCorruption(format!(
                "intermediate batch for '{}' has {} columns, expected {}",
                self.params.name(),
                batch.num_columns(),
                schema.fields().len()
            )));
        }
        for (idx, field) in schema.fields().iter().enumerate() {
            let actual = batch.column(idx).data_type();
            if actual != field.data_type() {
                return Err(Error::InternalStateCorruption(format!(
                    "intermediate column '{}' of '{}' has type {actual}, expected {}",
                    field.name(),
                    self.params.name(),
                    field.data_type()
                )));
            }
        }
        if batch.num_rows() == 0 {
            return Ok(());
        }

        let num_groups = self.params.group_by_positions().len();
        let group_columns: Vec<ArrayRef> = batch.columns()[..num_groups].to_vec();
        let group_indices = self.group_rows(&group_columns, batch.num_rows())?;

        for (key, indices) in group_indices {
            let accs = match self.groups.entry(key) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(create_accumulators(&self.params)?)
                }
            };
            let index_array = UInt32Array::from(indices);
            let mut column = num_groups;
            for (acc, spec) in accs.iter_mut().zip(self.params.aggregates()) {
                let width = spec.state_types().len();
                let states = batch.columns()[column..column + width]
                    .iter()
                    .map(|c| compute::take(c, &index_array, None))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                acc.merge_batch(&states)?;
                column += width;
            }
        }
        Ok(())
    }

    /// Drops every group.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.rows_accumulated = 0;
    }

    /// Removes and yields every group with its accumulators.
    pub fn drain(&mut self) -> impl Iterator<Item = (GroupKey, Accumulators)> + '_ {
        self.rows_accumulated = 0;
        self.groups.drain()
    }

    /// Reads the state of every group, sorted by key. With `reset` the
    /// groups are drained, otherwise they keep accumulating.
    ///
    /// `Accumulator::state` may consume internal state (distinct sets do),
    /// so retained groups get fresh accumulators rebuilt from the state
    /// just read.
    fn take_states(&mut self, reset: bool) -> Result<Vec<(GroupKey, GroupStates)>> {
        let params = Arc::clone(&self.params);
        let mut out = Vec::with_capacity(self.groups.len());
        if reset {
            for (key, mut accs) in self.drain() {
                let states = group_states(&params, &mut accs)?;
                out.push((key, states));
            }
        } else {
            for (key, accs) in self.groups.iter_mut() {
                let states = group_states(&params, accs)?;
                *accs = restore_accumulators(&params, &states)?;
                out.push((key.clone(), states));
            }
        }
        out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn group_rows(
        &self,
        group_columns: &[ArrayRef],
        num_rows: usize,
    ) -> Result<AHashMap<GroupKey, Vec<u32>>> {
        let mut group_indices: AHashMap<GroupKey, Vec<u32>> =
            AHashMap::with_capacity((num_rows / 4).max(16));
        match &self.converter {
            None => {
                group_indices.insert(GroupKey::default(), (0..num_rows as u32).collect());
            }
            Some(converter) => {
                let rows = converter.convert_columns(group_columns)?;
                for row_idx in 0..num_rows {
                    group_indices
                        .entry(GroupKey::from(rows.row(row_idx).as_ref()))
                        .or_default()
                        .push(row_idx as u32);
                }
            }
        }
        Ok(group_indices)
    }

    fn check_input(&self, batch: &RecordBatch) -> Result<()> {
        let expected = self.params.input_schema();
        let schema = batch.schema();
        if schema.fields().len() != expected.fields().len() {
            return Err(Error::schema_mismatch(
                self.params.name(),
                "",
                format!(
                    "batch has {} columns, input schema has {}",
                    schema.fields().len(),
                    expected.fields().len()
                ),
            ));
        }
        for (actual, wanted) in schema.fields().iter().zip(expected.fields()) {
            if actual.data_type() != wanted.data_type() {
                return Err(Error::schema_mismatch(
                    self.params.name(),
                    wanted.name(),
                    format!(
                        "batch column has type {}, expected {}",
                        actual.data_type(),
                        wanted.data_type()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Fixed set of shards, one per worker.
#[derive(Debug)]
pub struct ManyAggregatedData {
    params: Arc<AggregateParams>,
    shards: Vec<AggregationShard>,
    /// Decodes group keys from any shard; all shards share one key layout.
    decoder: Option<RowConverter>,
}

impl ManyAggregatedData {
    /// Allocates `shard_count` empty shards.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when `shard_count` is zero.
    pub fn new(shard_count: usize, params: Arc<AggregateParams>) -> Result<Self> {
        if shard_count == 0 {
            return Err(Error::Configuration(
                "aggregation needs at least one shard".to_string(),
            ));
        }
        let shards = (0..shard_count)
            .map(|i| AggregationShard::new(i, Arc::clone(&params)))
            .collect::<Result<Vec<_>>>()?;
        let decoder = params.group_row_converter()?;
        Ok(Self {
            params,
            shards,
            decoder,
        })
    }

    /// Shared aggregation parameters.
    #[must_use]
    pub fn params(&self) -> &Arc<AggregateParams> {
        &self.params
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Read access to one shard.
    #[must_use]
    pub fn shard(&self, index: usize) -> Option<&AggregationShard> {
        self.shards.get(index)
    }

    /// Folds `batch` into shard `shard_index`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an out-of-range shard index, otherwise as
    /// [`AggregationShard::accumulate`].
    pub fn accumulate(&mut self, shard_index: usize, batch: &RecordBatch) -> Result<()> {
        self.shard_mut(shard_index)?.accumulate(batch)
    }

    /// Merges intermediate state rows into shard `shard_index`.
    pub fn merge_intermediate(&mut self, shard_index: usize, batch: &RecordBatch) -> Result<()> {
        self.shard_mut(shard_index)?.merge_intermediate(batch)
    }

    /// One exclusive writer per shard, for parallel accumulation.
    pub fn writers(&mut self) -> std::slice::IterMut<'_, AggregationShard> {
        self.shards.iter_mut()
    }

    /// Whether every shard is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(AggregationShard::is_empty)
    }

    /// Total groups across shards. A group held by several shards counts
    /// once per shard.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.shards.iter().map(AggregationShard::len).sum()
    }

    /// Total rows accumulated since the last reset.
    #[must_use]
    pub fn rows_accumulated(&self) -> u64 {
        self.shards.iter().map(AggregationShard::rows_accumulated).sum()
    }

    /// Drops the state of every shard.
    pub fn clear(&mut self) {
        self.shards.iter_mut().for_each(AggregationShard::clear);
    }

    /// Converts the state of every shard into one row per group.
    ///
    /// Groups present in several shards are merged through their
    /// intermediate state before evaluation. Empty shards contribute
    /// nothing; `None` when no shard holds a group. `version` fills the
    /// version column of the final schema when it has one.
    ///
    /// # Errors
    ///
    /// [`Error::InternalStateCorruption`] when a group's state disagrees
    /// with the registered aggregate functions.
    pub fn convert_final(
        &mut self,
        version: Option<i64>,
        reset: bool,
    ) -> Result<Option<RecordBatch>> {
        let mut merged: BTreeMap<GroupKey, Vec<Vec<Vec<ScalarValue>>>> = BTreeMap::new();
        let num_aggs = self.params.aggregates().len();
        for shard in &mut self.shards {
            if shard.is_empty() {
                continue;
            }
            for (key, states) in shard.take_states(reset)? {
                let slots = merged
                    .entry(key)
                    .or_insert_with(|| vec![Vec::new(); num_aggs]);
                for (slot, state) in slots.iter_mut().zip(states) {
                    slot.push(state);
                }
            }
        }
        if merged.is_empty() {
            return Ok(None);
        }

        let num_groups = merged.len();
        let mut columns = decode_keys(self.decoder.as_ref(), merged.keys())?;
        for (agg_idx, spec) in self.params.aggregates().iter().enumerate() {
            let mut values = Vec::with_capacity(num_groups);
            for slots in merged.values() {
                let mut acc = spec.create_accumulator()?;
                let state_columns = state_arrays(&slots[agg_idx], spec.state_types())?;
                acc.merge_batch(&state_columns)?;
                values.push(acc.evaluate()?);
            }
            columns.push(to_array(values, spec.return_type())?);
        }

        let schema = Arc::clone(self.params.final_schema());
        if schema.fields().len() > columns.len() {
            let version = version.ok_or_else(|| {
                Error::InternalStateCorruption(format!(
                    "final schema of '{}' has a version column but no version was allocated",
                    self.params.name()
                ))
            })?;
            columns.push(Arc::new(Int64Array::from(vec![version; num_groups])));
        }
        Ok(Some(RecordBatch::try_new(schema, columns)?))
    }

    /// Converts the state of every non-empty shard into mergeable state rows,
    /// one row per group per shard.
    ///
    /// Without `reset`, a later call repeats the state already emitted, and
    /// a downstream merge counts it twice.
    ///
    /// # Errors
    ///
    /// [`Error::InternalStateCorruption`] when a group's state disagrees
    /// with the registered aggregate functions.
    pub fn convert_intermediate(&mut self, reset: bool) -> Result<Option<RecordBatch>> {
        let schema = Arc::clone(self.params.intermediate_schema());
        let mut batches = Vec::new();
        for shard in &mut self.shards {
            if shard.is_empty() {
                continue;
            }
            let groups = shard.take_states(reset)?;
            let mut columns = decode_keys(self.decoder.as_ref(), groups.iter().map(|(k, _)| k))?;
            for (agg_idx, spec) in self.params.aggregates().iter().enumerate() {
                for (state_idx, data_type) in spec.state_types().iter().enumerate() {
                    let values = groups
                        .iter()
                        .map(|(_, states)| states[agg_idx][state_idx].clone())
                        .collect();
                    columns.push(to_array(values, data_type)?);
                }
            }
            batches.push(RecordBatch::try_new(Arc::clone(&schema), columns)?);
        }
        match batches.len() {
            0 => Ok(None),
            1 => Ok(batches.pop()),
            _ => Ok(Some(compute::concat_batches(&schema, &batches)?)),
        }
    }

    fn shard_mut(&mut self, index: usize) -> Result<&mut AggregationShard> {
        let count = self.shards.len();
        self.shards.get_mut(index).ok_or_else(|| {
            Error::Configuration(format!("shard index {index} out of range ({count} shards)"))
        })
    }
}

fn create_accumulators(params: &AggregateParams) -> Result<Accumulators> {
    params
        .aggregates()
        .iter()
        .map(super::function::AggFuncSpec::create_accumulator)
        .collect()
}

/// Reads one group's state, checking it against the registered functions.
fn group_states(params: &AggregateParams, accs: &mut Accumulators) -> Result<GroupStates> {
    let specs = params.aggregates();
    if accs.len() != specs.len() {
        return Err(Error::InternalStateCorruption(format!(
            "group of '{}' holds {} accumulators, {} aggregate functions are registered",
            params.name(),
            accs.len(),
            specs.len()
        )));
    }
    let mut states = Vec::with_capacity(specs.len());
    for (acc, spec) in accs.iter_mut().zip(specs) {
        let state = acc.state()?;
        if state.len() != spec.state_types().len() {
            return Err(Error::InternalStateCorruption(format!(
                "state of {} in '{}' has {} fields, expected {}",
                spec.output_name(),
                params.name(),
                state.len(),
                spec.state_types().len()
            )));
        }
        states.push(state);
    }
    Ok(states)
}

/// Fresh accumulators holding exactly `states`.
fn restore_accumulators(params: &AggregateParams, states: &GroupStates) -> Result<Accumulators> {
    let mut accs = create_accumulators(params)?;
    for ((acc, spec), state) in accs.iter_mut().zip(params.aggregates()).zip(states) {
        let columns = state_arrays(std::slice::from_ref(state), spec.state_types())?;
        acc.merge_batch(&columns)?;
    }
    Ok(accs)
}

/// Builds one array per state field from the state rows of one group.
fn state_arrays(rows: &[Vec<ScalarValue>], types: &[DataType]) -> Result<Vec<ArrayRef>> {
    types
        .iter()
        .enumerate()
        .map(|(idx, data_type)| to_array(rows.iter().map(|r| r[idx].clone()).collect(), data_type))
        .collect()
}

fn to_array(values: Vec<ScalarValue>, data_type: &DataType) -> Result<ArrayRef> {
    let array = ScalarValue::iter_to_array(values)?;
    if array.data_type() == data_type {
        Ok(array)
    } else {
        Ok(compute::cast(&array, data_type)?)
    }
}

fn decode_keys<'a>(
    converter: Option<&RowConverter>,
    keys: impl Iterator<Item = &'a GroupKey>,
) -> Result<Vec<ArrayRef>> {
    let Some(converter) = converter else {
        return Ok(Vec::new());
    };
    let parser = converter.parser();
    let rows: Vec<_> = keys.map(|k| parser.parse(k)).collect();
    Ok(converter.convert_rows(rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::function::AggregateCall;
    use crate::config::{AggregationConfig, ResultMode};
    use arrow::array::{Float64Array, UInt64Array};
    use arrow::datatypes::{Field, Schema, SchemaRef};

    fn input() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("k", DataType::UInt64, false),
            Field::new("v", DataType::Int64, true),
        ]))
    }

    fn params(emit_version: bool) -> Arc<AggregateParams> {
        let config = AggregationConfig {
            emit_version,
            shards: 4,
            ..AggregationConfig::default()
        };
        AggregateParams::builder("q", input())
            .group_by(["k"])
            .aggregate(AggregateCall::new("sum", ["v"]).with_alias("total"))
            .aggregate(AggregateCall::new("avg", ["v"]).with_alias("mean"))
            .build(&config)
            .unwrap()
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

    fn column<T: 'static>(batch: &RecordBatch, name: &str) -> T
    where
        T: Clone,
    {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<T>()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_accumulate_groups_rows() {
        let mut data = ManyAggregatedData::new(2, params(false)).unwrap();
        data.accumulate(0, &batch(&[1, 2, 1], &[10, 20, 30])).unwrap();
        assert_eq!(data.shard(0).unwrap().len(), 2);
        assert!(data.shard(1).unwrap().is_empty());
        assert_eq!(data.rows_accumulated(), 3);
        assert!(!data.is_empty());
    }

    #[test]
    fn test_final_merges_groups_across_shards() {
        let mut data = ManyAggregatedData::new(4, params(true)).unwrap();
        data.accumulate(0, &batch(&[1, 2], &[10, 20])).unwrap();
        data.accumulate(2, &batch(&[1, 3], &[30, 40])).unwrap();

        let out = data.convert_final(Some(7), true).unwrap().unwrap();
        assert_eq!(out.num_rows(), 3);
        assert_eq!(column::<UInt64Array>(&out, "k").values().to_vec(), vec![1, 2, 3]);
        assert_eq!(column::<Int64Array>(&out, "total").values().to_vec(), vec![40, 20, 40]);
        assert_eq!(column::<Float64Array>(&out, "mean").value(0), 20.0);
        assert_eq!(column::<Int64Array>(&out, "_tp_version").values().to_vec(), vec![7, 7, 7]);
        assert!(data.is_empty());
        assert!(data.convert_final(Some(8), true).unwrap().is_none());
    }

    #[test]
    fn test_retained_state_keeps_accumulating() {
        let mut data = ManyAggregatedData::new(1, params(false)).unwrap();
        data.accumulate(0, &batch(&[1], &[5])).unwrap();
        data.convert_final(None, false).unwrap().unwrap();
        data.accumulate(0, &batch(&[1], &[6])).unwrap();
        let out = data.convert_final(None, false).unwrap().unwrap();
        assert_eq!(column::<Int64Array>(&out, "total").value(0), 11);
    }

    #[test]
    fn test_intermediate_round_trip_through_merge() {
        let params = params(false);
        let mut data = ManyAggregatedData::new(2, Arc::clone(&params)).unwrap();
        data.accumulate(0, &batch(&[1, 2], &[1, 2])).unwrap();
        data.accumulate(1, &batch(&[1], &[3])).unwrap();

        let intermediate = data.convert_intermediate(true).unwrap().unwrap();
        assert_eq!(intermediate.num_rows(), 3);
        assert_eq!(intermediate.schema(), *params.intermediate_schema());

        let mut downstream = ManyAggregatedData::new(1, params).unwrap();
        downstream.merge_intermediate(0, &intermediate).unwrap();
        let out = downstream.convert_final(None, true).unwrap().unwrap();
        assert_eq!(column::<Int64Array>(&out, "total").values().to_vec(), vec![4, 2]);
        assert_eq!(column::<Float64Array>(&out, "mean").value(0), 2.0);
    }

    #[test]
    fn test_global_aggregate_without_group_by() {
        let config = AggregationConfig {
            result_mode: ResultMode::Final,
            ..AggregationConfig::default()
        };
        let params = AggregateParams::builder("g", input())
            .aggregate(AggregateCall::new("count", ["v"]).with_alias("n"))
            .build(&config)
            .unwrap();
        let mut data = ManyAggregatedData::new(2, params).unwrap();
        data.accumulate(0, &batch(&[1, 2], &[1, 2])).unwrap();
        data.accumulate(1, &batch(&[3], &[3])).unwrap();
        let out = data.convert_final(None, true).unwrap().unwrap();
        assert_eq!(out.num_rows(), 1);
        assert_eq!(column::<Int64Array>(&out, "n").value(0), 3);
    }

    #[test]
    fn test_accumulator_count_mismatch_is_corruption() {
        let mut data = ManyAggregatedData::new(1, params(false)).unwrap();
        data.accumulate(0, &batch(&[1], &[1])).unwrap();
        let shard = &mut data.shards[0];
        let accs = shard.groups.values_mut().next().unwrap();
        accs.pop();
        assert!(matches!(
            data.convert_final(None, true),
            Err(Error::InternalStateCorruption(_))
        ));
    }

    #[test]
    fn test_malformed_intermediate_is_corruption() {
        let params = params(false);
        let mut data = ManyAggregatedData::new(1, params).unwrap();
        let err = data.merge_intermediate(0, &batch(&[1], &[1])).unwrap_err();
        assert!(matches!(err, Error::InternalStateCorruption(_)));
    }

    #[test]
    fn test_schema_checks() {
        let mut data = ManyAggregatedData::new(1, params(false)).unwrap();
        let wrong = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("k", DataType::UInt64, false)])),
            vec![Arc::new(UInt64Array::from(vec![1]))],
        )
        .unwrap();
        assert!(matches!(
            data.accumulate(0, &wrong),
            Err(Error::SchemaMismatch { .. })
        ));
        assert!(matches!(
            data.accumulate(9, &batch(&[1], &[1])),
            Err(Error::Configuration(_))
        ));
        assert!(ManyAggregatedData::new(0, params(false)).is_err());
    }

    #[test]
    fn test_parallel_writers() {
        let mut data = ManyAggregatedData::new(3, params(false)).unwrap();
        std::thread::scope(|s| {
            for shard in data.writers() {
                s.spawn(move || {
                    let k = shard.index() as u64;
                    shard.accumulate(&batch(&[k, k], &[1, 1])).unwrap();
                });
            }
        });
        assert_eq!(data.group_count(), 3);
        let out = data.convert_final(None, true).unwrap().unwrap();
        assert_eq!(column::<Int64Array>(&out, "total").values().to_vec(), vec![2, 2, 2]);
    }

    #[test]
    fn test_drain_empties_shard() {
        let mut data = ManyAggregatedData::new(1, params(false)).unwrap();
        data.accumulate(0, &batch(&[1, 2], &[1, 2])).unwrap();
        let shard = data.writers().next().unwrap();
        assert_eq!(shard.drain().count(), 2);
        assert!(shard.is_empty());
        assert_eq!(shard.rows_accumulated(), 0);
    }
}
