//! Rendering resolutions as signed changelog batches.
//!
//! Output batches carry the payload columns of the join side followed by a
//! non-null `Int8` `_tp_delta` column holding `+1` or `-1`.

use std::sync::Arc;

use arrow::array::{ArrayRef, Int8Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use datafusion_common::ScalarValue;

use super::resolver::Resolution;
use super::Row;
use crate::error::{Error, Result};
use crate::semantic::DELTA_COLUMN;

/// One signed row of a changelog.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogRow {
    /// `+1` for insertions, `-1` for retractions.
    pub sign: i8,
    /// Row values without the delta column.
    pub row: Row,
}

impl ChangelogRow {
    /// An insertion.
    #[must_use]
    pub fn insert(row: Row) -> Self {
        Self { sign: 1, row }
    }

    /// A retraction.
    #[must_use]
    pub fn retract(row: Row) -> Self {
        Self { sign: -1, row }
    }

    /// Whether this row retracts a previous one.
    #[must_use]
    pub fn is_retraction(&self) -> bool {
        self.sign < 0
    }
}

/// Accumulates signed rows and assembles them into a `RecordBatch`.
#[derive(Debug)]
pub struct ChangelogBatchBuilder {
    payload_schema: SchemaRef,
    output_schema: SchemaRef,
    rows: Vec<ChangelogRow>,
}

impl ChangelogBatchBuilder {
    /// Creates a builder for rows shaped like `payload_schema`.
    #[must_use]
    pub fn new(payload_schema: SchemaRef) -> Self {
        let mut fields: Vec<Field> = payload_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields.push(Field::new(DELTA_COLUMN, DataType::Int8, false));
        Self {
            payload_schema,
            output_schema: Arc::new(Schema::new(fields)),
            rows: Vec::new(),
        }
    }

    /// Schema of the batches produced by [`finish`](Self::finish).
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    /// Buffered row count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Buffers one signed row.
    pub fn push(&mut self, row: ChangelogRow) {
        self.rows.push(row);
    }

    /// Buffers the changelog rows of a resolution. Stale resolutions add
    /// nothing.
    pub fn push_resolution(&mut self, resolution: Resolution) {
        self.rows.extend(resolution.into_changelog());
    }

    /// Buffers every row of `rows`.
    pub fn extend(&mut self, rows: impl IntoIterator<Item = ChangelogRow>) {
        self.rows.extend(rows);
    }

    /// Assembles the buffered rows into a batch and resets the builder.
    /// Returns `None` when nothing is buffered.
    ///
    /// # Errors
    ///
    /// [`Error::InternalStateCorruption`] if a row does not match the payload
    /// width, or an Arrow/DataFusion error if a value cannot be converted to
    /// its column type.
    pub fn finish(&mut self) -> Result<Option<RecordBatch>> {
        if self.rows.is_empty() {
            return Ok(None);
        }
        let rows = std::mem::take(&mut self.rows);
        let width = self.payload_schema.fields().len();
        if let Some(bad) = rows.iter().find(|r| r.row.len() != width) {
            return Err(Error::InternalStateCorruption(format!(
                "changelog row has {} values, payload schema has {width}",
                bad.row.len()
            )));
        }

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(width + 1);
        for (idx, field) in self.payload_schema.fields().iter().enumerate() {
            let values = rows.iter().map(|r| r.row[idx].clone());
            let array = ScalarValue::iter_to_array(values)?;
            let array = if array.data_type() == field.data_type() {
                array
            } else {
                arrow::compute::cast(&array, field.data_type())?
            };
            columns.push(array);
        }
        columns.push(Arc::new(Int8Array::from_iter_values(
            rows.iter().map(|r| r.sign),
        )));

        Ok(Some(RecordBatch::try_new(
            Arc::clone(&self.output_schema),
            columns,
        )?))
    }
}
