//! # Retraction Resolver
//!
//! Decides, per incoming row on one join side, whether the row inserts,
//! retracts a retained row, or supersedes one (upsert), and keeps the
//! retained-row state needed to answer that for later rows.
//!
//! The resolver only tracks what it needs for matching. The join's own
//! match-state table is owned by the hash-join operator, which applies the
//! returned [`Resolution`] using the [`RowLocator`] sequence numbers.
//!
//! ## Decision order
//!
//! 1. Delta column present: `-1` retracts the newest equal row under the same
//!    join key and identity (a missing match is a consistency violation),
//!    `+1` inserts and retains.
//! 2. Version column present: newer version upserts, equal or older is
//!    stale and dropped.
//! 3. Otherwise: plain insert, no lookup, nothing retained.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use datafusion_common::ScalarValue;

use super::changelog::ChangelogRow;
use super::description::JoinStreamDescription;
use super::retention::{RetainedRow, RetainedRows, RetentionKey};
use super::Row;
use crate::error::{Error, Result};

/// Identifies a row in the join's match state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowLocator {
    /// Join-key values of the row.
    pub join_key: Row,
    /// Primary-key values, the full row for keyless changelog sides, or empty
    /// when the row is not retained.
    pub identity: Row,
    /// Arrival sequence number, unique per resolver.
    pub sequence: u64,
}

/// Effect of one incoming row on the join's match state.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A new row.
    Insert {
        /// Where the inserted row lives.
        locator: RowLocator,
        /// Row values without the delta column.
        row: Row,
    },
    /// Explicit retraction of a previously inserted row.
    Retract {
        /// The retracted row.
        locator: RowLocator,
        /// Values of the retracted row.
        row: Row,
    },
    /// Retract the previous version of a key and insert the new one atomically.
    Upsert {
        /// The superseded row.
        retracted: RowLocator,
        /// Values of the superseded row.
        retracted_row: Row,
        /// The new row.
        inserted: RowLocator,
        /// Values of the new row.
        inserted_row: Row,
    },
    /// Version not newer than the retained one; dropped without output.
    Stale,
}

impl Resolution {
    /// Expands the action into signed changelog rows, retractions first.
    #[must_use]
    pub fn into_changelog(self) -> Vec<ChangelogRow> {
        match self {
            Self::Insert { row, .. } => vec![ChangelogRow::insert(row)],
            Self::Retract { row, .. } => vec![ChangelogRow::retract(row)],
            Self::Upsert {
                retracted_row,
                inserted_row,
                ..
            } => vec![
                ChangelogRow::retract(retracted_row),
                ChangelogRow::insert(inserted_row),
            ],
            Self::Stale => Vec::new(),
        }
    }

    /// Whether the row had no effect.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }
}

/// Counters describing what the resolver has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Rows resolved as inserts.
    pub inserts: u64,
    /// Explicit retractions matched.
    pub retractions: u64,
    /// Implicit upserts applied.
    pub upserts: u64,
    /// Stale versions dropped.
    pub stale: u64,
    /// Prior-row lookups performed.
    pub lookups: u64,
    /// Rows evicted beyond `keep_versions`.
    pub evictions: u64,
}

/// Per-side resolver. One per worker; the description is shared.
#[derive(Debug)]
pub struct RetractionResolver {
    description: Arc<JoinStreamDescription>,
    join_key_positions: Vec<usize>,
    /// Input positions that make up the resolved row (everything but delta).
    payload_positions: Vec<usize>,
    retained: RetainedRows,
    next_sequence: u64,
    stats: ResolverStats,
}

impl RetractionResolver {
    /// Binds the join-key columns of this side.
    ///
    /// # Errors
    ///
    /// [`Error::SchemaMismatch`] if a join-key column is missing from the
    /// input schema or names the delta column.
    pub fn new<S: AsRef<str>>(
        description: Arc<JoinStreamDescription>,
        join_key_columns: &[S],
    ) -> Result<Self> {
        let schema = description.input_schema();
        let stream = description.stream_name();
        let mut join_key_positions = Vec::with_capacity(join_key_columns.len());
        for name in join_key_columns {
            let name = name.as_ref();
            let pos = schema.index_of(name).map_err(|_| {
                Error::schema_mismatch(stream, name, "join key column not found in input schema")
            })?;
            if Some(pos) == description.delta_position() {
                return Err(Error::schema_mismatch(
                    stream,
                    name,
                    "the delta column cannot be a join key",
                ));
            }
            join_key_positions.push(pos);
        }

        let payload_positions = (0..schema.fields().len())
            .filter(|&i| Some(i) != description.delta_position())
            .collect();

        let keep_versions = usize::try_from(description.keep_versions()).unwrap_or(usize::MAX);
        Ok(Self {
            description,
            join_key_positions,
            payload_positions,
            retained: RetainedRows::new(keep_versions),
            next_sequence: 0,
            stats: ResolverStats::default(),
        })
    }

    /// The shared description of this side.
    #[must_use]
    pub fn description(&self) -> &Arc<JoinStreamDescription> {
        &self.description
    }

    /// What the resolver has done so far.
    #[must_use]
    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// Rows retained for retraction matching.
    #[must_use]
    pub fn retained_rows(&self) -> &RetainedRows {
        &self.retained
    }

    /// Drops all retained state, e.g. when the query is cancelled.
    pub fn clear(&mut self) {
        self.retained.clear();
    }

    /// Resolves one input row (values in input-schema order).
    ///
    /// # Errors
    ///
    /// [`Error::ConsistencyViolation`] for an unmatched retraction, a delta
    /// other than +1/-1, or a version that cannot be compared.
    pub fn resolve(&mut self, input: &[ScalarValue]) -> Result<Resolution> {
        let expected = self.description.input_schema().fields().len();
        if input.len() != expected {
            return Err(Error::consistency(
                self.description.stream_name(),
                format!("row has {} values, input schema has {expected}", input.len()),
            ));
        }

        if let Some(delta_pos) = self.description.delta_position() {
            return match self.delta_of(&input[delta_pos])? {
                1 => Ok(self.insert_retained(input)),
                _ => self.retract(input),
            };
        }

        if let Some(version_pos) = self.description.version_position() {
            return self.upsert(input, version_pos);
        }

        self.stats.inserts += 1;
        let locator = RowLocator {
            join_key: self.project(input, &self.join_key_positions),
            identity: Vec::new(),
            sequence: self.next_sequence(),
        };
        Ok(Resolution::Insert {
            locator,
            row: self.payload(input),
        })
    }

    /// Resolves every row of `batch` in order.
    ///
    /// Not atomic: when a row fails, the rows before it have already
    /// updated the retained state, and their resolutions are dropped with
    /// the error. A failed batch fails the query; call [`Self::clear`]
    /// before reusing the resolver.
    pub fn resolve_batch(&mut self, batch: &RecordBatch) -> Result<Vec<Resolution>> {
        let expected = self.description.input_schema().fields().len();
        if batch.num_columns() != expected {
            return Err(Error::consistency(
                self.description.stream_name(),
                format!(
                    "batch has {} columns, input schema has {expected}",
                    batch.num_columns()
                ),
            ));
        }
        let mut resolutions = Vec::with_capacity(batch.num_rows());
        let mut row = Vec::with_capacity(expected);
        for row_idx in 0..batch.num_rows() {
            row.clear();
            for column in batch.columns() {
                row.push(ScalarValue::try_from_array(column, row_idx)?);
            }
            resolutions.push(self.resolve(&row)?);
        }
        Ok(resolutions)
    }

    fn delta_of(&self, value: &ScalarValue) -> Result<i64> {
        let delta = match value {
            ScalarValue::Int8(Some(v)) => i64::from(*v),
            ScalarValue::Int16(Some(v)) => i64::from(*v),
            ScalarValue::Int32(Some(v)) => i64::from(*v),
            ScalarValue::Int64(Some(v)) => *v,
            other => {
                return Err(Error::consistency(
                    self.description.stream_name(),
                    format!("delta value {other:?} is not a signed integer"),
                ))
            }
        };
        if delta == 1 || delta == -1 {
            Ok(delta)
        } else {
            Err(Error::consistency(
                self.description.stream_name(),
                format!("delta value {delta} is neither +1 nor -1"),
            ))
        }
    }

    fn insert_retained(&mut self, input: &[ScalarValue]) -> Resolution {
        let key = self.retention_key(input);
        let row = self.payload(input);
        let sequence = self.next_sequence();
        let locator = RowLocator {
            join_key: key.join_key.clone(),
            identity: key.identity.clone(),
            sequence,
        };
        self.retain(
            key,
            RetainedRow {
                sequence,
                row: row.clone(),
            },
        );
        self.stats.inserts += 1;
        Resolution::Insert { locator, row }
    }

    fn retract(&mut self, input: &[ScalarValue]) -> Result<Resolution> {
        let key = self.retention_key(input);
        let row = self.payload(input);
        self.stats.lookups += 1;
        let Some(matched) = self.retained.remove_matching(&key, &row) else {
            return Err(Error::consistency(
                self.description.stream_name(),
                format!(
                    "retraction of {row:?} for join key {:?} matches no retained row \
                     (evicted beyond keep_versions={} or never inserted)",
                    key.join_key,
                    self.description.keep_versions()
                ),
            ));
        };
        self.stats.retractions += 1;
        Ok(Resolution::Retract {
            locator: RowLocator {
                join_key: key.join_key,
                identity: key.identity,
                sequence: matched.sequence,
            },
            row: matched.row,
        })
    }

    fn upsert(&mut self, input: &[ScalarValue], version_pos: usize) -> Result<Resolution> {
        let key = self.retention_key(input);
        let version = &input[version_pos];
        if version.is_null() {
            return Err(Error::consistency(
                self.description.stream_name(),
                format!("NULL version for key {:?}", key.identity),
            ));
        }

        self.stats.lookups += 1;
        let previous = match self.retained.newest(&key) {
            None => return Ok(self.insert_retained(input)),
            Some(newest) => {
                let newest_version = &newest.row[self.payload_index(version_pos)];
                match version.partial_cmp(newest_version) {
                    Some(std::cmp::Ordering::Greater) => newest.clone(),
                    Some(_) => {
                        self.stats.stale += 1;
                        tracing::debug!(
                            stream = %self.description.stream_name(),
                            key = ?key.identity,
                            %version,
                            current = %newest_version,
                            "dropping stale version"
                        );
                        return Ok(Resolution::Stale);
                    }
                    None => {
                        return Err(Error::consistency(
                            self.description.stream_name(),
                            format!(
                                "version {version:?} is not comparable with retained {newest_version:?}"
                            ),
                        ))
                    }
                }
            }
        };

        // The superseded version stays in the chain behind the new one, so
        // late retractions can still match it while keep_versions allows.
        let row = self.payload(input);
        let sequence = self.next_sequence();
        let retracted = RowLocator {
            join_key: key.join_key.clone(),
            identity: key.identity.clone(),
            sequence: previous.sequence,
        };
        let inserted = RowLocator {
            join_key: key.join_key.clone(),
            identity: key.identity.clone(),
            sequence,
        };
        self.retain(
            key,
            RetainedRow {
                sequence,
                row: row.clone(),
            },
        );
        self.stats.upserts += 1;
        Ok(Resolution::Upsert {
            retracted,
            retracted_row: previous.row,
            inserted,
            inserted_row: row,
        })
    }

    fn retain(&mut self, key: RetentionKey, row: RetainedRow) {
        if let Some(evicted) = self.retained.push(key, row) {
            self.stats.evictions += 1;
            tracing::debug!(
                stream = %self.description.stream_name(),
                sequence = evicted.sequence,
                keep_versions = self.description.keep_versions(),
                "evicted oldest retained version"
            );
        }
    }

    fn retention_key(&self, input: &[ScalarValue]) -> RetentionKey {
        let identity = match self.description.primary_key_positions() {
            Some(positions) if !positions.is_empty() => self.project(input, positions),
            _ => self.payload(input),
        };
        RetentionKey {
            join_key: self.project(input, &self.join_key_positions),
            identity,
        }
    }

    fn payload(&self, input: &[ScalarValue]) -> Row {
        self.project(input, &self.payload_positions)
    }

    /// Position of an input column inside the payload row.
    fn payload_index(&self, input_pos: usize) -> usize {
        match self.description.delta_position() {
            Some(delta) if input_pos > delta => input_pos - 1,
            _ => input_pos,
        }
    }

    #[allow(clippy::unused_self)]
    fn project(&self, input: &[ScalarValue], positions: &[usize]) -> Row {
        positions.iter().map(|&p| input[p].clone()).collect()
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }
}
