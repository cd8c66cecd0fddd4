//! # Join Stream Description
//!
//! Per-side join metadata: where the primary key, version and delta columns
//! live in the input rows. Built once while the join is compiled; every name
//! lookup happens here, so the row-processing path only sees integer offsets.
//!
//! A versioned side with primary key `(k, k1)` and version column `_tp_time`
//! does not need a separate changelog stage in front of the join: the join
//! indexes rows by join key and primary key and decides upserts itself, which
//! saves comparing value columns on retraction.
//!
//! When a changelog stage *does* precede the join, its `_tp_delta` column is
//! in the input schema. A `-1` then means: find the retained rows for the
//! join key and retract the one whose values match.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use smallvec::SmallVec;

use super::strictness::JoinStrictness;
use crate::config::JoinConfig;
use crate::error::{Error, Result};
use crate::semantic::{StreamDescriptor, StreamSemantic, DELTA_COLUMN};

/// Column offsets of a primary key. Most keys have few columns.
pub type KeyPositions = SmallVec<[usize; 4]>;

/// Immutable per-side join metadata.
#[derive(Debug, Clone)]
pub struct JoinStreamDescription {
    stream_name: String,
    input_schema: SchemaRef,
    /// Input schema without the delta column.
    payload_schema: SchemaRef,
    semantic: StreamSemantic,
    keep_versions: u64,
    primary_key_column_positions: Option<KeyPositions>,
    version_column_position: Option<usize>,
    delta_column_position: Option<usize>,
}

impl JoinStreamDescription {
    /// Resolves the column positions implied by `semantic` against
    /// `input_schema`.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if a required key, version or delta column
    ///   is missing or has an unusable type.
    /// - [`Error::Configuration`] if `config` is invalid.
    pub fn build(
        stream: &StreamDescriptor,
        input_schema: SchemaRef,
        semantic: StreamSemantic,
        strictness: JoinStrictness,
        config: &JoinConfig,
    ) -> Result<Self> {
        let keep_versions = strictness.keep_versions(config)?;
        let name = stream.name.as_str();

        let mut primary_key_column_positions = None;
        let mut version_column_position = None;
        let mut delta_column_position = None;

        match semantic {
            StreamSemantic::Append => {}
            StreamSemantic::VersionedKV => {
                primary_key_column_positions =
                    Some(resolve_required(name, &input_schema, &stream.primary_key)?);
                let version = stream.effective_version_column();
                let pos = resolve_column(name, &input_schema, version)?;
                check_version_type(name, version, input_schema.field(pos).data_type())?;
                version_column_position = Some(pos);
                delta_column_position = resolve_delta(name, &input_schema)?;
            }
            StreamSemantic::ChangelogKV => {
                primary_key_column_positions =
                    Some(resolve_required(name, &input_schema, &stream.primary_key)?);
                let pos = resolve_delta(name, &input_schema)?.ok_or_else(|| {
                    Error::schema_mismatch(
                        name,
                        DELTA_COLUMN,
                        "changelog_kv input requires a delta column",
                    )
                })?;
                delta_column_position = Some(pos);
            }
            StreamSemantic::Changelog => {
                delta_column_position = resolve_delta(name, &input_schema)?;
                primary_key_column_positions = resolve_optional(&input_schema, &stream.primary_key);
            }
        }

        let payload_schema = match delta_column_position {
            Some(delta) => {
                let fields: Vec<Field> = input_schema
                    .fields()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != delta)
                    .map(|(_, f)| f.as_ref().clone())
                    .collect();
                Arc::new(Schema::new(fields))
            }
            None => Arc::clone(&input_schema),
        };

        let description = Self {
            stream_name: stream.name.clone(),
            input_schema,
            payload_schema,
            semantic,
            keep_versions,
            primary_key_column_positions,
            version_column_position,
            delta_column_position,
        };
        description.assert_valid();

        tracing::debug!(%description, %strictness, "built join stream description");
        Ok(description)
    }

    /// Wraps the description for read-only sharing across workers.
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn assert_valid(&self) {
        debug_assert!(
            !self.has_version_column() || self.has_primary_key(),
            "version column without primary key"
        );
        debug_assert!(
            self.delta_column_position
                .is_none_or(|pos| self.input_schema.field(pos).data_type().is_signed_integer()),
            "delta column must be a signed integer"
        );
    }

    /// Name of the stream this side reads from.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Input schema of this join side.
    #[must_use]
    pub fn input_schema(&self) -> &SchemaRef {
        &self.input_schema
    }

    /// Input schema without the delta column: the shape of resolved rows.
    #[must_use]
    pub fn payload_schema(&self) -> &SchemaRef {
        &self.payload_schema
    }

    /// Changelog semantic of the input stream.
    #[must_use]
    pub fn semantic(&self) -> StreamSemantic {
        self.semantic
    }

    /// Versions retained per key for retraction matching.
    #[must_use]
    pub fn keep_versions(&self) -> u64 {
        self.keep_versions
    }

    /// Whether rows are identified by a (non-empty) primary key.
    #[inline]
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        self.primary_key_column_positions
            .as_ref()
            .is_some_and(|p| !p.is_empty())
    }

    /// Whether rows carry a version column.
    #[inline]
    #[must_use]
    pub fn has_version_column(&self) -> bool {
        self.version_column_position.is_some()
    }

    /// Whether rows carry an explicit delta column.
    #[inline]
    #[must_use]
    pub fn has_delta_column(&self) -> bool {
        self.delta_column_position.is_some()
    }

    /// Primary-key column offsets, in key order.
    #[must_use]
    pub fn primary_key_positions(&self) -> Option<&[usize]> {
        self.primary_key_column_positions.as_deref()
    }

    /// Version column offset.
    #[must_use]
    pub fn version_position(&self) -> Option<usize> {
        self.version_column_position
    }

    /// Delta column offset.
    #[must_use]
    pub fn delta_position(&self) -> Option<usize> {
        self.delta_column_position
    }

    /// Name of the delta column, if present.
    #[must_use]
    pub fn delta_column_name(&self) -> Option<&str> {
        self.delta_column_position
            .map(|pos| self.input_schema.field(pos).name().as_str())
    }

    /// Names of the primary-key columns.
    #[must_use]
    pub fn primary_key_names(&self) -> Vec<&str> {
        self.primary_key_positions()
            .unwrap_or_default()
            .iter()
            .map(|&pos| self.input_schema.field(pos).name().as_str())
            .collect()
    }

    /// Name of the version column, if present.
    #[must_use]
    pub fn version_column_name(&self) -> Option<&str> {
        self.version_column_position
            .map(|pos| self.input_schema.field(pos).name().as_str())
    }
}

impl fmt::Display for JoinStreamDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stream={} semantic={} primary_key={:?} version={} delta={} keep_versions={}",
            self.stream_name,
            self.semantic,
            self.primary_key_names(),
            self.version_column_name().unwrap_or("-"),
            self.delta_column_name().unwrap_or("-"),
            self.keep_versions,
        )
    }
}

fn resolve_column(stream: &str, schema: &Schema, name: &str) -> Result<usize> {
    schema
        .index_of(name)
        .map_err(|_| Error::schema_mismatch(stream, name, "column not found in input schema"))
}

fn resolve_required(stream: &str, schema: &Schema, names: &[String]) -> Result<KeyPositions> {
    if names.is_empty() {
        return Err(Error::schema_mismatch(
            stream,
            "<primary key>",
            "semantic requires a primary key but none is declared",
        ));
    }
    names
        .iter()
        .map(|name| resolve_column(stream, schema, name))
        .collect()
}

/// Keys are only used for a plain changelog side when every column survived
/// into the join input.
fn resolve_optional(schema: &Schema, names: &[String]) -> Option<KeyPositions> {
    if names.is_empty() {
        return None;
    }
    names
        .iter()
        .map(|name| schema.index_of(name).ok())
        .collect()
}

fn resolve_delta(stream: &str, schema: &Schema) -> Result<Option<usize>> {
    let Ok(pos) = schema.index_of(DELTA_COLUMN) else {
        return Ok(None);
    };
    let data_type = schema.field(pos).data_type();
    if !data_type.is_signed_integer() {
        return Err(Error::schema_mismatch(
            stream,
            DELTA_COLUMN,
            format!("delta column must be a signed integer, found {data_type}"),
        ));
    }
    Ok(Some(pos))
}

fn check_version_type(stream: &str, column: &str, data_type: &DataType) -> Result<()> {
    let orderable = data_type.is_integer()
        || data_type.is_floating()
        || data_type.is_temporal()
        || matches!(data_type, DataType::Decimal128(..) | DataType::Decimal256(..));
    if orderable {
        Ok(())
    } else {
        Err(Error::schema_mismatch(
            stream,
            column,
            format!("version column must be orderable, found {data_type}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(fields: &[(&str, DataType)]) -> SchemaRef {
        Arc::new(Schema::new(
            fields
                .iter()
                .map(|(n, t)| Field::new(*n, t.clone(), true))
                .collect::<Vec<_>>(),
        ))
    }

    fn versioned() -> StreamDescriptor {
        StreamDescriptor::new("kv", "Stream")
            .with_mode("versioned_kv")
            .with_primary_key(["k"])
            .with_version_column("v")
    }

    fn build(
        stream: &StreamDescriptor,
        schema: SchemaRef,
        semantic: StreamSemantic,
    ) -> Result<JoinStreamDescription> {
        JoinStreamDescription::build(
            stream,
            schema,
            semantic,
            JoinStrictness::Any,
            &JoinConfig::default(),
        )
    }

    #[test]
    fn test_versioned_positions() {
        let s = schema(&[
            ("val", DataType::Utf8),
            ("k", DataType::UInt64),
            ("v", DataType::UInt64),
        ]);
        let desc = build(&versioned(), s, StreamSemantic::VersionedKV).unwrap();
        assert!(desc.has_primary_key());
        assert!(desc.has_version_column());
        assert!(!desc.has_delta_column());
        assert_eq!(desc.primary_key_positions(), Some(&[1][..]));
        assert_eq!(desc.version_position(), Some(2));
        assert_eq!(desc.keep_versions(), 1);
        assert_eq!(desc.primary_key_names(), vec!["k"]);
        assert_eq!(desc.version_column_name(), Some("v"));
    }

    #[test]
    fn test_versioned_missing_key_column() {
        let s = schema(&[("v", DataType::UInt64), ("val", DataType::Utf8)]);
        let err = build(&versioned(), s, StreamSemantic::VersionedKV).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { ref column, .. } if column == "k"));
    }

    #[test]
    fn test_versioned_missing_version_column() {
        let s = schema(&[("k", DataType::UInt64), ("val", DataType::Utf8)]);
        let err = build(&versioned(), s, StreamSemantic::VersionedKV).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { ref column, .. } if column == "v"));
    }

    #[test]
    fn test_versioned_default_version_column() {
        let stream = StreamDescriptor::new("kv", "Stream")
            .with_mode("versioned_kv")
            .with_primary_key(["k"]);
        let s = schema(&[
            ("k", DataType::Int64),
            ("_tp_time", DataType::Timestamp(arrow::datatypes::TimeUnit::Millisecond, None)),
        ]);
        let desc = build(&stream, s, StreamSemantic::VersionedKV).unwrap();
        assert_eq!(desc.version_column_name(), Some("_tp_time"));
    }

    #[test]
    fn test_version_column_must_be_orderable() {
        let s = schema(&[("k", DataType::UInt64), ("v", DataType::Boolean)]);
        let err = build(&versioned(), s, StreamSemantic::VersionedKV).unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaMismatch { ref reason, .. } if reason.contains("orderable")
        ));
    }

    #[test]
    fn test_changelog_kv_requires_delta() {
        let stream = StreamDescriptor::new("ckv", "Stream")
            .with_mode("changelog_kv")
            .with_primary_key(["k"]);
        let s = schema(&[("k", DataType::Int64), ("val", DataType::Utf8)]);
        let err = build(&stream, s, StreamSemantic::ChangelogKV).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { ref column, .. } if column == DELTA_COLUMN));

        let s = schema(&[
            ("k", DataType::Int64),
            ("val", DataType::Utf8),
            (DELTA_COLUMN, DataType::Int8),
        ]);
        let desc = build(&stream, s, StreamSemantic::ChangelogKV).unwrap();
        assert_eq!(desc.delta_position(), Some(2));
        assert_eq!(desc.delta_column_name(), Some(DELTA_COLUMN));
        assert_eq!(desc.payload_schema().fields().len(), 2);
        assert!(desc.payload_schema().index_of(DELTA_COLUMN).is_err());
    }

    #[test]
    fn test_changelog_delta_is_optional() {
        let stream = StreamDescriptor::new("cl", "MaterializedView");
        let s = schema(&[("k", DataType::Int64)]);
        let desc = build(&stream, s, StreamSemantic::Changelog).unwrap();
        assert!(!desc.has_delta_column());
        assert!(!desc.has_primary_key());
    }

    #[test]
    fn test_delta_must_be_signed_integer() {
        let stream = StreamDescriptor::new("cl", "MaterializedView");
        let s = schema(&[("k", DataType::Int64), (DELTA_COLUMN, DataType::UInt8)]);
        let err = build(&stream, s, StreamSemantic::Changelog).unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaMismatch { ref reason, .. } if reason.contains("signed")
        ));
    }

    #[test]
    fn test_changelog_partial_key_is_dropped() {
        let stream = StreamDescriptor::new("cl", "View").with_primary_key(["a", "b"]);
        let s = schema(&[("a", DataType::Int64), ("c", DataType::Int64)]);
        let desc = build(&stream, s, StreamSemantic::Changelog).unwrap();
        assert!(!desc.has_primary_key());
    }

    #[test]
    fn test_append_resolves_nothing() {
        let stream = StreamDescriptor::new("a", "Stream").with_primary_key(["k"]);
        let s = schema(&[("k", DataType::Int64), (DELTA_COLUMN, DataType::Int8)]);
        let desc = build(&stream, s, StreamSemantic::Append).unwrap();
        assert!(!desc.has_primary_key());
        assert!(!desc.has_version_column());
        assert!(!desc.has_delta_column());
    }

    #[test]
    fn test_all_strictness_uses_configured_versions() {
        let s = schema(&[("k", DataType::UInt64), ("v", DataType::UInt64)]);
        let desc = JoinStreamDescription::build(
            &versioned(),
            s,
            StreamSemantic::VersionedKV,
            JoinStrictness::All,
            &JoinConfig { keep_versions: 7 },
        )
        .unwrap();
        assert_eq!(desc.keep_versions(), 7);
    }

    #[test]
    fn test_display_summary() {
        let s = schema(&[("k", DataType::UInt64), ("v", DataType::UInt64)]);
        let desc = build(&versioned(), s, StreamSemantic::VersionedKV).unwrap();
        let text = desc.to_string();
        assert!(text.contains("semantic=versioned_kv"), "{text}");
        assert!(text.contains("version=v"), "{text}");
        assert!(text.contains("delta=-"), "{text}");
    }

    #[test]
    fn test_shared_across_threads() {
        let s = schema(&[("k", DataType::UInt64), ("v", DataType::UInt64)]);
        let desc = build(&versioned(), s, StreamSemantic::VersionedKV)
            .unwrap()
            .into_shared();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let desc = Arc::clone(&desc);
                scope.spawn(move || {
                    assert!(desc.has_primary_key());
                    assert_eq!(desc.version_position(), Some(1));
                });
            }
        });
    }
}
