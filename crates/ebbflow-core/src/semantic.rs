//! # Stream Semantics
//!
//! Classifies every input stream of a query into one of four changelog
//! semantics. Classification happens once while the plan is compiled; the
//! result is stored in the plan and never re-evaluated per row.
//!
//! ## Engines
//!
//! | Engine | `mode` setting | Default |
//! |--------|----------------|---------|
//! | `Stream` | `append`, `changelog`, `changelog_kv`, `versioned_kv` | `append` |
//! | `ExternalStream` | `append` only | `append` |
//! | `MaterializedView`, `View` | same as `Stream` | `changelog` |
//!
//! Key-value modes require a declared primary key.

use std::collections::BTreeMap;
use std::fmt;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Reserved name of the retraction marker column (+1 / -1).
pub const DELTA_COLUMN: &str = "_tp_delta";
/// Version column assumed when a versioned stream declares none.
pub const DEFAULT_VERSION_COLUMN: &str = "_tp_time";
/// Name of the version column attached to versioned emissions.
pub const EMIT_VERSION_COLUMN: &str = "_tp_version";

/// Setting key selecting the stream mode.
const MODE_SETTING: &str = "mode";

/// Changelog semantic of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamSemantic {
    /// Every row is a pure insertion; retractions never occur.
    #[default]
    Append,
    /// Rows carry an explicit delta column; `-1` retracts a prior row.
    ChangelogKV,
    /// Rows carry a primary key and a monotonically increasing version; a
    /// newer row supersedes the previous one for the same key.
    VersionedKV,
    /// Rows may or may not carry delta markers.
    Changelog,
}

impl StreamSemantic {
    /// Returns true if the stream never retracts.
    #[must_use]
    pub fn is_append_only(self) -> bool {
        matches!(self, Self::Append)
    }

    /// Returns true if the stream can carry explicit retractions.
    #[must_use]
    pub fn is_changelog(self) -> bool {
        matches!(self, Self::Changelog | Self::ChangelogKV)
    }

    /// Returns true if rows are identified by a primary key.
    #[must_use]
    pub fn is_key_value(self) -> bool {
        matches!(self, Self::ChangelogKV | Self::VersionedKV)
    }

    fn from_mode(mode: &str) -> Option<Self> {
        match mode {
            "append" => Some(Self::Append),
            "changelog" => Some(Self::Changelog),
            "changelog_kv" => Some(Self::ChangelogKV),
            "versioned_kv" => Some(Self::VersionedKV),
            _ => None,
        }
    }
}

impl fmt::Display for StreamSemantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Append => "append",
            Self::ChangelogKV => "changelog_kv",
            Self::VersionedKV => "versioned_kv",
            Self::Changelog => "changelog",
        };
        f.write_str(s)
    }
}

/// Declared metadata of a stream, as supplied by the catalog.
#[derive(Debug, Clone, Default)]
pub struct StreamDescriptor {
    /// Stream name (used in diagnostics and as the cache key).
    pub name: String,
    /// Engine name, e.g. `Stream` or `ExternalStream`.
    pub engine: String,
    /// Engine settings from the stream definition.
    pub settings: BTreeMap<String, String>,
    /// Declared primary-key columns, in key order.
    pub primary_key: Vec<String>,
    /// Declared version column, if any.
    pub version_column: Option<String>,
}

impl StreamDescriptor {
    /// Creates a descriptor for `name` backed by `engine`.
    pub fn new(name: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: engine.into(),
            ..Self::default()
        }
    }

    /// Sets the `mode` engine setting.
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.settings.insert(MODE_SETTING.to_string(), mode.into());
        self
    }

    /// Sets the declared primary key.
    #[must_use]
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the declared version column.
    #[must_use]
    pub fn with_version_column(mut self, column: impl Into<String>) -> Self {
        self.version_column = Some(column.into());
        self
    }

    /// Version column to resolve for versioned streams.
    #[must_use]
    pub fn effective_version_column(&self) -> &str {
        self.version_column.as_deref().unwrap_or(DEFAULT_VERSION_COLUMN)
    }

    fn mode(&self) -> Option<&str> {
        self.settings.get(MODE_SETTING).map(String::as_str)
    }
}

/// Classifies a stream from its declared engine metadata.
///
/// # Errors
///
/// Returns [`Error::Configuration`] for an unknown engine, an unknown or
/// disallowed mode, or a key-value mode without a declared primary key.
pub fn classify(stream: &StreamDescriptor) -> Result<StreamSemantic> {
    let semantic = match stream.engine.as_str() {
        "Stream" => parse_mode(stream, StreamSemantic::Append)?,
        "MaterializedView" | "View" => parse_mode(stream, StreamSemantic::Changelog)?,
        "ExternalStream" => match stream.mode() {
            None | Some("append") => StreamSemantic::Append,
            Some(other) => {
                return Err(Error::Configuration(format!(
                    "external stream '{}' only supports append mode, got '{other}'",
                    stream.name
                )))
            }
        },
        other => {
            return Err(Error::Configuration(format!(
                "cannot classify stream '{}': unrecognized engine '{other}'",
                stream.name
            )))
        }
    };

    if semantic.is_key_value() && stream.primary_key.is_empty() {
        return Err(Error::Configuration(format!(
            "stream '{}' is {semantic} but declares no primary key",
            stream.name
        )));
    }

    tracing::debug!(stream = %stream.name, engine = %stream.engine, %semantic, "classified stream");
    Ok(semantic)
}

fn parse_mode(stream: &StreamDescriptor, default: StreamSemantic) -> Result<StreamSemantic> {
    match stream.mode() {
        None => Ok(default),
        Some(mode) => StreamSemantic::from_mode(mode).ok_or_else(|| {
            Error::Configuration(format!(
                "stream '{}' has unrecognized mode '{mode}'",
                stream.name
            ))
        }),
    }
}

/// Per-query memo of stream classifications.
///
/// One cache lives for one query compilation, so every consumer of the same
/// stream inside the plan sees the same semantic.
#[derive(Debug, Default)]
pub struct SemanticCache {
    entries: RwLock<AHashMap<String, StreamSemantic>>,
}

impl SemanticCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached semantic of `stream`, classifying it on first use.
    ///
    /// Classification errors are not cached.
    pub fn get_or_classify(&self, stream: &StreamDescriptor) -> Result<StreamSemantic> {
        if let Some(semantic) = self.entries.read().get(&stream.name) {
            return Ok(*semantic);
        }
        let semantic = classify(stream)?;
        self.entries
            .write()
            .entry(stream.name.clone())
            .or_insert(semantic);
        Ok(semantic)
    }

    /// Number of cached streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been classified yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(engine: &str) -> StreamDescriptor {
        StreamDescriptor::new("s", engine)
    }

    #[test]
    fn test_stream_defaults_to_append() {
        assert_eq!(classify(&stream("Stream")).unwrap(), StreamSemantic::Append);
    }

    #[test]
    fn test_stream_modes() {
        let cases = [
            ("append", StreamSemantic::Append),
            ("changelog", StreamSemantic::Changelog),
            ("changelog_kv", StreamSemantic::ChangelogKV),
            ("versioned_kv", StreamSemantic::VersionedKV),
        ];
        for (mode, expected) in cases {
            let desc = stream("Stream").with_mode(mode).with_primary_key(["k"]);
            assert_eq!(classify(&desc).unwrap(), expected, "mode {mode}");
        }
    }

    #[test]
    fn test_view_defaults_to_changelog() {
        assert_eq!(
            classify(&stream("MaterializedView")).unwrap(),
            StreamSemantic::Changelog
        );
        assert_eq!(classify(&stream("View")).unwrap(), StreamSemantic::Changelog);
    }

    #[test]
    fn test_external_stream_is_append() {
        assert_eq!(
            classify(&stream("ExternalStream")).unwrap(),
            StreamSemantic::Append
        );
        let err = classify(&stream("ExternalStream").with_mode("changelog")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_engine_fails() {
        let err = classify(&stream("MergeTree")).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("MergeTree")));
    }

    #[test]
    fn test_unknown_mode_fails() {
        let err = classify(&stream("Stream").with_mode("upsert")).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("upsert")));
    }

    #[test]
    fn test_key_value_requires_primary_key() {
        let err = classify(&stream("Stream").with_mode("versioned_kv")).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("primary key")));
    }

    #[test]
    fn test_semantic_predicates() {
        assert!(StreamSemantic::Append.is_append_only());
        assert!(StreamSemantic::Changelog.is_changelog());
        assert!(StreamSemantic::ChangelogKV.is_changelog());
        assert!(!StreamSemantic::VersionedKV.is_changelog());
        assert!(StreamSemantic::VersionedKV.is_key_value());
        assert!(!StreamSemantic::Changelog.is_key_value());
    }

    #[test]
    fn test_effective_version_column() {
        let desc = stream("Stream");
        assert_eq!(desc.effective_version_column(), DEFAULT_VERSION_COLUMN);
        let desc = desc.with_version_column("ts");
        assert_eq!(desc.effective_version_column(), "ts");
    }

    #[test]
    fn test_cache_reuses_classification() {
        let cache = SemanticCache::new();
        assert!(cache.is_empty());
        let desc = StreamDescriptor::new("orders", "Stream").with_mode("changelog");
        assert_eq!(cache.get_or_classify(&desc).unwrap(), StreamSemantic::Changelog);

        // Same name: the first classification wins for the rest of the query.
        let redeclared = StreamDescriptor::new("orders", "Stream");
        assert_eq!(
            cache.get_or_classify(&redeclared).unwrap(),
            StreamSemantic::Changelog
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_does_not_store_errors() {
        let cache = SemanticCache::new();
        let bad = StreamDescriptor::new("bad", "Unknown");
        assert!(cache.get_or_classify(&bad).is_err());
        assert!(cache.is_empty());
    }
}
