//! Chunk context and emitted chunks.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;

use crate::config::ResultMode;

/// Opaque token identifying the logical emission generation or window an
/// emission belongs to. Carried through to the output untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChunkContext {
    id: u64,
    label: Option<Arc<str>>,
}

impl ChunkContext {
    /// Context with the caller-chosen identifier `id`.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self { id, label: None }
    }

    /// Attaches a free-form label, e.g. a window description.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Caller-chosen identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Free-form label, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

/// One emission: a batch of result rows tagged with its context.
#[derive(Debug, Clone)]
pub struct EmittedChunk {
    /// Result rows in the transform's output schema.
    pub batch: RecordBatch,
    /// Context passed to the emitting call.
    pub context: ChunkContext,
    /// Final or intermediate rows.
    pub mode: ResultMode,
    /// Version attached to every row, when versioning is enabled.
    pub version: Option<i64>,
}

impl EmittedChunk {
    /// Number of result rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}
