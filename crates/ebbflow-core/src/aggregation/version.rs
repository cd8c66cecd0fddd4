//! Emit version generator.
//!
//! Every emission generation that produces rows gets a version strictly
//! greater than the previous one, so downstream changelog consumers can
//! let newer rows for a group supersede older ones.

/// Strictly increasing emission versions, starting at 1.
#[derive(Debug, Clone, Default)]
pub struct EmitVersionGenerator {
    last: i64,
}

impl EmitVersionGenerator {
    /// Starts after `last`, e.g. when resuming a previously running query.
    #[must_use]
    pub fn starting_after(last: i64) -> Self {
        Self { last }
    }

    /// Allocates the next version.
    pub fn next_version(&mut self) -> i64 {
        self.last = self.last.saturating_add(1);
        self.last
    }

    /// The most recently allocated version, 0 if none.
    #[must_use]
    pub fn last(&self) -> i64 {
        self.last
    }
}
