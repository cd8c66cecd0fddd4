//! Retained rows for retraction matching.
//!
//! Rows are grouped by `(join key, identity)`. The identity is the primary
//! key when the side has one, otherwise the full row. Each group is a short
//! version chain, oldest first, bounded by `keep_versions`.

use std::collections::VecDeque;

use ahash::AHashMap;

use super::Row;

/// Group a retained row belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetentionKey {
    /// Join-key values.
    pub join_key: Row,
    /// Primary-key values, or the full row for keyless sides.
    pub identity: Row,
}

/// A row kept for later retraction matching.
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedRow {
    /// Arrival sequence number assigned by the resolver.
    pub sequence: u64,
    /// Row values without the delta column.
    pub row: Row,
}

/// Bounded version chains keyed by [`RetentionKey`].
#[derive(Debug)]
pub struct RetainedRows {
    chains: AHashMap<RetentionKey, VecDeque<RetainedRow>>,
    keep_versions: usize,
    len: usize,
}

impl RetainedRows {
    /// Creates an empty store keeping at most `keep_versions` rows per key.
    #[must_use]
    pub fn new(keep_versions: usize) -> Self {
        Self {
            chains: AHashMap::new(),
            keep_versions: keep_versions.max(1),
            len: 0,
        }
    }

    /// Newest retained row for `key`.
    #[must_use]
    pub fn newest(&self, key: &RetentionKey) -> Option<&RetainedRow> {
        self.chains.get(key).and_then(VecDeque::back)
    }

    /// Appends `row` to the chain of `key`, returning the evicted oldest row
    /// if the chain exceeded `keep_versions`.
    pub fn push(&mut self, key: RetentionKey, row: RetainedRow) -> Option<RetainedRow> {
        let chain = self.chains.entry(key).or_default();
        chain.push_back(row);
        self.len += 1;
        if chain.len() > self.keep_versions {
            self.len -= 1;
            chain.pop_front()
        } else {
            None
        }
    }

    /// Removes the newest row of `key` whose values equal `row`.
    pub fn remove_matching(&mut self, key: &RetentionKey, row: &Row) -> Option<RetainedRow> {
        let chain = self.chains.get_mut(key)?;
        let idx = chain.iter().rposition(|r| &r.row == row)?;
        let removed = chain.remove(idx);
        if chain.is_empty() {
            self.chains.remove(key);
        }
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Removes the newest row of `key`.
    pub fn remove_newest(&mut self, key: &RetentionKey) -> Option<RetainedRow> {
        let chain = self.chains.get_mut(key)?;
        let removed = chain.pop_back();
        if chain.is_empty() {
            self.chains.remove(key);
        }
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Number of rows in the chain of `key`.
    #[must_use]
    pub fn chain_len(&self, key: &RetentionKey) -> usize {
        self.chains.get(key).map_or(0, VecDeque::len)
    }

    /// Total retained rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct keys with retained rows.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.chains.len()
    }

    /// Iterates all retained rows, per key oldest first. Key order is
    /// unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&RetentionKey, &RetainedRow)> {
        self.chains
            .iter()
            .flat_map(|(key, chain)| chain.iter().map(move |row| (key, row)))
    }

    /// Drops every retained row.
    pub fn clear(&mut self) {
        self.chains.clear();
        self.len = 0;
    }
}
