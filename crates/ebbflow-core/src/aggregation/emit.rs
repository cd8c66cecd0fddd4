//! Emit strategies and the trigger bookkeeping behind them.
//!
//! The strategy is chosen when the plan is compiled and never changes for a
//! running transform. [`EmitTracker`] turns ticks and row counts into
//! "emit now" decisions; the transform does the actual conversion.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// When accumulated aggregate state becomes output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitStrategy {
    /// Tumbling window: emit at each window boundary, then reset state.
    TimeWindow {
        /// Window length in milliseconds.
        interval_ms: u64,
    },
    /// Running aggregate: emit at each interval and keep accumulating, so
    /// later emissions supersede earlier ones.
    Periodic {
        /// Emission interval in milliseconds.
        interval_ms: u64,
    },
    /// Emit once this many rows have been accumulated since the last
    /// emission, then reset state.
    RowCount {
        /// Row threshold.
        rows: u64,
    },
    /// Only explicit application calls emit.
    UserDefined,
    /// Emit once, when the input ends.
    #[default]
    EndOfStream,
}

impl EmitStrategy {
    /// Rejects zero intervals and thresholds.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::TimeWindow { interval_ms: 0 } | Self::Periodic { interval_ms: 0 } => Err(
                Error::Configuration("emit interval must be greater than zero".to_string()),
            ),
            Self::RowCount { rows: 0 } => Err(Error::Configuration(
                "row-count threshold must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Whether shard state is cleared after each emission.
    #[must_use]
    pub fn resets_state(&self) -> bool {
        !matches!(self, Self::Periodic { .. })
    }

    /// Tick interval for time-driven strategies.
    #[must_use]
    pub fn interval_ms(&self) -> Option<u64> {
        match self {
            Self::TimeWindow { interval_ms } | Self::Periodic { interval_ms } => Some(*interval_ms),
            _ => None,
        }
    }

    /// Row threshold for the row-count strategy.
    #[must_use]
    pub fn row_threshold(&self) -> Option<u64> {
        match self {
            Self::RowCount { rows } => Some(*rows),
            _ => None,
        }
    }
}

/// Tracks window deadlines and rows since the last emission.
#[derive(Debug, Clone)]
pub struct EmitTracker {
    strategy: EmitStrategy,
    /// Next window boundary, set on the first tick.
    next_deadline_ms: Option<u64>,
    rows_since_emit: u64,
}

impl EmitTracker {
    /// Creates a tracker for `strategy`.
    #[must_use]
    pub fn new(strategy: EmitStrategy) -> Self {
        Self {
            strategy,
            next_deadline_ms: None,
            rows_since_emit: 0,
        }
    }

    /// The strategy being tracked.
    #[must_use]
    pub fn strategy(&self) -> &EmitStrategy {
        &self.strategy
    }

    /// Rows accumulated since the last emission.
    #[must_use]
    pub fn rows_since_emit(&self) -> u64 {
        self.rows_since_emit
    }

    /// Next window boundary, once known.
    #[must_use]
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.next_deadline_ms
    }

    /// Records accumulated rows. Returns true when the row-count threshold
    /// is reached.
    pub fn on_rows(&mut self, rows: u64) -> bool {
        self.rows_since_emit = self.rows_since_emit.saturating_add(rows);
        self.strategy
            .row_threshold()
            .is_some_and(|threshold| self.rows_since_emit >= threshold)
    }

    /// Records the current time. Returns true when a window boundary has
    /// passed. Boundaries are aligned to multiples of the interval.
    pub fn on_tick(&mut self, now_ms: u64) -> bool {
        let Some(interval) = self.strategy.interval_ms() else {
            return false;
        };
        match self.next_deadline_ms {
            None => {
                self.next_deadline_ms = Some(align_up(now_ms, interval));
                false
            }
            Some(deadline) if now_ms >= deadline => {
                self.next_deadline_ms = Some(align_up(now_ms, interval));
                true
            }
            Some(_) => false,
        }
    }

    /// Resets the row counter after an emission.
    pub fn mark_emitted(&mut self) {
        self.rows_since_emit = 0;
    }

    /// Forgets every deadline and counter.
    pub fn reset(&mut self) {
        self.next_deadline_ms = None;
        self.rows_since_emit = 0;
    }
}

/// Smallest multiple of `interval` strictly greater than `now`.
fn align_up(now: u64, interval: u64) -> u64 {
    (now / interval).saturating_add(1).saturating_mul(interval)
}
