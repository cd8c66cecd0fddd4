//! Configuration for the join and aggregation core.
//!
//! Plain structs with defaults. Loading them from files or `SETTINGS`
//! clauses is the caller's job; they derive `serde` so any format works.

use serde::{Deserialize, Serialize};

use crate::aggregation::emit::EmitStrategy;
use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Join-side settings.
    pub join: JoinConfig,
    /// Aggregation settings.
    pub aggregation: AggregationConfig,
}

impl CoreConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.join.validate()?;
        self.aggregation.validate()
    }
}

/// Settings applied when building join stream descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Versions retained per key for late retraction matching when the join
    /// keeps all matches. `ANY` joins always retain exactly one.
    pub keep_versions: u64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self { keep_versions: 100 }
    }
}

impl JoinConfig {
    /// Validates the join settings.
    pub fn validate(&self) -> Result<()> {
        if self.keep_versions == 0 {
            return Err(Error::Configuration(
                "keep_versions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether emissions carry finalized values or mergeable partial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
    /// Terminal per-group aggregate values.
    #[default]
    Final,
    /// Mergeable accumulator state, combined by a downstream aggregator.
    Intermediate,
}

/// Settings for the emit-strategy aggregating transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Number of state shards (one per worker).
    pub shards: usize,
    /// When the accumulated state is emitted.
    pub strategy: EmitStrategy,
    /// Final or intermediate emissions.
    pub result_mode: ResultMode,
    /// Attach a monotonically increasing version to final emissions.
    pub emit_version: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            shards: 1,
            strategy: EmitStrategy::EndOfStream,
            result_mode: ResultMode::Final,
            emit_version: false,
        }
    }
}

impl AggregationConfig {
    /// Validates the aggregation settings.
    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(Error::Configuration(
                "aggregation needs at least one shard".to_string(),
            ));
        }
        if matches!(self.strategy, EmitStrategy::UserDefined) && self.shards != 1 {
            return Err(Error::Configuration(format!(
                "user-defined emission runs on a single shard, got {}",
                self.shards
            )));
        }
        if !self.strategy.resets_state() && self.result_mode == ResultMode::Intermediate {
            return Err(Error::Configuration(format!(
                "{:?} emission retains state and cannot produce intermediate results",
                self.strategy
            )));
        }
        self.strategy.validate()
    }
}
