//! Join strictness and the version-retention policy it implies.

use std::fmt;

use crate::config::JoinConfig;
use crate::error::Result;

/// Duplicate-handling mode of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinStrictness {
    /// Only one match per key participates (the latest version).
    Any,
    /// Every match participates.
    #[default]
    All,
    /// Closest match by an inequality on the version/time column.
    Asof,
}

impl JoinStrictness {
    /// Number of versions per key retained for retraction matching.
    ///
    /// `Any` keeps only the latest version; the other modes keep the
    /// configured `keep_versions`.
    pub fn keep_versions(self, config: &JoinConfig) -> Result<u64> {
        config.validate()?;
        Ok(match self {
            Self::Any => 1,
            Self::All | Self::Asof => config.keep_versions,
        })
    }
}

impl fmt::Display for JoinStrictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "ANY"),
            Self::All => write!(f, "ALL"),
            Self::Asof => write!(f, "ASOF"),
        }
    }
}
