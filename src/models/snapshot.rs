use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;

/// Balance category a snapshot row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCategory {
    Spot,
    Futures,
    Margin,
    Aggregate,
}

impl SnapshotCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotCategory::Spot => "spot",
            SnapshotCategory::Futures => "futures",
            SnapshotCategory::Margin => "margin",
            SnapshotCategory::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for SnapshotCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotCategory {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spot" => Ok(SnapshotCategory::Spot),
            "futures" => Ok(SnapshotCategory::Futures),
            "margin" => Ok(SnapshotCategory::Margin),
            "aggregate" => Ok(SnapshotCategory::Aggregate),
            other => Err(ApiError::DatabaseError(format!(
                "Unknown snapshot category: {}",
                other
            ))),
        }
    }
}

/// Persisted, immutable balance observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub id: i64,
    pub account_id: String,
    pub category: SnapshotCategory,
    pub asset: String,
    pub balance: Decimal,
    pub usd_value: Decimal,
    /// Unix milliseconds
    pub captured_at: i64,
}

/// Snapshot row prior to insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    pub account_id: String,
    pub category: SnapshotCategory,
    pub asset: String,
    pub balance: Decimal,
    pub usd_value: Decimal,
    pub captured_at: i64,
}
