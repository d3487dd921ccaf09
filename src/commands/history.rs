use rust_decimal::Decimal;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::db::SqliteStore;
use crate::models::{BalanceSnapshot, SnapshotCategory};

const HOUR_MS: i64 = 60 * 60 * 1000;
const CHANGE_WINDOW_HOURS: i64 = 24;
const MAX_LOOKBACK_HOURS: i64 = 48;
const HISTORY_WINDOW_DAYS: i64 = 365;

/// One aggregate balance reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub captured_at: i64,
    /// RFC 3339, UTC
    pub timestamp: String,
    pub asset: String,
    pub balance: Decimal,
    pub usd_value: Decimal,
}

impl From<BalanceSnapshot> for HistoryPoint {
    fn from(snapshot: BalanceSnapshot) -> Self {
        let timestamp = chrono::DateTime::from_timestamp_millis(snapshot.captured_at)
            .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_default();

        Self {
            captured_at: snapshot.captured_at,
            timestamp,
            asset: snapshot.asset,
            balance: snapshot.balance,
            usd_value: snapshot.usd_value,
        }
    }
}

/// Aggregate balance history of the last year, newest first, paged by
/// `limit` and `offset`
pub fn balance_history(
    store: &SqliteStore,
    account_id: &str,
    limit: Option<usize>,
    offset: Option<usize>,
    now: i64,
) -> Result<Vec<HistoryPoint>, ApiError> {
    let since = now - HISTORY_WINDOW_DAYS * 24 * HOUR_MS;
    let rows = store.balance_history(account_id, SnapshotCategory::Aggregate, since, limit, offset)?;
    Ok(rows.into_iter().map(HistoryPoint::from).collect())
}

/// Aggregate balance movement over roughly the last day
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BalanceChange {
    Change {
        current: BalanceSnapshot,
        previous: BalanceSnapshot,
        /// Settlement-asset delta
        delta: Decimal,
        usd_delta: Decimal,
        /// None when the previous balance was zero
        percent: Option<Decimal>,
    },
    /// The account has never been snapshotted
    NoCurrentSnapshot,
    /// Nothing recorded between 24h and 48h ago
    NoPriorSnapshot { current: BalanceSnapshot },
}

/// Compare the latest aggregate snapshot with the one from ~24h earlier.
///
/// Walks back one hour at a time from the 24h mark and takes the newest
/// snapshot of the first hour that has one, giving up at 48h.
pub fn balance_change_24h(
    store: &SqliteStore,
    account_id: &str,
    now: i64,
) -> Result<BalanceChange, ApiError> {
    let Some(current) = store.latest_snapshot(account_id, SnapshotCategory::Aggregate)? else {
        return Ok(BalanceChange::NoCurrentSnapshot);
    };

    for hours_back in CHANGE_WINDOW_HOURS..MAX_LOOKBACK_HOURS {
        let until = now - hours_back * HOUR_MS;
        let after = until - HOUR_MS;

        if let Some(previous) =
            store.snapshot_in_window(account_id, SnapshotCategory::Aggregate, after, until)?
        {
            let delta = current.balance - previous.balance;
            let usd_delta = current.usd_value - previous.usd_value;
            let percent = if previous.balance.is_zero() {
                None
            } else {
                Some((delta / previous.balance * Decimal::ONE_HUNDRED).round_dp(2))
            };

            return Ok(BalanceChange::Change {
                current,
                previous,
                delta,
                usd_delta,
                percent,
            });
        }
    }

    Ok(BalanceChange::NoPriorSnapshot { current })
}
