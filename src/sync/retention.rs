use std::sync::Arc;

use log::{debug, info};

use crate::api::error::ApiError;
use crate::db::SnapshotStore;

/// Default history cap per user (~ hourly granularity for 1.5 years)
pub const DEFAULT_MAX_RECORDS: usize = 13140;

/// Caps each user's snapshot history, counted across all of their accounts
pub struct RetentionTrimmer {
    store: Arc<dyn SnapshotStore>,
}

impl RetentionTrimmer {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Keep the `max_records` most recent snapshots of the user; returns the
    /// number of rows removed. Nothing is removed when the trim fails.
    pub fn trim(&self, user_id: &str, max_records: usize) -> Result<usize, ApiError> {
        let removed = self
            .store
            .delete_oldest(user_id, max_records)
            .map_err(|e| ApiError::RetentionError(format!("user {}: {}", user_id, e)))?;

        if removed > 0 {
            info!("Trimmed {} snapshot(s) for user {}", removed, user_id);
        } else {
            debug!("User {} within retention cap of {}", user_id, max_records);
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewLinkedAccount, SqliteStore};
    use crate::api::credentials::Credential;
    use crate::models::{Exchange, NewSnapshot, SnapshotCategory};
    use crate::test_support::PlainCipher;
    use rust_decimal::Decimal;

    fn seeded(rows: i64) -> (Arc<Database>, Arc<SqliteStore>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = Arc::new(SqliteStore::new(Arc::clone(&db), Arc::new(PlainCipher)));

        for account_id in ["acc-a", "acc-b"] {
            store
                .register_account(
                    NewLinkedAccount {
                        account_id: account_id.to_string(),
                        user_id: "u1".to_string(),
                        exchange: Exchange::Bitget,
                        label: account_id.to_string(),
                        proxy_ip: None,
                        permissions: vec![],
                    },
                    &Credential::new(Exchange::Bitget, "k", "s", Some("p".into())),
                )
                .unwrap();
        }

        // alternate accounts so the cap has to be applied across both
        let snapshots: Vec<NewSnapshot> = (1..=rows)
            .map(|ts| NewSnapshot {
                account_id: if ts % 2 == 0 { "acc-a" } else { "acc-b" }.to_string(),
                category: SnapshotCategory::Aggregate,
                asset: "USDT".to_string(),
                balance: Decimal::from(ts),
                usd_value: Decimal::from(ts),
                captured_at: ts * 1_000,
            })
            .collect();
        store.write_snapshots(&snapshots).unwrap();

        (db, store)
    }

    fn captured_times(store: &SqliteStore) -> Vec<i64> {
        let mut times: Vec<i64> = ["acc-a", "acc-b"]
            .iter()
            .flat_map(|id| store.snapshots_for_account(id).unwrap())
            .map(|s| s.captured_at)
            .collect();
        times.sort_unstable();
        times
    }

    #[test]
    fn test_trim_keeps_most_recent() {
        let (_db, store) = seeded(150);
        let trimmer = RetentionTrimmer::new(store.clone());

        assert_eq!(trimmer.trim("u1", 100).unwrap(), 50);

        let times = captured_times(&store);
        assert_eq!(times.len(), 100);
        assert_eq!(times.first(), Some(&51_000));
        assert_eq!(times.last(), Some(&150_000));
    }

    #[test]
    fn test_trim_under_cap_is_noop() {
        let (_db, store) = seeded(80);
        let trimmer = RetentionTrimmer::new(store.clone());

        assert_eq!(trimmer.trim("u1", 100).unwrap(), 0);
        assert_eq!(trimmer.trim("u1", 100).unwrap(), 0);
        assert_eq!(store.count_snapshots_for_user("u1").unwrap(), 80);
    }

    #[test]
    fn test_failed_trim_removes_nothing() {
        let (db, store) = seeded(150);
        {
            let conn = db.lock().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER block_trim BEFORE DELETE ON balance_snapshots
                 WHEN old.captured_at = 40000
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap();
        }
        let trimmer = RetentionTrimmer::new(store.clone());

        let err = trimmer.trim("u1", 100).unwrap_err();
        assert!(matches!(err, ApiError::RetentionError(_)));
        assert_eq!(store.count_snapshots_for_user("u1").unwrap(), 150);
    }
}
