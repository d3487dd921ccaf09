use std::str::FromStr;
use std::sync::Arc;

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::connection::Database;
use crate::api::credentials::{Credential, CredentialCipher, EncryptedCredential};
use crate::api::error::ApiError;
use crate::models::{
    AccountKind, BalanceSnapshot, Exchange, LinkedAccount, NewSnapshot, SnapshotCategory,
};
use crate::proxy::{IpUsage, IpUsageSource};

/// Read side of users, accounts and credentials
pub trait CredentialStore: Send + Sync {
    fn get_all_users(&self) -> Result<Vec<String>, ApiError>;

    fn get_linked_accounts(&self, user_id: &str) -> Result<Vec<LinkedAccount>, ApiError>;

    /// Newest credential for the account, decrypted; None when absent
    fn get_decrypted_credential(&self, account_id: &str) -> Result<Option<Credential>, ApiError>;
}

/// Append-only balance history
pub trait SnapshotStore: Send + Sync {
    /// All rows in one transaction
    fn write_snapshots(&self, snapshots: &[NewSnapshot]) -> Result<usize, ApiError>;

    /// Keep the `keep` most recent rows across all of the user's accounts.
    /// All-or-nothing; returns the number of rows removed.
    fn delete_oldest(&self, user_id: &str, keep: usize) -> Result<usize, ApiError>;
}

/// Account row prior to classification as primary or sub
#[derive(Debug, Clone)]
pub struct NewLinkedAccount {
    pub account_id: String,
    pub user_id: String,
    pub exchange: Exchange,
    pub label: String,
    pub proxy_ip: Option<String>,
    pub permissions: Vec<String>,
}

pub struct SqliteStore {
    db: Arc<Database>,
    cipher: Arc<dyn CredentialCipher>,
}

const ACCOUNT_COLUMNS: &str =
    "account_id, user_id, exchange, label, kind, proxy_ip, permissions, created_at";

const SNAPSHOT_COLUMNS: &str =
    "id, account_id, category, asset, balance, usd_value, captured_at";

impl SqliteStore {
    pub fn new(db: Arc<Database>, cipher: Arc<dyn CredentialCipher>) -> Self {
        Self { db, cipher }
    }

    /// Persist account and encrypted credential together. The user's first
    /// account becomes primary, later ones sub.
    pub fn register_account(
        &self,
        account: NewLinkedAccount,
        credential: &Credential,
    ) -> Result<LinkedAccount, ApiError> {
        let sealed = EncryptedCredential::seal(credential, self.cipher.as_ref())?;
        let now = chrono::Utc::now().timestamp_millis();
        let permissions = serde_json::to_string(&account.permissions)?;

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM linked_accounts WHERE account_id = ?1)",
            params![account.account_id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(ApiError::AccountExists(account.account_id));
        }

        tx.execute(
            "INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2)",
            params![account.user_id, now],
        )?;

        let has_primary: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM linked_accounts WHERE user_id = ?1 AND kind = 'primary')",
            params![account.user_id],
            |row| row.get(0),
        )?;
        let kind = if has_primary {
            AccountKind::Sub
        } else {
            AccountKind::Primary
        };

        tx.execute(
            "INSERT INTO linked_accounts (account_id, user_id, exchange, label, kind, proxy_ip, permissions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account.account_id,
                account.user_id,
                account.exchange.as_str(),
                account.label,
                kind.as_str(),
                account.proxy_ip,
                permissions,
                now
            ],
        )?;

        tx.execute(
            "INSERT INTO credentials (account_id, api_key, api_secret, passphrase, oauth_token, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account.account_id,
                sealed.api_key,
                sealed.api_secret,
                sealed.passphrase,
                sealed.oauth_token,
                now
            ],
        )?;

        tx.commit()?;

        Ok(LinkedAccount {
            account_id: account.account_id,
            user_id: account.user_id,
            exchange: account.exchange,
            label: account.label,
            kind,
            proxy_ip: account.proxy_ip,
            permissions: account.permissions,
            created_at: now,
        })
    }

    /// Credentials and history go with it. Returns false if nothing matched.
    pub fn delete_account(&self, account_id: &str) -> Result<bool, ApiError> {
        let conn = self.db.lock()?;
        let deleted = conn.execute(
            "DELETE FROM linked_accounts WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn get_account(&self, account_id: &str) -> Result<Option<LinkedAccount>, ApiError> {
        let conn = self.db.lock()?;
        let account = conn
            .query_row(
                &format!("SELECT {} FROM linked_accounts WHERE account_id = ?1", ACCOUNT_COLUMNS),
                params![account_id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    /// Most recent snapshot of a category
    pub fn latest_snapshot(
        &self,
        account_id: &str,
        category: SnapshotCategory,
    ) -> Result<Option<BalanceSnapshot>, ApiError> {
        let conn = self.db.lock()?;
        let snapshot = conn
            .query_row(
                &format!(
                    "SELECT {} FROM balance_snapshots
                     WHERE account_id = ?1 AND category = ?2
                     ORDER BY captured_at DESC, id DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                params![account_id, category.as_str()],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Most recent snapshot with `after < captured_at <= until`
    pub fn snapshot_in_window(
        &self,
        account_id: &str,
        category: SnapshotCategory,
        after: i64,
        until: i64,
    ) -> Result<Option<BalanceSnapshot>, ApiError> {
        let conn = self.db.lock()?;
        let snapshot = conn
            .query_row(
                &format!(
                    "SELECT {} FROM balance_snapshots
                     WHERE account_id = ?1 AND category = ?2
                       AND captured_at > ?3 AND captured_at <= ?4
                     ORDER BY captured_at DESC, id DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                params![account_id, category.as_str(), after, until],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Snapshots of one category captured at or after `since`, newest first.
    /// `offset` without `limit` skips rows and returns the rest.
    pub fn balance_history(
        &self,
        account_id: &str,
        category: SnapshotCategory,
        since: i64,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<BalanceSnapshot>, ApiError> {
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = offset.map_or(0, |o| i64::try_from(o).unwrap_or(i64::MAX));

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM balance_snapshots
             WHERE account_id = ?1 AND category = ?2 AND captured_at >= ?3
             ORDER BY captured_at DESC, id DESC
             LIMIT ?4 OFFSET ?5",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(
                params![account_id, category.as_str(), since, limit, offset],
                snapshot_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }
}

#[cfg(test)]
impl SqliteStore {
    pub fn snapshots_for_account(&self, account_id: &str) -> Result<Vec<BalanceSnapshot>, ApiError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM balance_snapshots WHERE account_id = ?1 ORDER BY captured_at, id",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(params![account_id], snapshot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    pub fn count_snapshots_for_user(&self, user_id: &str) -> Result<usize, ApiError> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM balance_snapshots s
             JOIN linked_accounts a ON a.account_id = s.account_id
             WHERE a.user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl CredentialStore for SqliteStore {
    fn get_all_users(&self) -> Result<Vec<String>, ApiError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY user_id")?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(users)
    }

    fn get_linked_accounts(&self, user_id: &str) -> Result<Vec<LinkedAccount>, ApiError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM linked_accounts WHERE user_id = ?1 ORDER BY created_at, account_id",
            ACCOUNT_COLUMNS
        ))?;
        let accounts = stmt
            .query_map(params![user_id], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    fn get_decrypted_credential(&self, account_id: &str) -> Result<Option<Credential>, ApiError> {
        let sealed = {
            let conn = self.db.lock()?;
            conn.query_row(
                "SELECT a.exchange, c.api_key, c.api_secret, c.passphrase, c.oauth_token
                 FROM credentials c
                 JOIN linked_accounts a ON a.account_id = c.account_id
                 WHERE c.account_id = ?1
                 ORDER BY c.id DESC LIMIT 1",
                params![account_id],
                |row| {
                    let exchange: Exchange = parse_column(row, 0)?;
                    Ok((
                        exchange,
                        EncryptedCredential {
                            api_key: row.get(1)?,
                            api_secret: row.get(2)?,
                            passphrase: row.get(3)?,
                            oauth_token: row.get(4)?,
                        },
                    ))
                },
            )
            .optional()?
        };

        sealed
            .map(|(exchange, sealed)| sealed.open(exchange, self.cipher.as_ref()))
            .transpose()
    }
}

impl SnapshotStore for SqliteStore {
    fn write_snapshots(&self, snapshots: &[NewSnapshot]) -> Result<usize, ApiError> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO balance_snapshots (account_id, category, asset, balance, usd_value, captured_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for snapshot in snapshots {
                stmt.execute(params![
                    snapshot.account_id,
                    snapshot.category.as_str(),
                    snapshot.asset,
                    snapshot.balance.to_string(),
                    snapshot.usd_value.to_string(),
                    snapshot.captured_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(snapshots.len())
    }

    fn delete_oldest(&self, user_id: &str, keep: usize) -> Result<usize, ApiError> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM balance_snapshots
             WHERE account_id IN (SELECT account_id FROM linked_accounts WHERE user_id = ?1)
               AND id NOT IN (
                   SELECT s.id FROM balance_snapshots s
                   JOIN linked_accounts a ON a.account_id = s.account_id
                   WHERE a.user_id = ?1
                   ORDER BY s.captured_at DESC, s.id DESC
                   LIMIT ?2
               )",
            params![user_id, keep],
        )?;
        tx.commit()?;
        Ok(deleted)
    }
}

impl IpUsageSource for SqliteStore {
    fn ip_usage(&self) -> Result<Vec<IpUsage>, ApiError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT proxy_ip, COUNT(*) FROM linked_accounts
             WHERE proxy_ip IS NOT NULL GROUP BY proxy_ip",
        )?;
        let usage = stmt
            .query_map([], |row| {
                Ok(IpUsage {
                    ip: row.get(0)?,
                    used: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(usage)
    }
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<LinkedAccount> {
    let permissions: String = row.get(6)?;
    let permissions = serde_json::from_str(&permissions)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(LinkedAccount {
        account_id: row.get(0)?,
        user_id: row.get(1)?,
        exchange: parse_column(row, 2)?,
        label: row.get(3)?,
        kind: parse_column(row, 4)?,
        proxy_ip: row.get(5)?,
        permissions,
        created_at: row.get(7)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<BalanceSnapshot> {
    Ok(BalanceSnapshot {
        id: row.get(0)?,
        account_id: row.get(1)?,
        category: parse_column(row, 2)?,
        asset: row.get(3)?,
        balance: parse_column::<Decimal>(row, 4)?,
        usd_value: parse_column::<Decimal>(row, 5)?,
        captured_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PlainCipher;
    use rust_decimal_macros::dec;

    fn store() -> SqliteStore {
        SqliteStore::new(Arc::new(Database::in_memory().unwrap()), Arc::new(PlainCipher))
    }

    fn new_account(account_id: &str, user_id: &str, ip: Option<&str>) -> NewLinkedAccount {
        NewLinkedAccount {
            account_id: account_id.to_string(),
            user_id: user_id.to_string(),
            exchange: Exchange::Bitget,
            label: "main".to_string(),
            proxy_ip: ip.map(str::to_string),
            permissions: vec!["spot".to_string()],
        }
    }

    fn credential() -> Credential {
        Credential::new(Exchange::Bitget, "key", "secret", Some("phrase".into()))
    }

    fn snapshot(account_id: &str, captured_at: i64) -> NewSnapshot {
        NewSnapshot {
            account_id: account_id.to_string(),
            category: SnapshotCategory::Aggregate,
            asset: "USDT".to_string(),
            balance: dec!(1.00000001),
            usd_value: dec!(1.00000001),
            captured_at,
        }
    }

    #[test]
    fn test_first_account_is_primary_then_sub() {
        let store = store();
        let first = store.register_account(new_account("a1", "u1", None), &credential()).unwrap();
        let second = store.register_account(new_account("a2", "u1", None), &credential()).unwrap();
        let other_user = store.register_account(new_account("b1", "u2", None), &credential()).unwrap();

        assert_eq!(first.kind, AccountKind::Primary);
        assert_eq!(second.kind, AccountKind::Sub);
        assert_eq!(other_user.kind, AccountKind::Primary);
        assert_eq!(store.get_all_users().unwrap(), vec!["u1", "u2"]);
        assert_eq!(store.get_linked_accounts("u1").unwrap().len(), 2);
    }

    #[test]
    fn test_second_primary_rejected_by_schema() {
        let store = store();
        store.register_account(new_account("a1", "u1", None), &credential()).unwrap();

        let conn = store.db.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO linked_accounts (account_id, user_id, exchange, kind, created_at)
             VALUES ('a2', 'u1', 'kucoin', 'primary', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_account_conflicts() {
        let store = store();
        store.register_account(new_account("a1", "u1", None), &credential()).unwrap();

        let err = store
            .register_account(new_account("a1", "u2", None), &credential())
            .unwrap_err();
        assert!(matches!(err, ApiError::AccountExists(ref id) if id == "a1"));
        assert_eq!(store.get_all_users().unwrap(), vec!["u1"]);
    }

    #[test]
    fn test_credential_is_sealed_at_rest_and_decrypted_on_read() {
        let store = store();
        store.register_account(new_account("a1", "u1", None), &credential()).unwrap();

        let stored: String = store
            .db
            .lock()
            .unwrap()
            .query_row("SELECT api_secret FROM credentials WHERE account_id = 'a1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, "enc:secret");

        let decrypted = store.get_decrypted_credential("a1").unwrap().unwrap();
        assert_eq!(decrypted, credential());
        assert!(store.get_decrypted_credential("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_account_cascades() {
        let store = store();
        store.register_account(new_account("a1", "u1", None), &credential()).unwrap();
        store.write_snapshots(&[snapshot("a1", 1), snapshot("a1", 2)]).unwrap();

        assert!(store.delete_account("a1").unwrap());
        assert!(!store.delete_account("a1").unwrap());

        let conn = store.db.lock().unwrap();
        let leftovers: i64 = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM credentials) + (SELECT COUNT(*) FROM balance_snapshots)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_snapshots_keep_exact_decimals() {
        let store = store();
        store.register_account(new_account("a1", "u1", None), &credential()).unwrap();
        store.write_snapshots(&[snapshot("a1", 10)]).unwrap();

        let latest = store.latest_snapshot("a1", SnapshotCategory::Aggregate).unwrap().unwrap();
        assert_eq!(latest.balance, dec!(1.00000001));
        assert_eq!(latest.captured_at, 10);
    }

    #[test]
    fn test_balance_history_pages_newest_first_since_cutoff() {
        let store = store();
        store.register_account(new_account("a1", "u1", None), &credential()).unwrap();
        let rows: Vec<NewSnapshot> = (1..=6).map(|ts| snapshot("a1", ts * 10)).collect();
        store.write_snapshots(&rows).unwrap();
        let mut spot = snapshot("a1", 70);
        spot.category = SnapshotCategory::Spot;
        store.write_snapshots(&[spot]).unwrap();

        let at = |page: Vec<BalanceSnapshot>| page.iter().map(|s| s.captured_at).collect::<Vec<_>>();
        let history = |limit, offset| {
            store
                .balance_history("a1", SnapshotCategory::Aggregate, 20, limit, offset)
                .unwrap()
        };

        assert_eq!(at(history(None, None)), vec![60, 50, 40, 30, 20]);
        assert_eq!(at(history(Some(2), None)), vec![60, 50]);
        assert_eq!(at(history(Some(2), Some(2))), vec![40, 30]);
        assert_eq!(at(history(None, Some(3))), vec![30, 20]);
        assert!(history(Some(5), Some(5)).is_empty());
    }

    #[test]
    fn test_delete_oldest_spans_all_user_accounts() {
        let store = store();
        store.register_account(new_account("a1", "u1", None), &credential()).unwrap();
        store.register_account(new_account("a2", "u1", None), &credential()).unwrap();
        store.register_account(new_account("b1", "u2", None), &credential()).unwrap();

        store.write_snapshots(&[snapshot("a1", 1), snapshot("a1", 3), snapshot("a1", 5)]).unwrap();
        store.write_snapshots(&[snapshot("a2", 2), snapshot("a2", 4)]).unwrap();
        store.write_snapshots(&[snapshot("b1", 0)]).unwrap();

        assert_eq!(store.delete_oldest("u1", 3).unwrap(), 2);

        let mut kept: Vec<i64> = store
            .snapshots_for_account("a1")
            .unwrap()
            .into_iter()
            .chain(store.snapshots_for_account("a2").unwrap())
            .map(|s| s.captured_at)
            .collect();
        kept.sort();
        assert_eq!(kept, vec![3, 4, 5]);
        assert_eq!(store.count_snapshots_for_user("u2").unwrap(), 1);
    }

    #[test]
    fn test_ip_usage_counts_bound_accounts() {
        let store = store();
        store.register_account(new_account("a1", "u1", Some("10.0.0.1")), &credential()).unwrap();
        store.register_account(new_account("a2", "u1", Some("10.0.0.1")), &credential()).unwrap();
        store.register_account(new_account("a3", "u2", Some("10.0.0.2")), &credential()).unwrap();
        store.register_account(new_account("a4", "u2", None), &credential()).unwrap();

        let mut usage = store.ip_usage().unwrap();
        usage.sort_by(|a, b| a.ip.cmp(&b.ip));
        assert_eq!(
            usage,
            vec![
                IpUsage { ip: "10.0.0.1".into(), used: 2 },
                IpUsage { ip: "10.0.0.2".into(), used: 1 },
            ]
        );
    }
}
