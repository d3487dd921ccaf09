use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::Semaphore;

use super::price::PriceOracle;
use super::retention::{RetentionTrimmer, DEFAULT_MAX_RECORDS};
use crate::api::client::{AggregateBalance, SETTLEMENT_ASSET};
use crate::api::credentials::Credential;
use crate::api::error::{ApiError, ErrorKind};
use crate::api::factory::ClientFactory;
use crate::config::SyncConfig;
use crate::db::{CredentialStore, SnapshotStore};
use crate::models::{LinkedAccount, NewSnapshot, SnapshotCategory};

/// Where a fetch cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    CollectingAccounts,
    BatchingAccounts,
    DispatchingBatch,
    Reconciling,
    Done,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    /// In-flight accounts across the whole cycle, not per batch
    pub max_concurrent: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub max_records_per_user: usize,
    pub settlement_asset: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrent: 50,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
            max_records_per_user: DEFAULT_MAX_RECORDS,
            settlement_asset: SETTLEMENT_ASSET.to_string(),
        }
    }
}

impl From<&SyncConfig> for OrchestratorConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_concurrent: config.max_concurrent.max(1),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay(),
            max_records_per_user: config.max_records_per_user,
            settlement_asset: config.settlement_asset.clone(),
        }
    }
}

/// Outcome of one fetch cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub users_seen: usize,
    pub accounts_seen: usize,
    /// No credential stored, or the stores could not be read for it
    pub accounts_skipped: usize,
    pub accounts_succeeded: usize,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
    pub snapshots_written: usize,
    pub users_trimmed: usize,
    pub rows_trimmed: usize,
    pub retention_failures: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn accounts_failed(&self) -> usize {
        self.failures_by_kind.values().sum()
    }

    fn record_failure(&mut self, kind: ErrorKind) {
        *self.failures_by_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn log_summary(&self) {
        let failures = self
            .failures_by_kind
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect::<Vec<_>>()
            .join(",");

        info!(
            "Cycle done: users={} accounts={} ok={} failed={} [{}] skipped={} snapshots={} trimmed={} ({} rows) retention_failures={} elapsed={:.1}s",
            self.users_seen,
            self.accounts_seen,
            self.accounts_succeeded,
            self.accounts_failed(),
            failures,
            self.accounts_skipped,
            self.snapshots_written,
            self.users_trimmed,
            self.rows_trimmed,
            self.retention_failures,
            self.elapsed.as_secs_f64()
        );
    }
}

struct WorkItem {
    account: LinkedAccount,
    credential: Credential,
}

enum AccountOutcome {
    Written { user_id: String, snapshots: usize },
    Failed { account_id: String, error: ApiError },
}

/// Runs one fetch cycle over every linked account: collect, batch, dispatch
/// under a global concurrency limit, then trim history.
///
/// A failing account never affects its siblings; failures end up counted in
/// the [`CycleReport`].
pub struct AggregationOrchestrator {
    credentials: Arc<dyn CredentialStore>,
    snapshots: Arc<dyn SnapshotStore>,
    factory: Arc<dyn ClientFactory>,
    prices: Arc<dyn PriceOracle>,
    trimmer: RetentionTrimmer,
    config: OrchestratorConfig,
    phase: Mutex<CyclePhase>,
}

impl AggregationOrchestrator {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        snapshots: Arc<dyn SnapshotStore>,
        factory: Arc<dyn ClientFactory>,
        prices: Arc<dyn PriceOracle>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            credentials,
            trimmer: RetentionTrimmer::new(Arc::clone(&snapshots)),
            snapshots,
            factory,
            prices,
            config,
            phase: Mutex::new(CyclePhase::Done),
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(CyclePhase::Done)
    }

    fn enter(&self, phase: CyclePhase) {
        debug!("Cycle phase: {:?}", phase);
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
    }

    /// Only an unreadable user list or a failed price lookup abort the cycle;
    /// everything per account is isolated and reported.
    pub async fn run_cycle(&self) -> Result<CycleReport, ApiError> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let result = self.run_phases(&mut report).await;
        self.enter(CyclePhase::Done);
        report.elapsed = started.elapsed();

        result.map(|_| report)
    }

    async fn run_phases(&self, report: &mut CycleReport) -> Result<(), ApiError> {
        self.enter(CyclePhase::CollectingAccounts);
        let work = self.collect_accounts(report)?;

        if work.is_empty() {
            info!("No accounts with credentials, nothing to fetch");
            return Ok(());
        }

        let usd_price = self
            .prices
            .get_usd_price(&self.config.settlement_asset)
            .await
            .map_err(|e| {
                error!("Price lookup for {} failed, cycle aborted: {}", self.config.settlement_asset, e);
                e
            })?;

        self.enter(CyclePhase::BatchingAccounts);
        let batches: Vec<&[WorkItem]> = work.chunks(self.config.batch_size.max(1)).collect();
        info!(
            "Fetching {} account(s) in {} batch(es), {} in flight at most",
            work.len(),
            batches.len(),
            self.config.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut trim_users = BTreeSet::new();

        for (index, batch) in batches.iter().enumerate() {
            self.enter(CyclePhase::DispatchingBatch);
            debug!("Dispatching batch {}/{} ({} accounts)", index + 1, batches.len(), batch.len());

            let outcomes = join_all(
                batch
                    .iter()
                    .map(|item| self.process_account(item, &semaphore, usd_price)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    AccountOutcome::Written { user_id, snapshots } => {
                        report.accounts_succeeded += 1;
                        report.snapshots_written += snapshots;
                        trim_users.insert(user_id);
                    }
                    AccountOutcome::Failed { account_id, error } => {
                        error!("Account {} abandoned [{}]: {}", account_id, error.kind(), error);
                        report.record_failure(error.kind());
                    }
                }
            }
        }

        self.enter(CyclePhase::Reconciling);
        for user_id in trim_users {
            match self.trimmer.trim(&user_id, self.config.max_records_per_user) {
                Ok(removed) => {
                    report.users_trimmed += 1;
                    report.rows_trimmed += removed;
                }
                Err(e) => {
                    error!("{}", e);
                    report.retention_failures += 1;
                }
            }
        }

        Ok(())
    }

    fn collect_accounts(&self, report: &mut CycleReport) -> Result<Vec<WorkItem>, ApiError> {
        let users = self.credentials.get_all_users()?;
        report.users_seen = users.len();

        let mut work = Vec::new();
        for user_id in users {
            let accounts = match self.credentials.get_linked_accounts(&user_id) {
                Ok(accounts) => accounts,
                Err(e) => {
                    error!("Could not load accounts for user {}: {}", user_id, e);
                    continue;
                }
            };

            for account in accounts {
                report.accounts_seen += 1;
                match self.credentials.get_decrypted_credential(&account.account_id) {
                    Ok(Some(credential)) => work.push(WorkItem { account, credential }),
                    Ok(None) => {
                        warn!("Account {} has no credential, skipped", account.account_id);
                        report.accounts_skipped += 1;
                    }
                    Err(e) => {
                        warn!("Credential for account {} unreadable, skipped: {}", account.account_id, e);
                        report.accounts_skipped += 1;
                    }
                }
            }
        }

        Ok(work)
    }

    async fn process_account(
        &self,
        item: &WorkItem,
        semaphore: &Semaphore,
        usd_price: Decimal,
    ) -> AccountOutcome {
        let account_id = item.account.account_id.clone();
        let failed = |error: ApiError| AccountOutcome::Failed {
            account_id: account_id.clone(),
            error,
        };

        let Ok(permit) = semaphore.acquire().await else {
            return failed(ApiError::ConfigError("Concurrency limiter closed".into()));
        };

        let client = match self
            .factory
            .create(&item.credential, item.account.proxy_ip.as_deref())
        {
            Ok(client) => client,
            Err(e) => return failed(e),
        };

        let mut attempt = 0;
        let aggregate = loop {
            attempt += 1;
            match client.fetch_aggregate_balance().await {
                Ok(aggregate) => break aggregate,
                Err(e) if e.is_retryable() && attempt < self.config.retry_attempts => {
                    warn!(
                        "Account {} attempt {}/{} failed [{}]: {}",
                        account_id,
                        attempt,
                        self.config.retry_attempts,
                        e.kind(),
                        e
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return failed(e),
            }
        };
        drop(permit);

        let rows = match snapshot_rows(
            &item.account,
            &aggregate,
            &self.config.settlement_asset,
            usd_price,
        ) {
            Ok(rows) => rows,
            Err(e) => return failed(e),
        };

        match self.snapshots.write_snapshots(&rows) {
            Ok(written) => {
                debug!(
                    "Account {}: {} {} across {} snapshot(s)",
                    account_id, aggregate.total, aggregate.asset, written
                );
                AccountOutcome::Written {
                    user_id: item.account.user_id.clone(),
                    snapshots: written,
                }
            }
            Err(e) => failed(e),
        }
    }
}

/// One row per breakdown category plus the aggregate, all sharing a timestamp.
///
/// `usd_price` quotes `priced_asset`; an aggregate in any other asset is
/// rejected rather than stored with a wrong USD value.
fn snapshot_rows(
    account: &LinkedAccount,
    aggregate: &AggregateBalance,
    priced_asset: &str,
    usd_price: Decimal,
) -> Result<Vec<NewSnapshot>, ApiError> {
    if !aggregate.asset.eq_ignore_ascii_case(priced_asset.trim()) {
        return Err(ApiError::ConfigError(format!(
            "Account {} aggregates {} but the cycle priced {}",
            account.account_id, aggregate.asset, priced_asset
        )));
    }

    let captured_at = chrono::Utc::now().timestamp_millis();

    aggregate
        .breakdown
        .iter()
        .map(|(category, amount)| (*category, *amount))
        .chain(std::iter::once((SnapshotCategory::Aggregate, aggregate.total)))
        .map(|(category, balance)| {
            let usd_value = balance.checked_mul(usd_price).ok_or_else(|| {
                ApiError::ParseError(format!("USD value overflow for {} {}", balance, aggregate.asset))
            })?;

            Ok(NewSnapshot {
                account_id: account.account_id.clone(),
                category,
                asset: aggregate.asset.clone(),
                balance,
                usd_value: usd_value.round_dp(8),
                captured_at,
            })
        })
        .collect()
}
