use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::orchestrator::AggregationOrchestrator;

/// Background fetch scheduler.
///
/// One loop calls `run_cycle` on a fixed interval. Ticks missed while a cycle
/// is still running are skipped, so cycles never overlap. Stopping waits for
/// the running cycle to finish.
#[derive(Clone)]
pub struct SyncScheduler {
    orchestrator: Arc<AggregationOrchestrator>,
    interval: Duration,
    task: Arc<RwLock<Option<(watch::Sender<bool>, JoinHandle<()>)>>>,
    cycles: Arc<AtomicUsize>,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<AggregationOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            task: Arc::new(RwLock::new(None)),
            cycles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start the loop; the first cycle runs immediately. No-op when running.
    pub async fn start(&self) {
        let mut task = self.task.write().await;
        if task.is_some() {
            return;
        }

        info!("Starting sync scheduler, interval {}s", self.interval.as_secs());

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let orchestrator = Arc::clone(&self.orchestrator);
        let cycles = Arc::clone(&self.cycles);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        match orchestrator.run_cycle().await {
                            Ok(report) => report.log_summary(),
                            Err(e) => error!("Fetch cycle aborted: {}", e),
                        }
                        cycles.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }

            info!("Sync loop exited");
        });

        *task = Some((stop_tx, handle));
    }

    /// Signal the loop and wait for it, letting an in-progress cycle complete
    pub async fn stop(&self) {
        let Some((stop_tx, handle)) = self.task.write().await.take() else {
            return;
        };

        info!("Stopping sync scheduler...");
        let _ = stop_tx.send(true);
        if let Err(e) = handle.await {
            error!("Sync loop ended abnormally: {}", e);
        }
        info!("Sync scheduler stopped after {} cycle(s)", self.cycles_completed());
    }

    /// Cycles finished (successfully or aborted) since start
    pub fn cycles_completed(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    async fn is_running(&self) -> bool {
        self.task.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::db::{Database, SqliteStore};
    use crate::sync::orchestrator::OrchestratorConfig;
    use crate::sync::price::PriceOracle;
    use crate::test_support::{FakeGateway, PlainCipher};
    use crate::api::factory::DefaultClientFactory;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    struct OnePrice;

    #[async_trait]
    impl PriceOracle for OnePrice {
        async fn get_usd_price(&self, _symbol: &str) -> Result<Decimal, ApiError> {
            Ok(Decimal::ONE)
        }
    }

    fn scheduler(interval: Duration) -> SyncScheduler {
        let store = Arc::new(SqliteStore::new(
            Arc::new(Database::in_memory().unwrap()),
            Arc::new(PlainCipher),
        ));
        let orchestrator = AggregationOrchestrator::new(
            store.clone(),
            store,
            Arc::new(DefaultClientFactory::new(Arc::new(FakeGateway::new()))),
            Arc::new(OnePrice),
            OrchestratorConfig::default(),
        );
        SyncScheduler::new(Arc::new(orchestrator), interval)
    }

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let scheduler = scheduler(Duration::from_millis(20));

        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        tokio::time::sleep(Duration::from_millis(90)).await;
        scheduler.stop().await;

        let completed = scheduler.cycles_completed();
        assert!(completed >= 2, "only {} cycles", completed);
        assert!(!scheduler.is_running().await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.cycles_completed(), completed);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let scheduler = scheduler(Duration::from_secs(3600));
        scheduler.stop().await;
        assert_eq!(scheduler.cycles_completed(), 0);
    }
}
