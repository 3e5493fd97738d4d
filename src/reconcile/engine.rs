//! Periodic reconciliation of wrapper transaction statuses

use super::status::next_status;
use crate::config::ReconcilerConfig;
use crate::error::IndexerResult;
use crate::metrics;
use crate::state::CrossChainStore;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What one pass changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub hashes_backfilled: usize,
    pub stale: usize,
    pub status_updates: usize,
}

/// Joins the legs of every unfinished transaction and rewrites its status
pub struct StatusReconciler {
    store: Arc<dyn CrossChainStore>,
    config: ReconcilerConfig,
    shutdown: watch::Receiver<bool>,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<dyn CrossChainStore>,
        config: ReconcilerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            config,
            shutdown,
        }
    }

    /// Run passes until shutdown
    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_secs(self.config.time_slot_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Status reconciler started (every {}s, stale after {}s)",
            self.config.time_slot_secs, self.config.how_old_secs
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now().timestamp().max(0) as u64;
                    let report = self.run_pass(now).await;
                    debug!("Reconciler pass: {:?}", report);
                }
                _ = crate::chain::listener::stop_requested(&mut self.shutdown) => break,
            }
        }

        info!("Status reconciler stopped");
    }

    /// One pass at unix time `now`; a failing step does not stop the next one
    pub async fn run_pass(&self, now: u64) -> PassReport {
        let mut report = PassReport::default();

        match self.backfill_hashes().await {
            Ok(count) => report.hashes_backfilled = count,
            Err(e) => error!("Source hash backfill failed: {}", e),
        }
        match self.check_stale(now).await {
            Ok(count) => report.stale = count,
            Err(e) => error!("Unfinished transaction check failed: {}", e),
        }
        match self.update_statuses().await {
            Ok(count) => report.status_updates = count,
            Err(e) => error!("Status update failed: {}", e),
        }

        report
    }

    async fn backfill_hashes(&self) -> IndexerResult<usize> {
        let links = self.store.pending_poly_src_links().await?;
        if links.is_empty() {
            return Ok(0);
        }
        self.store.update_poly_src_hashes(&links).await?;
        debug!("Resolved the source hash of {} relay transactions", links.len());
        Ok(links.len())
    }

    async fn check_stale(&self, now: u64) -> IndexerResult<usize> {
        let before = now.saturating_sub(self.config.how_old_secs);
        let stale = self.store.unfinished_wrappers_before(before).await?;
        metrics::record_unfinished(stale.len());

        if !stale.is_empty() {
            let listing = serde_json::to_string(&stale).unwrap_or_else(|e| format!("<unserializable: {}>", e));
            warn!("There are {} unfinished transactions: {}", stale.len(), listing);
        }
        Ok(stale.len())
    }

    async fn update_statuses(&self) -> IndexerResult<usize> {
        let checkpoints: HashMap<u64, u64> = self
            .store
            .list_chains()
            .await?
            .into_iter()
            .map(|chain| (chain.chain_id, chain.height))
            .collect();

        let updates: Vec<_> = self
            .store
            .wrapper_leg_relations()
            .await?
            .iter()
            .filter_map(|legs| {
                let checkpoint = checkpoints.get(&legs.wrapper.src_chain_id).copied();
                next_status(legs, checkpoint).map(|status| (legs.wrapper.hash.clone(), status))
            })
            .collect();

        if updates.is_empty() {
            return Ok(0);
        }

        self.store.update_wrapper_statuses(&updates).await?;
        for (_, status) in &updates {
            metrics::record_status_update(*status);
        }
        Ok(updates.len())
    }
}
