//! Per-chain polling loop
//!
//! A listener owns the checkpoint of one chain. On every tick it compares the
//! checkpoint with the tip minus the confirmation margin and ingests the
//! missing blocks one by one, committing each block's records together with
//! the advanced checkpoint.

use crate::error::{IndexerError, IndexerResult};
use crate::metrics;
use crate::models::{BlockEvents, Chain};
use crate::state::CrossChainStore;

use super::adapter::ChainAdapter;
use super::StatusTable;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Attempts of the completeness protocol per block
pub const MAX_ATTEMPTS: u32 = 3;

/// Wait between two attempts on an inconsistent block
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Extended nodes this far ahead of the primary ones flag a slow node
pub const SLOW_NODE_GAP: u64 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Initializing,
    Polling,
    Backfilling,
    Stopped,
}

/// Snapshot published to the status table after every state change
#[derive(Debug, Clone, Serialize)]
pub struct ListenerStatus {
    pub chain_id: u64,
    pub chain_name: String,
    pub state: ListenerState,
    pub checkpoint: u64,
    pub latest_height: u64,
    pub updated_at: DateTime<Utc>,
}

/// Result of one polling tick
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing to ingest
    Idle,
    /// Checkpoint moved from `from` to `to`
    Advanced { from: u64, to: u64 },
    /// Tick aborted, retried on the next one
    Recoverable(IndexerError),
    /// Listener must terminate
    Fatal(IndexerError),
}

impl TickOutcome {
    fn from_error(err: IndexerError) -> Self {
        if err.is_fatal() {
            TickOutcome::Fatal(err)
        } else {
            TickOutcome::Recoverable(err)
        }
    }
}

pub struct ChainListener {
    adapter: Arc<dyn ChainAdapter>,
    store: Arc<dyn CrossChainStore>,
    statuses: StatusTable,
    shutdown: watch::Receiver<bool>,
    /// Operator override of the starting checkpoint
    start_height: Option<u64>,
    state: ListenerState,
    checkpoint: u64,
    latest_height: u64,
}

impl ChainListener {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        store: Arc<dyn CrossChainStore>,
        statuses: StatusTable,
        shutdown: watch::Receiver<bool>,
        start_height: Option<u64>,
    ) -> Self {
        let listener = Self {
            adapter,
            store,
            statuses,
            shutdown,
            start_height,
            state: ListenerState::Initializing,
            checkpoint: 0,
            latest_height: 0,
        };
        listener.publish();
        listener
    }

    pub fn chain_id(&self) -> u64 {
        self.adapter.chain_id()
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Load the checkpoint, starting from the current tip for a new chain
    pub async fn initialize(&mut self) -> IndexerResult<()> {
        let chain_id = self.adapter.chain_id();
        self.set_state(ListenerState::Initializing);

        let stored = self.store.get_chain(chain_id).await?.map_or(0, |chain| chain.height);
        self.checkpoint = if stored == 0 {
            let latest = self.valid_height(self.adapter.latest_height().await?)?;
            self.store.update_chain(Chain::new(chain_id, latest)).await?;
            info!("Chain {} has no checkpoint, starting from tip {}", chain_id, latest);
            latest
        } else {
            stored
        };

        if let Some(height) = self.start_height {
            info!(
                "Chain {} checkpoint forced from {} to {}",
                chain_id, self.checkpoint, height
            );
            self.checkpoint = height;
        }

        metrics::record_checkpoint(chain_id, self.checkpoint);
        self.set_state(ListenerState::Polling);
        Ok(())
    }

    /// One polling step: refresh the tip and ingest every block that left the margin
    pub async fn tick(&mut self) -> TickOutcome {
        let chain_id = self.adapter.chain_id();

        let latest = match self.adapter.latest_height().await.and_then(|h| self.valid_height(h)) {
            Ok(height) => height,
            Err(e) => return TickOutcome::from_error(e),
        };
        // Extended nodes only feed the lag diagnostic, ingestion goes on without them
        let extended = match self
            .adapter
            .extended_latest_height()
            .await
            .and_then(|h| self.valid_height(h))
        {
            Ok(height) => Some(height),
            Err(e) => {
                warn!("Chain {} extended height unavailable: {}", chain_id, e);
                None
            }
        };

        self.latest_height = latest;
        if let Some(extended) = extended {
            if extended >= latest.saturating_add(SLOW_NODE_GAP) {
                warn!(
                    "Chain {} node is slow: latest height {}, extended height {}",
                    chain_id, latest, extended
                );
                metrics::record_slow_node(chain_id);
            }
        }
        metrics::record_heights(chain_id, latest, extended, self.checkpoint);

        let target = latest.saturating_sub(self.adapter.confirmation_defer());
        if self.checkpoint >= target {
            self.publish();
            return TickOutcome::Idle;
        }

        self.set_state(ListenerState::Backfilling);
        let from = self.checkpoint;
        let mut failure = None;

        while self.checkpoint < target && !self.stopping() {
            let height = self.checkpoint + 1;
            let events = match self.ingest(height).await {
                Ok(events) => events,
                Err(IndexerError::Stopped) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            if let Err(e) = self.store.update_events(Chain::new(chain_id, height), &events).await {
                error!("Chain {} failed to persist block {}: {}", chain_id, height, e);
                metrics::record_persist_failure(chain_id);
                failure = Some(e);
                break;
            }

            self.checkpoint = height;
            metrics::record_checkpoint(chain_id, height);
            metrics::record_block_events(chain_id, events.srcs.len(), events.dsts.len());
            if !events.is_empty() {
                debug!(
                    "Chain {} block {}: {} wrappers, {} srcs, {} polys, {} dsts",
                    chain_id,
                    height,
                    events.wrappers.len(),
                    events.srcs.len(),
                    events.polys.len(),
                    events.dsts.len()
                );
            }
        }

        self.set_state(ListenerState::Polling);
        match failure {
            Some(e) => TickOutcome::from_error(e),
            None if self.checkpoint > from => TickOutcome::Advanced {
                from,
                to: self.checkpoint,
            },
            None => TickOutcome::Idle,
        }
    }

    /// Fetch a block until its record counts match the raw event counts
    ///
    /// After `MAX_ATTEMPTS` the last result is accepted anyway.
    async fn ingest(&mut self, height: u64) -> IndexerResult<BlockEvents> {
        let chain_id = self.adapter.chain_id();
        let mut attempt = 1;

        loop {
            let events = self.adapter.handle_new_block(height).await?;
            if events.is_complete() {
                return Ok(events);
            }

            if attempt >= MAX_ATTEMPTS {
                error!(
                    "Chain {} block {} inconsistent after {} attempts, accepting srcs {}/{} dsts {}/{}",
                    chain_id,
                    height,
                    attempt,
                    events.srcs.len(),
                    events.lock_count,
                    events.dsts.len(),
                    events.unlock_count
                );
                metrics::record_inconsistent_block(chain_id);
                return Ok(events);
            }

            warn!(
                "Chain {} block {} attempt {}: srcs {}/{} dsts {}/{}, retrying",
                chain_id,
                height,
                attempt,
                events.srcs.len(),
                events.lock_count,
                events.dsts.len(),
                events.unlock_count
            );
            attempt += 1;

            tokio::select! {
                _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                _ = stop_requested(&mut self.shutdown) => return Err(IndexerError::Stopped),
            }
        }
    }

    /// Polling loop until the shutdown signal or a fatal error
    pub async fn run(mut self) -> IndexerResult<()> {
        let chain_id = self.adapter.chain_id();
        let slot = self.adapter.listen_slot();
        info!("Starting listener for chain {} ({})", chain_id, self.adapter.chain_name());

        loop {
            match self.initialize().await {
                Ok(()) => break,
                Err(e) if e.is_fatal() => {
                    error!("Chain {} failed to initialize: {}", chain_id, e);
                    self.set_state(ListenerState::Stopped);
                    return Err(e);
                }
                Err(e) => warn!("Chain {} initialization failed, retrying: {}", chain_id, e),
            }

            tokio::select! {
                _ = tokio::time::sleep(slot) => {}
                _ = stop_requested(&mut self.shutdown) => {
                    self.set_state(ListenerState::Stopped);
                    return Ok(());
                }
            }
        }

        let mut ticker = tokio::time::interval(slot);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_requested(&mut self.shutdown) => break,
            }

            match self.tick().await {
                TickOutcome::Idle => {}
                TickOutcome::Advanced { from, to } => {
                    debug!("Chain {} checkpoint {} -> {}", chain_id, from, to)
                }
                TickOutcome::Recoverable(e) if e.is_retryable() => {
                    warn!("Chain {} tick skipped: {}", chain_id, e)
                }
                TickOutcome::Recoverable(e) => error!("Chain {} tick failed: {}", chain_id, e),
                TickOutcome::Fatal(e) => {
                    error!("Chain {} listener terminated: {}", chain_id, e);
                    self.set_state(ListenerState::Stopped);
                    return Err(e);
                }
            }

            if self.stopping() {
                break;
            }
        }

        self.set_state(ListenerState::Stopped);
        info!("Listener for chain {} stopped at {}", chain_id, self.checkpoint);
        Ok(())
    }

    /// Zero and `u64::MAX` are what broken nodes report as a tip
    fn valid_height(&self, height: u64) -> IndexerResult<u64> {
        if height == 0 || height == u64::MAX {
            return Err(IndexerError::InvalidHeight {
                chain_id: self.adapter.chain_id(),
                height,
            });
        }
        Ok(height)
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn set_state(&mut self, state: ListenerState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.statuses.insert(
            self.adapter.chain_id(),
            ListenerStatus {
                chain_id: self.adapter.chain_id(),
                chain_name: self.adapter.chain_name(),
                state: self.state,
                checkpoint: self.checkpoint,
                latest_height: self.latest_height,
                updated_at: Utc::now(),
            },
        );
    }
}

/// Resolves once shutdown is requested or the sender is gone
pub(crate) async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
