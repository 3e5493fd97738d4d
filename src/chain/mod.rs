//! Chain module - adapters and the per-chain listeners
//!
//! This module provides:
//! - The chain adapter contract and the chain id -> adapter family registry
//! - Multi-RPC provider management with automatic failover
//! - The EVM and poly relay adapter families
//! - One supervised polling task per configured chain

pub mod adapter;
pub mod evm;
pub mod listener;
pub mod poly;
pub mod provider;

pub use adapter::AdapterRegistry;
pub use listener::{ChainListener, ListenerState, ListenerStatus};

use crate::config::Settings;
use crate::error::IndexerResult;
use crate::state::CrossChainStore;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Latest status of every listener, keyed by chain id
pub type StatusTable = Arc<DashMap<u64, ListenerStatus>>;

/// Reported on the supervision channel when a listener task ends
#[derive(Debug)]
pub struct ListenerExit {
    pub chain_id: u64,
    pub result: IndexerResult<()>,
}

/// Owns the listeners of every enabled chain until they are spawned
pub struct ChainManager {
    listeners: Vec<ChainListener>,
    statuses: StatusTable,
}

impl ChainManager {
    /// Build one adapter and listener per enabled chain
    ///
    /// Fails on the first chain whose adapter cannot be built.
    pub async fn new(
        settings: &Settings,
        registry: &AdapterRegistry,
        store: Arc<dyn CrossChainStore>,
        shutdown: watch::Receiver<bool>,
    ) -> IndexerResult<Self> {
        let statuses: StatusTable = Arc::new(DashMap::new());
        let mut listeners = Vec::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!("Initializing chain {} (ID: {})", name, chain_config.chain_id);

            let start_height = chain_config.start_height;
            let adapter = registry.build(chain_config.clone()).await?;
            listeners.push(ChainListener::new(
                adapter,
                store.clone(),
                statuses.clone(),
                shutdown.clone(),
                start_height,
            ));
        }

        Ok(Self { listeners, statuses })
    }

    pub fn statuses(&self) -> StatusTable {
        self.statuses.clone()
    }

    pub fn chain_count(&self) -> usize {
        self.listeners.len()
    }

    /// Spawn one task per listener
    pub fn spawn(self) -> ListenerSupervisor {
        let (exit_tx, exits) = mpsc::unbounded_channel();
        let running = self.listeners.len();

        let handles = self
            .listeners
            .into_iter()
            .map(|listener| {
                let exit_tx = exit_tx.clone();
                tokio::spawn(async move {
                    let chain_id = listener.chain_id();
                    let result = listener.run().await;
                    let _ = exit_tx.send(ListenerExit { chain_id, result });
                })
            })
            .collect();

        ListenerSupervisor {
            handles,
            exits,
            running,
        }
    }
}

/// Receiving end of the listeners' supervision channel
pub struct ListenerSupervisor {
    handles: Vec<JoinHandle<()>>,
    exits: mpsc::UnboundedReceiver<ListenerExit>,
    running: usize,
}

impl ListenerSupervisor {
    /// Next listener that ended, `None` once every listener is gone
    pub async fn next_exit(&mut self) -> Option<ListenerExit> {
        if self.running == 0 {
            return None;
        }
        let exit = self.exits.recv().await?;
        self.running -= 1;
        if let Err(e) = &exit.result {
            error!("Listener for chain {} exited: {}", exit.chain_id, e);
        }
        Some(exit)
    }

    pub fn running(&self) -> usize {
        self.running
    }

    /// Wait for every listener task to finish
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Listener task panicked: {}", e);
            }
        }
    }
}
