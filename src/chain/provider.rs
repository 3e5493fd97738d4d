//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainListenConfig;
use crate::error::{IndexerError, IndexerResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain_id: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Watch-only providers used to detect a lagging primary node
    extend_providers: Vec<Provider<Http>>,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: &ChainListenConfig) -> IndexerResult<Self> {
        let http_providers = connect_all(config.chain_id, &config.nodes);
        if http_providers.is_empty() {
            return Err(IndexerError::Node {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let extend_providers = connect_all(config.chain_id, &config.extend_nodes);

        Ok(Self {
            chain_id: config.chain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
            extend_providers,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> IndexerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(IndexerError::node(self.chain_id, "All providers failed"))
    }

    /// Highest block number reported by the extended nodes
    ///
    /// Falls back to the primary height without extended nodes or when all of them fail.
    pub async fn get_extended_block_number(&self) -> IndexerResult<u64> {
        if self.extend_providers.is_empty() {
            return self.get_block_number().await;
        }

        let mut best: Option<u64> = None;
        for provider in &self.extend_providers {
            match provider.get_block_number().await {
                Ok(block) => best = Some(best.map_or(block.as_u64(), |b| b.max(block.as_u64()))),
                Err(e) => debug!("Extended node of chain {} failed: {}", self.chain_id, e),
            }
        }

        match best {
            Some(height) => Ok(height),
            None => {
                warn!("All extended providers of chain {} failed", self.chain_id);
                self.get_block_number().await
            }
        }
    }

    /// Get block header by number
    pub async fn get_block(&self, block_number: u64) -> IndexerResult<Option<Block<H256>>> {
        self.http()
            .get_block(block_number)
            .await
            .map_err(|e| IndexerError::node(self.chain_id, e))
    }

    /// Get transaction receipt
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> IndexerResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| IndexerError::node(self.chain_id, e))
    }

    /// Get logs for a filter
    pub async fn get_logs(&self, filter: &Filter) -> IndexerResult<Vec<Log>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs from chain {}: {}", self.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(IndexerError::node(
            self.chain_id,
            "All providers failed to get logs",
        ))
    }
}

fn connect_all(chain_id: u64, urls: &[String]) -> Vec<Provider<Http>> {
    urls.iter()
        .filter_map(|url| match Provider::<Http>::try_from(url.as_str()) {
            Ok(provider) => {
                debug!("Added HTTP provider for chain {}: {}", chain_id, url);
                Some(provider.interval(Duration::from_millis(100)))
            }
            Err(e) => {
                warn!("Failed to create provider for {}: {}", url, e);
                None
            }
        })
        .collect()
}
