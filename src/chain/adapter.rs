//! Chain adapter contract and the chain id -> adapter family registry

use crate::config::ChainListenConfig;
use crate::error::{IndexerError, IndexerResult};
use crate::models::BlockEvents;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::evm::EvmChainAdapter;
use super::poly::PolyChainAdapter;

/// Capability set of one monitored chain
///
/// `handle_new_block` must be deterministic for a given chain state and free of
/// side effects so the listener can call it repeatedly for the same height.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Tip height from the primary nodes
    async fn latest_height(&self) -> IndexerResult<u64>;

    /// Tip height from the secondary nodes, falls back to the primary height
    async fn extended_latest_height(&self) -> IndexerResult<u64>;

    /// Fetch and decode every bridge event of block `height`
    async fn handle_new_block(&self, height: u64) -> IndexerResult<BlockEvents>;

    /// Polling cadence
    fn listen_slot(&self) -> Duration;

    /// Number of trailing blocks never ingested
    fn confirmation_defer(&self) -> u64;

    fn chain_id(&self) -> u64;

    fn chain_name(&self) -> String;
}

pub type AdapterFactory =
    Arc<dyn Fn(ChainListenConfig) -> BoxFuture<'static, IndexerResult<Arc<dyn ChainAdapter>>> + Send + Sync>;

/// Poly relay chain id
pub const POLY_CHAIN_ID: u64 = 0;

/// Chain ids served by the EVM adapter family
pub const EVM_CHAIN_IDS: &[u64] = &[
    2,   // ethereum
    6,   // bsc
    7,   // heco
    13,  // matic
    80,  // o3
    90,  // okex
    107, // palette
    206, // xdai
    208, // fantom
    209, // avalanche
    210, // optimism
    215, // arbitrum
    300, // metis
    400, // boba
    402, // rinkeby
    500, // oasis
    800, // harmony
    900, // kcc
    940, // zksync
    960, // celo
    970, // clover
    980, // conflux
    990, // astar
];

/// Maps chain ids to the factory building their adapter
///
/// Populated once at startup and only read afterwards.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<u64, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter family
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let evm: AdapterFactory = Arc::new(evm_factory);
        for chain_id in EVM_CHAIN_IDS {
            registry.register(*chain_id, evm.clone());
        }
        registry.register(POLY_CHAIN_ID, Arc::new(poly_factory));
        registry
    }

    pub fn register(&mut self, chain_id: u64, factory: AdapterFactory) {
        self.factories.insert(chain_id, factory);
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.factories.contains_key(&chain_id)
    }

    /// Build the adapter for a configured chain
    pub async fn build(&self, config: ChainListenConfig) -> IndexerResult<Arc<dyn ChainAdapter>> {
        let chain_id = config.chain_id;
        let factory = self
            .factories
            .get(&chain_id)
            .ok_or(IndexerError::UnknownChain { chain_id })?;
        factory(config).await
    }
}

fn evm_factory(config: ChainListenConfig) -> BoxFuture<'static, IndexerResult<Arc<dyn ChainAdapter>>> {
    Box::pin(async move {
        EvmChainAdapter::new(config)
            .await
            .map(|adapter| Arc::new(adapter) as Arc<dyn ChainAdapter>)
    })
}

fn poly_factory(config: ChainListenConfig) -> BoxFuture<'static, IndexerResult<Arc<dyn ChainAdapter>>> {
    Box::pin(async move { PolyChainAdapter::new(config).map(|adapter| Arc::new(adapter) as Arc<dyn ChainAdapter>) })
}
