//! Persistence of bridge transactions and chain checkpoints
//!
//! Handles:
//! - Per-chain ingestion checkpoints
//! - Idempotent upserts of every transaction leg
//! - The joins used by the status reconciler
//!
//! The store is the only state shared between chain listeners and the
//! reconciler, so every write goes through natural-key upserts.

mod manager;
#[cfg(test)]
pub mod memory;

pub use manager::StateManager;

use crate::error::IndexerResult;
use crate::models::{BlockEvents, Chain, PolySrcLink, TxStatus, WrapperLegs, WrapperTransaction};

use async_trait::async_trait;

#[async_trait]
pub trait CrossChainStore: Send + Sync {
    /// Checkpoint of a chain, `None` when the chain was never ingested
    async fn get_chain(&self, chain_id: u64) -> IndexerResult<Option<Chain>>;

    async fn update_chain(&self, chain: Chain) -> IndexerResult<()>;

    /// Persist every record of one block together with the advanced checkpoint
    ///
    /// Either all rows and the checkpoint are committed or none of them.
    async fn update_events(&self, chain: Chain, events: &BlockEvents) -> IndexerResult<()>;

    async fn list_chains(&self) -> IndexerResult<Vec<Chain>>;

    /// Relay legs without a source hash whose key matches a known source leg
    async fn pending_poly_src_links(&self) -> IndexerResult<Vec<PolySrcLink>>;

    async fn update_poly_src_hashes(&self, links: &[PolySrcLink]) -> IndexerResult<()>;

    /// Unfinished wrapper transactions created before `time` (unix seconds)
    async fn unfinished_wrappers_before(&self, time: u64) -> IndexerResult<Vec<WrapperTransaction>>;

    /// Every unfinished wrapper transaction joined with its relay and destination legs
    async fn wrapper_leg_relations(&self) -> IndexerResult<Vec<WrapperLegs>>;

    /// Batch status write, atomic over the whole batch
    async fn update_wrapper_statuses(&self, updates: &[(String, TxStatus)]) -> IndexerResult<()>;
}
