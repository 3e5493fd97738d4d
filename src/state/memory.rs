//! In-memory store for tests
//!
//! Same contract as the PostgreSQL store. Every write takes the single table
//! lock, so a failed `update_events` leaves nothing behind.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::CrossChainStore;
use crate::error::{IndexerError, IndexerResult};
use crate::models::{
    BlockEvents, Chain, DstTransaction, PolySrcLink, PolyTransaction, SrcTransaction, TxStatus,
    WrapperLegs, WrapperTransaction,
};

#[derive(Debug, Default)]
struct Tables {
    chains: HashMap<u64, Chain>,
    wrappers: HashMap<String, WrapperTransaction>,
    srcs: HashMap<(u64, String), SrcTransaction>,
    polys: HashMap<String, PolyTransaction>,
    dsts: HashMap<(u64, String), DstTransaction>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    /// Number of upcoming `update_events` calls that fail
    failing_event_writes: AtomicUsize,
    /// Number of upcoming status batches that fail
    failing_status_writes: AtomicUsize,
    event_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_event_writes(&self, count: usize) {
        self.failing_event_writes.store(count, Ordering::SeqCst);
    }

    pub fn fail_status_writes(&self, count: usize) {
        self.failing_status_writes.store(count, Ordering::SeqCst);
    }

    /// Successful `update_events` calls so far
    pub fn event_writes(&self) -> usize {
        self.event_writes.load(Ordering::SeqCst)
    }

    pub async fn insert_wrapper(&self, wrapper: WrapperTransaction) {
        self.tables.write().await.wrappers.insert(wrapper.hash.clone(), wrapper);
    }

    pub async fn insert_src(&self, src: SrcTransaction) {
        self.tables
            .write()
            .await
            .srcs
            .insert((src.chain_id, src.hash.clone()), src);
    }

    pub async fn insert_poly(&self, poly: PolyTransaction) {
        self.tables.write().await.polys.insert(poly.hash.clone(), poly);
    }

    pub async fn insert_dst(&self, dst: DstTransaction) {
        self.tables
            .write()
            .await
            .dsts
            .insert((dst.chain_id, dst.hash.clone()), dst);
    }

    pub async fn wrapper(&self, hash: &str) -> Option<WrapperTransaction> {
        self.tables.read().await.wrappers.get(hash).cloned()
    }

    pub async fn poly(&self, hash: &str) -> Option<PolyTransaction> {
        self.tables.read().await.polys.get(hash).cloned()
    }

    /// Row counts of (wrappers, srcs, polys, dsts)
    pub async fn counts(&self) -> (usize, usize, usize, usize) {
        let tables = self.tables.read().await;
        (
            tables.wrappers.len(),
            tables.srcs.len(),
            tables.polys.len(),
            tables.dsts.len(),
        )
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CrossChainStore for MemoryStore {
    async fn get_chain(&self, chain_id: u64) -> IndexerResult<Option<Chain>> {
        Ok(self.tables.read().await.chains.get(&chain_id).copied())
    }

    async fn update_chain(&self, chain: Chain) -> IndexerResult<()> {
        self.tables.write().await.chains.insert(chain.chain_id, chain);
        Ok(())
    }

    async fn update_events(&self, chain: Chain, events: &BlockEvents) -> IndexerResult<()> {
        let mut tables = self.tables.write().await;
        if Self::take_failure(&self.failing_event_writes) {
            return Err(IndexerError::Internal("injected event write failure".into()));
        }

        for wrapper in &events.wrappers {
            let status = tables
                .wrappers
                .get(&wrapper.hash)
                .map_or(wrapper.status, |existing| existing.status);
            tables.wrappers.insert(
                wrapper.hash.clone(),
                WrapperTransaction {
                    status,
                    ..wrapper.clone()
                },
            );
        }
        for src in &events.srcs {
            tables.srcs.insert((src.chain_id, src.hash.clone()), src.clone());
        }
        for poly in &events.polys {
            let mut poly = poly.clone();
            if let Some(existing) = tables.polys.get(&poly.hash) {
                if poly.src_hash.is_empty() {
                    poly.src_hash = existing.src_hash.clone();
                }
            }
            tables.polys.insert(poly.hash.clone(), poly);
        }
        for dst in &events.dsts {
            tables.dsts.insert((dst.chain_id, dst.hash.clone()), dst.clone());
        }
        tables.chains.insert(chain.chain_id, chain);

        self.event_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_chains(&self) -> IndexerResult<Vec<Chain>> {
        Ok(self.tables.read().await.chains.values().copied().collect())
    }

    async fn pending_poly_src_links(&self) -> IndexerResult<Vec<PolySrcLink>> {
        let tables = self.tables.read().await;
        Ok(tables
            .polys
            .values()
            .filter(|poly| !poly.is_src_resolved())
            .filter_map(|poly| {
                tables
                    .srcs
                    .values()
                    .find(|src| src.chain_id == poly.src_chain_id && src.key == poly.src_key)
                    .map(|src| PolySrcLink {
                        poly_hash: poly.hash.clone(),
                        src_hash: src.hash.clone(),
                    })
            })
            .collect())
    }

    async fn update_poly_src_hashes(&self, links: &[PolySrcLink]) -> IndexerResult<()> {
        let mut tables = self.tables.write().await;
        for link in links {
            if let Some(poly) = tables.polys.get_mut(&link.poly_hash) {
                poly.src_hash = link.src_hash.clone();
            }
        }
        Ok(())
    }

    async fn unfinished_wrappers_before(&self, time: u64) -> IndexerResult<Vec<WrapperTransaction>> {
        let tables = self.tables.read().await;
        let mut stale: Vec<_> = tables
            .wrappers
            .values()
            .filter(|w| w.status != TxStatus::Finished && w.time < time)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(stale)
    }

    async fn wrapper_leg_relations(&self) -> IndexerResult<Vec<WrapperLegs>> {
        let tables = self.tables.read().await;
        let mut relations: Vec<_> = tables
            .wrappers
            .values()
            .filter(|w| w.status != TxStatus::Finished)
            .map(|wrapper| {
                let poly_hash = tables
                    .polys
                    .values()
                    .find(|poly| poly.src_hash == wrapper.hash)
                    .map(|poly| poly.hash.clone());
                let dst_hash = poly_hash.as_ref().and_then(|poly_hash| {
                    tables
                        .dsts
                        .values()
                        .find(|dst| &dst.poly_hash == poly_hash)
                        .map(|dst| dst.hash.clone())
                });
                WrapperLegs {
                    wrapper: wrapper.clone(),
                    poly_hash,
                    dst_hash,
                }
            })
            .collect();
        relations.sort_by(|a, b| a.wrapper.hash.cmp(&b.wrapper.hash));
        Ok(relations)
    }

    async fn update_wrapper_statuses(&self, updates: &[(String, TxStatus)]) -> IndexerResult<()> {
        let mut tables = self.tables.write().await;
        if Self::take_failure(&self.failing_status_writes) {
            return Err(IndexerError::Internal("injected status write failure".into()));
        }
        for (hash, status) in updates {
            if let Some(wrapper) = tables.wrappers.get_mut(hash) {
                wrapper.status = *status;
            }
        }
        Ok(())
    }
}
