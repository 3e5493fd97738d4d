//! Adapter for EVM-compatible chains running the poly bridge contracts

use crate::config::ChainListenConfig;
use crate::error::{IndexerError, IndexerResult};
use crate::events::{BridgeLog, EventParser};
use crate::models::{
    hex_reverse, BlockEvents, DstTransaction, SrcTransaction, Transfer, TxStatus,
    WrapperTransaction,
};

use super::adapter::ChainAdapter;
use super::provider::ChainProvider;

use async_trait::async_trait;
use ethers::prelude::*;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Listens to the wrapper, CCM and proxy contracts of one EVM chain
pub struct EvmChainAdapter {
    config: ChainListenConfig,
    provider: ChainProvider,
    parser: EventParser,
    wrappers: Vec<Address>,
    ccm: Address,
    proxies: Vec<Address>,
}

impl EvmChainAdapter {
    pub async fn new(config: ChainListenConfig) -> IndexerResult<Self> {
        let provider = ChainProvider::new(&config)?;
        let wrappers = parse_addresses(&config.wrapper_contracts)?;
        let ccm = parse_address(&config.ccm_contract)?;
        let proxies = parse_addresses(&config.proxy_contracts)?;

        info!(
            "EVM adapter for chain {} (ID: {}): {} wrapper(s), {} proxy(ies)",
            config.name,
            config.chain_id,
            wrappers.len(),
            proxies.len()
        );

        Ok(Self {
            parser: EventParser::new(config.chain_id),
            config,
            provider,
            wrappers,
            ccm,
            proxies,
        })
    }

    fn watched_addresses(&self) -> Vec<Address> {
        let mut addresses = self.wrappers.clone();
        addresses.push(self.ccm);
        addresses.extend(self.proxies.iter().copied());
        addresses
    }

    /// Fill fee and execution state from the receipts of the block's bridge transactions
    async fn apply_receipts(&self, events: &mut BlockEvents) -> IndexerResult<()> {
        let hashes: HashSet<String> = events
            .srcs
            .iter()
            .map(|tx| tx.hash.clone())
            .chain(events.dsts.iter().map(|tx| tx.hash.clone()))
            .collect();

        let mut receipts = HashMap::new();
        for hash in hashes {
            let tx_hash = H256::from_str(&hash).map_err(|e| IndexerError::Decode {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            })?;
            if let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? {
                let fee = receipt
                    .gas_used
                    .unwrap_or_default()
                    .saturating_mul(receipt.effective_gas_price.unwrap_or_default());
                let state = receipt.status.map(|s| s.as_u64()).unwrap_or(1);
                receipts.insert(hash, (fee, state));
            }
        }

        for tx in &mut events.srcs {
            if let Some((fee, state)) = receipts.get(&tx.hash) {
                tx.fee = *fee;
                tx.state = *state;
            }
        }
        for tx in &mut events.dsts {
            if let Some((fee, state)) = receipts.get(&tx.hash) {
                tx.fee = *fee;
                tx.state = *state;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for EvmChainAdapter {
    async fn latest_height(&self) -> IndexerResult<u64> {
        self.provider.get_block_number().await
    }

    async fn extended_latest_height(&self) -> IndexerResult<u64> {
        self.provider.get_extended_block_number().await
    }

    async fn handle_new_block(&self, height: u64) -> IndexerResult<BlockEvents> {
        let block = self
            .provider
            .get_block(height)
            .await?
            .ok_or_else(|| IndexerError::node(self.config.chain_id, format!("block {} not found", height)))?;
        let time = block.timestamp.as_u64();

        let filter = Filter::new()
            .address(self.watched_addresses())
            .topic0(ValueOrArray::Array(
                EventParser::topics().into_iter().map(Some).collect::<Vec<_>>(),
            ))
            .from_block(height)
            .to_block(height);
        let logs = self.provider.get_logs(&filter).await?;

        let mut decoded = Vec::with_capacity(logs.len());
        for log in &logs {
            if let Some(event) = self.parser.parse_log(log)? {
                let tx_hash = log.transaction_hash.ok_or_else(|| IndexerError::Decode {
                    chain_id: self.config.chain_id,
                    message: format!("{} log without transaction hash", event.name()),
                })?;
                decoded.push(ObservedLog {
                    address: log.address,
                    tx_hash,
                    event,
                });
            }
        }

        let mut events = self.assemble(height, time, decoded);
        self.apply_receipts(&mut events).await?;

        debug!(
            "Chain {} block {}: {} wrapper, {}/{} lock, {}/{} unlock",
            self.config.chain_id,
            height,
            events.wrappers.len(),
            events.srcs.len(),
            events.lock_count,
            events.dsts.len(),
            events.unlock_count
        );
        Ok(events)
    }

    fn listen_slot(&self) -> Duration {
        self.config.listen_slot()
    }

    fn confirmation_defer(&self) -> u64 {
        self.config.defer
    }

    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    fn chain_name(&self) -> String {
        self.config.name.clone()
    }
}

/// A decoded log with the fields of its envelope the adapter needs
struct ObservedLog {
    address: Address,
    tx_hash: H256,
    event: BridgeLog,
}

impl EvmChainAdapter {
    /// Turn the decoded logs of one block into bridge records
    fn assemble(&self, height: u64, time: u64, logs: Vec<ObservedLog>) -> BlockEvents {
        let chain_id = self.config.chain_id;
        let mut events = BlockEvents::default();

        let mut lock_transfers: HashMap<H256, Transfer> = HashMap::new();
        let mut unlock_transfers: HashMap<H256, Transfer> = HashMap::new();
        for log in &logs {
            if !self.proxies.contains(&log.address) {
                continue;
            }
            match &log.event {
                BridgeLog::ProxyLock(lock) => {
                    lock_transfers.entry(log.tx_hash).or_insert_with(|| Transfer {
                        asset: encode_address(&lock.from_asset_hash),
                        amount: lock.amount,
                        from: encode_address(&lock.from_address),
                        to: encode_address(&log.address),
                        counter_asset: hex::encode(&lock.to_asset_hash),
                        counter_user: hex::encode(&lock.to_address),
                    });
                }
                BridgeLog::ProxyUnlock(unlock) => {
                    unlock_transfers.entry(log.tx_hash).or_insert_with(|| Transfer {
                        asset: encode_address(&unlock.to_asset_hash),
                        amount: unlock.amount,
                        from: encode_address(&log.address),
                        to: encode_address(&unlock.to_address),
                        ..Default::default()
                    });
                }
                _ => {}
            }
        }

        for log in logs {
            let hash = hex::encode(log.tx_hash.as_bytes());
            match log.event {
                BridgeLog::WrapperLock(lock) if self.wrappers.contains(&log.address) => {
                    events.wrappers.push(WrapperTransaction {
                        hash,
                        user: encode_address(&lock.sender),
                        src_chain_id: chain_id,
                        dst_chain_id: lock.to_chain_id,
                        fee_token: encode_address(&lock.from_asset),
                        fee_amount: lock.fee,
                        block_height: height,
                        time,
                        status: TxStatus::SourceDone,
                    });
                }
                BridgeLog::CrossChain(lock) if log.address == self.ccm => {
                    events.lock_count += 1;
                    if !self.proxies.is_empty() && !self.proxies.contains(&lock.proxy_or_asset_contract) {
                        debug!(
                            "Chain {} tx {} locks through foreign contract {:?}",
                            chain_id, hash, lock.proxy_or_asset_contract
                        );
                        continue;
                    }
                    events.srcs.push(SrcTransaction {
                        chain_id,
                        hash,
                        height,
                        time,
                        user: encode_address(&lock.sender),
                        contract: encode_address(&lock.proxy_or_asset_contract),
                        dst_chain_id: lock.to_chain_id,
                        key: hex::encode(&lock.tx_id),
                        param: hex::encode(&lock.rawdata),
                        fee: U256::zero(),
                        state: 1,
                        transfer: lock_transfers.get(&log.tx_hash).cloned(),
                    });
                }
                BridgeLog::VerifyAndExecute(unlock) if log.address == self.ccm => {
                    events.unlock_count += 1;
                    events.dsts.push(DstTransaction {
                        chain_id,
                        hash,
                        poly_hash: hex_reverse(&hex::encode(&unlock.cross_chain_tx_hash)),
                        src_chain_id: unlock.from_chain_id,
                        height,
                        time,
                        contract: hex::encode(&unlock.to_contract),
                        fee: U256::zero(),
                        state: 1,
                        transfer: unlock_transfers.get(&log.tx_hash).cloned(),
                    });
                }
                _ => {}
            }
        }

        events
    }
}

fn encode_address(address: &Address) -> String {
    hex::encode(address.as_bytes())
}

fn parse_address(raw: &str) -> IndexerResult<Address> {
    Address::from_str(raw)
        .map_err(|e| IndexerError::Config(format!("Invalid contract address {}: {}", raw, e)))
}

fn parse_addresses(raw: &[String]) -> IndexerResult<Vec<Address>> {
    raw.iter().map(|a| parse_address(a)).collect()
}
