//! Contract event types and parsing
//!
//! Defines the events emitted by the bridge contracts deployed on every
//! EVM-compatible chain: the poly wrapper, the cross chain manager (CCM) and
//! the lock proxies.

use crate::error::{IndexerError, IndexerResult};

use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::prelude::*;

/// Emitted by the wrapper contract when a user starts a bridge request
#[derive(Debug, Clone, PartialEq, EthEvent)]
#[ethevent(name = "PolyWrapperLock")]
pub struct PolyWrapperLock {
    #[ethevent(indexed)]
    pub from_asset: Address,
    #[ethevent(indexed)]
    pub sender: Address,
    pub to_chain_id: u64,
    pub to_address: Bytes,
    pub net: U256,
    pub fee: U256,
    pub id: U256,
}

/// Emitted by the CCM for every outbound cross chain message
#[derive(Debug, Clone, PartialEq, EthEvent)]
#[ethevent(name = "CrossChainEvent")]
pub struct CrossChainEvent {
    #[ethevent(indexed)]
    pub sender: Address,
    pub tx_id: Bytes,
    pub proxy_or_asset_contract: Address,
    pub to_chain_id: u64,
    pub to_contract: Bytes,
    pub rawdata: Bytes,
}

/// Emitted by the CCM when an inbound message is verified and executed
#[derive(Debug, Clone, PartialEq, EthEvent)]
#[ethevent(name = "VerifyHeaderAndExecuteTxEvent")]
pub struct VerifyHeaderAndExecuteTxEvent {
    pub from_chain_id: u64,
    pub to_contract: Bytes,
    pub cross_chain_tx_hash: Bytes,
    pub from_chain_tx_hash: Bytes,
}

/// Emitted by a lock proxy when assets are locked
#[derive(Debug, Clone, PartialEq, EthEvent)]
#[ethevent(name = "LockEvent")]
pub struct ProxyLockEvent {
    pub from_asset_hash: Address,
    pub from_address: Address,
    pub to_chain_id: u64,
    pub to_asset_hash: Bytes,
    pub to_address: Bytes,
    pub amount: U256,
}

/// Emitted by a lock proxy when assets are released
#[derive(Debug, Clone, PartialEq, EthEvent)]
#[ethevent(name = "UnlockEvent")]
pub struct ProxyUnlockEvent {
    pub to_asset_hash: Address,
    pub to_address: Address,
    pub amount: U256,
}

/// A decoded bridge log together with the transaction that emitted it
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeLog {
    WrapperLock(PolyWrapperLock),
    CrossChain(CrossChainEvent),
    VerifyAndExecute(VerifyHeaderAndExecuteTxEvent),
    ProxyLock(ProxyLockEvent),
    ProxyUnlock(ProxyUnlockEvent),
}

impl BridgeLog {
    /// Get event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            BridgeLog::WrapperLock(_) => "poly_wrapper_lock",
            BridgeLog::CrossChain(_) => "cross_chain",
            BridgeLog::VerifyAndExecute(_) => "verify_and_execute",
            BridgeLog::ProxyLock(_) => "proxy_lock",
            BridgeLog::ProxyUnlock(_) => "proxy_unlock",
        }
    }
}

/// Event parser for the bridge contracts of one chain
pub struct EventParser {
    chain_id: u64,
}

impl EventParser {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    /// Topics of every event the parser understands, for log filters
    pub fn topics() -> Vec<H256> {
        vec![
            PolyWrapperLock::signature(),
            CrossChainEvent::signature(),
            VerifyHeaderAndExecuteTxEvent::signature(),
            ProxyLockEvent::signature(),
            ProxyUnlockEvent::signature(),
        ]
    }

    /// Parse a log entry; `Ok(None)` for events the bridge does not care about
    pub fn parse_log(&self, log: &Log) -> IndexerResult<Option<BridgeLog>> {
        let Some(topic) = log.topics.first().copied() else {
            return Ok(None);
        };
        let raw = RawLog::from(log.clone());

        let event = if topic == PolyWrapperLock::signature() {
            BridgeLog::WrapperLock(self.decode(&raw)?)
        } else if topic == CrossChainEvent::signature() {
            BridgeLog::CrossChain(self.decode(&raw)?)
        } else if topic == VerifyHeaderAndExecuteTxEvent::signature() {
            BridgeLog::VerifyAndExecute(self.decode(&raw)?)
        } else if topic == ProxyLockEvent::signature() {
            BridgeLog::ProxyLock(self.decode(&raw)?)
        } else if topic == ProxyUnlockEvent::signature() {
            BridgeLog::ProxyUnlock(self.decode(&raw)?)
        } else {
            return Ok(None);
        };

        Ok(Some(event))
    }

    fn decode<E: EthEvent>(&self, raw: &RawLog) -> IndexerResult<E> {
        E::decode_log(raw).map_err(|e| IndexerError::Decode {
            chain_id: self.chain_id,
            message: format!("{}: {}", E::name(), e),
        })
    }
}
