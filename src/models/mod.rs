//! Bridge transaction records
//!
//! One bridge request is split over three legs: the lock on the source chain,
//! the relay confirmation on poly and the unlock on the destination chain.
//! `WrapperTransaction` is the user facing aggregate whose status is derived
//! from the presence of the other legs.

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-chain ingestion checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: u64,
    /// Last block fully ingested and persisted
    pub height: u64,
}

impl Chain {
    pub fn new(chain_id: u64, height: u64) -> Self {
        Self { chain_id, height }
    }
}

/// Lifecycle status of a wrapper transaction
///
/// Codes are the ones stored by the bridge database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    Finished,
    SourceDone,
    SourceConfirmed,
    PolyConfirmed,
}

impl TxStatus {
    pub fn code(self) -> i32 {
        match self {
            TxStatus::Finished => 0,
            TxStatus::SourceDone => 2,
            TxStatus::SourceConfirmed => 3,
            TxStatus::PolyConfirmed => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(TxStatus::Finished),
            2 => Some(TxStatus::SourceDone),
            3 => Some(TxStatus::SourceConfirmed),
            4 => Some(TxStatus::PolyConfirmed),
            _ => None,
        }
    }

    /// Coarse progress of the transfer; statuses only ever move to a later phase
    pub fn phase(self) -> u8 {
        match self {
            TxStatus::SourceConfirmed | TxStatus::SourceDone => 0,
            TxStatus::PolyConfirmed => 1,
            TxStatus::Finished => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Finished => "finished",
            TxStatus::SourceDone => "source_done",
            TxStatus::SourceConfirmed => "source_confirmed",
            TxStatus::PolyConfirmed => "poly_confirmed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asset movement carried by a lock or unlock leg
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub asset: String,
    pub amount: U256,
    pub from: String,
    pub to: String,
    /// Asset on the counter chain (destination for locks)
    pub counter_asset: String,
    /// User on the counter chain (destination for locks)
    pub counter_user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperTransaction {
    /// Source transaction hash
    pub hash: String,
    pub user: String,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub fee_token: String,
    pub fee_amount: U256,
    pub block_height: u64,
    pub time: u64,
    pub status: TxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcTransaction {
    pub chain_id: u64,
    pub hash: String,
    pub height: u64,
    pub time: u64,
    pub user: String,
    pub contract: String,
    pub dst_chain_id: u64,
    /// Cross-chain key used to correlate with the relay leg
    pub key: String,
    pub param: String,
    pub fee: U256,
    pub state: u64,
    pub transfer: Option<Transfer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolyTransaction {
    pub hash: String,
    pub chain_id: u64,
    pub height: u64,
    pub time: u64,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    /// Key reported by the relay chain, matches `SrcTransaction::key`
    pub src_key: String,
    /// Empty until resolved from `src_key`
    pub src_hash: String,
    pub fee: U256,
    pub state: u64,
}

impl PolyTransaction {
    pub fn is_src_resolved(&self) -> bool {
        !self.src_hash.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DstTransaction {
    pub chain_id: u64,
    pub hash: String,
    pub poly_hash: String,
    pub src_chain_id: u64,
    pub height: u64,
    pub time: u64,
    pub contract: String,
    pub fee: U256,
    pub state: u64,
    pub transfer: Option<Transfer>,
}

/// Everything extracted from one block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockEvents {
    pub wrappers: Vec<WrapperTransaction>,
    pub srcs: Vec<SrcTransaction>,
    pub polys: Vec<PolyTransaction>,
    pub dsts: Vec<DstTransaction>,
    /// Raw number of lock events observed, including unrelated contracts
    pub lock_count: usize,
    /// Raw number of unlock events observed
    pub unlock_count: usize,
}

impl BlockEvents {
    /// True when every observed lock and unlock produced a record
    pub fn is_complete(&self) -> bool {
        self.srcs.len() == self.lock_count && self.dsts.len() == self.unlock_count
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty() && self.srcs.is_empty() && self.polys.is_empty() && self.dsts.is_empty()
    }
}

/// A relay leg whose source hash can be resolved through its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolySrcLink {
    pub poly_hash: String,
    pub src_hash: String,
}

/// Left join of a wrapper transaction with its relay and destination legs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperLegs {
    pub wrapper: WrapperTransaction,
    pub poly_hash: Option<String>,
    pub dst_hash: Option<String>,
}

/// Reverse a hex string byte-wise, the poly hash display convention
pub fn hex_reverse(input: &str) -> String {
    let trimmed = input.trim_start_matches("0x");
    match hex::decode(trimmed) {
        Ok(mut bytes) => {
            bytes.reverse();
            hex::encode(bytes)
        }
        Err(_) => trimmed.to_string(),
    }
}
