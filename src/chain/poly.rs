//! Adapter for the poly relay chain
//!
//! Poly exposes a JSON-RPC interface that ethers cannot speak (errors are
//! reported as integer codes next to the result), so the adapter carries its
//! own small client.

use crate::config::ChainListenConfig;
use crate::error::{IndexerError, IndexerResult};
use crate::models::{BlockEvents, PolyTransaction};

use super::adapter::ChainAdapter;

use async_trait::async_trait;
use ethers::types::U256;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Cross chain manager native contract on poly
pub const CROSS_CHAIN_MANAGER: &str = "0300000000000000000000000000000000000000";

const MAKE_PROOF: &str = "makeProof";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    desc: String,
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockHeader {
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolyBlock {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SmartContractEvent {
    tx_hash: String,
    state: u64,
    #[serde(default)]
    gas_consumed: u64,
    #[serde(default)]
    notify: Vec<NotifyEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NotifyEvent {
    contract_address: String,
    states: Value,
}

/// JSON-RPC client over a list of poly nodes with failover
struct PolyRpcClient {
    chain_id: u64,
    http_client: reqwest::Client,
    urls: Vec<String>,
    current: AtomicUsize,
    request_id: AtomicU64,
}

impl PolyRpcClient {
    fn new(chain_id: u64, http_client: reqwest::Client, urls: Vec<String>) -> Self {
        Self {
            chain_id,
            http_client,
            urls,
            current: AtomicUsize::new(0),
            request_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> IndexerResult<Value> {
        let mut last_err = IndexerError::node(self.chain_id, "no poly nodes configured");
        for _ in 0..self.urls.len() {
            let idx = self.current.load(Ordering::Relaxed) % self.urls.len();
            match self.call_node(&self.urls[idx], method, &params).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Poly node {} failed on {}: {}", self.urls[idx], method, e);
                    self.current.store(idx + 1, Ordering::Relaxed);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn call_node(&self, url: &str, method: &str, params: &[Value]) -> IndexerResult<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
        });

        let response: RpcResponse = self
            .http_client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexerError::node(self.chain_id, e))?
            .json()
            .await
            .map_err(|e| IndexerError::node(self.chain_id, e))?;

        if response.error != 0 {
            return Err(IndexerError::node(
                self.chain_id,
                format!("{} failed: {} ({})", method, response.desc, response.error),
            ));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn block_height(&self) -> IndexerResult<u64> {
        let count = self
            .call("getblockcount", vec![])
            .await?
            .as_u64()
            .ok_or_else(|| IndexerError::node(self.chain_id, "getblockcount returned no number"))?;
        Ok(count.saturating_sub(1))
    }
}

/// Listens to `makeProof` notifications of the poly cross chain manager
pub struct PolyChainAdapter {
    config: ChainListenConfig,
    client: PolyRpcClient,
    extend_clients: Vec<PolyRpcClient>,
}

impl PolyChainAdapter {
    pub fn new(config: ChainListenConfig) -> IndexerResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IndexerError::Config(format!("http client: {}", e)))?;

        let client = PolyRpcClient::new(config.chain_id, http_client.clone(), config.nodes.clone());
        let extend_clients = config
            .extend_nodes
            .iter()
            .map(|url| PolyRpcClient::new(config.chain_id, http_client.clone(), vec![url.clone()]))
            .collect();

        Ok(Self {
            config,
            client,
            extend_clients,
        })
    }

    fn decode_err(&self, message: impl ToString) -> IndexerError {
        IndexerError::Decode {
            chain_id: self.config.chain_id,
            message: message.to_string(),
        }
    }

    /// Relay legs found in the smart contract events of one block
    fn parse_events(&self, height: u64, time: u64, raw: Value) -> IndexerResult<Vec<PolyTransaction>> {
        if raw.is_null() {
            return Ok(Vec::new());
        }
        let events: Vec<SmartContractEvent> =
            serde_json::from_value(raw).map_err(|e| self.decode_err(e))?;

        let mut polys = Vec::new();
        for event in events {
            for notify in &event.notify {
                if notify.contract_address != CROSS_CHAIN_MANAGER {
                    continue;
                }
                let Some(states) = notify.states.as_array() else {
                    continue;
                };
                if states.first().and_then(Value::as_str) != Some(MAKE_PROOF) {
                    continue;
                }
                let src_chain_id = states.get(1).and_then(Value::as_u64);
                let dst_chain_id = states.get(2).and_then(Value::as_u64);
                let src_key = states.get(3).and_then(Value::as_str);
                let (Some(src_chain_id), Some(dst_chain_id), Some(src_key)) =
                    (src_chain_id, dst_chain_id, src_key)
                else {
                    return Err(self.decode_err(format!("malformed makeProof in {}", event.tx_hash)));
                };

                debug!("Poly tx {} relays {} -> {}", event.tx_hash, src_chain_id, dst_chain_id);
                polys.push(PolyTransaction {
                    hash: event.tx_hash.clone(),
                    chain_id: self.config.chain_id,
                    height,
                    time,
                    src_chain_id,
                    dst_chain_id,
                    src_key: src_key.to_string(),
                    src_hash: String::new(),
                    fee: U256::from(event.gas_consumed),
                    state: event.state,
                });
            }
        }
        Ok(polys)
    }
}

#[async_trait]
impl ChainAdapter for PolyChainAdapter {
    async fn latest_height(&self) -> IndexerResult<u64> {
        self.client.block_height().await
    }

    async fn extended_latest_height(&self) -> IndexerResult<u64> {
        let mut best: Option<u64> = None;
        for client in &self.extend_clients {
            match client.block_height().await {
                Ok(height) => best = Some(best.map_or(height, |b| b.max(height))),
                Err(e) => debug!("Extended poly node failed: {}", e),
            }
        }
        match best {
            Some(height) => Ok(height),
            None => self.latest_height().await,
        }
    }

    async fn handle_new_block(&self, height: u64) -> IndexerResult<BlockEvents> {
        let block = self.client.call("getblock", vec![json!(height), json!(1)]).await?;
        let block: PolyBlock = serde_json::from_value(block).map_err(|e| self.decode_err(e))?;

        let raw = self.client.call("getsmartcodeevent", vec![json!(height)]).await?;
        let polys = self.parse_events(height, block.header.timestamp, raw)?;

        Ok(BlockEvents {
            polys,
            ..Default::default()
        })
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
