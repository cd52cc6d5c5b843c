//! Chain client: a narrow async interface over Ethereum JSON-RPC.
//!
//! Each method maps to exactly one RPC call. Retries are the caller's
//! decision; see [`RpcError::is_transient`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::error::RpcError;
use super::rpc::{JsonRpcRequest, JsonRpcResponse};
use super::types::{
    BlockTag, Receipt, RpcReceipt, TxHash, TxParams, format_bytes, parse_bytes, parse_hash, parse_quantity,
    parse_quantity_u64,
};

/// Default per-request timeout for the HTTP transport.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Operations the registrar needs from a chain node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_chainId`
    async fn get_chain_id(&self) -> Result<u64, RpcError>;

    /// `eth_getTransactionCount` at `block`.
    async fn get_transaction_count(&self, address: Address, block: BlockTag)
    -> Result<u64, RpcError>;

    /// `eth_gasPrice`
    async fn gas_price(&self) -> Result<u128, RpcError>;

    /// `eth_estimateGas`
    async fn estimate_gas(&self, tx: &TxParams) -> Result<u64, RpcError>;

    /// `eth_sendRawTransaction`
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RpcError>;

    /// `eth_getTransactionReceipt`. `None` means not yet mined.
    async fn get_transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, RpcError>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, RpcError>;

    /// Gas estimate that never fails: any error yields `fallback`.
    async fn estimate_gas_or(&self, tx: &TxParams, fallback: u64) -> u64 {
        match self.estimate_gas(tx).await {
            Ok(gas) => gas,
            Err(e) => {
                warn!("Gas estimation failed: {}. Proceeding with default {}", e, fallback);
                fallback
            }
        }
    }
}

/// JSON-RPC over HTTP.
pub struct HttpChainClient {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpChainClient {
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::with_timeout(url, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one JSON-RPC call and deserialize its `result`.
    ///
    /// A `null` result is handed to `R` as-is, so `R = Option<T>` models
    /// "not found" answers.
    pub async fn request<R>(&self, method: &str, params: Value) -> Result<R, RpcError>
    where
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = JsonRpcRequest::new(id, method, params);
        debug!(method, id, "RPC request");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::from_status(status, &self.url));
        }

        let body: JsonRpcResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(RpcError::terminal(error.code, error.message));
        }
        if body.id != Value::from(id) {
            return Err(RpcError::malformed(format!(
                "response id {} does not match request id {id}",
                body.id
            )));
        }

        let result = body.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| RpcError::malformed(format!("unexpected result for {method}: {e}")))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn get_chain_id(&self) -> Result<u64, RpcError> {
        let result: String = self.request("eth_chainId", json!([])).await?;
        parse_quantity_u64(&result)
    }

    async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockTag,
    ) -> Result<u64, RpcError> {
        let result: String = self
            .request(
                "eth_getTransactionCount",
                json!([format!("{address:#x}"), block.as_str()]),
            )
            .await?;
        parse_quantity_u64(&result)
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        let result: String = self.request("eth_gasPrice", json!([])).await?;
        parse_quantity(&result)
    }

    async fn estimate_gas(&self, tx: &TxParams) -> Result<u64, RpcError> {
        let result: String = self.request("eth_estimateGas", json!([tx])).await?;
        parse_quantity_u64(&result)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RpcError> {
        let result: String = self
            .request("eth_sendRawTransaction", json!([format_bytes(raw)]))
            .await?;
        parse_hash(&result)
    }

    async fn get_transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, RpcError> {
        let result: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", json!([format!("{tx_hash:#x}")]))
            .await?;
        result.map(Receipt::try_from).transpose()
    }

    async fn call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let params = TxParams::call(None, to, data);
        let result: String = self.request("eth_call", json!([params, "latest"])).await?;
        parse_bytes(&result)
    }
}
