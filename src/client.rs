//! JSON-RPC client for an EVM execution node
use crate::config::ChainConfig;
use crate::endpoint::{ChainEndpoint, EndpointError, EndpointResult, FeeSuggestion, TxReceipt};
use crate::error::{Error, Result};
use crate::rpc::{BlockHeader, ReceiptResponse, RpcRequest, RpcResponse};
use alloy::primitives::{keccak256, Address, Bytes, B256, U128, U64};
use async_trait::async_trait;
use rand::random;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// RPC client for an Ethereum JSON-RPC endpoint.
///
/// Only the calls the payment pipeline needs are exposed; everything else is
/// reachable through [`RpcClient::call`].
pub struct RpcClient {
    endpoint: String,
    http: reqwest::Client,
    auth: Option<String>,
}

impl RpcClient {
    /// Create a new RPC client without authentication.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
            auth: None,
        }
    }

    /// Create a new RPC client with HTTP basic authentication.
    pub fn with_auth(endpoint: impl Into<String>, username: String, password: String) -> Self {
        use base64::Engine;
        let mut client = Self::new(endpoint);
        let credentials = format!("{}:{}", username, password);
        client.auth = Some(base64::engine::general_purpose::STANDARD.encode(credentials));
        client
    }

    /// Create a client for the configured chain endpoint.
    pub fn from_config(chain: &ChainConfig) -> Self {
        match (&chain.rpc_user, &chain.rpc_password) {
            (Some(user), Some(password)) => {
                Self::with_auth(chain.rpc_url.clone(), user.clone(), password.clone())
            }
            _ => Self::new(chain.rpc_url.clone()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Call a JSON-RPC method whose result may be `null`.
    pub async fn call_optional<T, P>(&self, method: &str, params: P) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let params = serde_json::to_value(params)?;
        let request = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: random::<u32>() as u64,
            method: method.to_string(),
            params,
        };
        debug!(method, id = request.id, "rpc call");

        let mut req = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .header("Content-Type", "application/json");

        if let Some(ref auth) = self.auth {
            req = req.header("Authorization", format!("Basic {}", auth));
        }

        let response = req.send().await?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "RPC request failed with status: {}",
                response.status()
            )));
        }

        let rpc_response: RpcResponse<T> = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(Error::Rpc(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        Ok(rpc_response.result)
    }

    /// Call a JSON-RPC method and deserialize the result into the requested type.
    pub async fn call<T, P>(&self, method: &str, params: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| Error::Transport(format!("{method} response missing result")))
    }

    /// Chain id reported by the node (`eth_chainId`).
    pub async fn chain_id(&self) -> Result<u64> {
        let id: U64 = self.call("eth_chainId", serde_json::json!([])).await?;
        Ok(id.to::<u64>())
    }

    /// Transaction count of `address` including the mempool.
    pub async fn get_transaction_count(&self, address: Address) -> Result<u64> {
        let count: U64 = self
            .call("eth_getTransactionCount", serde_json::json!([address, "pending"]))
            .await?;
        Ok(count.to::<u64>())
    }

    /// Header fields of the latest block.
    pub async fn latest_block(&self) -> Result<BlockHeader> {
        self.call("eth_getBlockByNumber", serde_json::json!(["latest", false]))
            .await
    }

    /// Suggested priority fee per gas.
    pub async fn max_priority_fee_per_gas(&self) -> Result<u128> {
        let fee: U128 = self
            .call("eth_maxPriorityFeePerGas", serde_json::json!([]))
            .await?;
        Ok(fee.to::<u128>())
    }

    /// Broadcast an EIP-2718 encoded transaction.
    pub async fn broadcast_raw_transaction(&self, raw: &Bytes) -> Result<B256> {
        let raw = format!("0x{}", hex::encode(raw));
        self.call("eth_sendRawTransaction", serde_json::json!([raw]))
            .await
    }

    /// Receipt of a transaction, `None` while pending or unknown.
    pub async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptResponse>> {
        self.call_optional("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoint", &self.endpoint)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Map a client error onto the pipeline's error classes
fn classify(err: Error) -> EndpointError {
    match err {
        Error::Rpc(message) => EndpointError::classify(&message),
        other => EndpointError::Transient(other.to_string()),
    }
}

#[async_trait]
impl ChainEndpoint for RpcClient {
    async fn pending_nonce(&self, address: Address) -> EndpointResult<u64> {
        self.get_transaction_count(address).await.map_err(classify)
    }

    async fn suggested_fees(&self) -> EndpointResult<FeeSuggestion> {
        let block = self.latest_block().await.map_err(classify)?;
        let base_fee = block.base_fee_per_gas.ok_or_else(|| {
            EndpointError::Rejected("latest block has no base fee; EIP-1559 unsupported".to_string())
        })?;
        let tip = self.max_priority_fee_per_gas().await.map_err(classify)?;
        Ok(FeeSuggestion {
            base_fee_per_gas: base_fee.to::<u128>(),
            max_priority_fee_per_gas: tip,
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> EndpointResult<B256> {
        match self.broadcast_raw_transaction(&raw).await {
            Ok(hash) => Ok(hash),
            Err(Error::Rpc(message)) if EndpointError::is_already_known(&message) => {
                debug!("payload already known to the node");
                Ok(keccak256(&raw))
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn transaction_receipt(&self, hash: B256) -> EndpointResult<Option<TxReceipt>> {
        let receipt = self.get_transaction_receipt(hash).await.map_err(classify)?;
        Ok(receipt.map(|receipt| TxReceipt {
            transaction_hash: receipt.transaction_hash,
            success: receipt.status == U64::from(1),
            block_number: receipt.block_number.to::<u64>(),
            gas_used: receipt.gas_used.to::<u64>(),
        }))
    }
}
