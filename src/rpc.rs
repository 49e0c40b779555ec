//! JSON-RPC wire types for the Ethereum execution API

use alloy::primitives::{B256, U128, U64};
use serde::{Deserialize, Serialize};

/// RPC request structure
#[derive(Debug, Serialize)]
pub(crate) struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: serde_json::Value,
}

/// RPC response structure
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub(crate) struct RpcResponse<T> {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

/// RPC error structure
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// The fields of `eth_getBlockByNumber` the pipeline reads
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: U64,
    /// Absent on chains without EIP-1559
    #[serde(default)]
    pub base_fee_per_gas: Option<U128>,
}

/// The fields of `eth_getTransactionReceipt` the pipeline reads
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub transaction_hash: B256,
    pub block_number: U64,
    pub gas_used: U64,
    /// `0x1` on success, `0x0` on revert
    pub status: U64,
}
