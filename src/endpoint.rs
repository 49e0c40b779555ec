//! Network boundary of the pipeline
//!
//! The pipeline only needs four logical operations from a chain endpoint. They
//! are expressed by [`ChainEndpoint`] so the pipeline can run against the
//! JSON-RPC [`crate::client::RpcClient`] or an in-memory endpoint in tests.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Fee parameters suggested by the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeSuggestion {
    /// Base fee of the latest block
    pub base_fee_per_gas: u128,
    /// Suggested priority fee (tip)
    pub max_priority_fee_per_gas: u128,
}

/// Execution outcome of an included transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    /// `true` if execution succeeded, `false` if it reverted
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Classified failure of an endpoint call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// The nonce has already been used by an included transaction
    #[error("nonce too low")]
    NonceTooLow,
    /// The fee bid is too low to be accepted or to replace a pending transaction
    #[error("transaction underpriced")]
    Underpriced,
    /// The sender cannot cover value plus gas
    #[error("insufficient funds")]
    InsufficientFunds,
    /// Deterministic rejection that retrying will not fix
    #[error("rejected: {0}")]
    Rejected(String),
    /// Transport failure, timeout or unusable response; safe to retry
    #[error("transient endpoint error: {0}")]
    Transient(String),
}

impl EndpointError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a node error message
    ///
    /// Matching is case-insensitive on the message text, which is what geth,
    /// reth and most hosted providers agree on.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("nonce too low") {
            Self::NonceTooLow
        } else if lower.contains("underpriced")
            || lower.contains("fee too low")
            || lower.contains("max fee per gas less than block base fee")
        {
            Self::Underpriced
        } else if lower.contains("insufficient funds") {
            Self::InsufficientFunds
        } else {
            Self::Rejected(message.to_string())
        }
    }

    /// Whether the node reports that this exact payload is already in its pool
    pub fn is_already_known(message: &str) -> bool {
        message.to_lowercase().contains("already known")
    }
}

/// Result type for endpoint calls
pub type EndpointResult<T> = std::result::Result<T, EndpointError>;

/// The four network operations the pipeline depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainEndpoint: Send + Sync {
    /// Pending nonce (transaction count including the mempool) of `address`.
    async fn pending_nonce(&self, address: Address) -> EndpointResult<u64>;

    /// Current fee suggestion.
    async fn suggested_fees(&self) -> EndpointResult<FeeSuggestion>;

    /// Broadcast a signed, EIP-2718 encoded transaction and return its hash.
    async fn send_raw_transaction(&self, raw: Bytes) -> EndpointResult<B256>;

    /// Receipt of a transaction, `None` while it is not included.
    async fn transaction_receipt(&self, hash: B256) -> EndpointResult<Option<TxReceipt>>;
}

#[async_trait]
impl<T: ChainEndpoint + ?Sized> ChainEndpoint for Arc<T> {
    async fn pending_nonce(&self, address: Address) -> EndpointResult<u64> {
        (**self).pending_nonce(address).await
    }

    async fn suggested_fees(&self) -> EndpointResult<FeeSuggestion> {
        (**self).suggested_fees().await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> EndpointResult<B256> {
        (**self).send_raw_transaction(raw).await
    }

    async fn transaction_receipt(&self, hash: B256) -> EndpointResult<Option<TxReceipt>> {
        (**self).transaction_receipt(hash).await
    }
}

/// Bounds every call of the wrapped endpoint by a timeout.
///
/// An elapsed call is reported as [`EndpointError::Transient`].
#[derive(Debug, Clone)]
pub struct TimeoutEndpoint<E> {
    inner: E,
    timeout: Duration,
}

impl<E> TimeoutEndpoint<E> {
    pub fn new(inner: E, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl std::future::Future<Output = EndpointResult<T>>,
    ) -> EndpointResult<T> {
        tokio::time::timeout(self.timeout, fut).await.unwrap_or_else(|_| {
            Err(EndpointError::Transient(format!(
                "{op} timed out after {:?}",
                self.timeout
            )))
        })
    }
}

#[async_trait]
impl<E: ChainEndpoint> ChainEndpoint for TimeoutEndpoint<E> {
    async fn pending_nonce(&self, address: Address) -> EndpointResult<u64> {
        self.bounded("pending_nonce", self.inner.pending_nonce(address)).await
    }

    async fn suggested_fees(&self) -> EndpointResult<FeeSuggestion> {
        self.bounded("suggested_fees", self.inner.suggested_fees()).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> EndpointResult<B256> {
        self.bounded("send_raw_transaction", self.inner.send_raw_transaction(raw))
            .await
    }

    async fn transaction_receipt(&self, hash: B256) -> EndpointResult<Option<TxReceipt>> {
        self.bounded("transaction_receipt", self.inner.transaction_receipt(hash))
            .await
    }
}
