//! Transaction building and signing
//!
//! Builds EIP-1559 transactions for payment records and signs them locally
//! with the [`Signer`]. Native payments are plain value transfers; token
//! payments call `transfer(address,uint256)` on the token contract.

use crate::config::GasConfig;
use crate::endpoint::TxReceipt;
use crate::error::{Error, Result};
use crate::fees::GasBid;
use crate::signer::Signer;
use crate::types::{FailureReason, PaymentRecord, Token, TransactionStatus};
use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Bytes, TxKind, B256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// A signed, network-ready transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// EIP-2718 encoded transaction
    pub raw: Bytes,
    /// Canonical transaction hash (keccak256 of `raw`)
    pub hash: B256,
}

/// Builds and signs payment transactions for one chain
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    chain_id: u64,
    native_gas_limit: u64,
    token_gas_limit: u64,
}

impl TransactionBuilder {
    pub fn new(chain_id: u64, native_gas_limit: u64, token_gas_limit: u64) -> Self {
        TransactionBuilder {
            chain_id,
            native_gas_limit,
            token_gas_limit,
        }
    }

    pub fn from_config(chain_id: u64, gas: &GasConfig) -> Self {
        Self::new(chain_id, gas.native_gas_limit, gas.token_gas_limit)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Build the unsigned transaction for a record
    ///
    /// # Arguments
    /// * `record` - The payment to make
    /// * `nonce` - Sender nonce bound to this payment
    /// * `bid` - Fee bid for this attempt
    pub fn build(&self, record: &PaymentRecord, nonce: u64, bid: &GasBid) -> Result<TxEip1559> {
        if self.chain_id == 0 {
            return Err(Error::Signing("chain id must be non-zero".to_string()));
        }
        if bid.max_priority_fee_per_gas > bid.max_fee_per_gas {
            return Err(Error::Signing(format!(
                "priority fee {} exceeds max fee {}",
                bid.max_priority_fee_per_gas, bid.max_fee_per_gas
            )));
        }
        if record.amount.is_zero() {
            return Err(Error::Signing("payment amount must be positive".to_string()));
        }

        let (to, value, input, gas_limit) = match record.token {
            Token::Native => (
                record.recipient,
                record.amount,
                Bytes::new(),
                self.native_gas_limit,
            ),
            Token::Erc20(contract) => {
                let call = IERC20::transferCall {
                    to: record.recipient,
                    amount: record.amount,
                };
                (contract, U256::ZERO, Bytes::from(call.abi_encode()), self.token_gas_limit)
            }
        };

        if gas_limit == 0 {
            return Err(Error::Signing("gas limit must be non-zero".to_string()));
        }

        Ok(TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas: bid.max_fee_per_gas,
            max_priority_fee_per_gas: bid.max_priority_fee_per_gas,
            to: TxKind::Call(to),
            value,
            access_list: Default::default(),
            input,
        })
    }

    /// Build and sign the transaction for a record
    ///
    /// Signing is local and deterministic: the same (record, nonce, bid)
    /// always yields the same payload and hash.
    pub fn build_and_sign(
        &self,
        record: &PaymentRecord,
        nonce: u64,
        bid: &GasBid,
        signer: &Signer,
    ) -> Result<SignedPayload> {
        let tx = self.build(record, nonce, bid)?;
        let signature = signer.sign_hash(&tx.signature_hash())?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));

        Ok(SignedPayload {
            raw: Bytes::from(envelope.encoded_2718()),
            hash: *envelope.tx_hash(),
        })
    }
}

/// A payment transaction in flight
///
/// Owned by the submission engine while in flight. Every re-priced payload
/// keeps the nonce the transaction was created with.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub record: PaymentRecord,
    nonce: u64,
    /// Bid of the first attempt; escalations are computed from it
    pub initial_bid: GasBid,
    /// Bid of the current payload
    pub bid: GasBid,
    /// Number of fee escalations applied so far
    pub escalations: u32,
    /// Current signed payload
    pub signed: SignedPayload,
    /// Hashes of every payload sent, oldest first
    pub sent_hashes: Vec<B256>,
    /// Number of sends performed
    pub attempts: u32,
    /// Consecutive transient failures of the current payload
    pub transient_failures: u32,
    /// Inclusion rounds that ended with a re-price
    pub reprice_rounds: u32,
    pub status: TransactionStatus,
    /// Receipt of whichever payload was included
    pub receipt: Option<TxReceipt>,
    pub failure: Option<FailureReason>,
    pub last_error: Option<String>,
}

impl PendingTransaction {
    /// Wrap a freshly signed payload in the `Built` state
    pub fn new(record: PaymentRecord, nonce: u64, bid: GasBid, signed: SignedPayload) -> Self {
        Self {
            record,
            nonce,
            initial_bid: bid,
            bid,
            escalations: 0,
            signed,
            sent_hashes: Vec::new(),
            attempts: 0,
            transient_failures: 0,
            reprice_rounds: 0,
            status: TransactionStatus::Built,
            receipt: None,
            failure: None,
            last_error: None,
        }
    }

    /// The nonce bound to this transaction
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Hash of the included payload if any, else of the current payload
    pub fn tx_hash(&self) -> B256 {
        self.receipt
            .map(|receipt| receipt.transaction_hash)
            .unwrap_or(self.signed.hash)
    }

    /// Replace the payload with one carrying a higher bid (same nonce)
    pub fn replace_payload(&mut self, bid: GasBid, signed: SignedPayload) {
        self.bid = bid;
        self.signed = signed;
        self.transient_failures = 0;
    }

    /// Move to `next`, ignoring illegal transitions
    pub fn transition(&mut self, next: TransactionStatus) {
        if self.status == next {
            return;
        }
        if self.status.can_transition_to(next) {
            self.status = next;
        } else {
            tracing::warn!(
                nonce = self.nonce,
                from = %self.status,
                to = %next,
                "ignoring illegal status transition"
            );
        }
    }

    /// Finish with a terminal status and reason
    pub fn finish(&mut self, status: TransactionStatus, reason: Option<FailureReason>) {
        self.transition(status);
        self.failure = reason;
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }
}
