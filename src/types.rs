//! Common types and data structures for the batch payment pipeline

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw, untyped batch entry as delivered by a batch-file reader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPaymentRow {
    /// Recipient address (EIP-55 checksummed)
    pub recipient: String,
    /// Amount in the token's smallest unit
    pub amount: String,
    /// Token symbol or token contract address
    pub token: String,
    /// External reference id, carried through to the result
    #[serde(default)]
    pub reference: String,
}

/// Asset a payment is made in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    /// The chain's native currency
    Native,
    /// An ERC-20 token at the given contract address
    Erc20(Address),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Native => f.write_str("native"),
            Token::Erc20(address) => write!(f, "{address}"),
        }
    }
}

/// A validated payment instruction. Immutable once built by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Zero-based position of the row in the input batch
    pub row: usize,
    pub recipient: Address,
    /// Amount in the token's smallest unit, always > 0
    pub amount: U256,
    pub token: Token,
    pub reference: String,
}

/// Lifecycle status of a payment transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Built,
    Submitted,
    Pending,
    Confirmed,
    Failed,
    TimedOut,
}

impl TransactionStatus {
    /// Whether the status is final.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Progress is forward-only, except that a pending transaction may go back to
    /// `Submitted` when it is resubmitted with a new bid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Built, Submitted | Failed | TimedOut) => true,
            (Submitted, Pending | Failed | TimedOut) => true,
            (Pending, Submitted | Confirmed | Failed | TimedOut) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record ended in `Failed` or `TimedOut`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The input row did not pass validation
    MalformedRecord(String),
    InsufficientFunds,
    ExecutionReverted,
    GasCapExceeded,
    /// The nonce bound to this transaction had already been used on chain
    NonceTooLow,
    /// The node rejected the transaction for a reason that will not change on retry
    Rejected(String),
    /// Building or signing a payload failed; indicates a programming error
    SigningFailed(String),
    /// The batch was aborted before this record was submitted
    BatchAborted,
    /// Transient endpoint errors persisted through every submission attempt
    SubmissionTimedOut,
    /// No inclusion after every re-price round
    InclusionTimedOut,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRecord(reason) => write!(f, "malformed record: {reason}"),
            Self::InsufficientFunds => f.write_str("insufficient funds"),
            Self::ExecutionReverted => f.write_str("execution reverted"),
            Self::GasCapExceeded => f.write_str("gas cap exceeded"),
            Self::NonceTooLow => f.write_str("nonce too low"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::SigningFailed(reason) => write!(f, "signing failed: {reason}"),
            Self::BatchAborted => f.write_str("batch aborted"),
            Self::SubmissionTimedOut => f.write_str("submission timed out"),
            Self::InclusionTimedOut => f.write_str("inclusion timed out"),
        }
    }
}

/// Why a batch stopped issuing new transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The network reported a nonce we issued as already used
    NonceTooLow { nonce: u64 },
    /// The caller cancelled the batch
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonceTooLow { nonce } => write!(f, "nonce {nonce} already used on chain"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome for a single input row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub row: usize,
    pub reference: String,
    /// The validated record; `None` when the row was malformed
    pub record: Option<PaymentRecord>,
    pub status: TransactionStatus,
    /// Hash of the last payload sent (or the one that was included)
    pub tx_hash: Option<B256>,
    pub nonce: Option<u64>,
    /// Number of payloads sent to the network for this record
    pub attempts: u32,
    pub error: Option<FailureReason>,
}

impl BatchEntry {
    /// Entry for a row that never reached the network.
    pub fn unsent(
        row: usize,
        reference: String,
        record: Option<PaymentRecord>,
        status: TransactionStatus,
        reason: FailureReason,
    ) -> Self {
        Self {
            row,
            reference,
            record,
            status,
            tx_hash: None,
            nonce: None,
            attempts: 0,
            error: Some(reason),
        }
    }
}

/// The external-facing result of a batch: one entry per input row, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
    /// Set when the batch stopped issuing new transactions early
    pub aborted: Option<AbortReason>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that did not end `Confirmed`; the input for a follow-up batch.
    pub fn unconfirmed(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.status != TransactionStatus::Confirmed)
    }
}

/// Utility functions for token amounts
pub mod utils {
    use crate::error::{Error, Result};
    use alloy::primitives::U256;

    /// Format a base-unit amount as a decimal string
    ///
    /// # Arguments
    /// * `amount` - Amount in the token's smallest unit
    /// * `decimals` - Number of decimals of the token
    ///
    /// # Returns
    /// Decimal string without trailing zeros (e.g., "12.5")
    pub fn format_units(amount: U256, decimals: u8) -> String {
        if decimals == 0 {
            return amount.to_string();
        }
        let digits = amount.to_string();
        let decimals = decimals as usize;
        let (int_part, frac_part) = if digits.len() > decimals {
            let split = digits.len() - decimals;
            (digits[..split].to_string(), digits[split..].to_string())
        } else {
            ("0".to_string(), format!("{digits:0>decimals$}"))
        };
        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.is_empty() {
            int_part
        } else {
            format!("{int_part}.{frac_part}")
        }
    }

    /// Convert a decimal amount string into base units
    ///
    /// # Arguments
    /// * `amount` - Decimal amount (e.g., "12.50")
    /// * `decimals` - Number of decimals of the token
    ///
    /// # Returns
    /// Amount in the token's smallest unit. More fractional digits than the
    /// token supports is an error, never a silent truncation.
    pub fn parse_units(amount: &str, decimals: u8) -> Result<U256> {
        let amount = amount.trim();
        let (int_part, frac_part) = amount.split_once('.').unwrap_or((amount, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(Error::InvalidParameter(format!("Invalid amount: {amount:?}")));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::InvalidParameter(format!("Invalid amount: {amount:?}")));
        }
        if frac_part.len() > decimals as usize {
            return Err(Error::InvalidParameter(format!(
                "Amount {amount} has more than {decimals} decimal places"
            )));
        }

        let digits = format!("{int_part}{frac_part:0<width$}", width = decimals as usize);
        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(U256::ZERO);
        }
        U256::from_str_radix(digits, 10)
            .map_err(|e| Error::InvalidParameter(format!("Invalid amount {amount}: {e}")))
    }

    /// Format an amount with its symbol (e.g., "12.5 USDC")
    pub fn format_amount(amount: U256, decimals: u8, symbol: &str) -> String {
        format!("{} {}", format_units(amount, decimals), symbol)
    }
}
