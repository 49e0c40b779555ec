//! Payment record validation
//!
//! Turns raw batch rows into typed [`PaymentRecord`]s. Validation is a pure
//! function of the row and the [`TokenRegistry`], which holds the supported
//! tokens and, when configured, the allowed payees. No network access, and no
//! attempt to repair a bad row.

use crate::address::{parse_address, parse_recipient};
use crate::error::{Error, Result};
use crate::types::{PaymentRecord, RawPaymentRow, Token};
use alloy::primitives::{Address, U256};
use std::collections::HashSet;

/// A token the pipeline is allowed to pay in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    pub token: Token,
    pub decimals: u8,
}

/// Set of supported tokens, addressable by symbol or contract address
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: Vec<TokenInfo>,
    /// Allowed recipients; `None` allows any
    payees: Option<HashSet<Address>>,
}

impl TokenRegistry {
    pub fn new(tokens: Vec<TokenInfo>) -> Self {
        Self {
            tokens,
            payees: None,
        }
    }

    /// Restrict recipients to `payees`
    pub fn with_payees<I: IntoIterator<Item = Address>>(mut self, payees: I) -> Self {
        self.payees = Some(payees.into_iter().collect());
        self
    }

    /// Whether `recipient` may be paid
    pub fn allows_recipient(&self, recipient: &Address) -> bool {
        self.payees
            .as_ref()
            .map_or(true, |payees| payees.contains(recipient))
    }

    /// Registry containing only the native currency
    pub fn native(symbol: &str, decimals: u8) -> Self {
        Self::new(vec![TokenInfo {
            symbol: symbol.to_string(),
            token: Token::Native,
            decimals,
        }])
    }

    pub fn tokens(&self) -> &[TokenInfo] {
        &self.tokens
    }

    /// Resolve a token identifier
    ///
    /// Accepts a configured symbol (case-insensitive), the keyword `native`
    /// when a native entry exists, or a checksummed contract address of a
    /// configured ERC-20 token.
    pub fn resolve(&self, identifier: &str) -> Option<&TokenInfo> {
        let identifier = identifier.trim();
        if identifier.starts_with("0x") {
            let address = parse_address(identifier).ok()?;
            return self
                .tokens
                .iter()
                .find(|info| info.token == Token::Erc20(address));
        }

        if identifier.eq_ignore_ascii_case("native") {
            return self.info_for(&Token::Native);
        }

        self.tokens
            .iter()
            .find(|info| info.symbol.eq_ignore_ascii_case(identifier))
    }

    /// Look up the registry entry for an already resolved token
    pub fn info_for(&self, token: &Token) -> Option<&TokenInfo> {
        self.tokens.iter().find(|info| &info.token == token)
    }
}

/// Validate a single row
///
/// # Arguments
/// * `row` - Zero-based index of the row in the batch
/// * `raw` - The raw row
/// * `registry` - Supported tokens
///
/// # Returns
/// The typed record, or `Error::MalformedRecord` naming the row
pub fn validate_row(row: usize, raw: &RawPaymentRow, registry: &TokenRegistry) -> Result<PaymentRecord> {
    let malformed = |reason: String| Error::MalformedRecord { row, reason };

    let recipient = parse_recipient(&raw.recipient).map_err(|e| malformed(e.to_string()))?;
    if !registry.allows_recipient(&recipient) {
        return Err(malformed("recipient is not an allowed payee".to_string()));
    }

    let amount = parse_amount(&raw.amount).map_err(malformed)?;

    let token = registry
        .resolve(&raw.token)
        .ok_or_else(|| malformed(format!("Unsupported token: {:?}", raw.token)))?
        .token;

    Ok(PaymentRecord {
        row,
        recipient,
        amount,
        token,
        reference: raw.reference.trim().to_string(),
    })
}

/// Validate every row, keeping one result per row in input order
pub fn validate_rows(rows: &[RawPaymentRow], registry: &TokenRegistry) -> Vec<Result<PaymentRecord>> {
    rows.iter()
        .enumerate()
        .map(|(idx, raw)| validate_row(idx, raw, registry))
        .collect()
}

/// Validate a whole batch, failing on the first malformed row
pub fn validate_batch(rows: &[RawPaymentRow], registry: &TokenRegistry) -> Result<Vec<PaymentRecord>> {
    rows.iter()
        .enumerate()
        .map(|(idx, raw)| validate_row(idx, raw, registry))
        .collect()
}

fn parse_amount(amount: &str) -> std::result::Result<U256, String> {
    let amount = amount.trim();
    if amount.is_empty() || !amount.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!(
            "Invalid amount: {amount:?} (expected a positive integer in base units)"
        ));
    }
    let value = U256::from_str_radix(amount, 10)
        .map_err(|e| format!("Invalid amount {amount}: {e}"))?;
    if value.is_zero() {
        return Err("Amount must be positive".to_string());
    }
    Ok(value)
}
