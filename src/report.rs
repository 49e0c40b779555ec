//! Reporting helpers
//!
//! This module provides:
//! - Redaction utilities for safe logging/sharing
//! - Per-token totals of a batch, shown before sending
//! - Console lines, a status summary and CSV export of a [`BatchResult`]

use crate::error::{Error, Result};
use crate::types::utils::format_amount;
use crate::types::{BatchEntry, BatchResult, PaymentRecord, TransactionStatus};
use crate::validator::TokenRegistry;
use alloy::primitives::{Address, U256};
use std::fmt;

/// Redact an address or hash for safe display/logging.
///
/// Keeps the first N and last M visible characters, replaces the middle with '…'.
pub fn redact_middle(input: &str, keep_start: usize, keep_end: usize) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= keep_start + keep_end + 1 {
        return input.to_string();
    }
    let start: String = chars[..keep_start].iter().collect();
    let end: String = chars[chars.len() - keep_end..].iter().collect();
    format!("{start}…{end}")
}

/// Sum of the payments in one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTotal {
    pub symbol: String,
    pub decimals: u8,
    pub amount: U256,
    pub payments: usize,
}

impl fmt::Display for TokenTotal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} payment(s)",
            format_amount(self.amount, self.decimals, &self.symbol),
            self.payments
        )
    }
}

/// Total amount per token, in the registry's token order.
pub fn batch_totals(records: &[PaymentRecord], registry: &TokenRegistry) -> Vec<TokenTotal> {
    registry
        .tokens()
        .iter()
        .filter_map(|info| {
            let matching: Vec<_> = records.iter().filter(|r| r.token == info.token).collect();
            if matching.is_empty() {
                return None;
            }
            Some(TokenTotal {
                symbol: info.symbol.clone(),
                decimals: info.decimals,
                amount: matching
                    .iter()
                    .fold(U256::ZERO, |acc, r| acc.saturating_add(r.amount)),
                payments: matching.len(),
            })
        })
        .collect()
}

/// Counts of final statuses in a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Rows rejected by validation (included in `failed`)
    pub malformed: usize,
    /// Rows never sent because the batch aborted (included in `failed`)
    pub aborted: usize,
}

impl BatchSummary {
    pub fn from_result(result: &BatchResult) -> Self {
        use crate::types::FailureReason;

        let mut summary = Self {
            total: result.len(),
            ..Self::default()
        };
        for entry in &result.entries {
            match entry.status {
                TransactionStatus::Confirmed => summary.confirmed += 1,
                TransactionStatus::TimedOut => summary.timed_out += 1,
                _ => summary.failed += 1,
            }
            match entry.error {
                Some(FailureReason::MalformedRecord(_)) => summary.malformed += 1,
                Some(FailureReason::BatchAborted) => summary.aborted += 1,
                _ => {}
            }
        }
        summary
    }

    /// Whether every row was confirmed
    pub fn all_confirmed(&self) -> bool {
        self.confirmed == self.total
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} payment(s): {} confirmed, {} failed, {} timed out",
            self.total, self.confirmed, self.failed, self.timed_out
        )?;
        if self.malformed > 0 {
            write!(f, " ({} malformed)", self.malformed)?;
        }
        if self.aborted > 0 {
            write!(f, " ({} not sent)", self.aborted)?;
        }
        Ok(())
    }
}

/// One console line for an entry: reference, status, tx hash, error
pub fn entry_line(entry: &BatchEntry) -> String {
    let reference = if entry.reference.is_empty() {
        format!("row {}", entry.row + 1)
    } else {
        entry.reference.clone()
    };
    let hash = entry
        .tx_hash
        .map(|hash| redact_middle(&hash.to_string(), 10, 8))
        .unwrap_or_else(|| "-".to_string());
    let error = entry
        .error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_default();
    format!("{reference:<20} {:<10} {hash:<21} {error}", entry.status.as_str())
        .trim_end()
        .to_string()
}

/// Export a batch result as CSV.
///
/// Columns: row, reference, recipient, amount, token, status, nonce, tx_hash,
/// attempts, error
pub fn export_batch_csv(result: &BatchResult) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "row", "reference", "recipient", "amount", "token", "status", "nonce", "tx_hash",
        "attempts", "error",
    ])?;
    for entry in &result.entries {
        let (recipient, amount, token) = match &entry.record {
            Some(record) => (
                record.recipient.to_checksum(None),
                record.amount.to_string(),
                record.token.to_string(),
            ),
            None => Default::default(),
        };
        writer.write_record([
            entry.row.to_string(),
            entry.reference.clone(),
            recipient,
            amount,
            token,
            entry.status.as_str().to_string(),
            entry.nonce.map(|n| n.to_string()).unwrap_or_default(),
            entry.tx_hash.map(|h| h.to_string()).unwrap_or_default(),
            entry.attempts.to_string(),
            entry.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::InvalidParameter(format!("Report is not UTF-8: {e}")))
}

/// Block explorer link for an address
pub fn explorer_address_url(base: &str, address: &Address) -> String {
    format!("{}/address/{}", base.trim_end_matches('/'), address.to_checksum(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureReason, Token};
    use alloy::primitives::B256;

    fn record(row: usize, amount: u64, token: Token) -> PaymentRecord {
        PaymentRecord {
            row,
            recipient: Address::repeat_byte(0x42),
            amount: U256::from(amount),
            token,
            reference: format!("inv-{row}"),
        }
    }

    fn result() -> BatchResult {
        BatchResult {
            entries: vec![
                BatchEntry {
                    row: 0,
                    reference: "inv-0".to_string(),
                    record: Some(record(0, 1_500_000, Token::Native)),
                    status: TransactionStatus::Confirmed,
                    tx_hash: Some(B256::repeat_byte(0xab)),
                    nonce: Some(7),
                    attempts: 2,
                    error: None,
                },
                BatchEntry::unsent(
                    1,
                    "inv, 1".to_string(),
                    None,
                    TransactionStatus::Failed,
                    FailureReason::MalformedRecord("Amount must be positive".to_string()),
                ),
                BatchEntry {
                    nonce: Some(8),
                    attempts: 4,
                    ..BatchEntry::unsent(
                        2,
                        String::new(),
                        Some(record(2, 1, Token::Native)),
                        TransactionStatus::TimedOut,
                        FailureReason::InclusionTimedOut,
                    )
                },
            ],
            aborted: None,
        }
    }

    #[test]
    fn test_redact_middle() {
        let s = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        let r = redact_middle(s, 6, 4);
        assert!(r.starts_with("0x5aAe"));
        assert!(r.ends_with("eAed"));
        assert!(r.contains('…'));
        assert_eq!(redact_middle("0x1234", 6, 4), "0x1234");
    }

    #[test]
    fn test_batch_totals() {
        let usdc = Token::Erc20(Address::repeat_byte(0x01));
        let registry = TokenRegistry::new(vec![
            crate::validator::TokenInfo { symbol: "ETH".into(), token: Token::Native, decimals: 18 },
            crate::validator::TokenInfo { symbol: "USDC".into(), token: usdc, decimals: 6 },
        ]);
        let records = vec![
            record(0, 12_500_000, usdc),
            record(1, 500_000, usdc),
        ];

        let totals = batch_totals(&records, &registry);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].amount, U256::from(13_000_000u64));
        assert_eq!(totals[0].to_string(), "13 USDC in 2 payment(s)");
    }

    #[test]
    fn test_summary() {
        let summary = BatchSummary::from_result(&result());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.confirmed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.malformed, 1);
        assert!(!summary.all_confirmed());
        assert_eq!(
            summary.to_string(),
            "3 payment(s): 1 confirmed, 1 failed, 1 timed out (1 malformed)"
        );
    }

    #[test]
    fn test_entry_line() {
        let result = result();
        let line = entry_line(&result.entries[0]);
        assert!(line.starts_with("inv-0"));
        assert!(line.contains("confirmed"));
        assert!(line.contains('…'));
        assert!(entry_line(&result.entries[2]).starts_with("row 3"));
        assert!(entry_line(&result.entries[1]).ends_with("malformed record: Amount must be positive"));
    }

    #[test]
    fn test_export_csv() {
        let csv = export_batch_csv(&result()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "row,reference,recipient,amount,token,status,nonce,tx_hash,attempts,error"
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("0,inv-0,0x4242"));
        assert!(first.contains(",1500000,native,confirmed,7,0xabab"));
        // Fields containing commas are quoted.
        assert!(lines.next().unwrap().starts_with("1,\"inv, 1\",,,,failed,,,0,"));
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn test_explorer_url() {
        let address: Address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse().unwrap();
        assert_eq!(
            explorer_address_url("https://etherscan.io/", &address),
            "https://etherscan.io/address/0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }
}
