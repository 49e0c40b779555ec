//! Batch file reading
//!
//! A batch file is either CSV with the header `recipient,amount,token,reference`
//! or a JSON array of objects with the same keys. The format is picked from
//! the file extension. Rows keep their file order.

use crate::error::{Error, Result};
use crate::types::utils::parse_units;
use crate::types::RawPaymentRow;
use crate::validator::TokenRegistry;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// File format of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormat {
    Csv,
    Json,
}

impl BatchFormat {
    /// Pick the format from a file extension (`.csv` or `.json`)
    pub fn from_path(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => Ok(Self::Csv),
            Some("json") => Ok(Self::Json),
            _ => Err(Error::InvalidParameter(format!(
                "Unsupported batch file {}: expected .csv or .json",
                path.display()
            ))),
        }
    }
}

/// How the `amount` column is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AmountFormat {
    /// Integer amounts in the token's smallest unit
    #[default]
    BaseUnits,
    /// Human decimal amounts (e.g. "12.50"), scaled by the token's decimals
    Decimal,
}

#[derive(Debug, Deserialize)]
struct JsonRow {
    recipient: String,
    // Raw text keeps integers wider than u64 digit for digit.
    amount: Box<RawValue>,
    token: String,
    #[serde(default)]
    reference: Option<String>,
}

/// Read a batch file, choosing the parser by extension
pub fn read_batch<P: AsRef<Path>>(path: P) -> Result<Vec<RawPaymentRow>> {
    let path = path.as_ref();
    let format = BatchFormat::from_path(path)?;
    let file = File::open(path)?;
    let rows = match format {
        BatchFormat::Csv => read_csv(file)?,
        BatchFormat::Json => read_json(file)?,
    };
    debug!(path = %path.display(), rows = rows.len(), "read batch file");
    Ok(rows)
}

/// Read CSV rows with a `recipient,amount,token,reference` header
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<RawPaymentRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Read a JSON array of payment objects
///
/// Amounts may be JSON strings or non-negative integers of any width.
pub fn read_json<R: Read>(reader: R) -> Result<Vec<RawPaymentRow>> {
    let rows: Vec<JsonRow> = serde_json::from_reader(reader)?;
    rows.into_iter()
        .map(|row| {
            let raw = row.amount.get().trim();
            let amount = if raw.starts_with('"') {
                serde_json::from_str::<String>(raw)?
            } else {
                raw.to_string()
            };
            Ok(RawPaymentRow {
                recipient: row.recipient,
                amount,
                token: row.token,
                reference: row.reference.unwrap_or_default(),
            })
        })
        .collect()
}

/// Rewrite decimal amounts as base units using each row's token decimals.
///
/// Rows whose token is unknown or whose amount cannot be converted are left
/// untouched, so validation reports them as malformed.
pub fn apply_amount_format(
    rows: Vec<RawPaymentRow>,
    format: AmountFormat,
    registry: &TokenRegistry,
) -> Vec<RawPaymentRow> {
    if format == AmountFormat::BaseUnits {
        return rows;
    }

    rows.into_iter()
        .enumerate()
        .map(|(idx, mut row)| {
            let Some(info) = registry.resolve(&row.token) else {
                return row;
            };
            match parse_units(&row.amount, info.decimals) {
                Ok(amount) => row.amount = amount.to_string(),
                Err(e) => warn!(row = idx, error = %e, "cannot convert amount"),
            }
            row
        })
        .collect()
}
