//! # Batchpay
//!
//! Batch payment submission for EVM chains.
//!
//! A batch of payment rows (recipient, amount, token, reference) is validated,
//! assigned gap-free nonces in input order, priced, signed locally and sent
//! to a JSON-RPC endpoint. Accepted transactions are tracked until they are
//! confirmed, reverted or time out; underpriced and stuck transactions are
//! re-priced with the same nonce.
//!
//! ## Features
//!
//! - **Validation**: EIP-55 checksummed recipients, positive base-unit amounts,
//!   configured tokens only
//! - **Nonce Sequencing**: one network query per batch, contiguous nonces
//!   even when records fail before reaching the network
//! - **Fee Escalation**: EIP-1559 bids that grow per retry up to a cap
//! - **Confirmation Tracking**: concurrent receipt polling with bounded
//!   re-price rounds
//! - **Reporting**: per-row results in input order, CSV export and summaries
//!
//! ## Example
//!
//! ```no_run
//! use batchpay::client::RpcClient;
//! use batchpay::config::PipelineConfig;
//! use batchpay::datasource::read_batch;
//! use batchpay::orchestrator::BatchOrchestrator;
//! use batchpay::signer::Signer;
//! use secrecy::SecretString;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_file("batchpay.toml")?;
//! let registry = config.token_registry()?;
//! let signer = Signer::from_secret(&SecretString::new(std::env::var("BATCHPAY_PRIVATE_KEY")?))?;
//!
//! let endpoint = Arc::new(RpcClient::from_config(&config.chain));
//! let orchestrator = BatchOrchestrator::new(endpoint, signer, &config)?;
//!
//! let rows = read_batch("payroll.csv")?;
//! let result = orchestrator.run(&rows, &registry).await?;
//! for entry in &result.entries {
//!     println!("{} {} {:?}", entry.reference, entry.status, entry.tx_hash);
//! }
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod client;
pub mod config;
pub mod confirmation;
pub mod datasource;
pub mod endpoint;
pub mod error;
pub mod fees;
pub mod nonce;
pub mod orchestrator;
pub mod report;
pub mod rpc;
pub mod signer;
pub mod submission;
pub mod transaction;
pub mod types;
pub mod validator;

pub use error::{Error, Result};

/// Re-export commonly used types
pub use types::*;

/// Re-export utility functions
pub use types::utils;

pub use endpoint::{ChainEndpoint, EndpointError, FeeSuggestion, TxReceipt};
pub use orchestrator::BatchOrchestrator;
pub use signer::Signer;

/// Re-export reporting helpers
pub use report::*;
