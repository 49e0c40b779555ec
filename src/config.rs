//! Pipeline configuration
//!
//! Configuration is read from an optional TOML file and layered with
//! environment variables prefixed `BATCHPAY__` (double underscore separates
//! sections, e.g. `BATCHPAY__CHAIN__RPC_URL`). Every section has defaults, so
//! an empty or missing file yields a usable configuration for a local node.

use crate::address::{parse_address, parse_recipient};
use crate::error::{Error, Result};
use crate::fees::MIN_ESCALATION_BPS;
use crate::types::Token;
use crate::validator::{TokenInfo, TokenRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chain: ChainConfig,
    pub gas: GasConfig,
    pub submission: SubmissionConfig,
    pub confirmation: ConfirmationConfig,
    pub tokens: Vec<TokenConfig>,
    /// Allowed payee addresses; when set, rows paying anyone else are malformed.
    pub recipients: Option<Vec<String>>,
}

impl PipelineConfig {
    /// Load configuration from a TOML file plus environment overrides.
    ///
    /// If the file doesn't exist, defaults are used as the base layer.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut builder = config::Config::builder();

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix("BATCHPAY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the path in `BATCHPAY_CONFIG`, or `batchpay.toml`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("BATCHPAY_CONFIG").unwrap_or_else(|_| "batchpay.toml".to_string());
        Self::from_file(path)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidParameter(msg));

        if self.chain.chain_id == 0 {
            return invalid("chain.chain_id must be non-zero".to_string());
        }
        if self.gas.escalation_bps < MIN_ESCALATION_BPS {
            return invalid(format!(
                "gas.escalation_bps must be at least {MIN_ESCALATION_BPS}"
            ));
        }
        if self.gas.native_gas_limit == 0 || self.gas.token_gas_limit == 0 {
            return invalid("gas limits must be non-zero".to_string());
        }
        if self.submission.max_transient_attempts == 0 {
            return invalid("submission.max_transient_attempts must be at least 1".to_string());
        }
        if self.confirmation.poll_interval_ms == 0 {
            return invalid("confirmation.poll_interval_ms must be non-zero".to_string());
        }
        if self.confirmation.poll_interval() > self.confirmation.inclusion_deadline() {
            return invalid(
                "confirmation.poll_interval_ms must not exceed the inclusion deadline".to_string(),
            );
        }

        let mut symbols = HashSet::new();
        for token in &self.tokens {
            if !symbols.insert(token.symbol.to_uppercase()) {
                return invalid(format!("Duplicate token symbol {}", token.symbol));
            }
        }

        self.token_registry().map(|_| ())
    }

    /// Build the registry of supported tokens and allowed payees.
    pub fn token_registry(&self) -> Result<TokenRegistry> {
        let tokens = if self.tokens.is_empty() {
            default_tokens()
        } else {
            self.tokens.clone()
        };

        let registry = tokens
            .into_iter()
            .map(|token| {
                let resolved = match token.address.as_deref() {
                    None => Token::Native,
                    Some(address) => Token::Erc20(parse_address(address)?),
                };
                Ok(TokenInfo {
                    symbol: token.symbol,
                    token: resolved,
                    decimals: token.decimals,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(TokenRegistry::new)?;

        match &self.recipients {
            None => Ok(registry),
            Some(recipients) => {
                let payees = recipients
                    .iter()
                    .map(|recipient| parse_recipient(recipient))
                    .collect::<Result<Vec<_>>>()?;
                Ok(registry.with_payees(payees))
            }
        }
    }
}

/// Target chain configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
    /// EIP-155 chain id signed into every transaction.
    pub chain_id: u64,
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
    /// Optional HTTP basic auth user for the endpoint.
    pub rpc_user: Option<String>,
    /// Optional HTTP basic auth password for the endpoint.
    pub rpc_password: Option<String>,
    /// Block explorer base URL, used to print a link after a run.
    pub explorer_url: Option<String>,
}

impl ChainConfig {
    /// Check the chain id reported by the endpoint against the configured one.
    pub fn check_chain_id(&self, reported: u64) -> Result<()> {
        if reported == self.chain_id {
            Ok(())
        } else {
            Err(Error::InvalidParameter(format!(
                "endpoint reports chain id {reported}, configured chain id is {}",
                self.chain_id
            )))
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            rpc_url: "http://localhost:8545".to_string(),
            rpc_user: None,
            rpc_password: None,
            explorer_url: None,
        }
    }
}

/// Fee bidding configuration. Values are in wei per gas.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GasConfig {
    /// Added to the suggested priority fee on the first attempt.
    /// Default: 1 gwei.
    pub priority_margin_wei: u64,
    /// Growth of the bid per retry, in basis points.
    /// Default: 1250 (12.5%).
    pub escalation_bps: u32,
    /// Highest `max_fee_per_gas` ever bid.
    /// Default: 500 gwei.
    pub max_fee_per_gas_cap_wei: u64,
    /// Gas limit of a native transfer.
    pub native_gas_limit: u64,
    /// Gas limit of an ERC-20 `transfer` call.
    pub token_gas_limit: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            priority_margin_wei: 1_000_000_000,
            escalation_bps: 1_250,
            max_fee_per_gas_cap_wei: 500_000_000_000,
            native_gas_limit: 21_000,
            token_gas_limit: 100_000,
        }
    }
}

/// Submission retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Sends of the same payload before a transient failure becomes `TimedOut`.
    pub max_transient_attempts: u32,
    /// Backoff before the first transient retry, doubled per retry.
    pub backoff_base_ms: u64,
    /// Upper bound of the backoff.
    pub backoff_max_ms: u64,
    /// Timeout of every individual endpoint call.
    pub call_timeout_seconds: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_transient_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            call_timeout_seconds: 10,
        }
    }
}

impl SubmissionConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Backoff before transient retry `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.backoff_base()
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max())
    }
}

/// Confirmation tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Interval between receipt polls.
    pub poll_interval_ms: u64,
    /// How long one round waits for inclusion before re-pricing.
    pub inclusion_deadline_seconds: u64,
    /// Re-price rounds before the transaction is reported `TimedOut`.
    pub max_reprice_rounds: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            inclusion_deadline_seconds: 60,
            max_reprice_rounds: 3,
        }
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn inclusion_deadline(&self) -> Duration {
        Duration::from_secs(self.inclusion_deadline_seconds)
    }
}

/// A supported token.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    pub symbol: String,
    /// Contract address; `None` for the native currency.
    #[serde(default)]
    pub address: Option<String>,
    pub decimals: u8,
}

fn default_tokens() -> Vec<TokenConfig> {
    vec![TokenConfig {
        symbol: "ETH".to_string(),
        address: None,
        decimals: 18,
    }]
}
