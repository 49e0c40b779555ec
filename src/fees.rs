//! EIP-1559 fee bidding with escalation on retry
//!
//! The first attempt of a transaction bids the network-suggested base fee plus
//! a fixed priority margin on top of the suggested tip:
//!
//! `priority = suggested_tip + priority_margin`, `max_fee = base_fee + priority`
//!
//! Retry `n` multiplies both fields by `(1 + escalation)^n`, applied step by
//! step with rounding up so every step is strictly greater than the previous
//! one. A bid whose `max_fee_per_gas` exceeds the configured cap is never sent:
//! the transaction fails with [`FailureReason::GasCapExceeded`].

use crate::config::GasConfig;
use crate::endpoint::FeeSuggestion;
use crate::error::{Error, Result};
use crate::types::FailureReason;
use serde::{Deserialize, Serialize};

/// Minimum replacement bump accepted by geth/reth transaction pools, in basis points.
///
/// Ref <https://github.com/paradigmxyz/reth/blob/b312799e081259a2fbdfa91fb6b43f384625bbe2/crates/transaction-pool/src/config.rs#L23-L24>
pub const MIN_ESCALATION_BPS: u32 = 1_000;

const BPS_DENOMINATOR: u128 = 10_000;

/// A fee bid for one EIP-1559 transaction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasBid {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Computes initial and escalated fee bids
#[derive(Debug, Clone)]
pub struct GasStrategy {
    priority_margin: u128,
    escalation_bps: u32,
    max_fee_cap: u128,
}

impl GasStrategy {
    /// Create a strategy
    ///
    /// # Arguments
    /// * `priority_margin` - Wei per gas added to the suggested tip
    /// * `escalation_bps` - Growth per retry in basis points (1250 = 12.5%)
    /// * `max_fee_cap` - Highest `max_fee_per_gas` ever sent
    pub fn new(priority_margin: u128, escalation_bps: u32, max_fee_cap: u128) -> Result<Self> {
        if escalation_bps < MIN_ESCALATION_BPS {
            return Err(Error::InvalidParameter(format!(
                "escalation_bps must be at least {MIN_ESCALATION_BPS}, got {escalation_bps}"
            )));
        }
        Ok(Self {
            priority_margin,
            escalation_bps,
            max_fee_cap,
        })
    }

    pub fn from_config(config: &GasConfig) -> Result<Self> {
        Self::new(
            config.priority_margin_wei as u128,
            config.escalation_bps,
            config.max_fee_per_gas_cap_wei as u128,
        )
    }

    pub fn max_fee_cap(&self) -> u128 {
        self.max_fee_cap
    }

    /// Bid for the first attempt of a transaction
    pub fn initial_bid(&self, suggestion: &FeeSuggestion) -> std::result::Result<GasBid, FailureReason> {
        let priority = suggestion
            .max_priority_fee_per_gas
            .saturating_add(self.priority_margin);
        let bid = GasBid {
            max_fee_per_gas: suggestion.base_fee_per_gas.saturating_add(priority),
            max_priority_fee_per_gas: priority,
        };
        self.within_cap(bid)
    }

    /// Bid for retry `attempt` (1-based) of a transaction that started at `initial`
    pub fn escalate(&self, initial: &GasBid, attempt: u32) -> std::result::Result<GasBid, FailureReason> {
        let mut bid = *initial;
        for _ in 0..attempt {
            bid = GasBid {
                max_fee_per_gas: self.bump(bid.max_fee_per_gas),
                max_priority_fee_per_gas: self.bump(bid.max_priority_fee_per_gas),
            };
            // Stop early; later steps only grow.
            if bid.max_fee_per_gas > self.max_fee_cap {
                return Err(FailureReason::GasCapExceeded);
            }
        }
        bid.max_priority_fee_per_gas = bid.max_priority_fee_per_gas.min(bid.max_fee_per_gas);
        self.within_cap(bid)
    }

    fn bump(&self, value: u128) -> u128 {
        let factor = BPS_DENOMINATOR + self.escalation_bps as u128;
        let scaled = value
            .saturating_mul(factor)
            .saturating_add(BPS_DENOMINATOR - 1)
            / BPS_DENOMINATOR;
        scaled.max(value.saturating_add(1))
    }

    fn within_cap(&self, bid: GasBid) -> std::result::Result<GasBid, FailureReason> {
        if bid.max_fee_per_gas > self.max_fee_cap {
            Err(FailureReason::GasCapExceeded)
        } else {
            Ok(bid)
        }
    }
}
