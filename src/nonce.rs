//! Nonce sequencing for a single signer.
//!
//! The sequencer hands out one nonce per new transaction. The first call seeds
//! the counter from the network's pending nonce; later calls only increment the
//! in-process counter. Re-priced payloads of the same payment reuse the nonce
//! already bound to their [`PendingTransaction`].

use crate::endpoint::ChainEndpoint;
use crate::error::{Error, Result};
use crate::transaction::PendingTransaction;
use alloy::primitives::Address;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SequencerState {
    /// Pending nonce reported by the network on the first call.
    initial: Option<u64>,
    /// Next nonce to hand out.
    next: u64,
}

/// Gap-free nonce source for one signer address.
///
/// Owned by one batch; the counter lives in the instance, so several signers or
/// batches can run side by side.
pub struct NonceSequencer {
    address: Address,
    endpoint: Arc<dyn ChainEndpoint>,
    // Held across the first network query so only one assignment is ever in flight.
    state: Mutex<SequencerState>,
}

impl NonceSequencer {
    pub fn new(address: Address, endpoint: Arc<dyn ChainEndpoint>) -> Self {
        Self {
            address,
            endpoint,
            state: Mutex::new(SequencerState::default()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the nonce for the next new transaction.
    ///
    /// Fails with [`Error::NonceUnavailable`] if the starting nonce cannot be
    /// fetched; no nonce is guessed.
    pub async fn next_nonce(&self) -> Result<u64> {
        let mut state = self.state.lock().await;

        if state.initial.is_none() {
            let pending = self
                .endpoint
                .pending_nonce(self.address)
                .await
                .map_err(|e| Error::NonceUnavailable(e.to_string()))?;
            info!(address = %self.address, nonce = pending, "seeded nonce from network");
            state.initial = Some(pending);
            state.next = pending;
        }

        let nonce = state.next;
        state.next = nonce
            .checked_add(1)
            .ok_or_else(|| Error::NonceUnavailable("nonce space exhausted".to_string()))?;
        debug!(nonce, "issued nonce");
        Ok(nonce)
    }

    /// Nonce for re-submitting `tx` with a new fee bid.
    ///
    /// The nonce stays bound to the payment; the counter does not move.
    pub fn reuse_nonce(&self, tx: &PendingTransaction) -> u64 {
        let nonce = tx.nonce();
        debug!(nonce, row = tx.record.row, "reusing nonce for replacement");
        nonce
    }

    /// Hand back a nonce whose transaction was never accepted by the network.
    ///
    /// Only the most recently issued nonce can be released; anything else
    /// would open a gap. Returns whether the nonce was released.
    pub async fn release(&self, nonce: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.initial.is_some() && state.next == nonce + 1 {
            state.next = nonce;
            debug!(nonce, "released nonce");
            true
        } else {
            warn!(nonce, next = state.next, "cannot release nonce that is not the latest issued");
            false
        }
    }

    /// Nonces issued and not released so far, `None` before the first call.
    pub async fn issued(&self) -> Option<Range<u64>> {
        let state = self.state.lock().await;
        state.initial.map(|initial| initial..state.next)
    }
}

impl std::fmt::Debug for NonceSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceSequencer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
