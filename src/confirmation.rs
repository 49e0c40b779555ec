//! Confirmation tracking
//!
//! A pending transaction is polled for a receipt until the inclusion deadline
//! of the current round passes. Every payload sent for the nonce is polled,
//! since any of them may be the one that lands. A round without inclusion
//! re-prices the transaction through the [`SubmissionEngine`]; after
//! [`ConfirmationConfig::max_reprice_rounds`] such rounds the transaction is
//! reported `TimedOut`.

use crate::config::ConfirmationConfig;
use crate::endpoint::{ChainEndpoint, TxReceipt};
use crate::nonce::NonceSequencer;
use crate::submission::{SubmissionEngine, SubmitOutcome};
use crate::transaction::PendingTransaction;
use crate::types::{FailureReason, TransactionStatus};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Drives pending transactions to a final status
pub struct ConfirmationTracker {
    endpoint: Arc<dyn ChainEndpoint>,
    engine: Arc<SubmissionEngine>,
    config: ConfirmationConfig,
}

impl ConfirmationTracker {
    pub fn new(
        endpoint: Arc<dyn ChainEndpoint>,
        engine: Arc<SubmissionEngine>,
        config: ConfirmationConfig,
    ) -> Self {
        Self {
            endpoint,
            engine,
            config,
        }
    }

    /// Track `tx` until it is `Confirmed`, `Failed` or `TimedOut`.
    ///
    /// Replacements are signed with the nonce `nonces` bound to `tx`.
    #[instrument(skip_all, fields(row = tx.record.row, nonce = tx.nonce()))]
    pub async fn track(&self, mut tx: PendingTransaction, nonces: &NonceSequencer) -> PendingTransaction {
        loop {
            if let Some(receipt) = self.await_inclusion(&tx).await {
                Self::apply_receipt(&mut tx, receipt);
                return tx;
            }

            if tx.reprice_rounds >= self.config.max_reprice_rounds {
                warn!(rounds = tx.reprice_rounds, "transaction not included in time");
                tx.finish(
                    TransactionStatus::TimedOut,
                    Some(FailureReason::InclusionTimedOut),
                );
                return tx;
            }
            tx.reprice_rounds += 1;

            match self.engine.reprice(&mut tx, nonces).await {
                SubmitOutcome::Accepted => {
                    debug!(round = tx.reprice_rounds, hash = %tx.signed.hash, "replacement pending");
                }
                SubmitOutcome::NonceTooLow => {
                    // An earlier payload for this nonce was mined in the meantime.
                    info!("nonce consumed while re-pricing, waiting for receipt");
                    tx.transition(TransactionStatus::Pending);
                }
                SubmitOutcome::Terminal(status, reason) => {
                    // Earlier payloads may still land; check once before giving up.
                    tx.transition(TransactionStatus::Pending);
                    if let Some(receipt) = self.poll_once(&tx).await {
                        Self::apply_receipt(&mut tx, receipt);
                    } else {
                        warn!(%reason, "re-pricing failed");
                        tx.finish(status, Some(reason));
                    }
                    return tx;
                }
            }
        }
    }

    /// Poll until a receipt appears or the round's deadline passes.
    async fn await_inclusion(&self, tx: &PendingTransaction) -> Option<TxReceipt> {
        let deadline = Instant::now() + self.config.inclusion_deadline();
        loop {
            if let Some(receipt) = self.poll_once(tx).await {
                return Some(receipt);
            }
            if Instant::now() + self.config.poll_interval() > deadline {
                return None;
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Check every sent payload, newest first.
    async fn poll_once(&self, tx: &PendingTransaction) -> Option<TxReceipt> {
        for hash in tx.sent_hashes.iter().rev() {
            match self.endpoint.transaction_receipt(*hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                Err(err) => debug!(%hash, error = %err, "receipt poll failed"),
            }
        }
        None
    }

    fn apply_receipt(tx: &mut PendingTransaction, receipt: TxReceipt) {
        tx.receipt = Some(receipt);
        if receipt.success {
            info!(
                hash = %receipt.transaction_hash,
                block = receipt.block_number,
                "transaction confirmed"
            );
            tx.finish(TransactionStatus::Confirmed, None);
        } else {
            warn!(hash = %receipt.transaction_hash, block = receipt.block_number, "transaction reverted");
            tx.finish(
                TransactionStatus::Failed,
                Some(FailureReason::ExecutionReverted),
            );
        }
    }
}
