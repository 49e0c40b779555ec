//! Batch orchestration
//!
//! [`BatchOrchestrator::run`] walks the batch in input order. For each valid
//! record it assigns a nonce, builds and signs the payload and performs the
//! initial submission before the next record gets a nonce, so nonce order is
//! input order. Once a payload is accepted, confirmation tracking runs on its
//! own task and the loop moves on. Results are collected back in input order.
//!
//! A record that fails before the network ever accepted it hands its nonce
//! back to the sequencer, so the next record reuses it and the issued nonces
//! stay contiguous.

use crate::config::PipelineConfig;
use crate::confirmation::ConfirmationTracker;
use crate::endpoint::{ChainEndpoint, TimeoutEndpoint};
use crate::error::{Error, Result};
use crate::fees::GasStrategy;
use crate::nonce::NonceSequencer;
use crate::signer::Signer;
use crate::submission::{SubmissionEngine, SubmitOutcome};
use crate::transaction::{PendingTransaction, TransactionBuilder};
use crate::types::{
    AbortReason, BatchEntry, BatchResult, FailureReason, PaymentRecord, RawPaymentRow,
    TransactionStatus,
};
use crate::validator::{validate_rows, TokenRegistry};
use alloy::primitives::Address;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Where an input row's result will come from
enum Slot {
    Done(BatchEntry),
    Tracking {
        record: PaymentRecord,
        nonce: u64,
        handle: JoinHandle<PendingTransaction>,
    },
}

/// Drives a batch of payments from one signer through the pipeline
pub struct BatchOrchestrator {
    endpoint: Arc<dyn ChainEndpoint>,
    address: Address,
    engine: Arc<SubmissionEngine>,
    tracker: Arc<ConfirmationTracker>,
    cancel: CancellationToken,
}

impl BatchOrchestrator {
    /// Create an orchestrator for `signer` on the configured chain.
    ///
    /// Every endpoint call is bounded by `submission.call_timeout_seconds`.
    pub fn new(
        endpoint: Arc<dyn ChainEndpoint>,
        signer: Signer,
        config: &PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let endpoint: Arc<dyn ChainEndpoint> = Arc::new(TimeoutEndpoint::new(
            endpoint,
            config.submission.call_timeout(),
        ));
        let address = signer.address();
        let engine = Arc::new(SubmissionEngine::new(
            Arc::clone(&endpoint),
            Arc::new(signer),
            TransactionBuilder::from_config(config.chain.chain_id, &config.gas),
            GasStrategy::from_config(&config.gas)?,
            config.submission.clone(),
        ));
        let tracker = Arc::new(ConfirmationTracker::new(
            Arc::clone(&endpoint),
            Arc::clone(&engine),
            config.confirmation.clone(),
        ));

        Ok(Self {
            endpoint,
            address,
            engine,
            tracker,
            cancel: CancellationToken::new(),
        })
    }

    /// Address the batch is sent from
    pub fn address(&self) -> Address {
        self.address
    }

    /// Token that aborts the batch when cancelled.
    ///
    /// Cancelling stops new submissions; transactions the network already
    /// accepted are still tracked to a final status.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validate and send a batch, returning one entry per row in input order.
    ///
    /// Malformed rows are reported as `Failed(MalformedRecord)` and skipped.
    /// Returns [`Error::NonceUnavailable`] without submitting anything if the
    /// signer's pending nonce cannot be fetched. If nonces run out mid-batch,
    /// transactions already accepted are tracked to a final status before the
    /// error is returned.
    #[instrument(skip_all, fields(rows = rows.len(), from = %self.address))]
    pub async fn run(&self, rows: &[RawPaymentRow], registry: &TokenRegistry) -> Result<BatchResult> {
        let validated = validate_rows(rows, registry);
        let valid = validated.iter().filter(|result| result.is_ok()).count();
        info!(valid, malformed = rows.len() - valid, "starting batch");

        let sequencer = Arc::new(NonceSequencer::new(self.address, Arc::clone(&self.endpoint)));
        let mut slots = Vec::with_capacity(rows.len());
        let mut aborted = None;
        let mut fatal = None;

        for (raw, result) in rows.iter().zip(validated) {
            let record = match result {
                Ok(record) => record,
                Err(err) => {
                    let (row, reason) = match err {
                        Error::MalformedRecord { row, reason } => (row, reason),
                        other => (slots.len(), other.to_string()),
                    };
                    warn!(row, %reason, "skipping malformed row");
                    slots.push(Slot::Done(BatchEntry::unsent(
                        row,
                        raw.reference.clone(),
                        None,
                        TransactionStatus::Failed,
                        FailureReason::MalformedRecord(reason),
                    )));
                    continue;
                }
            };

            if aborted.is_none() && self.cancel.is_cancelled() {
                warn!("batch cancelled, no further transactions will be sent");
                aborted = Some(AbortReason::Cancelled);
            }
            if aborted.is_some() || fatal.is_some() {
                slots.push(Slot::Done(BatchEntry::unsent(
                    record.row,
                    record.reference.clone(),
                    Some(record),
                    TransactionStatus::Failed,
                    FailureReason::BatchAborted,
                )));
                continue;
            }

            let nonce = match sequencer.next_nonce().await {
                Ok(nonce) => nonce,
                Err(err) => {
                    error!(row = record.row, error = %err, "no nonce available, aborting batch");
                    slots.push(Slot::Done(BatchEntry::unsent(
                        record.row,
                        record.reference.clone(),
                        Some(record),
                        TransactionStatus::Failed,
                        FailureReason::BatchAborted,
                    )));
                    fatal = Some(err);
                    continue;
                }
            };
            let slot = self.send(record, nonce, &sequencer, &mut aborted).await;
            slots.push(slot);
        }

        if let Some(range) = sequencer.issued().await {
            info!(first = range.start, next = range.end, "nonce assignment finished");
        }

        let mut entries = Vec::with_capacity(slots.len());
        for slot in slots {
            entries.push(match slot {
                Slot::Done(entry) => entry,
                Slot::Tracking {
                    record,
                    nonce,
                    handle,
                } => match handle.await {
                    Ok(tx) => entry_for(tx),
                    Err(err) => {
                        error!(row = record.row, nonce, error = %err, "tracking task failed");
                        BatchEntry {
                            nonce: Some(nonce),
                            ..BatchEntry::unsent(
                                record.row,
                                record.reference.clone(),
                                Some(record),
                                TransactionStatus::TimedOut,
                                FailureReason::InclusionTimedOut,
                            )
                        }
                    }
                },
            });
        }

        match fatal {
            Some(err) => {
                let tracked = entries.iter().filter(|e| e.tx_hash.is_some()).count();
                warn!(tracked, "batch ended without nonces; accepted transactions were tracked");
                Err(err)
            }
            None => Ok(BatchResult { entries, aborted }),
        }
    }

    /// Build and submit one record with its freshly issued nonce.
    async fn send(
        &self,
        record: PaymentRecord,
        nonce: u64,
        sequencer: &Arc<NonceSequencer>,
        aborted: &mut Option<AbortReason>,
    ) -> Slot {
        let mut tx = match self.engine.prepare(record.clone(), nonce).await {
            Ok(tx) => tx,
            Err((status, reason)) => {
                warn!(row = record.row, nonce, %reason, "could not build transaction");
                sequencer.release(nonce).await;
                return Slot::Done(BatchEntry::unsent(
                    record.row,
                    record.reference.clone(),
                    Some(record),
                    status,
                    reason,
                ));
            }
        };

        match self.engine.submit(&mut tx, sequencer).await {
            SubmitOutcome::Accepted => {
                let tracker = Arc::clone(&self.tracker);
                let nonces = Arc::clone(sequencer);
                Slot::Tracking {
                    record,
                    nonce,
                    handle: tokio::spawn(async move { tracker.track(tx, &nonces).await }),
                }
            }
            SubmitOutcome::Terminal(status, reason) => {
                tx.finish(status, Some(reason));
                sequencer.release(nonce).await;
                let mut entry = entry_for(tx);
                entry.nonce = None;
                Slot::Done(entry)
            }
            SubmitOutcome::NonceTooLow => {
                error!(row = record.row, nonce, "nonce already used on chain, aborting batch");
                tx.finish(TransactionStatus::Failed, Some(FailureReason::NonceTooLow));
                *aborted = Some(AbortReason::NonceTooLow { nonce });
                Slot::Done(entry_for(tx))
            }
        }
    }
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("address", &self.address)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn entry_for(tx: PendingTransaction) -> BatchEntry {
    BatchEntry {
        row: tx.record.row,
        reference: tx.record.reference.clone(),
        status: tx.status,
        tx_hash: (!tx.sent_hashes.is_empty()).then(|| tx.tx_hash()),
        nonce: Some(tx.nonce()),
        attempts: tx.attempts,
        error: tx.failure.clone(),
        record: Some(tx.record),
    }
}
