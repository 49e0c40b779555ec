//! Submission of signed payloads to the network
//!
//! The [`SubmissionEngine`] sends one [`PendingTransaction`] at a time and
//! turns the endpoint's answer into the next step of the transaction's
//! lifecycle:
//!
//! | endpoint answer      | step                                              |
//! |----------------------|---------------------------------------------------|
//! | accepted             | `Pending`                                         |
//! | underpriced          | escalate the bid, re-sign with the same nonce     |
//! | insufficient funds   | `Failed(InsufficientFunds)`                       |
//! | nonce too low        | reported to the caller, which aborts the batch    |
//! | other rejection      | `Failed(Rejected)`                                |
//! | transient            | back off and resend the same payload              |
//!
//! Transient failures of one payload are bounded by
//! [`SubmissionConfig::max_transient_attempts`]; after that the transaction is
//! `TimedOut(SubmissionTimedOut)`.

use crate::config::SubmissionConfig;
use crate::endpoint::{ChainEndpoint, EndpointError, FeeSuggestion};
use crate::fees::GasStrategy;
use crate::nonce::NonceSequencer;
use crate::signer::Signer;
use crate::transaction::{PendingTransaction, TransactionBuilder};
use crate::types::{FailureReason, PaymentRecord, TransactionStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What to do after one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The network accepted the payload; the transaction is `Pending`
    Accepted,
    /// Transient failure; resend the same payload after the delay
    RetryAfter(Duration),
    /// The bid was too low; a re-priced payload is ready to send
    Repriced,
    /// The transaction cannot succeed; finish it with this status and reason
    Terminal(TransactionStatus, FailureReason),
    /// The nonce was already used on chain
    NonceTooLow,
}

/// Final outcome of [`SubmissionEngine::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Terminal(TransactionStatus, FailureReason),
    NonceTooLow,
}

/// Sends payloads and re-prices them with the bound nonce
pub struct SubmissionEngine {
    endpoint: Arc<dyn ChainEndpoint>,
    signer: Arc<Signer>,
    builder: TransactionBuilder,
    gas: GasStrategy,
    config: SubmissionConfig,
}

impl SubmissionEngine {
    pub fn new(
        endpoint: Arc<dyn ChainEndpoint>,
        signer: Arc<Signer>,
        builder: TransactionBuilder,
        gas: GasStrategy,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            endpoint,
            signer,
            builder,
            gas,
            config,
        }
    }

    pub fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    pub fn gas(&self) -> &GasStrategy {
        &self.gas
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Price, build and sign the first payload of `record` with `nonce`.
    ///
    /// Fetches the fee suggestion, retrying transient failures with the same
    /// backoff as submissions. On error the record never reached the network.
    pub async fn prepare(
        &self,
        record: PaymentRecord,
        nonce: u64,
    ) -> Result<PendingTransaction, (TransactionStatus, FailureReason)> {
        let suggestion = self.fetch_fees().await?;
        let bid = self
            .gas
            .initial_bid(&suggestion)
            .map_err(|reason| (TransactionStatus::Failed, reason))?;
        let signed = self
            .builder
            .build_and_sign(&record, nonce, &bid, &self.signer)
            .map_err(|e| {
                (
                    TransactionStatus::Failed,
                    FailureReason::SigningFailed(e.to_string()),
                )
            })?;

        debug!(
            row = record.row,
            nonce,
            hash = %signed.hash,
            max_fee_per_gas = bid.max_fee_per_gas,
            "built transaction"
        );
        Ok(PendingTransaction::new(record, nonce, bid, signed))
    }

    async fn fetch_fees(&self) -> Result<FeeSuggestion, (TransactionStatus, FailureReason)> {
        let mut failures = 0;
        loop {
            match self.endpoint.suggested_fees().await {
                Ok(suggestion) => return Ok(suggestion),
                Err(EndpointError::Transient(message)) => {
                    failures += 1;
                    if failures >= self.config.max_transient_attempts {
                        warn!(error = %message, "fee suggestion unavailable");
                        return Err((
                            TransactionStatus::TimedOut,
                            FailureReason::SubmissionTimedOut,
                        ));
                    }
                    tokio::time::sleep(self.config.backoff(failures)).await;
                }
                Err(err) => {
                    return Err((
                        TransactionStatus::Failed,
                        FailureReason::Rejected(err.to_string()),
                    ))
                }
            }
        }
    }

    /// Send the current payload once and classify the answer.
    ///
    /// Leaves the transaction `Pending` on acceptance and `Submitted`
    /// otherwise; terminal statuses are applied by the caller.
    pub async fn step(&self, tx: &mut PendingTransaction, nonces: &NonceSequencer) -> Step {
        tx.transition(TransactionStatus::Submitted);
        tx.attempts += 1;

        match self
            .endpoint
            .send_raw_transaction(tx.signed.raw.clone())
            .await
        {
            Ok(hash) => {
                if hash != tx.signed.hash {
                    warn!(expected = %tx.signed.hash, returned = %hash, "endpoint returned unexpected hash");
                }
                if !tx.sent_hashes.contains(&hash) {
                    tx.sent_hashes.push(hash);
                }
                tx.transient_failures = 0;
                tx.last_error = None;
                tx.transition(TransactionStatus::Pending);
                debug!(%hash, "payload accepted");
                Step::Accepted
            }
            Err(err) => {
                tx.last_error = Some(err.to_string());
                self.classify(tx, err, nonces)
            }
        }
    }

    fn classify(
        &self,
        tx: &mut PendingTransaction,
        err: EndpointError,
        nonces: &NonceSequencer,
    ) -> Step {
        match err {
            EndpointError::NonceTooLow => Step::NonceTooLow,
            EndpointError::Underpriced => match self.escalate(tx, nonces) {
                Ok(()) => Step::Repriced,
                Err(reason) => Step::Terminal(TransactionStatus::Failed, reason),
            },
            EndpointError::InsufficientFunds => {
                Step::Terminal(TransactionStatus::Failed, FailureReason::InsufficientFunds)
            }
            EndpointError::Rejected(message) => {
                Step::Terminal(TransactionStatus::Failed, FailureReason::Rejected(message))
            }
            EndpointError::Transient(message) => {
                tx.transient_failures += 1;
                if tx.transient_failures >= self.config.max_transient_attempts {
                    warn!(
                        failures = tx.transient_failures,
                        error = %message,
                        "giving up after repeated transient failures"
                    );
                    Step::Terminal(TransactionStatus::TimedOut, FailureReason::SubmissionTimedOut)
                } else {
                    let delay = self.config.backoff(tx.transient_failures);
                    debug!(error = %message, ?delay, "transient failure, retrying");
                    Step::RetryAfter(delay)
                }
            }
        }
    }

    /// Replace the payload with the next escalated bid, keeping the nonce.
    pub fn escalate(
        &self,
        tx: &mut PendingTransaction,
        nonces: &NonceSequencer,
    ) -> Result<(), FailureReason> {
        let escalation = tx.escalations + 1;
        let bid = self.gas.escalate(&tx.initial_bid, escalation)?;
        let nonce = nonces.reuse_nonce(tx);
        let signed = self
            .builder
            .build_and_sign(&tx.record, nonce, &bid, &self.signer)
            .map_err(|e| FailureReason::SigningFailed(e.to_string()))?;

        info!(
            nonce,
            escalation,
            max_fee_per_gas = bid.max_fee_per_gas,
            max_priority_fee_per_gas = bid.max_priority_fee_per_gas,
            "re-priced transaction"
        );
        tx.replace_payload(bid, signed);
        tx.escalations = escalation;
        Ok(())
    }

    /// Drive [`Self::step`] until the payload is accepted or cannot be.
    ///
    /// The transaction's status is left for the caller to finish on
    /// [`SubmitOutcome::Terminal`] and [`SubmitOutcome::NonceTooLow`].
    #[instrument(skip_all, fields(row = tx.record.row, nonce = tx.nonce()))]
    pub async fn submit(&self, tx: &mut PendingTransaction, nonces: &NonceSequencer) -> SubmitOutcome {
        loop {
            match self.step(tx, nonces).await {
                Step::Accepted => return SubmitOutcome::Accepted,
                Step::RetryAfter(delay) => tokio::time::sleep(delay).await,
                Step::Repriced => continue,
                Step::Terminal(status, reason) => {
                    warn!(%status, %reason, "submission failed");
                    return SubmitOutcome::Terminal(status, reason);
                }
                Step::NonceTooLow => {
                    warn!("nonce already used on chain");
                    return SubmitOutcome::NonceTooLow;
                }
            }
        }
    }

    /// Escalate the bid and submit the replacement payload.
    pub async fn reprice(&self, tx: &mut PendingTransaction, nonces: &NonceSequencer) -> SubmitOutcome {
        if let Err(reason) = self.escalate(tx, nonces) {
            return SubmitOutcome::Terminal(TransactionStatus::Failed, reason);
        }
        self.submit(tx, nonces).await
    }
}

impl std::fmt::Debug for SubmissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionEngine")
            .field("signer", &self.signer)
            .field("builder", &self.builder)
            .field("gas", &self.gas)
            .finish_non_exhaustive()
    }
}
