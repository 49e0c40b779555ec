//! End-to-end tests of the payment pipeline against a scripted in-memory chain

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use batchpay::config::{PipelineConfig, TokenConfig};
use batchpay::endpoint::{ChainEndpoint, EndpointError, EndpointResult, FeeSuggestion, TxReceipt};
use batchpay::types::{AbortReason, FailureReason, RawPaymentRow, TransactionStatus};
use batchpay::{BatchOrchestrator, Error, Signer};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const GWEI: u128 = 1_000_000_000;

const RECIPIENTS: [&str; 5] = [
    "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
    "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC",
    "0x90F79bf6EB2c4f870365E785982E1f101E93b906",
    "0x15d34AAf54267DB7D7c367839AAf71A00a2C6A65",
    "0x9965507D1a55bcC2695C58ba16FB37d819B0A4dc",
];

/// A payload the chain saw, accepted or not
#[derive(Debug, Clone)]
struct Sent {
    to: Address,
    nonce: u64,
    hash: B256,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
    accepted: bool,
}

#[derive(Default)]
struct ChainState {
    nonce_unavailable: bool,
    start_nonce: u64,
    nonce_queries: u32,
    /// Errors returned, in order, to sends addressed to a recipient
    scripts: HashMap<Address, VecDeque<EndpointError>>,
    /// Recipients whose transactions revert
    reverting: HashSet<Address>,
    /// Never include anything
    stalled: bool,
    sent: Vec<Sent>,
    /// Cancelled after the first accepted payload
    cancel_after_first: Option<CancellationToken>,
}

#[derive(Default)]
struct ScriptedChain {
    state: Mutex<ChainState>,
}

impl ScriptedChain {
    fn new(start_nonce: u64) -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().start_nonce = start_nonce;
        chain
    }

    fn script(&self, recipient: &str, errors: Vec<EndpointError>) {
        let mut state = self.state.lock().unwrap();
        state.scripts.insert(recipient.parse().unwrap(), errors.into());
    }

    fn sent(&self) -> Vec<Sent> {
        self.state.lock().unwrap().sent.clone()
    }

    fn sent_to(&self, recipient: &str) -> Vec<Sent> {
        let to: Address = recipient.parse().unwrap();
        self.sent().into_iter().filter(|s| s.to == to).collect()
    }

    fn accepted_nonces(&self) -> Vec<u64> {
        let mut nonces: Vec<u64> = self
            .sent()
            .iter()
            .filter(|s| s.accepted)
            .map(|s| s.nonce)
            .collect();
        nonces.dedup();
        nonces
    }
}

#[async_trait]
impl ChainEndpoint for ScriptedChain {
    async fn pending_nonce(&self, _address: Address) -> EndpointResult<u64> {
        let mut state = self.state.lock().unwrap();
        state.nonce_queries += 1;
        if state.nonce_unavailable {
            Err(EndpointError::Transient("connection refused".to_string()))
        } else {
            Ok(state.start_nonce)
        }
    }

    async fn suggested_fees(&self) -> EndpointResult<FeeSuggestion> {
        Ok(FeeSuggestion {
            base_fee_per_gas: 20 * GWEI,
            max_priority_fee_per_gas: GWEI,
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> EndpointResult<B256> {
        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
            .map_err(|e| EndpointError::Rejected(e.to_string()))?;
        let signed = envelope
            .as_eip1559()
            .ok_or_else(|| EndpointError::Rejected("not an EIP-1559 transaction".to_string()))?;
        let tx = signed.tx();
        let to = *tx.to.to().expect("call transaction");

        let mut state = self.state.lock().unwrap();
        let scripted = state.scripts.get_mut(&to).and_then(|errors| errors.pop_front());
        state.sent.push(Sent {
            to,
            nonce: tx.nonce,
            hash: *signed.hash(),
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
            accepted: scripted.is_none(),
        });

        match scripted {
            Some(err) => Err(err),
            None => {
                if let Some(token) = state.cancel_after_first.take() {
                    token.cancel();
                }
                Ok(*signed.hash())
            }
        }
    }

    async fn transaction_receipt(&self, hash: B256) -> EndpointResult<Option<TxReceipt>> {
        let state = self.state.lock().unwrap();
        if state.stalled {
            return Ok(None);
        }
        Ok(state
            .sent
            .iter()
            .find(|s| s.accepted && s.hash == hash)
            .map(|s| TxReceipt {
                transaction_hash: hash,
                success: !state.reverting.contains(&s.to),
                block_number: 100 + s.nonce,
                gas_used: 21_000,
            }))
    }
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.chain.chain_id = 31337;
    config.gas.priority_margin_wei = GWEI as u64;
    config.gas.escalation_bps = 1_250;
    config.gas.max_fee_per_gas_cap_wei = 100 * GWEI as u64;
    config.submission.max_transient_attempts = 4;
    config.submission.backoff_base_ms = 10;
    config.submission.backoff_max_ms = 100;
    config.confirmation.poll_interval_ms = 100;
    config.confirmation.inclusion_deadline_seconds = 1;
    config.confirmation.max_reprice_rounds = 2;
    config
}

fn row(recipient: &str, reference: &str) -> RawPaymentRow {
    RawPaymentRow {
        recipient: recipient.to_string(),
        amount: "1000000".to_string(),
        token: "ETH".to_string(),
        reference: reference.to_string(),
    }
}

fn rows(count: usize) -> Vec<RawPaymentRow> {
    RECIPIENTS[..count]
        .iter()
        .enumerate()
        .map(|(idx, recipient)| row(recipient, &format!("pay-{idx}")))
        .collect()
}

fn orchestrator(chain: &Arc<ScriptedChain>, config: &PipelineConfig) -> BatchOrchestrator {
    let endpoint: Arc<dyn ChainEndpoint> = chain.clone();
    BatchOrchestrator::new(endpoint, Signer::random(), config).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_results_in_input_order_with_contiguous_nonces() {
    let chain = Arc::new(ScriptedChain::new(7));
    let config = config();
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(5), &registry)
        .await
        .unwrap();

    assert_eq!(result.len(), 5);
    assert!(result.aborted.is_none());
    for (idx, entry) in result.entries.iter().enumerate() {
        assert_eq!(entry.row, idx);
        assert_eq!(entry.reference, format!("pay-{idx}"));
        assert_eq!(entry.status, TransactionStatus::Confirmed);
        assert_eq!(entry.nonce, Some(7 + idx as u64));
        assert!(entry.tx_hash.is_some());
        assert_eq!(entry.error, None);
    }
    assert_eq!(chain.accepted_nonces(), vec![7, 8, 9, 10, 11]);
    assert_eq!(chain.state.lock().unwrap().nonce_queries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_underpriced_retries_keep_nonce_and_raise_bid() {
    let chain = Arc::new(ScriptedChain::new(0));
    chain.script(
        RECIPIENTS[1],
        vec![EndpointError::Underpriced, EndpointError::Underpriced],
    );
    let config = config();
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(3), &registry)
        .await
        .unwrap();

    assert!(result
        .entries
        .iter()
        .all(|entry| entry.status == TransactionStatus::Confirmed));
    assert_eq!(result.entries[1].attempts, 3);

    let attempts = chain.sent_to(RECIPIENTS[1]);
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|s| s.nonce == 1));
    for pair in attempts.windows(2) {
        assert!(pair[1].max_fee_per_gas > pair[0].max_fee_per_gas);
        assert!(pair[1].max_priority_fee_per_gas > pair[0].max_priority_fee_per_gas);
    }
    assert_eq!(chain.accepted_nonces(), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_gas_cap_terminates_escalation() {
    let chain = Arc::new(ScriptedChain::new(0));
    chain.script(RECIPIENTS[0], vec![EndpointError::Underpriced; 50]);
    let mut config = config();
    // Initial bid is 22 gwei; the cap allows only a few escalations.
    config.gas.max_fee_per_gas_cap_wei = 40 * GWEI as u64;
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(2), &registry)
        .await
        .unwrap();

    let failed = &result.entries[0];
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(failed.error, Some(FailureReason::GasCapExceeded));
    assert_eq!(failed.nonce, None);

    let attempts = chain.sent_to(RECIPIENTS[0]);
    assert!(attempts.len() > 1);
    assert!(attempts.iter().all(|s| s.nonce == 0));
    assert!(attempts.iter().all(|s| s.max_fee_per_gas <= 40 * GWEI));
    for pair in attempts.windows(2) {
        assert!(pair[1].max_fee_per_gas > pair[0].max_fee_per_gas);
    }

    // The released nonce goes to the next payment.
    assert_eq!(result.entries[1].status, TransactionStatus::Confirmed);
    assert_eq!(result.entries[1].nonce, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_funds_leaves_no_nonce_gap() {
    let chain = Arc::new(ScriptedChain::new(40));
    chain.script(RECIPIENTS[1], vec![EndpointError::InsufficientFunds]);
    let config = config();
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(3), &registry)
        .await
        .unwrap();

    assert_eq!(result.entries[0].status, TransactionStatus::Confirmed);
    assert_eq!(result.entries[1].status, TransactionStatus::Failed);
    assert_eq!(result.entries[1].error, Some(FailureReason::InsufficientFunds));
    assert_eq!(result.entries[1].tx_hash, None);
    assert_eq!(result.entries[2].status, TransactionStatus::Confirmed);

    assert_eq!(result.entries[0].nonce, Some(40));
    assert_eq!(result.entries[1].nonce, None);
    assert_eq!(result.entries[2].nonce, Some(41));
    assert_eq!(chain.accepted_nonces(), vec![40, 41]);
    assert!(result.aborted.is_none());
}

#[tokio::test]
async fn test_nonce_unavailable_submits_nothing() {
    let chain = Arc::new(ScriptedChain::new(0));
    chain.state.lock().unwrap().nonce_unavailable = true;
    let config = config();
    let registry = config.token_registry().unwrap();

    let err = orchestrator(&chain, &config)
        .run(&rows(3), &registry)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NonceUnavailable(_)));
    assert!(chain.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stuck_transaction_reprices_each_round_then_times_out() {
    let chain = Arc::new(ScriptedChain::new(3));
    chain.state.lock().unwrap().stalled = true;
    let config = config();
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(1), &registry)
        .await
        .unwrap();

    let entry = &result.entries[0];
    assert_eq!(entry.status, TransactionStatus::TimedOut);
    assert_eq!(entry.error, Some(FailureReason::InclusionTimedOut));
    assert_eq!(entry.nonce, Some(3));

    // The first send plus one replacement per re-price round.
    let attempts = chain.sent();
    assert_eq!(attempts.len(), 1 + config.confirmation.max_reprice_rounds as usize);
    assert!(attempts.iter().all(|s| s.nonce == 3 && s.accepted));
    for pair in attempts.windows(2) {
        assert!(pair[1].max_fee_per_gas > pair[0].max_fee_per_gas);
        assert_ne!(pair[1].hash, pair[0].hash);
    }
    assert_eq!(entry.tx_hash, Some(attempts[attempts.len() - 1].hash));
}

#[tokio::test(start_paused = true)]
async fn test_nonce_too_low_aborts_remaining_records() {
    let chain = Arc::new(ScriptedChain::new(5));
    chain.script(RECIPIENTS[1], vec![EndpointError::NonceTooLow]);
    let config = config();
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(4), &registry)
        .await
        .unwrap();

    assert_eq!(result.aborted, Some(AbortReason::NonceTooLow { nonce: 6 }));
    assert_eq!(result.len(), 4);
    // Accepted before the abort: still tracked to completion.
    assert_eq!(result.entries[0].status, TransactionStatus::Confirmed);
    assert_eq!(result.entries[1].error, Some(FailureReason::NonceTooLow));
    for entry in &result.entries[2..] {
        assert_eq!(entry.status, TransactionStatus::Failed);
        assert_eq!(entry.error, Some(FailureReason::BatchAborted));
        assert_eq!(entry.nonce, None);
    }
    assert!(chain.sent_to(RECIPIENTS[2]).is_empty());
    assert!(chain.sent_to(RECIPIENTS[3]).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_new_submissions() {
    let chain = Arc::new(ScriptedChain::new(0));
    let config = config();
    let registry = config.token_registry().unwrap();
    let orchestrator = orchestrator(&chain, &config);
    chain.state.lock().unwrap().cancel_after_first = Some(orchestrator.cancellation_token());

    let result = orchestrator.run(&rows(3), &registry).await.unwrap();

    assert_eq!(result.aborted, Some(AbortReason::Cancelled));
    assert_eq!(result.entries[0].status, TransactionStatus::Confirmed);
    assert_eq!(result.entries[1].error, Some(FailureReason::BatchAborted));
    assert_eq!(result.entries[2].error, Some(FailureReason::BatchAborted));
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_resend_same_payload() {
    let chain = Arc::new(ScriptedChain::new(0));
    chain.script(
        RECIPIENTS[0],
        vec![
            EndpointError::Transient("502 Bad Gateway".to_string()),
            EndpointError::Transient("connection reset".to_string()),
        ],
    );
    let config = config();
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(1), &registry)
        .await
        .unwrap();

    assert_eq!(result.entries[0].status, TransactionStatus::Confirmed);
    let attempts = chain.sent();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|s| s.hash == attempts[0].hash));
}

#[tokio::test(start_paused = true)]
async fn test_persistent_transient_errors_time_out() {
    let chain = Arc::new(ScriptedChain::new(0));
    chain.script(
        RECIPIENTS[0],
        vec![EndpointError::Transient("503".to_string()); 10],
    );
    let config = config();
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(2), &registry)
        .await
        .unwrap();

    assert_eq!(result.entries[0].status, TransactionStatus::TimedOut);
    assert_eq!(result.entries[0].error, Some(FailureReason::SubmissionTimedOut));
    assert_eq!(
        chain.sent_to(RECIPIENTS[0]).len(),
        config.submission.max_transient_attempts as usize
    );
    assert_eq!(result.entries[1].nonce, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_reverted_payment_is_failed() {
    let chain = Arc::new(ScriptedChain::new(0));
    chain
        .state
        .lock()
        .unwrap()
        .reverting
        .insert(RECIPIENTS[0].parse().unwrap());
    let config = config();
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(2), &registry)
        .await
        .unwrap();

    assert_eq!(result.entries[0].status, TransactionStatus::Failed);
    assert_eq!(result.entries[0].error, Some(FailureReason::ExecutionReverted));
    assert_eq!(result.entries[0].nonce, Some(0));
    assert_eq!(result.entries[1].status, TransactionStatus::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_rows_are_reported_in_place() {
    let chain = Arc::new(ScriptedChain::new(0));
    let config = config();
    let registry = config.token_registry().unwrap();
    let mut batch = rows(3);
    // All-lowercase address carries no checksum.
    batch[1].recipient = RECIPIENTS[1].to_lowercase();
    batch.insert(2, row(RECIPIENTS[3], "zero"));
    batch[2].amount = "0".to_string();

    let result = orchestrator(&chain, &config)
        .run(&batch, &registry)
        .await
        .unwrap();

    assert_eq!(result.len(), 4);
    let statuses: Vec<_> = result.entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            TransactionStatus::Confirmed,
            TransactionStatus::Failed,
            TransactionStatus::Failed,
            TransactionStatus::Confirmed,
        ]
    );
    assert!(matches!(result.entries[1].error, Some(FailureReason::MalformedRecord(_))));
    assert!(matches!(result.entries[2].error, Some(FailureReason::MalformedRecord(_))));
    assert_eq!(result.entries[3].nonce, Some(1));
    assert_eq!(chain.accepted_nonces(), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_recipient_outside_allowlist_is_not_paid() {
    let chain = Arc::new(ScriptedChain::new(0));
    let mut config = config();
    config.recipients = Some(vec![RECIPIENTS[0].to_string(), RECIPIENTS[2].to_string()]);
    let registry = config.token_registry().unwrap();

    let result = orchestrator(&chain, &config)
        .run(&rows(3), &registry)
        .await
        .unwrap();

    assert_eq!(result.entries[0].status, TransactionStatus::Confirmed);
    assert_eq!(
        result.entries[1].error,
        Some(FailureReason::MalformedRecord(
            "recipient is not an allowed payee".to_string()
        ))
    );
    assert_eq!(result.entries[2].nonce, Some(1));
    assert!(chain.sent_to(RECIPIENTS[1]).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_token_payment_calls_contract() {
    let chain = Arc::new(ScriptedChain::new(0));
    let mut config = config();
    let usdc = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
    config.tokens = vec![TokenConfig {
        symbol: "USDC".to_string(),
        address: Some(usdc.to_string()),
        decimals: 6,
    }];
    let registry = config.token_registry().unwrap();
    let mut batch = rows(1);
    batch[0].token = "USDC".to_string();

    let result = orchestrator(&chain, &config)
        .run(&batch, &registry)
        .await
        .unwrap();

    assert_eq!(result.entries[0].status, TransactionStatus::Confirmed);
    assert_eq!(chain.sent_to(usdc).len(), 1);
    assert!(chain.sent_to(RECIPIENTS[0]).is_empty());
}
