//! Batch payouts example: two USDC payments and one ETH payment
use batchpay::client::RpcClient;
use batchpay::config::{PipelineConfig, TokenConfig};
use batchpay::report::{entry_line, BatchSummary};
use batchpay::types::RawPaymentRow;
use batchpay::{BatchOrchestrator, Signer};
use secrecy::SecretString;
use std::sync::Arc;
//
#[tokio::main]
async fn main() -> batchpay::Result<()> {
	tracing_subscriber::fmt::init();
	//
	let mut config = PipelineConfig::default();
	config.chain.chain_id = 31337;
	config.chain.rpc_url = "http://localhost:8545".to_string();
	config.tokens = vec![
		TokenConfig { symbol: "ETH".into(), address: None, decimals: 18 },
		TokenConfig {
			symbol: "USDC".into(),
			address: Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".into()),
			decimals: 6,
		},
	];
	let registry = config.token_registry()?;
	//
	// Anvil development account #0
	let signer = Signer::from_secret(&SecretString::new(
		"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
	))?;
	//
	let payouts = vec![
		RawPaymentRow {
			recipient: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".into(),
			amount: "12500000".into(),
			token: "USDC".into(),
			reference: "Payroll batch A".into(),
		},
		RawPaymentRow {
			recipient: "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC".into(),
			amount: "5000000".into(),
			token: "USDC".into(),
			reference: "Reimbursement #42".into(),
		},
		RawPaymentRow {
			recipient: "0x90F79bf6EB2c4f870365E785982E1f101E93b906".into(),
			amount: "10000000000000000".into(),
			token: "ETH".into(),
			reference: "Gas top-up".into(),
		},
	];
	//
	let endpoint = Arc::new(RpcClient::from_config(&config.chain));
	let orchestrator = BatchOrchestrator::new(endpoint, signer, &config)?;
	let result = orchestrator.run(&payouts, &registry).await?;
	//
	for entry in &result.entries {
		println!("{}", entry_line(entry));
	}
	println!("{}", BatchSummary::from_result(&result));
	//
	Ok(())
}
