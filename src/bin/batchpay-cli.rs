//! Batchpay CLI - Command-line interface for batch payments
//!
//! Reads a batch file, shows what is about to be paid, asks for confirmation
//! and sends the batch through the payment pipeline. The signer key is read
//! from `BATCHPAY_PRIVATE_KEY` (a `.env` file is honoured).

use anyhow::{bail, Context};
use batchpay::client::RpcClient;
use batchpay::config::PipelineConfig;
use batchpay::datasource::{apply_amount_format, read_batch, AmountFormat};
use batchpay::endpoint::ChainEndpoint;
use batchpay::report::{
    batch_totals, entry_line, explorer_address_url, export_batch_csv, redact_middle, BatchSummary,
};
use batchpay::types::RawPaymentRow;
use batchpay::validator::{validate_rows, TokenRegistry};
use batchpay::{BatchOrchestrator, Signer};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "batchpay-cli")]
#[command(about = "Batch payment submission for EVM chains", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $BATCHPAY_CONFIG or batchpay.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a batch file without touching the network
    Validate {
        /// Batch file (.csv or .json)
        file: PathBuf,
        /// How amounts are written in the file
        #[arg(long, value_enum, default_value_t = AmountFormat::BaseUnits)]
        amount_format: AmountFormat,
    },
    /// Send a batch of payments
    Run {
        /// Batch file (.csv or .json)
        file: PathBuf,
        /// How amounts are written in the file
        #[arg(long, value_enum, default_value_t = AmountFormat::BaseUnits)]
        amount_format: AmountFormat,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Write the per-row results as CSV to this path
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Show the signer address and its pending nonce
    Nonce,
    /// Show chain information from the endpoint
    Info,
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path),
        None => PipelineConfig::from_env(),
    };
    config.context("failed to load configuration")
}

fn load_signer() -> anyhow::Result<Signer> {
    let key = std::env::var("BATCHPAY_PRIVATE_KEY")
        .context("BATCHPAY_PRIVATE_KEY is not set")?;
    Ok(Signer::from_secret(&SecretString::new(key))?)
}

fn load_rows(
    file: &Path,
    amount_format: AmountFormat,
    registry: &TokenRegistry,
) -> anyhow::Result<Vec<RawPaymentRow>> {
    let rows = read_batch(file).with_context(|| format!("failed to read {}", file.display()))?;
    Ok(apply_amount_format(rows, amount_format, registry))
}

/// Print the batch summary; returns the number of valid rows.
fn print_summary(rows: &[RawPaymentRow], registry: &TokenRegistry) -> usize {
    let validated = validate_rows(rows, registry);
    let mut records = Vec::new();

    println!("Batch Summary");
    println!("=============");
    for result in validated {
        match result {
            Ok(record) => records.push(record),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("Valid rows: {}", records.len());
    println!("Malformed rows: {}", rows.len() - records.len());
    for total in batch_totals(&records, registry) {
        println!("Total: {}", total);
    }
    records.len()
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/n] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging if verbose
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .init();
    }

    let config = load_config(&cli)?;
    let registry = config.token_registry()?;

    match &cli.command {
        Commands::Validate {
            file,
            amount_format,
        } => {
            let rows = load_rows(file, *amount_format, &registry)?;
            let valid = print_summary(&rows, &registry);
            if valid < rows.len() {
                std::process::exit(1);
            }
        }
        Commands::Run {
            file,
            amount_format,
            yes,
            report,
        } => {
            let rows = load_rows(file, *amount_format, &registry)?;
            if rows.is_empty() {
                bail!("{} contains no payments", file.display());
            }
            let signer = load_signer()?;
            let address = signer.address();

            let client = RpcClient::from_config(&config.chain);
            let chain_id = client
                .chain_id()
                .await
                .context("failed to fetch chain id")?;
            config.chain.check_chain_id(chain_id)?;

            println!("Sending from: {}", address);
            println!("Chain ID: {}", config.chain.chain_id);
            let valid = print_summary(&rows, &registry);
            if valid == 0 {
                bail!("no valid payments to send");
            }
            if !*yes && !confirm("Confirm payment?")? {
                println!("Aborted.");
                return Ok(());
            }

            let endpoint = Arc::new(client);
            let orchestrator = BatchOrchestrator::new(endpoint, signer, &config)?;

            let cancel = orchestrator.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupted: no new payments will be sent, waiting for pending ones...");
                    cancel.cancel();
                }
            });

            let result = orchestrator
                .run(&rows, &registry)
                .await
                .context("batch failed")?;

            println!();
            println!("Results");
            println!("=======");
            for entry in &result.entries {
                println!("{}", entry_line(entry));
            }
            let summary = BatchSummary::from_result(&result);
            println!();
            println!("{}", summary);
            if let Some(reason) = &result.aborted {
                println!("⚠ Batch aborted: {}", reason);
            }

            if let Some(path) = report {
                std::fs::write(path, export_batch_csv(&result)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Report written to {}", path.display());
            }
            if let Some(explorer) = &config.chain.explorer_url {
                println!("Explorer: {}", explorer_address_url(explorer, &address));
            }

            if !summary.all_confirmed() {
                std::process::exit(1);
            }
        }
        Commands::Nonce => {
            let signer = load_signer()?;
            let client = RpcClient::from_config(&config.chain);
            let nonce = client
                .pending_nonce(signer.address())
                .await
                .context("failed to fetch pending nonce")?;
            println!("Address: {}", signer.address());
            println!("Pending nonce: {}", nonce);
        }
        Commands::Info => {
            let client = RpcClient::from_config(&config.chain);
            let chain_id = client.chain_id().await?;
            let block = client.latest_block().await?;
            let fees = client
                .suggested_fees()
                .await
                .context("failed to fetch fee suggestion")?;

            println!("Chain Information");
            println!("=================");
            println!("Endpoint: {}", redact_middle(client.endpoint(), 24, 6));
            println!("Chain ID: {} (configured: {})", chain_id, config.chain.chain_id);
            println!("Latest block: {}", block.number);
            println!("Base fee: {} wei", fees.base_fee_per_gas);
            println!("Priority fee: {} wei", fees.max_priority_fee_per_gas);
            if let Err(e) = config.chain.check_chain_id(chain_id) {
                eprintln!("⚠ {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
