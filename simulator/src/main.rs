//! SimpleBank Simulator
//!
//! Seeds accounts, drives concurrent transfers through the full transfer
//! path and audits the ledger afterwards.

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use simplebank_ledger::{MemoryLedger, PgLedger};
use simplebank_service::{init_tracing, LogFormat, RetryPolicy, ServiceConfig};

mod audit;
mod bank;
mod controller;
mod scenario;
mod stats;

use controller::{RandomWorkload, SimulationBackend, SimulationController};
use scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process ledger with row locks.
    Memory,
    /// PostgreSQL via DATABASE_URL or --database-url.
    Postgres,
}

/// SimpleBank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "SimpleBank concurrent transfer simulator")]
struct Args {
    /// Storage backend
    #[arg(long, value_enum, default_value = "memory")]
    backend: Backend,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Scenario to run: simple-transfer, opposing-pair, fan-in, ring
    #[arg(short, long)]
    scenario: Option<String>,

    /// Accounts to open in random mode
    #[arg(long, default_value = "10")]
    accounts: usize,

    /// Transfers to run in random mode
    #[arg(long, default_value = "1000")]
    transfers: usize,

    /// Maximum transfers in flight in random mode
    #[arg(long, default_value = "32")]
    concurrency: usize,

    /// Opening balance of each account in random mode
    #[arg(long, default_value = "100000")]
    opening_balance: i64,

    /// Largest random transfer amount
    #[arg(long, default_value = "500")]
    max_amount: i64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::from_env();
    if let Some(url) = &args.database_url {
        config.database.url = url.clone();
    }
    config.validate()?;

    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(&config.log_level, format)?;

    info!(backend = ?args.backend, "Starting SimpleBank Simulator");

    let retry = RetryPolicy::from(&config.retry_config);
    let lock_timeout = config.lock_config.lock_timeout;

    match args.backend {
        Backend::Memory => simulate(MemoryLedger::new(lock_timeout), retry, &args).await,
        Backend::Postgres => {
            let pool = config.connect_pool().await?;
            let ledger = PgLedger::new(pool, lock_timeout);
            ledger.create_schema().await?;
            simulate(ledger, retry, &args).await
        }
    }
}

async fn simulate<B: SimulationBackend>(
    ledger: B,
    retry: RetryPolicy,
    args: &Args,
) -> anyhow::Result<()> {
    let mut controller = SimulationController::new(ledger, retry, args.seed);

    if let Some(name) = &args.scenario {
        let scenario = Scenario::load(name)?;
        controller.run_scenario(&scenario).await?;
    } else {
        let workload = RandomWorkload {
            accounts: args.accounts,
            transfers: args.transfers,
            concurrency: args.concurrency,
            opening_balance: args.opening_balance,
            max_amount: args.max_amount.max(1),
        };
        controller.run_random(&workload).await?;
    }

    let summary = controller.summary().await;
    info!("Simulation complete");
    info!("Transfers attempted: {}", summary.attempted);
    info!("Committed: {}", summary.committed);
    for (code, count) in &summary.outcomes {
        info!("  {}: {}", code, count);
    }
    info!(
        "Retries: {} ({:.2} per transfer), conflicts seen: {}, left after retries: {}",
        summary.retries,
        summary.retries_per_transfer,
        summary.conflicts_seen,
        summary.conflicts_after_retries
    );
    info!("Throughput: {:.1} transfers/s", summary.throughput_per_sec);
    info!(
        "Latency min/p50/p99/max: {:.2}/{:.2}/{:.2}/{:.2}ms",
        summary.latency.min_ms,
        summary.latency.p50_ms,
        summary.latency.p99_ms,
        summary.latency.max_ms
    );
    info!(summary = %serde_json::to_string(&summary)?, "Run summary");

    let report = controller.audit().await?;
    info!(
        opening = %report.opening_total,
        closing = %report.closing_total,
        transfers = report.transfers,
        "Ledger audit"
    );
    info!(report = %serde_json::to_string(&report)?, "Ledger audit detail");

    if !report.is_consistent() {
        let violations = report.violations();
        for violation in &violations {
            error!(violation = %violation, "Ledger invariant violated");
        }
        anyhow::bail!("Ledger audit failed with {} violation(s)", violations.len());
    }

    info!("Ledger audit passed");
    Ok(())
}
