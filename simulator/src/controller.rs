//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use simplebank_common::Currency;
use simplebank_ledger::{LedgerBackend, LedgerQueries, ScopeRunner, TransferEngine};
use simplebank_service::{RetryPolicy, TransferProcessor, TransferRequest};

use crate::audit::{audit, AuditReport};
use crate::bank::{CustomerFactory, SimulatedCustomer};
use crate::scenario::{AssertCondition, Scenario, ScenarioStep, TransferSpec};
use crate::stats::{RunStats, RunSummary};

/// Storage the simulator can drive.
pub trait SimulationBackend: LedgerBackend + LedgerQueries + Clone + 'static {}

impl<B: LedgerBackend + LedgerQueries + Clone + 'static> SimulationBackend for B {}

type Processor<B> = TransferProcessor<B, ScopeRunner<B>>;

/// Parameters of a randomly generated workload.
#[derive(Debug, Clone)]
pub struct RandomWorkload {
    pub accounts: usize,
    pub transfers: usize,
    pub concurrency: usize,
    pub opening_balance: i64,
    pub max_amount: i64,
}

/// Controls the simulation.
pub struct SimulationController<B> {
    /// Ledger being exercised.
    ledger: B,
    /// Guard, engine and retries, shared with transfer tasks.
    processor: Arc<Processor<B>>,
    /// Currency of every simulated account.
    currency: Currency,
    /// Random number generator.
    rng: StdRng,
    /// Tag appended to owner names.
    run_tag: String,
    /// Customers opened for the current run.
    customers: Vec<SimulatedCustomer>,
    /// Outcomes of the transfers issued so far.
    stats: Arc<Mutex<RunStats>>,
    /// When the current run started.
    started: Option<Instant>,
}

impl<B: SimulationBackend> SimulationController<B> {
    /// Create a new simulation controller.
    pub fn new(ledger: B, retry: RetryPolicy, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let run_tag = format!("{:08x}", rng.gen::<u32>());
        let engine = TransferEngine::new(ScopeRunner::new(ledger.clone()));

        Self {
            processor: Arc::new(TransferProcessor::new(ledger.clone(), engine, retry)),
            ledger,
            currency: Currency::usd(),
            rng,
            run_tag,
            customers: Vec::new(),
            stats: Arc::new(Mutex::new(RunStats::new())),
            started: None,
        }
    }

    /// Open one account per opening balance.
    pub async fn initialize(&mut self, opening_balances: &[i64]) -> anyhow::Result<()> {
        info!(accounts = opening_balances.len(), run_tag = %self.run_tag, "Opening accounts");

        self.customers = CustomerFactory::create_customers(
            &self.ledger,
            opening_balances,
            &self.currency,
            &self.run_tag,
        )
        .await?;

        for customer in &self.customers {
            info!(
                account = %customer.account_id,
                owner = %customer.owner,
                balance = customer.opening_balance,
                "Account opened"
            );
        }

        self.started = Some(Instant::now());
        Ok(())
    }

    /// Run a scenario.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(scenario = %scenario.name, description = %scenario.description, "Running scenario");

        if let Some(index) = scenario
            .referenced_accounts()
            .find(|i| *i >= scenario.opening_balances.len())
        {
            anyhow::bail!("Scenario {} refers to unknown account #{}", scenario.name, index);
        }

        self.initialize(&scenario.opening_balances).await?;

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        Ok(())
    }

    /// Run random transfers between `workload.accounts` accounts with at
    /// most `workload.concurrency` in flight.
    pub async fn run_random(&mut self, workload: &RandomWorkload) -> anyhow::Result<()> {
        if workload.accounts < 2 {
            anyhow::bail!("Random mode needs at least 2 accounts");
        }
        info!(
            accounts = workload.accounts,
            transfers = workload.transfers,
            concurrency = workload.concurrency,
            "Running random workload"
        );

        self.initialize(&vec![workload.opening_balance; workload.accounts])
            .await?;

        let batch: Vec<TransferSpec> = (0..workload.transfers)
            .map(|_| {
                let from = self.rng.gen_range(0..workload.accounts);
                let mut to = self.rng.gen_range(0..workload.accounts);
                while to == from {
                    to = self.rng.gen_range(0..workload.accounts);
                }
                TransferSpec::new(from, to, self.rng.gen_range(1..=workload.max_amount))
            })
            .collect();

        self.run_batch(&batch, workload.concurrency.max(1)).await
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::Transfer(spec) => {
                self.run_batch(std::slice::from_ref(spec), 1).await?;
            }
            ScenarioStep::Concurrent(batch) => {
                self.run_batch(batch, batch.len().max(1)).await?;
            }
            ScenarioStep::Assert(condition) => self.check(condition).await?,
        }

        Ok(())
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::BalanceEquals { account, balance } => {
                let customer = self.customer(*account)?;
                let actual = self.ledger.get_account(customer.account_id).await?.balance;
                if actual != *balance {
                    anyhow::bail!(
                        "Account {} balance is {}, expected {}",
                        customer.account_id,
                        actual,
                        balance
                    );
                }
                info!(account = %customer.account_id, balance = actual, "Balance assertion passed");
            }
            AssertCondition::CommittedTransfers { count } => {
                let actual = self.stats.lock().await.committed();
                if actual != *count {
                    anyhow::bail!("{} transfers committed, expected {}", actual, count);
                }
                info!(count = actual, "Transfer count assertion passed");
            }
        }
        Ok(())
    }

    /// Run transfers with bounded concurrency and wait for all of them.
    async fn run_batch(&self, batch: &[TransferSpec], concurrency: usize) -> anyhow::Result<()> {
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(batch.len());

        for spec in batch {
            let from = self.customer(spec.from)?;
            let to = self.customer(spec.to)?;
            let principal = from.owner.clone();
            let request = TransferRequest::new(
                from.account_id,
                to.account_id,
                spec.amount,
                self.currency.clone(),
            );
            let processor = Arc::clone(&self.processor);
            let stats = Arc::clone(&self.stats);
            let permit = Arc::clone(&permits).acquire_owned().await?;

            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let outcome = processor.process(&principal, &request).await;
                let latency = started.elapsed();
                drop(permit);

                if let Err(e) = &outcome {
                    warn!(
                        from = %request.from_account_id,
                        to = %request.to_account_id,
                        code = e.error_code(),
                        error = %e,
                        "Transfer failed"
                    );
                }
                stats.lock().await.record(&outcome, latency);
            }));
        }

        for handle in handles {
            handle.await?;
        }
        Ok(())
    }

    fn customer(&self, index: usize) -> anyhow::Result<&SimulatedCustomer> {
        self.customers
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("Scenario refers to unknown account #{}", index))
    }

    /// Audit the accounts of the current run.
    pub async fn audit(&self) -> anyhow::Result<AuditReport> {
        audit(&self.ledger, &self.customers, &self.currency).await
    }

    /// Outcome counts, retries and latency since accounts were opened.
    pub async fn summary(&self) -> RunSummary {
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        self.stats
            .lock()
            .await
            .summarize(&self.processor.metrics().snapshot(), elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplebank_ledger::MemoryLedger;
    use std::time::Duration;

    fn controller() -> SimulationController<MemoryLedger> {
        let retry = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5));
        SimulationController::new(MemoryLedger::default(), retry, Some(7))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_named_scenarios_pass_and_audit_clean() {
        for name in Scenario::NAMES {
            let mut controller = controller();
            let scenario = Scenario::load(name).unwrap();

            controller.run_scenario(&scenario).await.unwrap();

            let report = controller.audit().await.unwrap();
            assert!(report.is_consistent(), "{}: {:?}", name, report.violations());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_random_workload_conserves_money() {
        let mut controller = controller();
        let workload = RandomWorkload {
            accounts: 6,
            transfers: 200,
            concurrency: 16,
            opening_balance: 1_000,
            max_amount: 50,
        };

        controller.run_random(&workload).await.unwrap();

        let summary = controller.summary().await;
        assert_eq!(summary.attempted, 200);
        assert_eq!(summary.retries, summary.conflicts_seen - summary.conflicts_after_retries);
        let report = controller.audit().await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.violations());
        assert_eq!(report.closing_total.minor_units, 6_000);
        assert_eq!(report.transfers as u64, summary.committed);
    }

    #[tokio::test]
    async fn test_failed_assertion_is_an_error() {
        let mut controller = controller();
        let scenario = Scenario {
            name: "wrong".to_string(),
            description: "expects the wrong balance".to_string(),
            opening_balances: vec![100, 0],
            steps: vec![
                ScenarioStep::Transfer(TransferSpec::new(0, 1, 10)),
                ScenarioStep::Assert(AssertCondition::BalanceEquals {
                    account: 0,
                    balance: 100,
                }),
            ],
        };

        assert!(controller.run_scenario(&scenario).await.is_err());
    }
}
