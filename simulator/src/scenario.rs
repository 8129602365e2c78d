//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
///
/// Accounts are referred to by their index in `opening_balances`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// One account is opened per entry.
    pub opening_balances: Vec<i64>,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// One transfer between scenario accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSpec {
    pub from: usize,
    pub to: usize,
    pub amount: i64,
}

impl TransferSpec {
    pub fn new(from: usize, to: usize, amount: i64) -> Self {
        Self { from, to, amount }
    }
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Run one transfer and wait for it.
    Transfer(TransferSpec),
    /// Start every transfer at once and wait for all of them.
    Concurrent(Vec<TransferSpec>),
    /// Check a condition; the scenario fails if it does not hold.
    Assert(AssertCondition),
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// An account's committed balance.
    BalanceEquals { account: usize, balance: i64 },
    /// Transfers committed so far in this run.
    CommittedTransfers { count: u64 },
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: [&'static str; 4] = ["simple-transfer", "opposing-pair", "fan-in", "ring"];

    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "simple-transfer" => Ok(Self::simple_transfer()),
            "opposing-pair" => Ok(Self::opposing_pair()),
            "fan-in" => Ok(Self::fan_in()),
            "ring" => Ok(Self::ring()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one of {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    /// One transfer between two accounts.
    fn simple_transfer() -> Self {
        Self {
            name: "simple-transfer".to_string(),
            description: "A=100, B=50, transfer 10 from A to B".to_string(),
            opening_balances: vec![100, 50],
            steps: vec![
                ScenarioStep::Transfer(TransferSpec::new(0, 1, 10)),
                ScenarioStep::Assert(AssertCondition::BalanceEquals {
                    account: 0,
                    balance: 90,
                }),
                ScenarioStep::Assert(AssertCondition::BalanceEquals {
                    account: 1,
                    balance: 60,
                }),
            ],
        }
    }

    /// Concurrent transfers in both directions over one pair.
    fn opposing_pair() -> Self {
        let mut batch = Vec::new();
        for _ in 0..5 {
            batch.push(TransferSpec::new(0, 1, 10));
            batch.push(TransferSpec::new(1, 0, 10));
        }

        Self {
            name: "opposing-pair".to_string(),
            description: "5 x (A->B, 10) and 5 x (B->A, 10) at once".to_string(),
            opening_balances: vec![100, 100],
            steps: vec![
                ScenarioStep::Concurrent(batch),
                ScenarioStep::Assert(AssertCondition::BalanceEquals {
                    account: 0,
                    balance: 100,
                }),
                ScenarioStep::Assert(AssertCondition::BalanceEquals {
                    account: 1,
                    balance: 100,
                }),
                ScenarioStep::Assert(AssertCondition::CommittedTransfers { count: 10 }),
            ],
        }
    }

    /// Many senders paying one receiver.
    fn fan_in() -> Self {
        let batch = (1..=4)
            .flat_map(|sender| (0..10).map(move |_| TransferSpec::new(sender, 0, 5)))
            .collect();

        Self {
            name: "fan-in".to_string(),
            description: "4 senders pay one receiver 10 x 5 each, all at once".to_string(),
            opening_balances: vec![1_000; 5],
            steps: vec![
                ScenarioStep::Concurrent(batch),
                ScenarioStep::Assert(AssertCondition::BalanceEquals {
                    account: 0,
                    balance: 1_200,
                }),
                ScenarioStep::Assert(AssertCondition::BalanceEquals {
                    account: 4,
                    balance: 950,
                }),
                ScenarioStep::Assert(AssertCondition::CommittedTransfers { count: 40 }),
            ],
        }
    }

    /// Every account pays its neighbour, in rounds that overlap.
    fn ring() -> Self {
        let size = 5;
        let mut steps = Vec::new();
        for round in 0..3 {
            let batch = (0..size)
                .flat_map(|i| {
                    (0..4).map(move |_| TransferSpec::new(i, (i + 1) % size, round + 1))
                })
                .collect();
            steps.push(ScenarioStep::Concurrent(batch));
            steps.push(ScenarioStep::Wait { millis: 10 });
        }
        for account in 0..size {
            steps.push(ScenarioStep::Assert(AssertCondition::BalanceEquals {
                account,
                balance: 100,
            }));
        }
        steps.push(ScenarioStep::Assert(AssertCondition::CommittedTransfers { count: 60 }));

        Self {
            name: "ring".to_string(),
            description: "5 accounts each pay the next one, 3 overlapping rounds".to_string(),
            opening_balances: vec![100; size],
            steps,
        }
    }

    /// Every account index a step refers to.
    pub fn referenced_accounts(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps.iter().flat_map(|step| {
            let indexes: Vec<usize> = match step {
                ScenarioStep::Transfer(t) => vec![t.from, t.to],
                ScenarioStep::Concurrent(batch) => {
                    batch.iter().flat_map(|t| [t.from, t.to]).collect()
                }
                ScenarioStep::Assert(AssertCondition::BalanceEquals { account, .. }) => {
                    vec![*account]
                }
                _ => Vec::new(),
            };
            indexes
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_named_scenarios_load() {
        for name in Scenario::NAMES {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(scenario
                .referenced_accounts()
                .all(|i| i < scenario.opening_balances.len()));
        }
    }

    #[test]
    fn test_unknown_scenario() {
        assert!(Scenario::load("does-not-exist").is_err());
    }

    #[test]
    fn test_scenario_round_trips_through_json() {
        let scenario = Scenario::load("opposing-pair").unwrap();
        let json = serde_json::to_string(&scenario).unwrap();
        let parsed: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.steps.len(), scenario.steps.len());
    }
}
