//! Simulated customers and their accounts.

use simplebank_common::{AccountId, Currency, Owner};
use simplebank_ledger::{LedgerQueries, NewAccount};

/// A customer with one account opened for the simulation.
#[derive(Debug, Clone)]
pub struct SimulatedCustomer {
    /// Owner of the account; also the principal for transfers out of it.
    pub owner: Owner,
    /// The customer's account.
    pub account_id: AccountId,
    /// Balance the account was opened with.
    pub opening_balance: i64,
}

/// Customer factory for seeding the ledger.
pub struct CustomerFactory;

impl CustomerFactory {
    const NAMES: [&'static str; 10] = [
        "alpha", "beta", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india",
        "juliet",
    ];

    /// Open one account per entry of `balances`.
    ///
    /// Owner names carry `run_tag` so repeated runs against the same
    /// database do not share principals.
    pub async fn create_customers<Q: LedgerQueries>(
        ledger: &Q,
        balances: &[i64],
        currency: &Currency,
        run_tag: &str,
    ) -> anyhow::Result<Vec<SimulatedCustomer>> {
        let mut customers = Vec::with_capacity(balances.len());
        for (i, balance) in balances.iter().enumerate() {
            let owner = Owner::new(Self::owner_name(i, run_tag));
            let account = ledger
                .create_account(NewAccount::new(owner.clone(), currency.clone(), *balance))
                .await?;
            customers.push(SimulatedCustomer {
                owner,
                account_id: account.id,
                opening_balance: *balance,
            });
        }
        Ok(customers)
    }

    fn owner_name(index: usize, run_tag: &str) -> String {
        match Self::NAMES.get(index) {
            Some(name) => format!("{}_{}", name, run_tag),
            None => format!("customer{}_{}", index + 1, run_tag),
        }
    }
}
