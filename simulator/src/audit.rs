//! Post-run ledger audit.
//!
//! Reads back every simulated account with its entries and transfers and
//! checks the double-entry invariants hold for the set as a whole.

use std::collections::BTreeSet;

use anyhow::Context;
use serde::Serialize;

use simplebank_common::{AccountId, Currency, Money, TransferId};
use simplebank_ledger::{Entry, EntryType, LedgerQueries, Page, Transfer};

use crate::bank::SimulatedCustomer;

/// Outcome of an audit.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    /// Sum of opening balances.
    pub opening_total: Money,
    /// Sum of balances now.
    pub closing_total: Money,
    /// Distinct transfers touching the audited accounts.
    pub transfers: usize,
    /// Debit entries on the audited accounts.
    pub debits: usize,
    /// Credit entries on the audited accounts.
    pub credits: usize,
    /// Sum of all entry amounts.
    pub entry_sum: i64,
    /// Accounts whose balance is not opening balance plus entries.
    pub drifted_accounts: Vec<AccountId>,
}

impl AuditReport {
    fn empty(currency: Currency) -> Self {
        Self {
            opening_total: Money::zero(currency.clone()),
            closing_total: Money::zero(currency),
            transfers: 0,
            debits: 0,
            credits: 0,
            entry_sum: 0,
            drifted_accounts: Vec::new(),
        }
    }

    /// Human-readable descriptions of every violated invariant.
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.opening_total != self.closing_total {
            violations.push(format!(
                "total balance changed: {} -> {}",
                self.opening_total, self.closing_total
            ));
        }
        if self.debits != self.transfers || self.credits != self.transfers {
            violations.push(format!(
                "{} debits and {} credits for {} transfers",
                self.debits, self.credits, self.transfers
            ));
        }
        if self.entry_sum != 0 {
            violations.push(format!("entries sum to {}", self.entry_sum));
        }
        for id in &self.drifted_accounts {
            violations.push(format!("account {} balance does not match its entries", id));
        }
        violations
    }

    pub fn is_consistent(&self) -> bool {
        self.violations().is_empty()
    }
}

/// Audit the accounts opened for a run. All accounts must share
/// `currency`.
pub async fn audit<Q: LedgerQueries>(
    ledger: &Q,
    customers: &[SimulatedCustomer],
    currency: &Currency,
) -> anyhow::Result<AuditReport> {
    let mut report = AuditReport::empty(currency.clone());
    let mut transfer_ids: BTreeSet<TransferId> = BTreeSet::new();

    for customer in customers {
        let id = customer.account_id;
        let account = ledger.get_account(id).await?;
        let entries = all_entries(ledger, id).await?;
        let entry_total: i64 = entries.iter().map(|e| e.amount).sum();

        let opening = Money::new(customer.opening_balance, account.currency.clone());
        report.opening_total = report
            .opening_total
            .checked_add(&opening)
            .with_context(|| format!("cannot add opening balance {} of account {}", opening, id))?;
        report.closing_total = report
            .closing_total
            .checked_add(&account.balance())
            .with_context(|| format!("cannot add balance {} of account {}", account.balance(), id))?;

        for entry in &entries {
            match entry.entry_type() {
                EntryType::Debit => report.debits += 1,
                EntryType::Credit => report.credits += 1,
            }
        }
        report.entry_sum += entry_total;
        if account.balance != customer.opening_balance + entry_total {
            report.drifted_accounts.push(id);
        }

        for transfer in all_transfers(ledger, id).await? {
            transfer_ids.insert(transfer.id);
        }
    }

    report.transfers = transfer_ids.len();
    Ok(report)
}

async fn all_entries<Q: LedgerQueries>(ledger: &Q, id: AccountId) -> anyhow::Result<Vec<Entry>> {
    let mut all = Vec::new();
    let mut page = Page::first();
    loop {
        let batch = ledger.list_entries(id, page).await?;
        let done = (batch.len() as i64) < page.limit;
        all.extend(batch);
        if done {
            return Ok(all);
        }
        page = page.next();
    }
}

async fn all_transfers<Q: LedgerQueries>(
    ledger: &Q,
    id: AccountId,
) -> anyhow::Result<Vec<Transfer>> {
    let mut all = Vec::new();
    let mut page = Page::first();
    loop {
        let batch = ledger.list_transfers(id, id, page).await?;
        let done = (batch.len() as i64) < page.limit;
        all.extend(batch);
        if done {
            return Ok(all);
        }
        page = page.next();
    }
}
