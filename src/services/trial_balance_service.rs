//! Trial balance reporting
//!
//! Read-only aggregation of all entries for posted (and reversed) journals
//! on or before a date, grouped by account.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;

use crate::repos::account_repo::AccountType;
use crate::repos::journal_repo::{self, JournalRepoError};
use crate::services::transaction_service::BALANCE_TOLERANCE;

/// Errors that can occur during trial balance reporting
#[derive(Debug, Error)]
pub enum TrialBalanceError {
    #[error("Journal repository error: {0}")]
    Journal(#[from] JournalRepoError),
}

/// One account's line on the trial balance
#[derive(Debug, Clone, Serialize)]
pub struct TrialBalanceRow {
    pub account_code: String,
    pub account_name: String,
    pub account_type: String,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    pub net_balance: Decimal,
}

/// Trial balance report with ledger-wide totals
#[derive(Debug, Clone, Serialize)]
pub struct TrialBalanceReport {
    pub org_id: String,
    pub as_of_date: NaiveDate,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    pub is_balanced: bool,
}

/// Build the trial balance for an organization as of a date
pub async fn get_trial_balance(
    pool: &PgPool,
    org_id: &str,
    as_of_date: NaiveDate,
) -> Result<TrialBalanceReport, TrialBalanceError> {
    let aggregates = journal_repo::account_aggregates(pool, org_id, as_of_date).await?;

    let rows: Vec<TrialBalanceRow> = aggregates
        .into_iter()
        .map(|a| TrialBalanceRow {
            account_code: a.code,
            account_name: a.name,
            account_type: account_type_label(a.account_type).to_string(),
            total_debits: a.total_debit,
            total_credits: a.total_credit,
            net_balance: a.total_debit - a.total_credit,
        })
        .collect();

    let total_debits: Decimal = rows.iter().map(|r| r.total_debits).sum();
    let total_credits: Decimal = rows.iter().map(|r| r.total_credits).sum();
    let is_balanced = (total_debits - total_credits).abs() < BALANCE_TOLERANCE;

    Ok(TrialBalanceReport {
        org_id: org_id.to_string(),
        as_of_date,
        rows,
        total_debits,
        total_credits,
        is_balanced,
    })
}

fn account_type_label(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Asset => "asset",
        AccountType::Liability => "liability",
        AccountType::Equity => "equity",
        AccountType::Income => "income",
        AccountType::Expense => "expense",
    }
}
