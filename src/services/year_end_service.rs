//! Year-end closing
//!
//! Rolls the fiscal year's profit & loss into retained earnings through a
//! closing journal, then force-closes every period of the year. The closing
//! run record transitions processing -> completed | failed and is never left
//! in processing.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::repos::account_repo::{AccountError, AccountType};
use crate::repos::audit_repo::{self, AuditRepoError};
use crate::repos::journal_repo::{
    self, AccountAggregate, EntryDraft, JournalDraft, JournalRepoError,
};
use crate::repos::period_repo::{self, PeriodRepoError};
use crate::repos::profile_repo::ProfileError;
use crate::services::period_service::{self, PeriodError};

/// Balances below this magnitude are not worth a closing entry.
const TRIVIAL_BALANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Errors that can occur during year-end closing
#[derive(Debug, Error)]
pub enum YearEndError {
    #[error("Fiscal year {fiscal_year} is already closed for org_id={org_id}")]
    YearAlreadyClosed { org_id: String, fiscal_year: i32 },

    #[error("No periods exist for fiscal year {fiscal_year} of org_id={org_id}")]
    NoPeriodsForYear { org_id: String, fiscal_year: i32 },

    #[error("Closing run failed: {0}")]
    ClosingRunFailed(String),

    #[error("Period error: {0}")]
    Period(#[from] PeriodError),

    #[error("Period repository error: {0}")]
    PeriodRepo(#[from] PeriodRepoError),

    #[error("Journal repository error: {0}")]
    Journal(#[from] JournalRepoError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditRepoError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a completed year-end close
#[derive(Debug, Clone, Serialize)]
pub struct YearEndSummary {
    pub closing_run_id: Uuid,
    pub closing_journal_id: Uuid,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub net_income: Decimal,
    pub periods_closed: u64,
}

/// Derived profit & loss totals plus the closing entries that zero the
/// income and expense accounts
#[derive(Debug, Clone)]
pub struct ClosingComputation {
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub net_income: Decimal,
    pub entries: Vec<EntryDraft>,
}

/// Perform the year-end close for a fiscal year
pub async fn perform_year_end_close(
    pool: &PgPool,
    org_id: &str,
    fiscal_year: i32,
    closing_date: NaiveDate,
    actor_id: &str,
) -> Result<YearEndSummary, YearEndError> {
    if period_repo::find_completed_closing_run(pool, org_id, fiscal_year)
        .await?
        .is_some()
    {
        return Err(YearEndError::YearAlreadyClosed {
            org_id: org_id.to_string(),
            fiscal_year,
        });
    }

    let (year_start, year_end) = period_repo::fiscal_year_range(pool, org_id, fiscal_year)
        .await?
        .ok_or_else(|| YearEndError::NoPeriodsForYear {
            org_id: org_id.to_string(),
            fiscal_year,
        })?;

    let profile = period_service::get_or_create_profile(pool, org_id).await?;
    let run_id = period_repo::insert_closing_run(pool, org_id, fiscal_year).await?;

    let result = execute_close(
        pool,
        org_id,
        fiscal_year,
        year_start,
        year_end,
        closing_date,
        actor_id,
        profile.retained_earnings_account_id,
    )
    .await;

    match result {
        Ok((computation, journal_id, periods_closed)) => {
            period_repo::complete_closing_run(
                pool,
                run_id,
                computation.total_income,
                computation.total_expenses,
                computation.net_income,
                journal_id,
            )
            .await?;

            tracing::info!(
                org_id = %org_id,
                fiscal_year = fiscal_year,
                net_income = %computation.net_income,
                closing_journal_id = %journal_id,
                "Year-end close completed"
            );

            Ok(YearEndSummary {
                closing_run_id: run_id,
                closing_journal_id: journal_id,
                total_income: computation.total_income,
                total_expenses: computation.total_expenses,
                net_income: computation.net_income,
                periods_closed,
            })
        }
        Err(e) => {
            // The run record must never be left in processing.
            period_repo::fail_closing_run(pool, run_id, &e.to_string()).await?;
            tracing::error!(
                org_id = %org_id,
                fiscal_year = fiscal_year,
                error = %e,
                "Year-end close failed"
            );
            Err(e)
        }
    }
}

/// The transactional body of the close: closing journal plus period flips
/// commit or roll back together.
async fn execute_close(
    pool: &PgPool,
    org_id: &str,
    fiscal_year: i32,
    year_start: NaiveDate,
    year_end: NaiveDate,
    closing_date: NaiveDate,
    actor_id: &str,
    retained_earnings_account_id: Uuid,
) -> Result<(ClosingComputation, Uuid, u64), YearEndError> {
    let mut tx = pool.begin().await?;

    let aggregates =
        journal_repo::profit_and_loss_aggregates_tx(&mut tx, org_id, year_start, year_end).await?;
    let computation = compute_closing_entries(&aggregates, retained_earnings_account_id);

    let journal_id = journal_repo::insert_journal_tx(
        &mut tx,
        &JournalDraft {
            org_id: org_id.to_string(),
            description: format!("Year-end close FY{}", fiscal_year),
            posting_date: closing_date,
            source_type: Some("year_end_close".to_string()),
            source_id: Some(fiscal_year.to_string()),
            reversal_of: None,
            created_by: actor_id.to_string(),
            entries: computation.entries.clone(),
        },
    )
    .await?;

    let periods_closed =
        period_repo::close_fiscal_year_tx(&mut tx, org_id, fiscal_year, actor_id).await?;

    audit_repo::insert_tx(
        &mut tx,
        org_id,
        actor_id,
        "year_end_close",
        "fiscal_year",
        Some(&fiscal_year.to_string()),
        Some(&serde_json::json!({
            "closing_journal_id": journal_id,
            "net_income": computation.net_income,
            "periods_closed": periods_closed,
        })),
    )
    .await?;

    tx.commit().await?;

    Ok((computation, journal_id, periods_closed))
}

/// Build closing entries from income/expense aggregates.
///
/// Each account's balance is credits minus debits; income accounts sit
/// credit-heavy and expenses debit-heavy. Every non-trivial balance gets one
/// offsetting entry, and the net lands on retained earnings (credit for net
/// income, debit for net loss).
pub fn compute_closing_entries(
    aggregates: &[AccountAggregate],
    retained_earnings_account_id: Uuid,
) -> ClosingComputation {
    let mut total_income = Decimal::ZERO;
    let mut total_expenses = Decimal::ZERO;
    let mut entries = Vec::new();

    for aggregate in aggregates {
        let balance = aggregate.total_credit - aggregate.total_debit;

        match aggregate.account_type {
            AccountType::Income => total_income += balance,
            AccountType::Expense => total_expenses += -balance,
            _ => continue,
        }

        if balance.abs() <= TRIVIAL_BALANCE {
            continue;
        }

        let (debit, credit) = if balance > Decimal::ZERO {
            (balance, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -balance)
        };

        entries.push(EntryDraft {
            account_id: aggregate.account_id,
            debit_amount: debit,
            credit_amount: credit,
            memo: Some(format!("Close {}", aggregate.code)),
        });
    }

    let net_income = total_income - total_expenses;

    if net_income.abs() > TRIVIAL_BALANCE {
        let (debit, credit) = if net_income > Decimal::ZERO {
            (Decimal::ZERO, net_income)
        } else {
            (-net_income, Decimal::ZERO)
        };

        entries.push(EntryDraft {
            account_id: retained_earnings_account_id,
            debit_amount: debit,
            credit_amount: credit,
            memo: Some("Net income to retained earnings".to_string()),
        });
    }

    ClosingComputation {
        total_income,
        total_expenses,
        net_income,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn aggregate(account_type: AccountType, debit: Decimal, credit: Decimal) -> AccountAggregate {
        AccountAggregate {
            account_id: Uuid::new_v4(),
            code: "4000".to_string(),
            name: "Test".to_string(),
            account_type,
            total_debit: debit,
            total_credit: credit,
        }
    }

    #[test]
    fn test_net_income_rolls_to_retained_earnings() {
        let retained = Uuid::new_v4();
        let aggregates = vec![
            aggregate(AccountType::Income, dec!(0), dec!(1000000)),
            aggregate(AccountType::Expense, dec!(600000), dec!(0)),
        ];

        let computation = compute_closing_entries(&aggregates, retained);

        assert_eq!(computation.total_income, dec!(1000000));
        assert_eq!(computation.total_expenses, dec!(600000));
        assert_eq!(computation.net_income, dec!(400000));

        // Income account debited closed, expense account credited closed,
        // retained earnings credited with the net.
        assert_eq!(computation.entries.len(), 3);
        let retained_entry = computation
            .entries
            .iter()
            .find(|e| e.account_id == retained)
            .unwrap();
        assert_eq!(retained_entry.credit_amount, dec!(400000));
        assert_eq!(retained_entry.debit_amount, Decimal::ZERO);
    }

    #[test]
    fn test_net_loss_debits_retained_earnings() {
        let retained = Uuid::new_v4();
        let aggregates = vec![
            aggregate(AccountType::Income, dec!(0), dec!(100)),
            aggregate(AccountType::Expense, dec!(250), dec!(0)),
        ];

        let computation = compute_closing_entries(&aggregates, retained);

        assert_eq!(computation.net_income, dec!(-150));
        let retained_entry = computation
            .entries
            .iter()
            .find(|e| e.account_id == retained)
            .unwrap();
        assert_eq!(retained_entry.debit_amount, dec!(150));
    }

    #[test]
    fn test_closing_entries_balance() {
        let retained = Uuid::new_v4();
        let aggregates = vec![
            aggregate(AccountType::Income, dec!(120.50), dec!(900.25)),
            aggregate(AccountType::Income, dec!(0), dec!(44.19)),
            aggregate(AccountType::Expense, dec!(310.77), dec!(12.00)),
        ];

        let computation = compute_closing_entries(&aggregates, retained);

        let debits: Decimal = computation.entries.iter().map(|e| e.debit_amount).sum();
        let credits: Decimal = computation.entries.iter().map(|e| e.credit_amount).sum();
        assert_eq!(debits, credits);
    }

    #[test]
    fn test_trivial_balances_are_skipped() {
        let retained = Uuid::new_v4();
        let aggregates = vec![aggregate(AccountType::Income, dec!(0), dec!(0.01))];

        let computation = compute_closing_entries(&aggregates, retained);
        assert!(computation.entries.is_empty());
        assert_eq!(computation.total_income, dec!(0.01));
    }

    #[test]
    fn test_non_pl_accounts_are_ignored() {
        let retained = Uuid::new_v4();
        let aggregates = vec![aggregate(AccountType::Asset, dec!(500), dec!(0))];

        let computation = compute_closing_entries(&aggregates, retained);
        assert!(computation.entries.is_empty());
        assert_eq!(computation.net_income, Decimal::ZERO);
    }
}
