//! Integration tests for year-end closing
//!
//! The canonical scenario: income 1,000,000 and expenses 600,000 over the
//! fiscal year roll up to 400,000 of retained earnings, the closing journal
//! balances, and all twelve periods transition to closed.

mod common;

use chrono::NaiveDate;
use common::{get_test_pool, post_journal, seed_calendar_periods, setup_account, unique_org};
use ledger_core_rs::repos::account_repo::AccountType;
use ledger_core_rs::repos::period_repo;
use ledger_core_rs::services::period_service;
use ledger_core_rs::services::year_end_service::{self, YearEndError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serial_test::serial;

const FISCAL_YEAR: i32 = 2024;

async fn seed_profit_and_loss(pool: &sqlx::PgPool, org_id: &str) {
    // Posting accounts for the P&L activity.
    let cash = setup_account(pool, org_id, "1000", "Cash", AccountType::Asset).await;
    let revenue = setup_account(pool, org_id, "4000", "Service Revenue", AccountType::Income).await;
    let rent = setup_account(pool, org_id, "6000", "Rent Expense", AccountType::Expense).await;

    let mid_year = NaiveDate::from_ymd_opt(FISCAL_YEAR, 6, 15).unwrap();

    // Revenue: debit cash, credit income.
    post_journal(
        pool,
        org_id,
        "actor_1",
        "Year revenue",
        mid_year,
        cash,
        revenue,
        dec!(1000000),
        None,
    )
    .await
    .unwrap();

    // Expenses: debit expense, credit cash.
    post_journal(
        pool,
        org_id,
        "actor_1",
        "Year expenses",
        mid_year,
        rent,
        cash,
        dec!(600000),
        None,
    )
    .await
    .unwrap();
}

#[tokio::test]
#[serial]
async fn test_year_end_close_rolls_up_net_income() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_yec");
    period_service::get_or_create_profile(&pool, &org_id)
        .await
        .unwrap();
    seed_calendar_periods(&pool, &org_id, FISCAL_YEAR).await;
    seed_profit_and_loss(&pool, &org_id).await;

    let closing_date = NaiveDate::from_ymd_opt(FISCAL_YEAR, 12, 31).unwrap();
    let summary =
        year_end_service::perform_year_end_close(&pool, &org_id, FISCAL_YEAR, closing_date, "actor_1")
            .await
            .unwrap();

    assert_eq!(summary.total_income, dec!(1000000));
    assert_eq!(summary.total_expenses, dec!(600000));
    assert_eq!(summary.net_income, dec!(400000));
    assert_eq!(summary.periods_closed, 12);

    // The closing journal balances and credits retained earnings by the net.
    let (debits, credits) = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT COALESCE(SUM(debit_amount), 0), COALESCE(SUM(credit_amount), 0)
        FROM journal_entries
        WHERE journal_id = $1
        "#,
    )
    .bind(summary.closing_journal_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(debits, credits);

    let profile = period_service::get_or_create_profile(&pool, &org_id)
        .await
        .unwrap();
    let retained_credit = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(credit_amount - debit_amount), 0)
        FROM journal_entries
        WHERE journal_id = $1 AND account_id = $2
        "#,
    )
    .bind(summary.closing_journal_id)
    .bind(profile.retained_earnings_account_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(retained_credit, dec!(400000));

    // Every period of the fiscal year is now closed.
    let open_count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM accounting_periods
        WHERE org_id = $1 AND fiscal_year = $2 AND status <> 'closed'
        "#,
    )
    .bind(&org_id)
    .bind(FISCAL_YEAR)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open_count, 0);

    // The run record is completed with totals.
    let run = period_repo::find_completed_closing_run(&pool, &org_id, FISCAL_YEAR)
        .await
        .unwrap()
        .expect("completed run");
    assert_eq!(run.net_income, Some(dec!(400000)));
    assert_eq!(run.closing_journal_id, Some(summary.closing_journal_id));
}

#[tokio::test]
#[serial]
async fn test_second_close_of_same_year_is_rejected() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_yec_twice");
    period_service::get_or_create_profile(&pool, &org_id)
        .await
        .unwrap();
    seed_calendar_periods(&pool, &org_id, FISCAL_YEAR).await;
    seed_profit_and_loss(&pool, &org_id).await;

    let closing_date = NaiveDate::from_ymd_opt(FISCAL_YEAR, 12, 31).unwrap();
    year_end_service::perform_year_end_close(&pool, &org_id, FISCAL_YEAR, closing_date, "actor_1")
        .await
        .unwrap();

    let err = year_end_service::perform_year_end_close(
        &pool,
        &org_id,
        FISCAL_YEAR,
        closing_date,
        "actor_1",
    )
    .await
    .unwrap_err();

    assert!(matches!(err, YearEndError::YearAlreadyClosed { .. }));
}

#[tokio::test]
#[serial]
async fn test_close_without_periods_fails_and_records_nothing() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_yec_empty");
    period_service::get_or_create_profile(&pool, &org_id)
        .await
        .unwrap();

    let closing_date = NaiveDate::from_ymd_opt(1990, 12, 31).unwrap();
    let err =
        year_end_service::perform_year_end_close(&pool, &org_id, 1990, closing_date, "actor_1")
            .await
            .unwrap_err();
    assert!(matches!(err, YearEndError::NoPeriodsForYear { .. }));

    // Failing before the run record exists leaves no processing row behind.
    let stuck = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM year_end_closing_runs
        WHERE org_id = $1 AND status = 'processing'
        "#,
    )
    .bind(&org_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stuck, 0);
}

#[tokio::test]
#[serial]
async fn test_zero_activity_year_closes_with_zero_totals() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_yec_zero");
    period_service::get_or_create_profile(&pool, &org_id)
        .await
        .unwrap();
    seed_calendar_periods(&pool, &org_id, FISCAL_YEAR).await;

    let closing_date = NaiveDate::from_ymd_opt(FISCAL_YEAR, 12, 31).unwrap();
    let summary =
        year_end_service::perform_year_end_close(&pool, &org_id, FISCAL_YEAR, closing_date, "actor_1")
            .await
            .unwrap();

    assert_eq!(summary.net_income, Decimal::ZERO);
    assert_eq!(summary.periods_closed, 12);
}
