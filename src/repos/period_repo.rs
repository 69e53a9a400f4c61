//! Repository for accounting periods and year-end closing runs
//!
//! Periods are contiguous, non-overlapping date ranges unique per
//! (org, fiscal_year, period_number); the service layer owns the state
//! machine, this module owns persistence.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Period status enum matching database period_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "period_status", rename_all = "snake_case")]
pub enum PeriodStatus {
    Open,
    SoftClosed,
    Closed,
}

/// Accounting period model
#[derive(Debug, Clone, FromRow)]
pub struct AccountingPeriod {
    pub id: Uuid,
    pub org_id: String,
    pub fiscal_year: i32,
    pub period_number: i32,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: PeriodStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub reopened_at: Option<DateTime<Utc>>,
    pub reopened_by: Option<String>,
    pub reopen_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Year-end closing run status enum matching database closing_run_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "closing_run_status", rename_all = "lowercase")]
pub enum ClosingRunStatus {
    Processing,
    Completed,
    Failed,
}

/// Year-end closing run model
#[derive(Debug, Clone, FromRow)]
pub struct YearEndClosingRun {
    pub id: Uuid,
    pub org_id: String,
    pub fiscal_year: i32,
    pub status: ClosingRunStatus,
    pub total_income: Option<Decimal>,
    pub total_expenses: Option<Decimal>,
    pub net_income: Option<Decimal>,
    pub closing_journal_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Errors that can occur during period repository operations
#[derive(Debug, Error)]
pub enum PeriodRepoError {
    #[error("Accounting period not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const PERIOD_COLUMNS: &str = "id, org_id, fiscal_year, period_number, name, start_date, \
     end_date, status, closed_at, closed_by, reopened_at, reopened_by, reopen_reason, created_at";

/// Find the period containing a calendar date
pub async fn find_by_date(
    pool: &PgPool,
    org_id: &str,
    date: NaiveDate,
) -> Result<Option<AccountingPeriod>, PeriodRepoError> {
    let period = sqlx::query_as::<_, AccountingPeriod>(&format!(
        r#"
        SELECT {PERIOD_COLUMNS}
        FROM accounting_periods
        WHERE org_id = $1 AND start_date <= $2 AND end_date >= $2
        LIMIT 1
        "#
    ))
    .bind(org_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(period)
}

/// Find a period by id
pub async fn find_by_id(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<AccountingPeriod>, PeriodRepoError> {
    let period = sqlx::query_as::<_, AccountingPeriod>(&format!(
        "SELECT {PERIOD_COLUMNS} FROM accounting_periods WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(period)
}

/// Insert a period, skipping silently when (org, fiscal_year, period_number)
/// already exists or when any existing period overlaps the date range (the
/// one-period-per-date invariant outranks regeneration). Returns whether a
/// row was inserted.
pub async fn insert_if_absent(
    pool: &PgPool,
    org_id: &str,
    fiscal_year: i32,
    period_number: i32,
    name: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<bool, PeriodRepoError> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounting_periods
            (id, org_id, fiscal_year, period_number, name, start_date, end_date, status)
        SELECT $1, $2, $3, $4, $5, $6, $7, 'open'
        WHERE NOT EXISTS (
            SELECT 1 FROM accounting_periods
            WHERE org_id = $2 AND start_date <= $7 AND end_date >= $6
        )
        ON CONFLICT (org_id, fiscal_year, period_number) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(fiscal_year)
    .bind(period_number)
    .bind(name)
    .bind(start_date)
    .bind(end_date)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete open periods that have not yet elapsed (end date on or after the
/// cutoff). Used when a fiscal-year-definition change regenerates the
/// calendar; closed or already-past periods are never touched.
pub async fn delete_open_future_periods(
    pool: &PgPool,
    org_id: &str,
    cutoff: NaiveDate,
) -> Result<u64, PeriodRepoError> {
    let result = sqlx::query(
        r#"
        DELETE FROM accounting_periods
        WHERE org_id = $1 AND status = 'open' AND end_date >= $2
        "#,
    )
    .bind(org_id)
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Count earlier periods (lower fiscal year, or same year and lower number)
/// that are still open
pub async fn count_earlier_open(
    pool: &PgPool,
    org_id: &str,
    fiscal_year: i32,
    period_number: i32,
) -> Result<i64, PeriodRepoError> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM accounting_periods
        WHERE org_id = $1
          AND status = 'open'
          AND (fiscal_year < $2 OR (fiscal_year = $2 AND period_number < $3))
        "#,
    )
    .bind(org_id)
    .bind(fiscal_year)
    .bind(period_number)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// List later periods that are soft-closed or closed (for the reopen warning)
pub async fn list_later_closed(
    pool: &PgPool,
    org_id: &str,
    fiscal_year: i32,
    period_number: i32,
) -> Result<Vec<AccountingPeriod>, PeriodRepoError> {
    let periods = sqlx::query_as::<_, AccountingPeriod>(&format!(
        r#"
        SELECT {PERIOD_COLUMNS}
        FROM accounting_periods
        WHERE org_id = $1
          AND status <> 'open'
          AND (fiscal_year > $2 OR (fiscal_year = $2 AND period_number > $3))
        ORDER BY fiscal_year, period_number
        "#
    ))
    .bind(org_id)
    .bind(fiscal_year)
    .bind(period_number)
    .fetch_all(pool)
    .await?;

    Ok(periods)
}

/// Set a period's status with close audit fields
pub async fn mark_closed(
    pool: &PgPool,
    id: Uuid,
    status: PeriodStatus,
    actor_id: &str,
) -> Result<AccountingPeriod, PeriodRepoError> {
    let period = sqlx::query_as::<_, AccountingPeriod>(&format!(
        r#"
        UPDATE accounting_periods
        SET status = $2, closed_at = NOW(), closed_by = $3
        WHERE id = $1
        RETURNING {PERIOD_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status)
    .bind(actor_id)
    .fetch_optional(pool)
    .await?
    .ok_or(PeriodRepoError::NotFound(id))?;

    Ok(period)
}

/// Reopen a period with reopen audit fields
pub async fn mark_reopened(
    pool: &PgPool,
    id: Uuid,
    actor_id: &str,
    reason: &str,
) -> Result<AccountingPeriod, PeriodRepoError> {
    let period = sqlx::query_as::<_, AccountingPeriod>(&format!(
        r#"
        UPDATE accounting_periods
        SET status = 'open', reopened_at = NOW(), reopened_by = $2, reopen_reason = $3
        WHERE id = $1
        RETURNING {PERIOD_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(actor_id)
    .bind(reason)
    .fetch_optional(pool)
    .await?
    .ok_or(PeriodRepoError::NotFound(id))?;

    Ok(period)
}

/// Force-close every period of a fiscal year within a transaction
/// (year-end close ignores closing order)
pub async fn close_fiscal_year_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    fiscal_year: i32,
    actor_id: &str,
) -> Result<u64, PeriodRepoError> {
    let result = sqlx::query(
        r#"
        UPDATE accounting_periods
        SET status = 'closed', closed_at = NOW(), closed_by = $3
        WHERE org_id = $1 AND fiscal_year = $2 AND status <> 'closed'
        "#,
    )
    .bind(org_id)
    .bind(fiscal_year)
    .bind(actor_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Date range covered by a fiscal year's periods
pub async fn fiscal_year_range(
    pool: &PgPool,
    org_id: &str,
    fiscal_year: i32,
) -> Result<Option<(NaiveDate, NaiveDate)>, PeriodRepoError> {
    let range = sqlx::query_as::<_, (Option<NaiveDate>, Option<NaiveDate>)>(
        r#"
        SELECT MIN(start_date), MAX(end_date)
        FROM accounting_periods
        WHERE org_id = $1 AND fiscal_year = $2
        "#,
    )
    .bind(org_id)
    .bind(fiscal_year)
    .fetch_one(pool)
    .await?;

    Ok(match range {
        (Some(start), Some(end)) => Some((start, end)),
        _ => None,
    })
}

/// Find a completed closing run for a fiscal year, if any
pub async fn find_completed_closing_run(
    pool: &PgPool,
    org_id: &str,
    fiscal_year: i32,
) -> Result<Option<YearEndClosingRun>, PeriodRepoError> {
    let run = sqlx::query_as::<_, YearEndClosingRun>(
        r#"
        SELECT id, org_id, fiscal_year, status, total_income, total_expenses, net_income,
               closing_journal_id, error_message, created_at, completed_at
        FROM year_end_closing_runs
        WHERE org_id = $1 AND fiscal_year = $2 AND status = 'completed'
        LIMIT 1
        "#,
    )
    .bind(org_id)
    .bind(fiscal_year)
    .fetch_optional(pool)
    .await?;

    Ok(run)
}

/// Create a closing run in processing state
pub async fn insert_closing_run(
    pool: &PgPool,
    org_id: &str,
    fiscal_year: i32,
) -> Result<Uuid, PeriodRepoError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO year_end_closing_runs (id, org_id, fiscal_year, status)
        VALUES ($1, $2, $3, 'processing')
        "#,
    )
    .bind(id)
    .bind(org_id)
    .bind(fiscal_year)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Mark a closing run completed with computed totals
pub async fn complete_closing_run(
    pool: &PgPool,
    id: Uuid,
    total_income: Decimal,
    total_expenses: Decimal,
    net_income: Decimal,
    closing_journal_id: Uuid,
) -> Result<(), PeriodRepoError> {
    sqlx::query(
        r#"
        UPDATE year_end_closing_runs
        SET status = 'completed', total_income = $2, total_expenses = $3,
            net_income = $4, closing_journal_id = $5, completed_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(total_income)
    .bind(total_expenses)
    .bind(net_income)
    .bind(closing_journal_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a closing run failed with the error message
pub async fn fail_closing_run(
    pool: &PgPool,
    id: Uuid,
    error_message: &str,
) -> Result<(), PeriodRepoError> {
    sqlx::query(
        r#"
        UPDATE year_end_closing_runs
        SET status = 'failed', error_message = $2, completed_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_repo_error_display() {
        let id = Uuid::new_v4();
        let err = PeriodRepoError::NotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }
}
