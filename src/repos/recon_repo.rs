//! Repository for reconciliation runs and variances

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

/// Check status enum matching database check_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq, Serialize)]
#[sqlx(type_name = "check_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Clean,
    Variance,
    Error,
}

/// Run status enum matching database run_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq, Serialize)]
#[sqlx(type_name = "run_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Clean,
    Variance,
    Failed,
}

/// Variance severity enum matching database variance_severity
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(type_name = "variance_severity", rename_all = "lowercase")]
pub enum VarianceSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Reconciliation run model
#[derive(Debug, Clone, FromRow)]
pub struct ReconciliationRun {
    pub id: Uuid,
    pub org_id: String,
    pub run_type: String,
    pub status: RunStatus,
    pub as_of_date: NaiveDate,
    pub started_by: String,
    pub trial_balance_status: CheckStatus,
    pub inventory_status: CheckStatus,
    pub subledger_status: CheckStatus,
    pub variance_count: i32,
    pub critical_count: i32,
    pub total_variance_amount: Decimal,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted variance model
#[derive(Debug, Clone, FromRow)]
pub struct ReconciliationVariance {
    pub id: Uuid,
    pub run_id: Uuid,
    pub org_id: String,
    pub variance_type: String,
    pub expected_amount: Option<Decimal>,
    pub actual_amount: Option<Decimal>,
    pub variance_amount: Decimal,
    pub severity: VarianceSeverity,
    pub details: Option<serde_json::Value>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Variance draft produced by a check before persistence
#[derive(Debug, Clone)]
pub struct VarianceDraft {
    pub variance_type: String,
    pub expected_amount: Option<Decimal>,
    pub actual_amount: Option<Decimal>,
    pub variance_amount: Decimal,
    pub severity: VarianceSeverity,
    pub details: Option<serde_json::Value>,
}

/// Errors that can occur during reconciliation repository operations
#[derive(Debug, Error)]
pub enum ReconRepoError {
    #[error("Reconciliation variance not found: {0}")]
    VarianceNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persist a finished run with its check statuses and aggregate counts
pub async fn insert_run(
    pool: &PgPool,
    org_id: &str,
    run_type: &str,
    status: RunStatus,
    as_of_date: NaiveDate,
    started_by: &str,
    trial_balance_status: CheckStatus,
    inventory_status: CheckStatus,
    subledger_status: CheckStatus,
    variance_count: i32,
    critical_count: i32,
    total_variance_amount: Decimal,
    error_message: Option<&str>,
) -> Result<Uuid, ReconRepoError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO reconciliation_runs
            (id, org_id, run_type, status, as_of_date, started_by, trial_balance_status,
             inventory_status, subledger_status, variance_count, critical_count,
             total_variance_amount, error_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(id)
    .bind(org_id)
    .bind(run_type)
    .bind(status)
    .bind(as_of_date)
    .bind(started_by)
    .bind(trial_balance_status)
    .bind(inventory_status)
    .bind(subledger_status)
    .bind(variance_count)
    .bind(critical_count)
    .bind(total_variance_amount)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Persist the variances discovered by a run
pub async fn insert_variances(
    pool: &PgPool,
    run_id: Uuid,
    org_id: &str,
    drafts: &[VarianceDraft],
) -> Result<(), ReconRepoError> {
    for draft in drafts {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_variances
                (id, run_id, org_id, variance_type, expected_amount, actual_amount,
                 variance_amount, severity, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(org_id)
        .bind(&draft.variance_type)
        .bind(draft.expected_amount)
        .bind(draft.actual_amount)
        .bind(draft.variance_amount)
        .bind(draft.severity)
        .bind(draft.details.as_ref())
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// List variances persisted for a run
pub async fn list_variances(
    pool: &PgPool,
    run_id: Uuid,
) -> Result<Vec<ReconciliationVariance>, ReconRepoError> {
    let rows = sqlx::query_as::<_, ReconciliationVariance>(
        r#"
        SELECT id, run_id, org_id, variance_type, expected_amount, actual_amount,
               variance_amount, severity, details, resolved, resolved_by, resolved_at,
               resolution_notes, created_at
        FROM reconciliation_variances
        WHERE run_id = $1
        ORDER BY severity DESC, created_at
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Mark a variance resolved with triage notes
pub async fn resolve_variance(
    pool: &PgPool,
    variance_id: Uuid,
    actor_id: &str,
    notes: &str,
) -> Result<(), ReconRepoError> {
    let result = sqlx::query(
        r#"
        UPDATE reconciliation_variances
        SET resolved = true, resolved_by = $2, resolved_at = NOW(), resolution_notes = $3
        WHERE id = $1
        "#,
    )
    .bind(variance_id)
    .bind(actor_id)
    .bind(notes)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ReconRepoError::VarianceNotFound(variance_id));
    }

    Ok(())
}
