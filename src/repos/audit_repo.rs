//! Append-only audit trail
//!
//! One row per coordinated mutation, written inside the same transaction so
//! the trail commits (or rolls back) with the mutation it describes.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;

/// Audit log row
#[derive(Debug, Clone, FromRow)]
pub struct AuditRecord {
    pub id: i64,
    pub org_id: String,
    pub actor_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

/// Errors that can occur during audit repository operations
#[derive(Debug, Error)]
pub enum AuditRepoError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append an audit row within a transaction
pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    actor_id: &str,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    details: Option<&serde_json::Value>,
) -> Result<(), AuditRepoError> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (org_id, actor_id, action, resource_type, resource_id, details)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(org_id)
    .bind(actor_id)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(details)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Recent audit rows for an organization, newest first
pub async fn list_recent(
    pool: &PgPool,
    org_id: &str,
    limit: i64,
) -> Result<Vec<AuditRecord>, AuditRepoError> {
    let rows = sqlx::query_as::<_, AuditRecord>(
        r#"
        SELECT id, org_id, actor_id, action, resource_type, resource_id, details, recorded_at
        FROM audit_log
        WHERE org_id = $1
        ORDER BY recorded_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(org_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
