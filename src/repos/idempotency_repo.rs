//! Repository for idempotency records
//!
//! A record is keyed by (org, operation, client-supplied key) and carries a
//! SHA-256 fingerprint of the request payload. Completed records replay
//! their cached response; a key may never be reused with a different
//! fingerprint.

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Records expire 24 hours after creation.
const EXPIRY_HOURS: i64 = 24;

/// Idempotency status enum matching database idempotency_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "idempotency_status", rename_all = "lowercase")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

/// Idempotency record model
#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub org_id: String,
    pub operation: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Errors that can occur during idempotency repository operations
#[derive(Debug, Error)]
pub enum IdempotencyRepoError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Find an unexpired record for (org, operation, key)
pub async fn find(
    pool: &PgPool,
    org_id: &str,
    operation: &str,
    key: &str,
) -> Result<Option<IdempotencyRecord>, IdempotencyRepoError> {
    let record = sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        SELECT id, org_id, operation, idempotency_key, request_hash, status, response,
               error_message, created_at, expires_at
        FROM idempotency_records
        WHERE org_id = $1 AND operation = $2 AND idempotency_key = $3 AND expires_at > NOW()
        "#,
    )
    .bind(org_id)
    .bind(operation)
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Claim the key as `processing` inside the caller's transaction.
///
/// Returns true when this caller owns the claim: either a fresh insert, or a
/// takeover of an expired or previously `failed` record (explicit retry).
/// Returns false when a live record in another state already holds the key,
/// meaning a concurrent request won the race or already completed.
pub async fn claim_processing_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    operation: &str,
    key: &str,
    request_hash: &str,
) -> Result<bool, IdempotencyRepoError> {
    let expires_at = Utc::now() + Duration::hours(EXPIRY_HOURS);

    let result = sqlx::query(
        r#"
        INSERT INTO idempotency_records
            (id, org_id, operation, idempotency_key, request_hash, status, expires_at)
        VALUES ($1, $2, $3, $4, $5, 'processing', $6)
        ON CONFLICT (org_id, operation, idempotency_key) DO UPDATE
        SET status = 'processing', request_hash = EXCLUDED.request_hash,
            response = NULL, error_message = NULL,
            created_at = NOW(), expires_at = EXCLUDED.expires_at
        WHERE idempotency_records.status = 'failed'
           OR idempotency_records.expires_at <= NOW()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(operation)
    .bind(key)
    .bind(request_hash)
    .bind(expires_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark the record completed with the cached response (inside the transaction,
/// so the completion commits atomically with the mutation it describes)
pub async fn complete_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    operation: &str,
    key: &str,
    response: &serde_json::Value,
) -> Result<(), IdempotencyRepoError> {
    sqlx::query(
        r#"
        UPDATE idempotency_records
        SET status = 'completed', response = $4
        WHERE org_id = $1 AND operation = $2 AND idempotency_key = $3
        "#,
    )
    .bind(org_id)
    .bind(operation)
    .bind(key)
    .bind(response)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Record a failure on a pool connection. The `processing` row written inside
/// the failed transaction rolled back with it, so this is an upsert.
pub async fn mark_failed(
    pool: &PgPool,
    org_id: &str,
    operation: &str,
    key: &str,
    request_hash: &str,
    error_message: &str,
) -> Result<(), IdempotencyRepoError> {
    let expires_at = Utc::now() + Duration::hours(EXPIRY_HOURS);

    sqlx::query(
        r#"
        INSERT INTO idempotency_records
            (id, org_id, operation, idempotency_key, request_hash, status, error_message, expires_at)
        VALUES ($1, $2, $3, $4, $5, 'failed', $6, $7)
        ON CONFLICT (org_id, operation, idempotency_key) DO UPDATE
        SET status = 'failed', error_message = EXCLUDED.error_message
        WHERE idempotency_records.status = 'processing'
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(operation)
    .bind(key)
    .bind(request_hash)
    .bind(error_message)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete expired records (housekeeping, invoked by the scheduled runner)
pub async fn purge_expired(pool: &PgPool) -> Result<u64, IdempotencyRepoError> {
    let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= NOW()")
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
