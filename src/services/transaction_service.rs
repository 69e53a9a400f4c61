//! Transaction safety coordinator
//!
//! The single gateway for mutating accounting operations. Every wrapped
//! operation gets: idempotent replay with fingerprint checking, posting-date
//! validation, one bounded READ COMMITTED transaction, journal balance
//! re-verification, negative-inventory policy enforcement, and an audit row
//! that commits with the mutation.

use chrono::NaiveDate;
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::repos::account_repo::AccountError;
use crate::repos::audit_repo::{self, AuditRepoError};
use crate::repos::document_repo::DocumentRepoError;
use crate::repos::idempotency_repo::{self, IdempotencyRepoError, IdempotencyStatus};
use crate::repos::inventory_repo::{self, InventoryRepoError};
use crate::repos::journal_repo::{self, JournalRepoError};
use crate::repos::profile_repo::{self, ProfileError};
use crate::services::inventory_service::InventoryError;
use crate::services::period_service::{self, PeriodError};

/// Journals balance when |debits - credits| stays within a cent.
pub const BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Statement timeout for a coordinated transaction.
const TRANSACTION_TIMEOUT: &str = "30s";

/// Errors that can occur inside the coordinator or a wrapped operation
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Operation already in progress: operation={operation}, key={idempotency_key}")]
    AlreadyInProgress {
        operation: String,
        idempotency_key: String,
    },

    #[error("Idempotency key reused with a different request: operation={operation}, key={idempotency_key}")]
    IdempotencyKeyConflict {
        operation: String,
        idempotency_key: String,
    },

    #[error("Journal {journal_id} is unbalanced: debits={total_debit}, credits={total_credit}")]
    UnbalancedJournal {
        journal_id: Uuid,
        total_debit: Decimal,
        total_credit: Decimal,
    },

    #[error(
        "Negative inventory disallowed for item_id={item_id}, warehouse_id={warehouse_id}: \
         net quantity {net_quantity}"
    )]
    NegativeInventoryDisallowed {
        item_id: String,
        warehouse_id: String,
        net_quantity: Decimal,
    },

    #[error("Invoice already voided: {0}")]
    AlreadyVoided(Uuid),

    #[error("Invoice {invoice_id} has {payment_count} recorded payment(s); void them first")]
    HasPayments {
        invoice_id: Uuid,
        payment_count: i64,
    },

    #[error("Journal is not in posted state: {0}")]
    JournalNotPosted(Uuid),

    #[error("Period error: {0}")]
    Period(#[from] PeriodError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Journal repository error: {0}")]
    Journal(#[from] JournalRepoError),

    #[error("Inventory repository error: {0}")]
    InventoryRepo(#[from] InventoryRepoError),

    #[error("Document repository error: {0}")]
    Document(#[from] DocumentRepoError),

    #[error("Idempotency repository error: {0}")]
    Idempotency(#[from] IdempotencyRepoError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditRepoError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Identity and idempotency envelope of one mutating operation
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub org_id: String,
    pub actor_id: String,
    pub operation: String,
    pub idempotency_key: Option<String>,
    pub posting_date: Option<NaiveDate>,
    pub allow_reversal_in_closed: bool,
    /// Caller request payload; fingerprinted to detect key reuse with a
    /// different body.
    pub request: serde_json::Value,
}

/// What a wrapped operation reports back for verification and replay
#[derive(Debug, Clone)]
pub struct OperationOutcome<T> {
    pub result: T,
    /// Journals whose balance must be re-derived and enforced.
    pub journal_ids: Vec<Uuid>,
    /// (item_id, warehouse_id) pairs whose stock the operation touched.
    pub inventory_touched: Vec<(String, String)>,
}

/// SHA-256 fingerprint of a request payload. serde_json orders object keys,
/// so identical payloads hash identically regardless of construction order.
pub fn request_fingerprint(request: &serde_json::Value) -> String {
    format!("{:x}", Sha256::digest(request.to_string().as_bytes()))
}

/// Execute a mutating operation under the coordinator's guarantees.
///
/// With an idempotency key, a completed record short-circuits with its
/// cached response and a processing record fails fast; a failed record is
/// treated as absent so callers can retry. The wrapped function runs inside
/// one READ COMMITTED transaction with a 30s statement timeout; any error
/// rolls the whole mutation back and marks the idempotency record failed.
pub async fn with_accounting_transaction<T, F>(
    pool: &PgPool,
    ctx: OperationContext,
    f: F,
) -> Result<T, CoordinatorError>
where
    T: Serialize + DeserializeOwned,
    F: for<'t> FnOnce(
        &'t mut Transaction<'static, Postgres>,
    ) -> BoxFuture<'t, Result<OperationOutcome<T>, CoordinatorError>>,
{
    let fingerprint = request_fingerprint(&ctx.request);

    if let Some(key) = ctx.idempotency_key.as_deref() {
        if let Some(record) =
            idempotency_repo::find(pool, &ctx.org_id, &ctx.operation, key).await?
        {
            if record.request_hash != fingerprint {
                return Err(CoordinatorError::IdempotencyKeyConflict {
                    operation: ctx.operation.clone(),
                    idempotency_key: key.to_string(),
                });
            }

            match record.status {
                IdempotencyStatus::Completed => {
                    tracing::info!(
                        org_id = %ctx.org_id,
                        operation = %ctx.operation,
                        idempotency_key = %key,
                        "Replaying cached response for completed operation"
                    );
                    let cached = record.response.unwrap_or(serde_json::Value::Null);
                    return Ok(serde_json::from_value(cached)?);
                }
                IdempotencyStatus::Processing => {
                    return Err(CoordinatorError::AlreadyInProgress {
                        operation: ctx.operation.clone(),
                        idempotency_key: key.to_string(),
                    });
                }
                IdempotencyStatus::Failed => {
                    // Explicit retry; the claim below takes the record over.
                }
            }
        }
    }

    // Validate the posting date before opening the transaction to fail fast.
    if let Some(date) = ctx.posting_date {
        let check = period_service::validate_posting_date(
            pool,
            &ctx.org_id,
            date,
            ctx.allow_reversal_in_closed,
        )
        .await?;

        if check.requires_reversal {
            tracing::warn!(
                org_id = %ctx.org_id,
                operation = %ctx.operation,
                posting_date = %date,
                "Posting into an elapsed period; corrections will need reversals"
            );
        }
    }

    let mut tx = pool.begin().await?;
    let run = execute_in_transaction(&mut tx, &ctx, &fingerprint, f).await;

    match run {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Transaction rollback failed");
            }

            // The processing row rolled back with the transaction; record
            // the failure on a pool connection so callers can retry.
            if let Some(key) = ctx.idempotency_key.as_deref() {
                if let Err(mark_err) = idempotency_repo::mark_failed(
                    pool,
                    &ctx.org_id,
                    &ctx.operation,
                    key,
                    &fingerprint,
                    &e.to_string(),
                )
                .await
                {
                    tracing::error!(
                        org_id = %ctx.org_id,
                        operation = %ctx.operation,
                        error = %mark_err,
                        "Failed to mark idempotency record failed"
                    );
                }
            }

            tracing::error!(
                org_id = %ctx.org_id,
                operation = %ctx.operation,
                error = %e,
                "Coordinated operation rolled back"
            );

            Err(e)
        }
    }
}

async fn execute_in_transaction<T, F>(
    tx: &mut Transaction<'static, Postgres>,
    ctx: &OperationContext,
    fingerprint: &str,
    f: F,
) -> Result<T, CoordinatorError>
where
    T: Serialize + DeserializeOwned,
    F: for<'t> FnOnce(
        &'t mut Transaction<'static, Postgres>,
    ) -> BoxFuture<'t, Result<OperationOutcome<T>, CoordinatorError>>,
{
    sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
        .execute(&mut **tx)
        .await?;
    sqlx::query(&format!("SET LOCAL statement_timeout = '{TRANSACTION_TIMEOUT}'"))
        .execute(&mut **tx)
        .await?;

    if let Some(key) = ctx.idempotency_key.as_deref() {
        let claimed = idempotency_repo::claim_processing_tx(
            tx,
            &ctx.org_id,
            &ctx.operation,
            key,
            fingerprint,
        )
        .await?;

        // Two identical concurrent requests race to insert the processing
        // marker; the loser observes the winner's record and fails fast
        // instead of queuing.
        if !claimed {
            return Err(CoordinatorError::AlreadyInProgress {
                operation: ctx.operation.clone(),
                idempotency_key: key.to_string(),
            });
        }
    }

    let outcome = f(tx).await?;

    for journal_id in &outcome.journal_ids {
        let (total_debit, total_credit) = journal_repo::rederive_totals_tx(tx, *journal_id).await?;
        if (total_debit - total_credit).abs() > BALANCE_TOLERANCE {
            return Err(CoordinatorError::UnbalancedJournal {
                journal_id: *journal_id,
                total_debit,
                total_credit,
            });
        }
    }

    if !outcome.inventory_touched.is_empty() {
        let allow_negative = profile_repo::find_tx(tx, &ctx.org_id)
            .await?
            .map(|p| p.allow_negative_inventory)
            .unwrap_or(false);

        if !allow_negative {
            for (item_id, warehouse_id) in &outcome.inventory_touched {
                let net = inventory_repo::net_movement_quantity_tx(
                    tx,
                    &ctx.org_id,
                    item_id,
                    warehouse_id,
                )
                .await?;

                if net < Decimal::ZERO {
                    return Err(CoordinatorError::NegativeInventoryDisallowed {
                        item_id: item_id.clone(),
                        warehouse_id: warehouse_id.clone(),
                        net_quantity: net,
                    });
                }
            }
        }
    }

    let response = serde_json::to_value(&outcome.result)?;

    if let Some(key) = ctx.idempotency_key.as_deref() {
        idempotency_repo::complete_tx(tx, &ctx.org_id, &ctx.operation, key, &response).await?;
    }

    audit_repo::insert_tx(
        tx,
        &ctx.org_id,
        &ctx.actor_id,
        &ctx.operation,
        "accounting_operation",
        None,
        Some(&serde_json::json!({
            "journal_ids": outcome.journal_ids,
            "inventory_touched": outcome.inventory_touched,
            "result": response,
        })),
    )
    .await?;

    Ok(outcome.result)
}
