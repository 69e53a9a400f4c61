//! Repository for the minimal document surface the void workflow needs
//!
//! Full invoice lifecycle management lives outside the core; this module
//! only knows enough about invoices and their payments to void safely and
//! to back the AR subledger reconciliation check.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Invoice status enum matching database invoice_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "invoice_status", rename_all = "lowercase")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Voided,
}

/// Payment status enum matching database payment_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
pub enum PaymentStatus {
    Active,
    Voided,
}

/// Invoice model
#[derive(Debug, Clone, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub org_id: String,
    pub total_amount: Decimal,
    pub status: InvoiceStatus,
    pub journal_id: Option<Uuid>,
    pub posting_date: NaiveDate,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_by: Option<String>,
    pub void_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Errors that can occur during document repository operations
#[derive(Debug, Error)]
pub enum DocumentRepoError {
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const INVOICE_COLUMNS: &str = "id, org_id, total_amount, status, journal_id, posting_date, \
     voided_at, voided_by, void_reason, created_at";

/// Insert an invoice (callers confirm invoices through the coordinator;
/// this is the persistence primitive they use inside it)
pub async fn insert_invoice_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    total_amount: Decimal,
    journal_id: Option<Uuid>,
    posting_date: NaiveDate,
) -> Result<Uuid, DocumentRepoError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO invoices (id, org_id, total_amount, status, journal_id, posting_date)
        VALUES ($1, $2, $3, 'open', $4, $5)
        "#,
    )
    .bind(id)
    .bind(org_id)
    .bind(total_amount)
    .bind(journal_id)
    .bind(posting_date)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

/// Record a payment against an invoice
pub async fn insert_payment_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    invoice_id: Uuid,
    amount: Decimal,
    journal_id: Option<Uuid>,
    posting_date: NaiveDate,
) -> Result<Uuid, DocumentRepoError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO invoice_payments (id, org_id, invoice_id, amount, status, journal_id, posting_date)
        VALUES ($1, $2, $3, $4, 'active', $5, $6)
        "#,
    )
    .bind(id)
    .bind(org_id)
    .bind(invoice_id)
    .bind(amount)
    .bind(journal_id)
    .bind(posting_date)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

/// Fetch an invoice, locking it for update
pub async fn lock_invoice_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    invoice_id: Uuid,
) -> Result<Invoice, DocumentRepoError> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE org_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(org_id)
    .bind(invoice_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DocumentRepoError::InvoiceNotFound(invoice_id))
}

/// Count active payments recorded against an invoice
pub async fn count_active_payments_tx(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
) -> Result<i64, DocumentRepoError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM invoice_payments WHERE invoice_id = $1 AND status = 'active'",
    )
    .bind(invoice_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(count)
}

/// Mark an invoice voided with audit fields
pub async fn mark_invoice_voided_tx(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    actor_id: &str,
    reason: &str,
) -> Result<(), DocumentRepoError> {
    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET status = 'voided', voided_at = NOW(), voided_by = $2, void_reason = $3
        WHERE id = $1
        "#,
    )
    .bind(invoice_id)
    .bind(actor_id)
    .bind(reason)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DocumentRepoError::InvoiceNotFound(invoice_id));
    }

    Ok(())
}

/// Outstanding AR per the subledger: non-voided invoice totals minus active
/// payments (reconciliation expected value)
pub async fn outstanding_receivables(
    pool: &PgPool,
    org_id: &str,
    as_of: NaiveDate,
) -> Result<Decimal, DocumentRepoError> {
    let invoiced = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(total_amount), 0)
        FROM invoices
        WHERE org_id = $1 AND status <> 'voided' AND posting_date <= $2
        "#,
    )
    .bind(org_id)
    .bind(as_of)
    .fetch_one(pool)
    .await?;

    let received = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM invoice_payments
        WHERE org_id = $1 AND status = 'active' AND posting_date <= $2
        "#,
    )
    .bind(org_id)
    .bind(as_of)
    .fetch_one(pool)
    .await?;

    Ok(invoiced - received)
}
