//! Repository for journals and journal entries
//!
//! A journal groups entries; sum(debit) == sum(credit) is enforced by the
//! transaction coordinator after every mutation. Aggregate queries here back
//! the trial balance, year-end close, and reconciliation checks.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::repos::account_repo::AccountType;

/// Journal status enum matching database journal_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "journal_status", rename_all = "lowercase")]
pub enum JournalStatus {
    Draft,
    Posted,
    Reversed,
    Voided,
}

/// Journal header model
#[derive(Debug, Clone, FromRow)]
pub struct Journal {
    pub id: Uuid,
    pub org_id: String,
    pub description: String,
    pub posting_date: NaiveDate,
    pub status: JournalStatus,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub reversal_of: Option<Uuid>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Journal entry model
#[derive(Debug, Clone, FromRow)]
pub struct JournalEntry {
    pub id: Uuid,
    pub journal_id: Uuid,
    pub line_no: i32,
    pub account_id: Uuid,
    pub debit_amount: Decimal,
    pub credit_amount: Decimal,
    pub memo: Option<String>,
}

/// Entry draft for journal insertion
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub account_id: Uuid,
    pub debit_amount: Decimal,
    pub credit_amount: Decimal,
    pub memo: Option<String>,
}

/// Journal draft for insertion
#[derive(Debug, Clone)]
pub struct JournalDraft {
    pub org_id: String,
    pub description: String,
    pub posting_date: NaiveDate,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub reversal_of: Option<Uuid>,
    pub created_by: String,
    pub entries: Vec<EntryDraft>,
}

/// Per-account aggregate used by the trial balance and year-end close
#[derive(Debug, Clone, FromRow)]
pub struct AccountAggregate {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

/// A journal whose own entries do not net to zero (reconciliation decomposition)
#[derive(Debug, Clone, FromRow)]
pub struct UnbalancedJournalRow {
    pub journal_id: Uuid,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

/// Errors that can occur during journal repository operations
#[derive(Debug, Error)]
pub enum JournalRepoError {
    #[error("Journal not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const JOURNAL_COLUMNS: &str = "id, org_id, description, posting_date, status, source_type, \
     source_id, reversal_of, total_debit, total_credit, created_by, created_at";

/// Insert a journal with its entries; totals are computed from the drafts
pub async fn insert_journal_tx(
    tx: &mut Transaction<'_, Postgres>,
    draft: &JournalDraft,
) -> Result<Uuid, JournalRepoError> {
    let journal_id = Uuid::new_v4();
    let total_debit: Decimal = draft.entries.iter().map(|e| e.debit_amount).sum();
    let total_credit: Decimal = draft.entries.iter().map(|e| e.credit_amount).sum();

    sqlx::query(
        r#"
        INSERT INTO journals
            (id, org_id, description, posting_date, status, source_type, source_id,
             reversal_of, total_debit, total_credit, created_by)
        VALUES ($1, $2, $3, $4, 'posted', $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(journal_id)
    .bind(&draft.org_id)
    .bind(&draft.description)
    .bind(draft.posting_date)
    .bind(draft.source_type.as_deref())
    .bind(draft.source_id.as_deref())
    .bind(draft.reversal_of)
    .bind(total_debit)
    .bind(total_credit)
    .bind(&draft.created_by)
    .execute(&mut **tx)
    .await?;

    for (idx, entry) in draft.entries.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO journal_entries
                (id, journal_id, line_no, account_id, debit_amount, credit_amount, memo)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(journal_id)
        .bind((idx + 1) as i32)
        .bind(entry.account_id)
        .bind(entry.debit_amount)
        .bind(entry.credit_amount)
        .bind(entry.memo.as_deref())
        .execute(&mut **tx)
        .await?;
    }

    Ok(journal_id)
}

/// Fetch a journal with its entries, locking the header row for update
pub async fn fetch_with_entries_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    journal_id: Uuid,
) -> Result<Option<(Journal, Vec<JournalEntry>)>, JournalRepoError> {
    let journal = sqlx::query_as::<_, Journal>(&format!(
        r#"
        SELECT {JOURNAL_COLUMNS}
        FROM journals
        WHERE org_id = $1 AND id = $2
        FOR UPDATE
        "#
    ))
    .bind(org_id)
    .bind(journal_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(journal) = journal else {
        return Ok(None);
    };

    let entries = sqlx::query_as::<_, JournalEntry>(
        r#"
        SELECT id, journal_id, line_no, account_id, debit_amount, credit_amount, memo
        FROM journal_entries
        WHERE journal_id = $1
        ORDER BY line_no
        "#,
    )
    .bind(journal_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(Some((journal, entries)))
}

/// Update a journal's status within a transaction
pub async fn set_status_tx(
    tx: &mut Transaction<'_, Postgres>,
    journal_id: Uuid,
    status: JournalStatus,
) -> Result<(), JournalRepoError> {
    let result = sqlx::query("UPDATE journals SET status = $2 WHERE id = $1")
        .bind(journal_id)
        .bind(status)
        .execute(&mut **tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(JournalRepoError::NotFound(journal_id));
    }

    Ok(())
}

/// Re-derive a journal's totals from its entries and persist them on the
/// header, catching drift between denormalized totals and entry sums.
/// Returns (total_debit, total_credit).
pub async fn rederive_totals_tx(
    tx: &mut Transaction<'_, Postgres>,
    journal_id: Uuid,
) -> Result<(Decimal, Decimal), JournalRepoError> {
    let totals = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        UPDATE journals j
        SET total_debit = s.d, total_credit = s.c
        FROM (
            SELECT COALESCE(SUM(debit_amount), 0) AS d,
                   COALESCE(SUM(credit_amount), 0) AS c
            FROM journal_entries
            WHERE journal_id = $1
        ) s
        WHERE j.id = $1
        RETURNING s.d, s.c
        "#,
    )
    .bind(journal_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(JournalRepoError::NotFound(journal_id))?;

    Ok(totals)
}

/// Per-account debit/credit aggregates over posted and reversed journals
/// up to a date, joined with account metadata
pub async fn account_aggregates(
    pool: &PgPool,
    org_id: &str,
    as_of: NaiveDate,
) -> Result<Vec<AccountAggregate>, JournalRepoError> {
    let rows = sqlx::query_as::<_, AccountAggregate>(
        r#"
        SELECT a.id AS account_id, a.code, a.name, a.account_type,
               COALESCE(SUM(e.debit_amount), 0) AS total_debit,
               COALESCE(SUM(e.credit_amount), 0) AS total_credit
        FROM journal_entries e
        JOIN journals j ON j.id = e.journal_id
        JOIN accounts a ON a.id = e.account_id
        WHERE j.org_id = $1
          AND j.status IN ('posted', 'reversed')
          AND j.posting_date <= $2
        GROUP BY a.id, a.code, a.name, a.account_type
        ORDER BY a.code
        "#,
    )
    .bind(org_id)
    .bind(as_of)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Per-account aggregates over a date range, restricted to income and
/// expense accounts (year-end profit & loss computation)
pub async fn profit_and_loss_aggregates_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<AccountAggregate>, JournalRepoError> {
    let rows = sqlx::query_as::<_, AccountAggregate>(
        r#"
        SELECT a.id AS account_id, a.code, a.name, a.account_type,
               COALESCE(SUM(e.debit_amount), 0) AS total_debit,
               COALESCE(SUM(e.credit_amount), 0) AS total_credit
        FROM journal_entries e
        JOIN journals j ON j.id = e.journal_id
        JOIN accounts a ON a.id = e.account_id
        WHERE j.org_id = $1
          AND j.status IN ('posted', 'reversed')
          AND j.posting_date BETWEEN $2 AND $3
          AND a.account_type IN ('income', 'expense')
        GROUP BY a.id, a.code, a.name, a.account_type
        ORDER BY a.code
        "#,
    )
    .bind(org_id)
    .bind(from)
    .bind(to)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows)
}

/// Ledger-wide debit and credit totals over posted and reversed journals
/// up to a date
pub async fn ledger_totals(
    pool: &PgPool,
    org_id: &str,
    as_of: NaiveDate,
) -> Result<(Decimal, Decimal), JournalRepoError> {
    let totals = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT COALESCE(SUM(e.debit_amount), 0), COALESCE(SUM(e.credit_amount), 0)
        FROM journal_entries e
        JOIN journals j ON j.id = e.journal_id
        WHERE j.org_id = $1
          AND j.status IN ('posted', 'reversed')
          AND j.posting_date <= $2
        "#,
    )
    .bind(org_id)
    .bind(as_of)
    .fetch_one(pool)
    .await?;

    Ok(totals)
}

/// Journals whose own entries do not sum to zero beyond the tolerance
pub async fn find_unbalanced_journals(
    pool: &PgPool,
    org_id: &str,
    as_of: NaiveDate,
    tolerance: Decimal,
) -> Result<Vec<UnbalancedJournalRow>, JournalRepoError> {
    let rows = sqlx::query_as::<_, UnbalancedJournalRow>(
        r#"
        SELECT j.id AS journal_id,
               COALESCE(SUM(e.debit_amount), 0) AS total_debit,
               COALESCE(SUM(e.credit_amount), 0) AS total_credit
        FROM journals j
        LEFT JOIN journal_entries e ON e.journal_id = j.id
        WHERE j.org_id = $1
          AND j.status IN ('posted', 'reversed')
          AND j.posting_date <= $2
        GROUP BY j.id
        HAVING ABS(COALESCE(SUM(e.debit_amount), 0) - COALESCE(SUM(e.credit_amount), 0)) > $3
        "#,
    )
    .bind(org_id)
    .bind(as_of)
    .bind(tolerance)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Net balance (debits minus credits) of a single account up to a date
pub async fn account_balance(
    pool: &PgPool,
    org_id: &str,
    account_id: Uuid,
    as_of: NaiveDate,
) -> Result<Decimal, JournalRepoError> {
    let balance = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(e.debit_amount - e.credit_amount), 0)
        FROM journal_entries e
        JOIN journals j ON j.id = e.journal_id
        WHERE j.org_id = $1
          AND e.account_id = $2
          AND j.status IN ('posted', 'reversed')
          AND j.posting_date <= $3
        "#,
    )
    .bind(org_id)
    .bind(account_id)
    .bind(as_of)
    .fetch_one(pool)
    .await?;

    Ok(balance)
}
