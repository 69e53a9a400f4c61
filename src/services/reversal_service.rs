//! Reversal service for journals and inventory movements
//!
//! A reversal journal swaps every entry's debit and credit and links back to
//! the original, which transitions to reversed; the net effect on every
//! account balance is zero. Both public entry points run through the
//! transaction coordinator, inheriting idempotency, period validation, and
//! audit for free.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::repos::journal_repo::{self, EntryDraft, JournalDraft, JournalEntry, JournalStatus};
use crate::services::inventory_service;
use crate::services::transaction_service::{
    self, CoordinatorError, OperationContext, OperationOutcome,
};

/// Request to reverse a posted journal
#[derive(Debug, Clone)]
pub struct JournalReversalRequest {
    pub org_id: String,
    pub actor_id: String,
    pub journal_id: Uuid,
    pub reason: String,
    pub posting_date: NaiveDate,
    pub idempotency_key: Option<String>,
}

/// Result of a journal reversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalReversalResult {
    pub original_journal_id: Uuid,
    pub reversal_journal_id: Uuid,
}

/// Request to reverse an inventory movement
#[derive(Debug, Clone)]
pub struct InventoryReversalRequest {
    pub org_id: String,
    pub actor_id: String,
    pub movement_id: Uuid,
    pub reason: String,
    pub idempotency_key: Option<String>,
}

/// Result of an inventory movement reversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReversalResult {
    pub original_movement_id: Uuid,
    pub reversal_movement_id: Uuid,
}

/// Swap each entry's debit and credit for the reversal journal
pub fn swap_entries(entries: &[JournalEntry]) -> Vec<EntryDraft> {
    entries
        .iter()
        .map(|entry| EntryDraft {
            account_id: entry.account_id,
            debit_amount: entry.credit_amount,
            credit_amount: entry.debit_amount,
            memo: entry.memo.as_ref().map(|m| format!("Reversal: {m}")),
        })
        .collect()
}

/// Transactional body of a journal reversal, shared with the void workflow.
/// The original must be posted; it transitions to reversed and the new
/// journal links back through reversal_of.
pub async fn reverse_journal_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    actor_id: &str,
    journal_id: Uuid,
    posting_date: NaiveDate,
    reason: &str,
) -> Result<Uuid, CoordinatorError> {
    let (original, entries) = journal_repo::fetch_with_entries_tx(tx, org_id, journal_id)
        .await?
        .ok_or(journal_repo::JournalRepoError::NotFound(journal_id))?;

    if original.status != JournalStatus::Posted {
        return Err(CoordinatorError::JournalNotPosted(journal_id));
    }

    let reversal_id = journal_repo::insert_journal_tx(
        tx,
        &JournalDraft {
            org_id: org_id.to_string(),
            description: format!("Reversal of {}: {}", original.description, reason),
            posting_date,
            source_type: original.source_type.clone(),
            source_id: original.source_id.clone(),
            reversal_of: Some(original.id),
            created_by: actor_id.to_string(),
            entries: swap_entries(&entries),
        },
    )
    .await?;

    journal_repo::set_status_tx(tx, original.id, JournalStatus::Reversed).await?;

    tracing::info!(
        org_id = %org_id,
        original_journal_id = %journal_id,
        reversal_journal_id = %reversal_id,
        "Journal reversed"
    );

    Ok(reversal_id)
}

/// Reverse a posted journal under the coordinator
pub async fn create_reversal_journal(
    pool: &PgPool,
    req: JournalReversalRequest,
) -> Result<JournalReversalResult, CoordinatorError> {
    let ctx = OperationContext {
        org_id: req.org_id.clone(),
        actor_id: req.actor_id.clone(),
        operation: "journal_reversal".to_string(),
        idempotency_key: req.idempotency_key.clone(),
        posting_date: Some(req.posting_date),
        allow_reversal_in_closed: true,
        request: serde_json::json!({
            "journal_id": req.journal_id,
            "reason": req.reason,
            "posting_date": req.posting_date,
        }),
    };

    transaction_service::with_accounting_transaction(pool, ctx, move |tx| {
        Box::pin(async move {
            let reversal_id = reverse_journal_tx(
                tx,
                &req.org_id,
                &req.actor_id,
                req.journal_id,
                req.posting_date,
                &req.reason,
            )
            .await?;

            Ok(OperationOutcome {
                result: JournalReversalResult {
                    original_journal_id: req.journal_id,
                    reversal_journal_id: reversal_id,
                },
                journal_ids: vec![reversal_id],
                inventory_touched: Vec::new(),
            })
        })
    })
    .await
}

/// Reverse an inventory movement under the coordinator. Only an out
/// movement restores quantity on its layer; an in reversal retires the
/// layer it created.
pub async fn create_inventory_reversal(
    pool: &PgPool,
    req: InventoryReversalRequest,
) -> Result<InventoryReversalResult, CoordinatorError> {
    let ctx = OperationContext {
        org_id: req.org_id.clone(),
        actor_id: req.actor_id.clone(),
        operation: "inventory_reversal".to_string(),
        idempotency_key: req.idempotency_key.clone(),
        // Movement reversals post into the movement's own period; the
        // closed-period gate is the reversal allowance itself.
        posting_date: Some(Utc::now().date_naive()),
        allow_reversal_in_closed: true,
        request: serde_json::json!({
            "movement_id": req.movement_id,
            "reason": req.reason,
        }),
    };

    transaction_service::with_accounting_transaction(pool, ctx, move |tx| {
        Box::pin(async move {
            let movement =
                crate::repos::inventory_repo::lock_movement_tx(tx, &req.org_id, req.movement_id)
                    .await?;
            let reversal_id =
                inventory_service::reverse_movement_tx(tx, &req.org_id, req.movement_id).await?;

            Ok(OperationOutcome {
                result: InventoryReversalResult {
                    original_movement_id: req.movement_id,
                    reversal_movement_id: reversal_id,
                },
                journal_ids: Vec::new(),
                inventory_touched: vec![(movement.item_id, movement.warehouse_id)],
            })
        })
    })
    .await
}
