//! Document void workflow
//!
//! Voiding an invoice unwinds everything it produced: the document status,
//! its journal (via reversal), and every active inventory movement it
//! sourced. The whole workflow runs inside one coordinated transaction so a
//! failure at any step rolls back the entire void.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repos::document_repo::{self, InvoiceStatus};
use crate::services::inventory_service;
use crate::services::reversal_service;
use crate::services::transaction_service::{
    self, CoordinatorError, OperationContext, OperationOutcome,
};

/// Document kinds the void workflow understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
}

/// Request to void a document
#[derive(Debug, Clone)]
pub struct VoidRequest {
    pub org_id: String,
    pub actor_id: String,
    pub document_type: DocumentType,
    pub document_id: Uuid,
    pub reason: String,
    pub idempotency_key: Option<String>,
}

/// Result of a completed void
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoidResult {
    pub document_type: DocumentType,
    pub document_id: Uuid,
    pub reversal_journal_id: Option<Uuid>,
    pub reversed_movement_ids: Vec<Uuid>,
}

/// Void a document under the coordinator
pub async fn void_document(pool: &PgPool, req: VoidRequest) -> Result<VoidResult, CoordinatorError> {
    let void_date = Utc::now().date_naive();

    let ctx = OperationContext {
        org_id: req.org_id.clone(),
        actor_id: req.actor_id.clone(),
        operation: "void_invoice".to_string(),
        idempotency_key: req.idempotency_key.clone(),
        posting_date: Some(void_date),
        allow_reversal_in_closed: true,
        request: serde_json::json!({
            "document_type": req.document_type,
            "document_id": req.document_id,
            "reason": req.reason,
        }),
    };

    transaction_service::with_accounting_transaction(pool, ctx, move |tx| {
        Box::pin(async move {
            let invoice =
                document_repo::lock_invoice_tx(tx, &req.org_id, req.document_id).await?;

            if invoice.status == InvoiceStatus::Voided {
                return Err(CoordinatorError::AlreadyVoided(invoice.id));
            }

            // Payments must be voided before the invoice they settle.
            let payment_count =
                document_repo::count_active_payments_tx(tx, invoice.id).await?;
            if payment_count > 0 {
                return Err(CoordinatorError::HasPayments {
                    invoice_id: invoice.id,
                    payment_count,
                });
            }

            document_repo::mark_invoice_voided_tx(tx, invoice.id, &req.actor_id, &req.reason)
                .await?;

            let mut journal_ids = Vec::new();
            let reversal_journal_id = match invoice.journal_id {
                Some(journal_id) => {
                    let reversal_id = reversal_service::reverse_journal_tx(
                        tx,
                        &req.org_id,
                        &req.actor_id,
                        journal_id,
                        void_date,
                        &req.reason,
                    )
                    .await?;
                    journal_ids.push(reversal_id);
                    Some(reversal_id)
                }
                None => None,
            };

            let movements = crate::repos::inventory_repo::list_active_by_source_tx(
                tx,
                &req.org_id,
                "invoice",
                &invoice.id.to_string(),
            )
            .await?;

            let mut reversed_movement_ids = Vec::with_capacity(movements.len());
            let mut inventory_touched = Vec::new();
            for movement in movements {
                let reversal_id =
                    inventory_service::reverse_movement_tx(tx, &req.org_id, movement.id).await?;
                reversed_movement_ids.push(reversal_id);

                let touched = (movement.item_id.clone(), movement.warehouse_id.clone());
                if !inventory_touched.contains(&touched) {
                    inventory_touched.push(touched);
                }
            }

            tracing::info!(
                org_id = %req.org_id,
                invoice_id = %invoice.id,
                reversed_movements = reversed_movement_ids.len(),
                "Invoice voided"
            );

            Ok(OperationOutcome {
                result: VoidResult {
                    document_type: req.document_type,
                    document_id: invoice.id,
                    reversal_journal_id,
                    reversed_movement_ids,
                },
                journal_ids,
                inventory_touched,
            })
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_serializes_snake_case() {
        let json = serde_json::to_string(&DocumentType::Invoice).unwrap();
        assert_eq!(json, "\"invoice\"");
    }

    #[test]
    fn test_void_result_round_trips() {
        let result = VoidResult {
            document_type: DocumentType::Invoice,
            document_id: Uuid::new_v4(),
            reversal_journal_id: Some(Uuid::new_v4()),
            reversed_movement_ids: vec![Uuid::new_v4()],
        };

        let value = serde_json::to_value(&result).unwrap();
        let back: VoidResult = serde_json::from_value(value).unwrap();
        assert_eq!(back.document_id, result.document_id);
    }
}
