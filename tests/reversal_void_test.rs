//! Integration tests for reversal and void workflows
//!
//! A reversal journal is the exact debit/credit swap of the original and
//! nets every account back to zero; voiding an invoice unwinds its journal
//! and inventory atomically.

mod common;

use chrono::{Datelike, NaiveDate, Utc};
use common::{get_test_pool, post_journal, setup_account, setup_org, unique_org};
use futures::future::BoxFuture;
use ledger_core_rs::repos::account_repo::AccountType;
use ledger_core_rs::repos::document_repo;
use ledger_core_rs::repos::journal_repo::JournalStatus;
use ledger_core_rs::services::reversal_service::{
    self, InventoryReversalRequest, JournalReversalRequest,
};
use ledger_core_rs::services::transaction_service::{
    self, CoordinatorError, OperationContext, OperationOutcome,
};
use ledger_core_rs::services::trial_balance_service;
use ledger_core_rs::services::void_service::{self, DocumentType, VoidRequest};
use ledger_core_rs::services::inventory_service;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

fn posting_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(Utc::now().year(), 3, 15).unwrap()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfirmedInvoice {
    invoice_id: Uuid,
    journal_id: Uuid,
}

/// Confirm a minimal invoice through the coordinator: AR journal, document
/// row, and an inventory issue sourced from it.
async fn confirm_invoice_with_inventory(
    pool: &PgPool,
    org_id: &str,
    item_id: &str,
    amount: Decimal,
    ar_account: Uuid,
    revenue_account: Uuid,
) -> ConfirmedInvoice {
    let date = posting_date();

    // Stock to consume.
    inventory_service::process_inbound(
        pool, org_id, item_id, "wh_main", dec!(10), dec!(4), "purchase_order", "po_seed", date,
    )
    .await
    .unwrap();

    let ctx = OperationContext {
        org_id: org_id.to_string(),
        actor_id: "actor_1".to_string(),
        operation: "invoice_confirm".to_string(),
        idempotency_key: None,
        posting_date: Some(date),
        allow_reversal_in_closed: false,
        request: serde_json::json!({"item_id": item_id, "amount": amount}),
    };

    let org = org_id.to_string();
    let item = item_id.to_string();
    transaction_service::with_accounting_transaction(pool, ctx, move |tx: &mut Transaction<'static, Postgres>| {
        let fut: BoxFuture<'_, Result<OperationOutcome<ConfirmedInvoice>, CoordinatorError>> =
            Box::pin(async move {
                let journal_id = ledger_core_rs::repos::journal_repo::insert_journal_tx(
                    tx,
                    &ledger_core_rs::repos::journal_repo::JournalDraft {
                        org_id: org.clone(),
                        description: "Invoice".to_string(),
                        posting_date: date,
                        source_type: Some("invoice".to_string()),
                        source_id: None,
                        reversal_of: None,
                        created_by: "actor_1".to_string(),
                        entries: vec![
                            ledger_core_rs::repos::journal_repo::EntryDraft {
                                account_id: ar_account,
                                debit_amount: amount,
                                credit_amount: Decimal::ZERO,
                                memo: None,
                            },
                            ledger_core_rs::repos::journal_repo::EntryDraft {
                                account_id: revenue_account,
                                debit_amount: Decimal::ZERO,
                                credit_amount: amount,
                                memo: None,
                            },
                        ],
                    },
                )
                .await?;

                let invoice_id =
                    document_repo::insert_invoice_tx(tx, &org, amount, Some(journal_id), date)
                        .await?;

                // Issue two units against the invoice.
                inventory_service::process_outbound_tx(
                    tx,
                    &org,
                    &item,
                    "wh_main",
                    dec!(2),
                    "invoice",
                    &invoice_id.to_string(),
                    date,
                )
                .await?;

                Ok(OperationOutcome {
                    result: ConfirmedInvoice {
                        invoice_id,
                        journal_id,
                    },
                    journal_ids: vec![journal_id],
                    inventory_touched: vec![(item.clone(), "wh_main".to_string())],
                })
            });
        fut
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_reversal_round_trip_nets_to_zero() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_reverse");
    setup_org(&pool, &org_id).await;
    let cash = setup_account(&pool, &org_id, "1000", "Cash", AccountType::Asset).await;
    let revenue = setup_account(&pool, &org_id, "4000", "Revenue", AccountType::Income).await;

    let posted = post_journal(
        &pool, &org_id, "actor_1", "Sale", posting_date(), cash, revenue, dec!(320.00), None,
    )
    .await
    .unwrap();

    let result = reversal_service::create_reversal_journal(
        &pool,
        JournalReversalRequest {
            org_id: org_id.clone(),
            actor_id: "actor_2".to_string(),
            journal_id: posted.journal_id,
            reason: "entry error".to_string(),
            posting_date: posting_date(),
            idempotency_key: None,
        },
    )
    .await
    .unwrap();

    // Original transitions to reversed; the reversal links back.
    let (status, reversal_of) = sqlx::query_as::<_, (JournalStatus, Option<Uuid>)>(
        "SELECT status, reversal_of FROM journals WHERE id = $1",
    )
    .bind(posted.journal_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, JournalStatus::Reversed);
    assert_eq!(reversal_of, None);

    let (_, links_to) = sqlx::query_as::<_, (JournalStatus, Option<Uuid>)>(
        "SELECT status, reversal_of FROM journals WHERE id = $1",
    )
    .bind(result.reversal_journal_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(links_to, Some(posted.journal_id));

    // Net effect on every account is zero and the ledger still balances.
    let report = trial_balance_service::get_trial_balance(&pool, &org_id, posting_date())
        .await
        .unwrap();
    assert!(report.is_balanced);
    for row in &report.rows {
        assert_eq!(row.net_balance, Decimal::ZERO, "account {}", row.account_code);
    }
}

#[tokio::test]
async fn test_reversing_a_reversed_journal_fails() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_rereverse");
    setup_org(&pool, &org_id).await;
    let cash = setup_account(&pool, &org_id, "1000", "Cash", AccountType::Asset).await;
    let revenue = setup_account(&pool, &org_id, "4000", "Revenue", AccountType::Income).await;

    let posted = post_journal(
        &pool, &org_id, "actor_1", "Sale", posting_date(), cash, revenue, dec!(10.00), None,
    )
    .await
    .unwrap();

    let request = JournalReversalRequest {
        org_id: org_id.clone(),
        actor_id: "actor_1".to_string(),
        journal_id: posted.journal_id,
        reason: "first".to_string(),
        posting_date: posting_date(),
        idempotency_key: None,
    };
    reversal_service::create_reversal_journal(&pool, request.clone()).await.unwrap();

    let err = reversal_service::create_reversal_journal(&pool, request)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::JournalNotPosted(_)));
}

#[tokio::test]
async fn test_inventory_reversal_restores_layer_quantity() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_invrev");
    setup_org(&pool, &org_id).await;
    let item_id = format!("item_{}", Uuid::new_v4().simple());

    inventory_service::process_inbound(
        &pool, &org_id, &item_id, "wh_main", dec!(10), dec!(4), "purchase_order", "po_1",
        posting_date(),
    )
    .await
    .unwrap();
    let costing = inventory_service::process_outbound(
        &pool, &org_id, &item_id, "wh_main", dec!(6), "invoice", "inv_1", posting_date(),
    )
    .await
    .unwrap();

    let result = reversal_service::create_inventory_reversal(
        &pool,
        InventoryReversalRequest {
            org_id: org_id.clone(),
            actor_id: "actor_1".to_string(),
            movement_id: costing.movement_ids[0],
            reason: "shipment cancelled".to_string(),
            idempotency_key: None,
        },
    )
    .await
    .unwrap();
    assert_ne!(result.reversal_movement_id, result.original_movement_id);

    // Quantity restored on the original layer; no new layer created.
    let levels = inventory_service::get_inventory_levels(&pool, &org_id, &item_id)
        .await
        .unwrap();
    assert_eq!(levels[0].total_quantity, dec!(10));

    let layer_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM inventory_layers WHERE org_id = $1 AND item_id = $2",
    )
    .bind(&org_id)
    .bind(&item_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(layer_count, 1);

    // Reversing the same movement twice fails.
    let err = reversal_service::create_inventory_reversal(
        &pool,
        InventoryReversalRequest {
            org_id: org_id.clone(),
            actor_id: "actor_1".to_string(),
            movement_id: costing.movement_ids[0],
            reason: "again".to_string(),
            idempotency_key: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Inventory(
            ledger_core_rs::services::inventory_service::InventoryError::MovementAlreadyReversed(_)
        )
    ));
}

#[tokio::test]
async fn test_void_invoice_unwinds_journal_and_inventory() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_void");
    setup_org(&pool, &org_id).await;
    let ar = setup_account(&pool, &org_id, "1100", "AR", AccountType::Asset).await;
    let revenue = setup_account(&pool, &org_id, "4000", "Revenue", AccountType::Income).await;
    let item_id = format!("item_{}", Uuid::new_v4().simple());

    let confirmed =
        confirm_invoice_with_inventory(&pool, &org_id, &item_id, dec!(240.00), ar, revenue).await;

    let result = void_service::void_document(
        &pool,
        VoidRequest {
            org_id: org_id.clone(),
            actor_id: "actor_9".to_string(),
            document_type: DocumentType::Invoice,
            document_id: confirmed.invoice_id,
            reason: "customer cancelled".to_string(),
            idempotency_key: None,
        },
    )
    .await
    .unwrap();

    assert!(result.reversal_journal_id.is_some());
    assert_eq!(result.reversed_movement_ids.len(), 1);

    // Original journal reversed, invoice voided, stock restored.
    let status = sqlx::query_scalar::<_, JournalStatus>(
        "SELECT status FROM journals WHERE id = $1",
    )
    .bind(confirmed.journal_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, JournalStatus::Reversed);

    let invoice_status = sqlx::query_scalar::<_, String>(
        "SELECT status::TEXT FROM invoices WHERE id = $1",
    )
    .bind(confirmed.invoice_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(invoice_status, "voided");

    let levels = inventory_service::get_inventory_levels(&pool, &org_id, &item_id)
        .await
        .unwrap();
    assert_eq!(levels[0].total_quantity, dec!(10));

    // Voiding again fails.
    let err = void_service::void_document(
        &pool,
        VoidRequest {
            org_id: org_id.clone(),
            actor_id: "actor_9".to_string(),
            document_type: DocumentType::Invoice,
            document_id: confirmed.invoice_id,
            reason: "again".to_string(),
            idempotency_key: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CoordinatorError::AlreadyVoided(_)));
}

#[tokio::test]
async fn test_void_refused_while_payments_exist() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_void_pay");
    setup_org(&pool, &org_id).await;
    let ar = setup_account(&pool, &org_id, "1100", "AR", AccountType::Asset).await;
    let revenue = setup_account(&pool, &org_id, "4000", "Revenue", AccountType::Income).await;
    let item_id = format!("item_{}", Uuid::new_v4().simple());

    let confirmed =
        confirm_invoice_with_inventory(&pool, &org_id, &item_id, dec!(80.00), ar, revenue).await;

    // Record a payment directly against the invoice.
    let mut tx = pool.begin().await.unwrap();
    document_repo::insert_payment_tx(&mut tx, &org_id, confirmed.invoice_id, dec!(80.00), None, posting_date())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let err = void_service::void_document(
        &pool,
        VoidRequest {
            org_id: org_id.clone(),
            actor_id: "actor_1".to_string(),
            document_type: DocumentType::Invoice,
            document_id: confirmed.invoice_id,
            reason: "cancel".to_string(),
            idempotency_key: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CoordinatorError::HasPayments { .. }));

    // Nothing was unwound.
    let status = sqlx::query_scalar::<_, JournalStatus>(
        "SELECT status FROM journals WHERE id = $1",
    )
    .bind(confirmed.journal_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, JournalStatus::Posted);
}
