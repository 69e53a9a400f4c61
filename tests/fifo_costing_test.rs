//! Integration tests for FIFO inventory costing
//!
//! Layers consume oldest-first by acquisition date; back-dated issues only
//! see layers that existed on their posting date.

mod common;

use chrono::{Datelike, NaiveDate, Utc};
use common::{get_test_pool, setup_org, unique_org};
use ledger_core_rs::services::inventory_service::{self, InventoryError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn item() -> String {
    format!("item_{}", Uuid::new_v4().simple())
}

/// Posting dates inside the generated calendar, regardless of when the
/// suite runs.
fn day(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(Utc::now().year(), 3, day).unwrap()
}

#[tokio::test]
async fn test_fifo_consumes_layers_in_acquisition_order() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_fifo");
    setup_org(&pool, &org_id).await;
    let item_id = item();

    inventory_service::process_inbound(
        &pool, &org_id, &item_id, "wh_main", dec!(10), dec!(5), "purchase_order", "po_1", day(1),
    )
    .await
    .unwrap();
    inventory_service::process_inbound(
        &pool, &org_id, &item_id, "wh_main", dec!(10), dec!(7), "purchase_order", "po_2", day(2),
    )
    .await
    .unwrap();

    let costing = inventory_service::process_outbound(
        &pool, &org_id, &item_id, "wh_main", dec!(15), "invoice", "inv_1", day(3),
    )
    .await
    .unwrap();

    assert_eq!(costing.total_cost, dec!(85.00));
    assert_eq!(costing.average_unit_cost, dec!(5.6667));
    assert_eq!(costing.consumptions.len(), 2);
    assert_eq!(costing.consumptions[0].quantity, dec!(10));
    assert_eq!(costing.consumptions[0].unit_cost, dec!(5));
    assert_eq!(costing.consumptions[1].quantity, dec!(5));
    assert_eq!(costing.consumptions[1].unit_cost, dec!(7));

    // Remaining stock: 5 units of the second layer.
    let levels = inventory_service::get_inventory_levels(&pool, &org_id, &item_id)
        .await
        .unwrap();
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0].total_quantity, dec!(5));
    assert_eq!(levels[0].total_value, dec!(35));
    assert_eq!(levels[0].average_cost, dec!(7));
}

#[tokio::test]
async fn test_back_dated_outbound_ignores_later_layers() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_temporal");
    setup_org(&pool, &org_id).await;
    let item_id = item();

    inventory_service::process_inbound(
        &pool, &org_id, &item_id, "wh_main", dec!(10), dec!(5), "purchase_order", "po_1", day(1),
    )
    .await
    .unwrap();
    inventory_service::process_inbound(
        &pool, &org_id, &item_id, "wh_main", dec!(10), dec!(7), "purchase_order", "po_2", day(10),
    )
    .await
    .unwrap();

    // An issue posted on day 5 can only see the first layer even though the
    // second exists at execution time.
    let err = inventory_service::process_outbound(
        &pool, &org_id, &item_id, "wh_main", dec!(15), "invoice", "inv_1", day(5),
    )
    .await
    .unwrap_err();

    match err {
        InventoryError::InsufficientInventory {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, dec!(15));
            assert_eq!(available, dec!(10));
        }
        other => panic!("expected InsufficientInventory, got {other}"),
    }

    // Within the eligible stock the same back-dated issue succeeds.
    let costing = inventory_service::process_outbound(
        &pool, &org_id, &item_id, "wh_main", dec!(8), "invoice", "inv_2", day(5),
    )
    .await
    .unwrap();
    assert_eq!(costing.total_cost, dec!(40.00));
    assert_eq!(costing.consumptions[0].unit_cost, dec!(5));
}

#[tokio::test]
async fn test_opening_balance_posts_journal_and_layer() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_opening");
    setup_org(&pool, &org_id).await;
    let item_id = item();

    let result = inventory_service::create_opening_balance(
        &pool, &org_id, "actor_1", &item_id, "wh_main", dec!(20), dec!(3.50), day(1),
    )
    .await
    .unwrap();

    let journal_id = result.journal_id.expect("opening balance journal");

    // Debit inventory asset, credit opening balance equity, balanced at 70.
    let rows = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT e.debit_amount, e.credit_amount
        FROM journal_entries e
        WHERE e.journal_id = $1
        ORDER BY e.line_no
        "#,
    )
    .bind(journal_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, dec!(70.00));
    assert_eq!(rows[1].1, dec!(70.00));

    let levels = inventory_service::get_inventory_levels(&pool, &org_id, &item_id)
        .await
        .unwrap();
    assert_eq!(levels[0].total_quantity, dec!(20));
    assert_eq!(levels[0].average_cost, dec!(3.50));
}

#[tokio::test]
async fn test_each_receipt_creates_its_own_layer() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_layers");
    setup_org(&pool, &org_id).await;
    let item_id = item();

    // Same item, same cost, two receipts: still two layers.
    for source in ["po_1", "po_2"] {
        inventory_service::process_inbound(
            &pool, &org_id, &item_id, "wh_main", dec!(4), dec!(9), "purchase_order", source, day(1),
        )
        .await
        .unwrap();
    }

    let layer_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM inventory_layers WHERE org_id = $1 AND item_id = $2",
    )
    .bind(&org_id)
    .bind(&item_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(layer_count, 2);
}

#[tokio::test]
async fn test_outbound_in_closed_period_is_rejected() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_fifo_closed");
    setup_org(&pool, &org_id).await;
    let item_id = item();

    inventory_service::process_inbound(
        &pool, &org_id, &item_id, "wh_main", dec!(10), dec!(5), "purchase_order", "po_1", day(1),
    )
    .await
    .unwrap();

    let period = ledger_core_rs::services::period_service::find_period_for_date(
        &pool, &org_id, day(2),
    )
    .await
    .unwrap()
    .unwrap();
    ledger_core_rs::services::period_service::close_period(&pool, period.id, "actor_1", true)
        .await
        .unwrap();

    let err = inventory_service::process_outbound(
        &pool, &org_id, &item_id, "wh_main", dec!(5), "invoice", "inv_1", day(2),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        InventoryError::Period(
            ledger_core_rs::services::period_service::PeriodError::PeriodSoftClosed { .. }
        )
    ));
}

#[tokio::test]
async fn test_nonpositive_quantities_are_rejected() {
    let pool = get_test_pool().await;
    let org_id = unique_org("org_fifo_qty");
    setup_org(&pool, &org_id).await;
    let item_id = item();

    let err = inventory_service::process_inbound(
        &pool, &org_id, &item_id, "wh_main", dec!(0), dec!(5), "purchase_order", "po_1", day(1),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, InventoryError::NonPositiveQuantity(_)));
}
