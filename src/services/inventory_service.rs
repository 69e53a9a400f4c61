//! FIFO inventory costing engine
//!
//! Every receipt is its own cost layer; layers are never merged. Outbound
//! consumption walks eligible layers oldest-first and never touches a layer
//! acquired after the outbound posting date, so back-dated issues cost out
//! against the stock that existed on that date.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::repos::account_repo::{self, AccountError, AccountRole};
use crate::repos::inventory_repo::{
    self, InventoryLayer, InventoryRepoError, MovementDirection, MovementDraft, MovementStatus,
    WarehouseStock,
};
use crate::repos::journal_repo::{self, EntryDraft, JournalDraft, JournalRepoError};
use crate::services::period_service::{self, PeriodError};

/// Statement timeout for a standalone outbound transaction.
const OUTBOUND_TIMEOUT: &str = "10s";

/// Errors that can occur during inventory costing operations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error(
        "Insufficient inventory for item_id={item_id}, warehouse_id={warehouse_id}: \
         requested {requested}, available {available}"
    )]
    InsufficientInventory {
        item_id: String,
        warehouse_id: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("Inventory movement already reversed: {0}")]
    MovementAlreadyReversed(Uuid),

    #[error("Period error: {0}")]
    Period(#[from] PeriodError),

    #[error("Inventory repository error: {0}")]
    Repo(#[from] InventoryRepoError),

    #[error("Journal repository error: {0}")]
    Journal(#[from] JournalRepoError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One layer's share of an outbound consumption
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerConsumption {
    pub layer_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub cost: Decimal,
}

/// Costing result of an outbound issue
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCosting {
    pub quantity: Decimal,
    pub total_cost: Decimal,
    pub average_unit_cost: Decimal,
    pub consumptions: Vec<LayerConsumption>,
    pub movement_ids: Vec<Uuid>,
}

/// Result of an inbound receipt or opening balance
#[derive(Debug, Clone, Serialize)]
pub struct InboundResult {
    pub layer_id: Uuid,
    pub movement_id: Uuid,
    pub journal_id: Option<Uuid>,
}

/// Create an opening balance: journal (debit inventory asset, credit opening
/// balance equity), a new layer, and its inbound movement, atomically.
pub async fn create_opening_balance(
    pool: &PgPool,
    org_id: &str,
    actor_id: &str,
    item_id: &str,
    warehouse_id: &str,
    quantity: Decimal,
    unit_cost: Decimal,
    as_of_date: NaiveDate,
) -> Result<InboundResult, InventoryError> {
    if quantity <= Decimal::ZERO {
        return Err(InventoryError::NonPositiveQuantity(quantity));
    }

    period_service::validate_posting_date(pool, org_id, as_of_date, false).await?;

    let mut tx = pool.begin().await?;

    let inventory_asset =
        account_repo::resolve_role_tx(&mut tx, org_id, AccountRole::InventoryAsset).await?;
    let opening_equity =
        account_repo::resolve_role_tx(&mut tx, org_id, AccountRole::OpeningBalanceEquity).await?;

    let value = (quantity * unit_cost).round_dp(2);
    let journal_id = journal_repo::insert_journal_tx(
        &mut tx,
        &JournalDraft {
            org_id: org_id.to_string(),
            description: format!("Opening balance {item_id} @ {warehouse_id}"),
            posting_date: as_of_date,
            source_type: Some("opening_balance".to_string()),
            source_id: Some(item_id.to_string()),
            reversal_of: None,
            created_by: actor_id.to_string(),
            entries: vec![
                EntryDraft {
                    account_id: inventory_asset.id,
                    debit_amount: value,
                    credit_amount: Decimal::ZERO,
                    memo: None,
                },
                EntryDraft {
                    account_id: opening_equity.id,
                    debit_amount: Decimal::ZERO,
                    credit_amount: value,
                    memo: None,
                },
            ],
        },
    )
    .await?;

    let layer_id = inventory_repo::insert_layer_tx(
        &mut tx,
        org_id,
        item_id,
        warehouse_id,
        quantity,
        unit_cost,
        "opening_balance",
        item_id,
        as_of_date,
    )
    .await?;

    let movement_id = inventory_repo::insert_movement_tx(
        &mut tx,
        &MovementDraft {
            org_id: org_id.to_string(),
            item_id: item_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            layer_id,
            direction: MovementDirection::In,
            quantity,
            unit_cost,
            movement_type: "opening_balance".to_string(),
            source_type: Some("opening_balance".to_string()),
            source_id: Some(item_id.to_string()),
            journal_id: Some(journal_id),
            posting_date: as_of_date,
            reversal_of: None,
        },
    )
    .await?;

    tx.commit().await?;

    Ok(InboundResult {
        layer_id,
        movement_id,
        journal_id: Some(journal_id),
    })
}

/// Receive stock: one new layer per receipt plus its inbound movement
pub async fn process_inbound(
    pool: &PgPool,
    org_id: &str,
    item_id: &str,
    warehouse_id: &str,
    quantity: Decimal,
    unit_cost: Decimal,
    source_type: &str,
    source_id: &str,
    posting_date: NaiveDate,
) -> Result<InboundResult, InventoryError> {
    if quantity <= Decimal::ZERO {
        return Err(InventoryError::NonPositiveQuantity(quantity));
    }

    period_service::validate_posting_date(pool, org_id, posting_date, false).await?;

    let mut tx = pool.begin().await?;
    let result = process_inbound_tx(
        &mut tx,
        org_id,
        item_id,
        warehouse_id,
        quantity,
        unit_cost,
        source_type,
        source_id,
        posting_date,
    )
    .await?;
    tx.commit().await?;

    Ok(result)
}

/// Transaction-scoped inbound for composition inside a coordinated mutation
pub async fn process_inbound_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    item_id: &str,
    warehouse_id: &str,
    quantity: Decimal,
    unit_cost: Decimal,
    source_type: &str,
    source_id: &str,
    posting_date: NaiveDate,
) -> Result<InboundResult, InventoryError> {
    let layer_id = inventory_repo::insert_layer_tx(
        tx,
        org_id,
        item_id,
        warehouse_id,
        quantity,
        unit_cost,
        source_type,
        source_id,
        posting_date,
    )
    .await?;

    let movement_id = inventory_repo::insert_movement_tx(
        tx,
        &MovementDraft {
            org_id: org_id.to_string(),
            item_id: item_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            layer_id,
            direction: MovementDirection::In,
            quantity,
            unit_cost,
            movement_type: "receipt".to_string(),
            source_type: Some(source_type.to_string()),
            source_id: Some(source_id.to_string()),
            journal_id: None,
            posting_date,
            reversal_of: None,
        },
    )
    .await?;

    tracing::debug!(
        org_id = %org_id,
        item_id = %item_id,
        layer_id = %layer_id,
        quantity = %quantity,
        "Inventory layer created"
    );

    Ok(InboundResult {
        layer_id,
        movement_id,
        journal_id: None,
    })
}

/// Issue stock FIFO, opening a bounded standalone transaction
pub async fn process_outbound(
    pool: &PgPool,
    org_id: &str,
    item_id: &str,
    warehouse_id: &str,
    quantity: Decimal,
    source_type: &str,
    source_id: &str,
    posting_date: NaiveDate,
) -> Result<OutboundCosting, InventoryError> {
    period_service::validate_posting_date(pool, org_id, posting_date, false).await?;

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("SET LOCAL statement_timeout = '{OUTBOUND_TIMEOUT}'"))
        .execute(&mut *tx)
        .await?;

    let costing = process_outbound_tx(
        &mut tx,
        org_id,
        item_id,
        warehouse_id,
        quantity,
        source_type,
        source_id,
        posting_date,
    )
    .await?;
    tx.commit().await?;

    Ok(costing)
}

/// Transaction-scoped FIFO issue for composition inside a coordinated
/// mutation (posting-date validation is the caller's responsibility there)
pub async fn process_outbound_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    item_id: &str,
    warehouse_id: &str,
    quantity: Decimal,
    source_type: &str,
    source_id: &str,
    posting_date: NaiveDate,
) -> Result<OutboundCosting, InventoryError> {
    if quantity <= Decimal::ZERO {
        return Err(InventoryError::NonPositiveQuantity(quantity));
    }

    let layers =
        inventory_repo::lock_eligible_layers_tx(tx, org_id, item_id, warehouse_id, posting_date)
            .await?;

    let consumptions = plan_consumption(&layers, quantity).map_err(|available| {
        InventoryError::InsufficientInventory {
            item_id: item_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            requested: quantity,
            available,
        }
    })?;

    let mut movement_ids = Vec::with_capacity(consumptions.len());
    for consumption in &consumptions {
        inventory_repo::consume_layer_tx(tx, consumption.layer_id, consumption.quantity).await?;

        let movement_id = inventory_repo::insert_movement_tx(
            tx,
            &MovementDraft {
                org_id: org_id.to_string(),
                item_id: item_id.to_string(),
                warehouse_id: warehouse_id.to_string(),
                layer_id: consumption.layer_id,
                direction: MovementDirection::Out,
                quantity: consumption.quantity,
                unit_cost: consumption.unit_cost,
                movement_type: "issue".to_string(),
                source_type: Some(source_type.to_string()),
                source_id: Some(source_id.to_string()),
                journal_id: None,
                posting_date,
                reversal_of: None,
            },
        )
        .await?;
        movement_ids.push(movement_id);
    }

    let total_cost: Decimal = consumptions.iter().map(|c| c.cost).sum();
    let average_unit_cost = (total_cost / quantity).round_dp(4);

    tracing::debug!(
        org_id = %org_id,
        item_id = %item_id,
        quantity = %quantity,
        total_cost = %total_cost,
        layers_touched = consumptions.len(),
        "FIFO outbound costed"
    );

    Ok(OutboundCosting {
        quantity,
        total_cost,
        average_unit_cost,
        consumptions,
        movement_ids,
    })
}

/// Pure FIFO planner: walk layers in the order given, consuming until the
/// request is filled. Errs with the available total when stock is short.
pub fn plan_consumption(
    layers: &[InventoryLayer],
    requested: Decimal,
) -> Result<Vec<LayerConsumption>, Decimal> {
    let available: Decimal = layers.iter().map(|l| l.quantity_remaining).sum();
    if available < requested {
        return Err(available);
    }

    let mut remaining = requested;
    let mut consumptions = Vec::new();

    for layer in layers {
        if remaining <= Decimal::ZERO {
            break;
        }

        let take = layer.quantity_remaining.min(remaining);
        if take <= Decimal::ZERO {
            continue;
        }

        consumptions.push(LayerConsumption {
            layer_id: layer.id,
            quantity: take,
            unit_cost: layer.unit_cost,
            cost: (take * layer.unit_cost).round_dp(2),
        });
        remaining -= take;
    }

    Ok(consumptions)
}

/// Post the cost-of-goods-sold journal for a previously computed outbound
/// (debit COGS, credit inventory asset)
pub async fn create_cogs_journal_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    actor_id: &str,
    costing: &OutboundCosting,
    description: &str,
    posting_date: NaiveDate,
) -> Result<Uuid, InventoryError> {
    let cogs = account_repo::resolve_role_tx(tx, org_id, AccountRole::CostOfGoodsSold).await?;
    let inventory_asset =
        account_repo::resolve_role_tx(tx, org_id, AccountRole::InventoryAsset).await?;

    let journal_id = journal_repo::insert_journal_tx(
        tx,
        &JournalDraft {
            org_id: org_id.to_string(),
            description: description.to_string(),
            posting_date,
            source_type: Some("cogs".to_string()),
            source_id: None,
            reversal_of: None,
            created_by: actor_id.to_string(),
            entries: vec![
                EntryDraft {
                    account_id: cogs.id,
                    debit_amount: costing.total_cost,
                    credit_amount: Decimal::ZERO,
                    memo: None,
                },
                EntryDraft {
                    account_id: inventory_asset.id,
                    debit_amount: Decimal::ZERO,
                    credit_amount: costing.total_cost,
                    memo: None,
                },
            ],
        },
    )
    .await?;

    Ok(journal_id)
}

/// Per-warehouse stock snapshot for an item: quantity, value, and
/// weighted-average cost over active layers. Read-only, no locking.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryLevel {
    pub warehouse_id: String,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
    pub average_cost: Decimal,
}

pub async fn get_inventory_levels(
    pool: &PgPool,
    org_id: &str,
    item_id: &str,
) -> Result<Vec<InventoryLevel>, InventoryError> {
    let stock = inventory_repo::warehouse_stock(pool, org_id, item_id).await?;

    Ok(stock
        .into_iter()
        .map(|s: WarehouseStock| {
            let average_cost = if s.total_quantity > Decimal::ZERO {
                (s.total_value / s.total_quantity).round_dp(4)
            } else {
                Decimal::ZERO
            };
            InventoryLevel {
                warehouse_id: s.warehouse_id,
                total_quantity: s.total_quantity,
                total_value: s.total_value,
                average_cost,
            }
        })
        .collect())
}

/// Reverse a movement inside a caller transaction: flip the direction with a
/// linked reversal movement, mark the original reversed, and restore or
/// retire the referenced layer. Never creates a new layer.
pub async fn reverse_movement_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    movement_id: Uuid,
) -> Result<Uuid, InventoryError> {
    let movement = inventory_repo::lock_movement_tx(tx, org_id, movement_id).await?;

    if movement.status == MovementStatus::Reversed {
        return Err(InventoryError::MovementAlreadyReversed(movement_id));
    }

    let flipped = match movement.direction {
        MovementDirection::In => MovementDirection::Out,
        MovementDirection::Out => MovementDirection::In,
    };

    let reversal_id = inventory_repo::insert_movement_tx(
        tx,
        &MovementDraft {
            org_id: org_id.to_string(),
            item_id: movement.item_id.clone(),
            warehouse_id: movement.warehouse_id.clone(),
            layer_id: movement.layer_id,
            direction: flipped,
            quantity: movement.quantity,
            unit_cost: movement.unit_cost,
            movement_type: "reversal".to_string(),
            source_type: movement.source_type.clone(),
            source_id: movement.source_id.clone(),
            journal_id: None,
            posting_date: movement.posting_date,
            reversal_of: Some(movement.id),
        },
    )
    .await?;

    inventory_repo::mark_movement_reversed_tx(tx, movement.id).await?;

    match movement.direction {
        // Undoing a consumption puts the quantity back on the original layer.
        MovementDirection::Out => {
            inventory_repo::restore_layer_tx(tx, movement.layer_id, movement.quantity).await?;
        }
        // Undoing a receipt retires the layer it created.
        MovementDirection::In => {
            inventory_repo::mark_layer_reversed_tx(tx, movement.layer_id).await?;
        }
    }

    tracing::info!(
        org_id = %org_id,
        movement_id = %movement_id,
        reversal_id = %reversal_id,
        "Inventory movement reversed"
    );

    Ok(reversal_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use crate::repos::inventory_repo::LayerStatus;
    use rust_decimal_macros::dec;

    fn layer(qty: Decimal, cost: Decimal, acquired: NaiveDate) -> InventoryLayer {
        InventoryLayer {
            id: Uuid::new_v4(),
            org_id: "org_1".to_string(),
            item_id: "item_1".to_string(),
            warehouse_id: "wh_1".to_string(),
            original_quantity: qty,
            quantity_remaining: qty,
            unit_cost: cost,
            source_type: "receipt".to_string(),
            source_id: "po_1".to_string(),
            acquired_date: acquired,
            status: LayerStatus::Active,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_fifo_consumes_oldest_first() {
        let l1 = layer(dec!(10), dec!(5), date(2026, 3, 1));
        let l2 = layer(dec!(10), dec!(7), date(2026, 3, 2));
        let layers = vec![l1.clone(), l2.clone()];

        let plan = plan_consumption(&layers, dec!(15)).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].layer_id, l1.id);
        assert_eq!(plan[0].quantity, dec!(10));
        assert_eq!(plan[0].cost, dec!(50.00));
        assert_eq!(plan[1].layer_id, l2.id);
        assert_eq!(plan[1].quantity, dec!(5));
        assert_eq!(plan[1].cost, dec!(35.00));

        let total: Decimal = plan.iter().map(|c| c.cost).sum();
        assert_eq!(total, dec!(85.00));
        assert_eq!((total / dec!(15)).round_dp(3), dec!(5.667));
    }

    #[test]
    fn test_partial_layer_is_consumed_first() {
        let mut l1 = layer(dec!(10), dec!(5), date(2026, 3, 1));
        l1.quantity_remaining = dec!(2);
        let l2 = layer(dec!(10), dec!(7), date(2026, 3, 2));

        let plan = plan_consumption(&[l1.clone(), l2], dec!(6)).unwrap();
        assert_eq!(plan[0].layer_id, l1.id);
        assert_eq!(plan[0].quantity, dec!(2));
        assert_eq!(plan[1].quantity, dec!(4));
    }

    #[test]
    fn test_insufficient_inventory_reports_available() {
        let layers = vec![layer(dec!(3), dec!(5), date(2026, 3, 1))];
        let available = plan_consumption(&layers, dec!(10)).unwrap_err();
        assert_eq!(available, dec!(3));
    }

    #[test]
    fn test_exact_fill_stops_at_boundary() {
        let l1 = layer(dec!(10), dec!(5), date(2026, 3, 1));
        let l2 = layer(dec!(10), dec!(7), date(2026, 3, 2));

        let plan = plan_consumption(&[l1, l2.clone()], dec!(10)).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].quantity, dec!(10));
    }

    #[test]
    fn test_fractional_costs_round_to_cents() {
        let layers = vec![layer(dec!(3), dec!(3.333), date(2026, 3, 1))];
        let plan = plan_consumption(&layers, dec!(3)).unwrap();
        assert_eq!(plan[0].cost, dec!(10.00));
    }
}
