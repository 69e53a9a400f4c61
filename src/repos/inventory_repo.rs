//! Repository for inventory cost layers and movements
//!
//! Layers are immutable except for `quantity_remaining`; movements are
//! append-only. FIFO ordering is (acquired_date, created_at, id) so
//! back-dated receipts cost out in posting-date order, not insertion order.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Layer status enum matching database layer_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "layer_status", rename_all = "lowercase")]
pub enum LayerStatus {
    Active,
    Reversed,
}

/// Movement status enum matching database movement_status
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "movement_status", rename_all = "lowercase")]
pub enum MovementStatus {
    Active,
    Reversed,
}

/// Movement direction enum matching database movement_direction
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "movement_direction", rename_all = "lowercase")]
pub enum MovementDirection {
    In,
    Out,
}

/// Inventory cost layer model
#[derive(Debug, Clone, FromRow)]
pub struct InventoryLayer {
    pub id: Uuid,
    pub org_id: String,
    pub item_id: String,
    pub warehouse_id: String,
    pub original_quantity: Decimal,
    pub quantity_remaining: Decimal,
    pub unit_cost: Decimal,
    pub source_type: String,
    pub source_id: String,
    pub acquired_date: NaiveDate,
    pub status: LayerStatus,
    pub created_at: DateTime<Utc>,
}

/// Inventory movement model
#[derive(Debug, Clone, FromRow)]
pub struct InventoryMovement {
    pub id: Uuid,
    pub org_id: String,
    pub item_id: String,
    pub warehouse_id: String,
    pub layer_id: Uuid,
    pub direction: MovementDirection,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub movement_type: String,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub journal_id: Option<Uuid>,
    pub posting_date: NaiveDate,
    pub status: MovementStatus,
    pub reversal_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Movement draft for insertion
#[derive(Debug, Clone)]
pub struct MovementDraft {
    pub org_id: String,
    pub item_id: String,
    pub warehouse_id: String,
    pub layer_id: Uuid,
    pub direction: MovementDirection,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub movement_type: String,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub journal_id: Option<Uuid>,
    pub posting_date: NaiveDate,
    pub reversal_of: Option<Uuid>,
}

/// Per-warehouse stock aggregate
#[derive(Debug, Clone, FromRow)]
pub struct WarehouseStock {
    pub warehouse_id: String,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
}

/// Errors that can occur during inventory repository operations
#[derive(Debug, Error)]
pub enum InventoryRepoError {
    #[error("Inventory layer not found: {0}")]
    LayerNotFound(Uuid),

    #[error("Inventory movement not found: {0}")]
    MovementNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const LAYER_COLUMNS: &str = "id, org_id, item_id, warehouse_id, original_quantity, \
     quantity_remaining, unit_cost, source_type, source_id, acquired_date, status, created_at";

const MOVEMENT_COLUMNS: &str = "id, org_id, item_id, warehouse_id, layer_id, direction, \
     quantity, unit_cost, total_value, movement_type, source_type, source_id, journal_id, \
     posting_date, status, reversal_of, created_at";

/// Insert a new cost layer
pub async fn insert_layer_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    item_id: &str,
    warehouse_id: &str,
    quantity: Decimal,
    unit_cost: Decimal,
    source_type: &str,
    source_id: &str,
    acquired_date: NaiveDate,
) -> Result<Uuid, InventoryRepoError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO inventory_layers
            (id, org_id, item_id, warehouse_id, original_quantity, quantity_remaining,
             unit_cost, source_type, source_id, acquired_date, status)
        VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8, $9, 'active')
        "#,
    )
    .bind(id)
    .bind(org_id)
    .bind(item_id)
    .bind(warehouse_id)
    .bind(quantity)
    .bind(unit_cost)
    .bind(source_type)
    .bind(source_id)
    .bind(acquired_date)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

/// Lock and return layers eligible for FIFO consumption at a posting date:
/// active, stock remaining, and acquired on or before the date. Layers
/// received after the posting date are invisible to back-dated issues.
pub async fn lock_eligible_layers_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    item_id: &str,
    warehouse_id: &str,
    posting_date: NaiveDate,
) -> Result<Vec<InventoryLayer>, InventoryRepoError> {
    let layers = sqlx::query_as::<_, InventoryLayer>(&format!(
        r#"
        SELECT {LAYER_COLUMNS}
        FROM inventory_layers
        WHERE org_id = $1 AND item_id = $2 AND warehouse_id = $3
          AND status = 'active'
          AND quantity_remaining > 0
          AND acquired_date <= $4
        ORDER BY acquired_date, created_at, id
        FOR UPDATE
        "#
    ))
    .bind(org_id)
    .bind(item_id)
    .bind(warehouse_id)
    .bind(posting_date)
    .fetch_all(&mut **tx)
    .await?;

    Ok(layers)
}

/// Find a layer by id, locking it for update
pub async fn lock_layer_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    layer_id: Uuid,
) -> Result<InventoryLayer, InventoryRepoError> {
    sqlx::query_as::<_, InventoryLayer>(&format!(
        "SELECT {LAYER_COLUMNS} FROM inventory_layers WHERE org_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(org_id)
    .bind(layer_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(InventoryRepoError::LayerNotFound(layer_id))
}

/// Decrease a layer's remaining quantity (FIFO consumption)
pub async fn consume_layer_tx(
    tx: &mut Transaction<'_, Postgres>,
    layer_id: Uuid,
    quantity: Decimal,
) -> Result<(), InventoryRepoError> {
    let result = sqlx::query(
        r#"
        UPDATE inventory_layers
        SET quantity_remaining = quantity_remaining - $2
        WHERE id = $1 AND quantity_remaining >= $2
        "#,
    )
    .bind(layer_id)
    .bind(quantity)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(InventoryRepoError::LayerNotFound(layer_id));
    }

    Ok(())
}

/// Restore quantity onto a layer (reversal of an out movement)
pub async fn restore_layer_tx(
    tx: &mut Transaction<'_, Postgres>,
    layer_id: Uuid,
    quantity: Decimal,
) -> Result<(), InventoryRepoError> {
    let result = sqlx::query(
        r#"
        UPDATE inventory_layers
        SET quantity_remaining = quantity_remaining + $2
        WHERE id = $1
        "#,
    )
    .bind(layer_id)
    .bind(quantity)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(InventoryRepoError::LayerNotFound(layer_id));
    }

    Ok(())
}

/// Mark a layer reversed (reversal of an in movement)
pub async fn mark_layer_reversed_tx(
    tx: &mut Transaction<'_, Postgres>,
    layer_id: Uuid,
) -> Result<(), InventoryRepoError> {
    let result = sqlx::query("UPDATE inventory_layers SET status = 'reversed' WHERE id = $1")
        .bind(layer_id)
        .execute(&mut **tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(InventoryRepoError::LayerNotFound(layer_id));
    }

    Ok(())
}

/// Append a movement record
pub async fn insert_movement_tx(
    tx: &mut Transaction<'_, Postgres>,
    draft: &MovementDraft,
) -> Result<Uuid, InventoryRepoError> {
    let id = Uuid::new_v4();
    let total_value = (draft.quantity * draft.unit_cost).round_dp(2);

    sqlx::query(
        r#"
        INSERT INTO inventory_movements
            (id, org_id, item_id, warehouse_id, layer_id, direction, quantity, unit_cost,
             total_value, movement_type, source_type, source_id, journal_id, posting_date,
             status, reversal_of)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 'active', $15)
        "#,
    )
    .bind(id)
    .bind(&draft.org_id)
    .bind(&draft.item_id)
    .bind(&draft.warehouse_id)
    .bind(draft.layer_id)
    .bind(draft.direction)
    .bind(draft.quantity)
    .bind(draft.unit_cost)
    .bind(total_value)
    .bind(&draft.movement_type)
    .bind(draft.source_type.as_deref())
    .bind(draft.source_id.as_deref())
    .bind(draft.journal_id)
    .bind(draft.posting_date)
    .bind(draft.reversal_of)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

/// Find a movement by id, locking it for update
pub async fn lock_movement_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    movement_id: Uuid,
) -> Result<InventoryMovement, InventoryRepoError> {
    sqlx::query_as::<_, InventoryMovement>(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements WHERE org_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(org_id)
    .bind(movement_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(InventoryRepoError::MovementNotFound(movement_id))
}

/// Mark a movement reversed
pub async fn mark_movement_reversed_tx(
    tx: &mut Transaction<'_, Postgres>,
    movement_id: Uuid,
) -> Result<(), InventoryRepoError> {
    let result = sqlx::query("UPDATE inventory_movements SET status = 'reversed' WHERE id = $1")
        .bind(movement_id)
        .execute(&mut **tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(InventoryRepoError::MovementNotFound(movement_id));
    }

    Ok(())
}

/// Active movements generated by a source document (void workflow)
pub async fn list_active_by_source_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    source_type: &str,
    source_id: &str,
) -> Result<Vec<InventoryMovement>, InventoryRepoError> {
    let movements = sqlx::query_as::<_, InventoryMovement>(&format!(
        r#"
        SELECT {MOVEMENT_COLUMNS}
        FROM inventory_movements
        WHERE org_id = $1 AND source_type = $2 AND source_id = $3 AND status = 'active'
        ORDER BY created_at
        "#
    ))
    .bind(org_id)
    .bind(source_type)
    .bind(source_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(movements)
}

/// Net movement quantity (in minus out) for one item/warehouse; the
/// negative-inventory policy checks this. All movements count: a reversed
/// movement and its flipped reversal cancel arithmetically, so the sum is
/// the true on-hand quantity.
pub async fn net_movement_quantity_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    item_id: &str,
    warehouse_id: &str,
) -> Result<Decimal, InventoryRepoError> {
    let net = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(CASE WHEN direction = 'in' THEN quantity ELSE -quantity END), 0)
        FROM inventory_movements
        WHERE org_id = $1 AND item_id = $2 AND warehouse_id = $3
        "#,
    )
    .bind(org_id)
    .bind(item_id)
    .bind(warehouse_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(net)
}

/// Per-warehouse stock for one item across active layers (read-only)
pub async fn warehouse_stock(
    pool: &PgPool,
    org_id: &str,
    item_id: &str,
) -> Result<Vec<WarehouseStock>, InventoryRepoError> {
    let rows = sqlx::query_as::<_, WarehouseStock>(
        r#"
        SELECT warehouse_id,
               COALESCE(SUM(quantity_remaining), 0) AS total_quantity,
               COALESCE(SUM(quantity_remaining * unit_cost), 0) AS total_value
        FROM inventory_layers
        WHERE org_id = $1 AND item_id = $2 AND status = 'active'
        GROUP BY warehouse_id
        ORDER BY warehouse_id
        "#,
    )
    .bind(org_id)
    .bind(item_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Total value of all active layers for an organization (reconciliation)
pub async fn total_active_layer_value(
    pool: &PgPool,
    org_id: &str,
) -> Result<Decimal, InventoryRepoError> {
    let value = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(quantity_remaining * unit_cost), 0)
        FROM inventory_layers
        WHERE org_id = $1 AND status = 'active'
        "#,
    )
    .bind(org_id)
    .fetch_one(pool)
    .await?;

    Ok(value)
}

/// Active-layer value per warehouse (reconciliation decomposition)
pub async fn warehouse_layer_values(
    pool: &PgPool,
    org_id: &str,
) -> Result<Vec<(String, Decimal)>, InventoryRepoError> {
    let rows = sqlx::query_as::<_, (String, Decimal)>(
        r#"
        SELECT warehouse_id, COALESCE(SUM(quantity_remaining * unit_cost), 0)
        FROM inventory_layers
        WHERE org_id = $1 AND status = 'active'
        GROUP BY warehouse_id
        ORDER BY warehouse_id
        "#,
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_movement_total_value_rounds_to_cents() {
        let quantity = dec!(3);
        let unit_cost = dec!(5.6667);
        assert_eq!((quantity * unit_cost).round_dp(2), dec!(17.00));
    }

    #[test]
    fn test_repo_error_display() {
        let id = Uuid::new_v4();
        let err = InventoryRepoError::MovementNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }
}
