//! Repository for chart-of-accounts access and semantic account resolution
//!
//! Accounts are resolved by semantic role (retained earnings, cost of goods
//! sold, ...) and created on first use so callers never deal with raw codes.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Account type enum matching database account_type
#[derive(Debug, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "account_type", rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

/// Semantic roles the core resolves to concrete accounts on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRole {
    RetainedEarnings,
    OpeningBalanceEquity,
    InventoryAsset,
    CostOfGoodsSold,
    AccountsReceivable,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetainedEarnings => "retained_earnings",
            Self::OpeningBalanceEquity => "opening_balance_equity",
            Self::InventoryAsset => "inventory_asset",
            Self::CostOfGoodsSold => "cost_of_goods_sold",
            Self::AccountsReceivable => "accounts_receivable",
        }
    }

    /// Default code and name used when the account is created lazily.
    fn defaults(&self) -> (&'static str, &'static str, AccountType) {
        match self {
            Self::RetainedEarnings => ("3900", "Retained Earnings", AccountType::Equity),
            Self::OpeningBalanceEquity => ("3000", "Opening Balance Equity", AccountType::Equity),
            Self::InventoryAsset => ("1400", "Inventory Asset", AccountType::Asset),
            Self::CostOfGoodsSold => ("5000", "Cost of Goods Sold", AccountType::Expense),
            Self::AccountsReceivable => ("1100", "Accounts Receivable", AccountType::Asset),
        }
    }
}

/// Account model representing a Chart of Accounts entry
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub org_id: String,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub system_role: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Errors that can occur during account repository operations
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: org_id={org_id}, id={id}")]
    NotFound { org_id: String, id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Find an account by id, scoped to the organization
pub async fn find_by_id(
    pool: &PgPool,
    org_id: &str,
    id: Uuid,
) -> Result<Option<Account>, AccountError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        SELECT id, org_id, code, name, account_type, system_role, is_active, created_at
        FROM accounts
        WHERE org_id = $1 AND id = $2
        "#,
    )
    .bind(org_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

/// Resolve an account by semantic role, creating it with defaults if absent
pub async fn resolve_role(
    pool: &PgPool,
    org_id: &str,
    role: AccountRole,
) -> Result<Account, AccountError> {
    if let Some(account) = find_by_role(pool, org_id, role).await? {
        return Ok(account);
    }

    let (code, name, account_type) = role.defaults();
    let id = Uuid::new_v4();

    // Two callers may race to create the role account; the partial unique
    // index on (org_id, system_role) makes the insert a no-op for the loser.
    sqlx::query(
        r#"
        INSERT INTO accounts (id, org_id, code, name, account_type, system_role, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, true)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(id)
    .bind(org_id)
    .bind(code)
    .bind(name)
    .bind(account_type)
    .bind(role.as_str())
    .execute(pool)
    .await?;

    match find_by_role(pool, org_id, role).await? {
        Some(account) => Ok(account),
        None => Err(AccountError::NotFound {
            org_id: org_id.to_string(),
            id,
        }),
    }
}

/// Transaction-scoped variant of [`resolve_role`]
pub async fn resolve_role_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
    role: AccountRole,
) -> Result<Account, AccountError> {
    let existing = sqlx::query_as::<_, Account>(
        r#"
        SELECT id, org_id, code, name, account_type, system_role, is_active, created_at
        FROM accounts
        WHERE org_id = $1 AND system_role = $2
        "#,
    )
    .bind(org_id)
    .bind(role.as_str())
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(account) = existing {
        return Ok(account);
    }

    let (code, name, account_type) = role.defaults();
    let id = Uuid::new_v4();

    let account = sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (id, org_id, code, name, account_type, system_role, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, true)
        RETURNING id, org_id, code, name, account_type, system_role, is_active, created_at
        "#,
    )
    .bind(id)
    .bind(org_id)
    .bind(code)
    .bind(name)
    .bind(account_type)
    .bind(role.as_str())
    .fetch_one(&mut **tx)
    .await?;

    Ok(account)
}

async fn find_by_role(
    pool: &PgPool,
    org_id: &str,
    role: AccountRole,
) -> Result<Option<Account>, AccountError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        SELECT id, org_id, code, name, account_type, system_role, is_active, created_at
        FROM accounts
        WHERE org_id = $1 AND system_role = $2
        "#,
    )
    .bind(org_id)
    .bind(role.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_strings_are_stable() {
        assert_eq!(AccountRole::RetainedEarnings.as_str(), "retained_earnings");
        assert_eq!(AccountRole::OpeningBalanceEquity.as_str(), "opening_balance_equity");
        assert_eq!(AccountRole::InventoryAsset.as_str(), "inventory_asset");
        assert_eq!(AccountRole::CostOfGoodsSold.as_str(), "cost_of_goods_sold");
        assert_eq!(AccountRole::AccountsReceivable.as_str(), "accounts_receivable");
    }

    #[test]
    fn test_role_defaults_match_account_class() {
        let (_, _, t) = AccountRole::RetainedEarnings.defaults();
        assert_eq!(t, AccountType::Equity);
        let (_, _, t) = AccountRole::CostOfGoodsSold.defaults();
        assert_eq!(t, AccountType::Expense);
        let (_, _, t) = AccountRole::InventoryAsset.defaults();
        assert_eq!(t, AccountType::Asset);
    }
}
