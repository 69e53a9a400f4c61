//! Repository for organization accounting profiles

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Organization accounting profile: fiscal calendar and posting policy
#[derive(Debug, Clone, FromRow)]
pub struct OrgProfile {
    pub org_id: String,
    pub fiscal_year_start_month: i32,
    pub fiscal_year_start_day: i32,
    pub reporting_basis: String,
    pub base_currency: String,
    pub retained_earnings_account_id: Uuid,
    pub allow_negative_inventory: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Changes applicable to a profile; `None` leaves the field untouched
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub fiscal_year_start_month: Option<i32>,
    pub fiscal_year_start_day: Option<i32>,
    pub reporting_basis: Option<String>,
    pub base_currency: Option<String>,
    pub allow_negative_inventory: Option<bool>,
}

/// Errors that can occur during profile repository operations
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Organization profile not found: org_id={0}")]
    NotFound(String),

    #[error("Invalid fiscal year start: month={month}, day={day}")]
    InvalidFiscalStart { month: i32, day: i32 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

const SELECT_COLUMNS: &str = r#"
    SELECT org_id, fiscal_year_start_month, fiscal_year_start_day, reporting_basis,
           base_currency, retained_earnings_account_id, allow_negative_inventory,
           created_at, updated_at
    FROM org_profiles
"#;

/// Find the profile for an organization
pub async fn find(pool: &PgPool, org_id: &str) -> Result<Option<OrgProfile>, ProfileError> {
    let profile =
        sqlx::query_as::<_, OrgProfile>(&format!("{SELECT_COLUMNS} WHERE org_id = $1"))
            .bind(org_id)
            .fetch_optional(pool)
            .await?;

    Ok(profile)
}

/// Find the profile for an organization within a transaction
pub async fn find_tx(
    tx: &mut Transaction<'_, Postgres>,
    org_id: &str,
) -> Result<Option<OrgProfile>, ProfileError> {
    let profile =
        sqlx::query_as::<_, OrgProfile>(&format!("{SELECT_COLUMNS} WHERE org_id = $1"))
            .bind(org_id)
            .fetch_optional(&mut **tx)
            .await?;

    Ok(profile)
}

/// Insert a profile with defaults (calendar fiscal year, accrual basis)
///
/// Concurrent first accesses race on the primary key; the loser's insert is
/// a no-op and the winner's row is returned.
pub async fn insert_default(
    pool: &PgPool,
    org_id: &str,
    retained_earnings_account_id: Uuid,
) -> Result<OrgProfile, ProfileError> {
    sqlx::query(
        r#"
        INSERT INTO org_profiles (org_id, retained_earnings_account_id)
        VALUES ($1, $2)
        ON CONFLICT (org_id) DO NOTHING
        "#,
    )
    .bind(org_id)
    .bind(retained_earnings_account_id)
    .execute(pool)
    .await?;

    find(pool, org_id)
        .await?
        .ok_or_else(|| ProfileError::NotFound(org_id.to_string()))
}

/// Apply profile changes; only provided fields are updated
pub async fn update(
    pool: &PgPool,
    org_id: &str,
    changes: &ProfileChanges,
) -> Result<OrgProfile, ProfileError> {
    if let (Some(month), Some(day)) = (
        changes.fiscal_year_start_month,
        changes.fiscal_year_start_day,
    ) {
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(ProfileError::InvalidFiscalStart { month, day });
        }
    }

    let profile = sqlx::query_as::<_, OrgProfile>(
        r#"
        UPDATE org_profiles
        SET fiscal_year_start_month = COALESCE($2, fiscal_year_start_month),
            fiscal_year_start_day = COALESCE($3, fiscal_year_start_day),
            reporting_basis = COALESCE($4, reporting_basis),
            base_currency = COALESCE($5, base_currency),
            allow_negative_inventory = COALESCE($6, allow_negative_inventory),
            updated_at = NOW()
        WHERE org_id = $1
        RETURNING org_id, fiscal_year_start_month, fiscal_year_start_day, reporting_basis,
                  base_currency, retained_earnings_account_id, allow_negative_inventory,
                  created_at, updated_at
        "#,
    )
    .bind(org_id)
    .bind(changes.fiscal_year_start_month)
    .bind(changes.fiscal_year_start_day)
    .bind(changes.reporting_basis.as_deref())
    .bind(changes.base_currency.as_deref())
    .bind(changes.allow_negative_inventory)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ProfileError::NotFound(org_id.to_string()))?;

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_fiscal_start_rejected() {
        let err = ProfileError::InvalidFiscalStart { month: 13, day: 1 };
        assert!(err.to_string().contains("month=13"));
    }

    #[test]
    fn test_changes_default_is_empty() {
        let changes = ProfileChanges::default();
        assert!(changes.fiscal_year_start_month.is_none());
        assert!(changes.base_currency.is_none());
    }
}
