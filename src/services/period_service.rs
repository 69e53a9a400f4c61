//! Fiscal period controller
//!
//! Owns the fiscal calendar: lazy profile creation, period generation for
//! the current and next two fiscal years, the posting-date state machine,
//! and the front-to-back close ordering invariant.

use chrono::{Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::repos::account_repo::{self, AccountError, AccountRole};
use crate::repos::period_repo::{self, AccountingPeriod, PeriodRepoError, PeriodStatus};
use crate::repos::profile_repo::{self, OrgProfile, ProfileChanges, ProfileError};

/// How many fiscal years the generator materializes (current + 2 future).
const GENERATED_YEARS: i32 = 3;

/// Errors that can occur during period operations
#[derive(Debug, Error)]
pub enum PeriodError {
    #[error("No accounting period found for org_id={org_id}, date={date}")]
    PeriodNotFound { org_id: String, date: NaiveDate },

    #[error("Accounting period is soft-closed: period_id={period_id}, date={date}")]
    PeriodSoftClosed { period_id: Uuid, date: NaiveDate },

    #[error("Accounting period is closed: period_id={period_id}, date={date}")]
    PeriodClosed { period_id: Uuid, date: NaiveDate },

    #[error("Cannot close period {period_id}: {open_count} earlier period(s) still open")]
    PriorPeriodsOpen { period_id: Uuid, open_count: i64 },

    #[error("Period is not closed: {0}")]
    PeriodNotClosed(Uuid),

    #[error("Period repository error: {0}")]
    Repo(#[from] PeriodRepoError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),
}

/// Outcome of validating a posting date against the period state machine
#[derive(Debug, Clone)]
pub struct PostingDateCheck {
    pub period_id: Uuid,
    pub period_status: PeriodStatus,
    /// Set when the target period is open but has already elapsed: the
    /// posting is back-dated and downstream corrections need reversals.
    pub requires_reversal: bool,
}

/// Outcome of reopening a period
#[derive(Debug, Clone)]
pub struct ReopenOutcome {
    pub period: AccountingPeriod,
    /// Later periods still closed after the reopen ("closed sandwiching
    /// open"). Non-fatal; the controller never cascades.
    pub closed_after: Vec<Uuid>,
}

/// Return the profile for an organization, creating it with defaults
/// (calendar fiscal year, accrual basis) on first access
pub async fn get_or_create_profile(pool: &PgPool, org_id: &str) -> Result<OrgProfile, PeriodError> {
    if let Some(profile) = profile_repo::find(pool, org_id).await? {
        return Ok(profile);
    }

    let retained = account_repo::resolve_role(pool, org_id, AccountRole::RetainedEarnings).await?;
    let profile = profile_repo::insert_default(pool, org_id, retained.id).await?;

    tracing::info!(org_id = %org_id, "Created organization profile with defaults");

    Ok(profile)
}

/// Generate monthly periods for the current fiscal year and the following
/// two years. Idempotent: existing (org, fiscal_year, period_number) rows
/// are skipped.
pub async fn generate_periods(
    pool: &PgPool,
    org_id: &str,
    profile: &OrgProfile,
) -> Result<u64, PeriodError> {
    let today = Utc::now().date_naive();
    let first_year = current_fiscal_year(
        today,
        profile.fiscal_year_start_month as u32,
        profile.fiscal_year_start_day as u32,
    );

    let mut created = 0u64;
    for fiscal_year in first_year..first_year + GENERATED_YEARS {
        let boundaries = period_boundaries(
            fiscal_year,
            profile.fiscal_year_start_month as u32,
            profile.fiscal_year_start_day as u32,
        );

        for (number, (start, end)) in boundaries.iter().enumerate() {
            let number = (number + 1) as i32;
            let name = format!("{} P{:02}", fiscal_year, number);
            let inserted = period_repo::insert_if_absent(
                pool, org_id, fiscal_year, number, &name, *start, *end,
            )
            .await?;
            if inserted {
                created += 1;
            }
        }
    }

    tracing::info!(org_id = %org_id, created = created, "Generated accounting periods");

    Ok(created)
}

/// Apply profile changes. A fiscal-year-start change deletes open periods
/// that have not yet elapsed and regenerates the calendar; periods with
/// posted history (closed, soft-closed, or already past) are left alone.
pub async fn update_profile(
    pool: &PgPool,
    org_id: &str,
    changes: &ProfileChanges,
) -> Result<OrgProfile, PeriodError> {
    let before = profile_repo::find(pool, org_id)
        .await?
        .ok_or_else(|| ProfileError::NotFound(org_id.to_string()))?;

    let profile = profile_repo::update(pool, org_id, changes).await?;

    let fiscal_start_changed = profile.fiscal_year_start_month != before.fiscal_year_start_month
        || profile.fiscal_year_start_day != before.fiscal_year_start_day;

    if fiscal_start_changed {
        let today = Utc::now().date_naive();
        let deleted = period_repo::delete_open_future_periods(pool, org_id, today).await?;
        let created = generate_periods(pool, org_id, &profile).await?;
        tracing::info!(
            org_id = %org_id,
            deleted = deleted,
            created = created,
            "Fiscal year start changed; regenerated open periods"
        );
    }

    Ok(profile)
}

/// Find the unique period containing a date
pub async fn find_period_for_date(
    pool: &PgPool,
    org_id: &str,
    date: NaiveDate,
) -> Result<Option<AccountingPeriod>, PeriodError> {
    Ok(period_repo::find_by_date(pool, org_id, date).await?)
}

/// Validate a posting date against the period state machine
pub async fn validate_posting_date(
    pool: &PgPool,
    org_id: &str,
    date: NaiveDate,
    allow_reversal_in_closed: bool,
) -> Result<PostingDateCheck, PeriodError> {
    let period = period_repo::find_by_date(pool, org_id, date)
        .await?
        .ok_or_else(|| PeriodError::PeriodNotFound {
            org_id: org_id.to_string(),
            date,
        })?;

    evaluate_posting_date(&period, date, Utc::now().date_naive(), allow_reversal_in_closed)
}

/// Pure posting-date state machine, separated from storage for testability
pub fn evaluate_posting_date(
    period: &AccountingPeriod,
    date: NaiveDate,
    today: NaiveDate,
    allow_reversal_in_closed: bool,
) -> Result<PostingDateCheck, PeriodError> {
    match period.status {
        PeriodStatus::Open => Ok(PostingDateCheck {
            period_id: period.id,
            period_status: period.status,
            requires_reversal: period.end_date < today,
        }),
        PeriodStatus::SoftClosed if allow_reversal_in_closed => Ok(PostingDateCheck {
            period_id: period.id,
            period_status: period.status,
            requires_reversal: true,
        }),
        PeriodStatus::SoftClosed => Err(PeriodError::PeriodSoftClosed {
            period_id: period.id,
            date,
        }),
        PeriodStatus::Closed if allow_reversal_in_closed => Ok(PostingDateCheck {
            period_id: period.id,
            period_status: period.status,
            requires_reversal: true,
        }),
        PeriodStatus::Closed => Err(PeriodError::PeriodClosed {
            period_id: period.id,
            date,
        }),
    }
}

/// Close a period. Periods close front-to-back: a hard close fails while
/// any earlier period is still open; a soft close skips the ordering check.
pub async fn close_period(
    pool: &PgPool,
    period_id: Uuid,
    actor_id: &str,
    soft: bool,
) -> Result<AccountingPeriod, PeriodError> {
    let period = period_repo::find_by_id(pool, period_id)
        .await?
        .ok_or(PeriodRepoError::NotFound(period_id))?;

    if !soft {
        let open_count = period_repo::count_earlier_open(
            pool,
            &period.org_id,
            period.fiscal_year,
            period.period_number,
        )
        .await?;

        if open_count > 0 {
            return Err(PeriodError::PriorPeriodsOpen {
                period_id,
                open_count,
            });
        }
    }

    let status = if soft {
        PeriodStatus::SoftClosed
    } else {
        PeriodStatus::Closed
    };
    let period = period_repo::mark_closed(pool, period_id, status, actor_id).await?;

    tracing::info!(
        period_id = %period_id,
        org_id = %period.org_id,
        soft = soft,
        "Accounting period closed"
    );

    Ok(period)
}

/// Reopen a closed or soft-closed period. Later closed periods are reported
/// as a warning; the controller does not cascade.
pub async fn reopen_period(
    pool: &PgPool,
    period_id: Uuid,
    actor_id: &str,
    reason: &str,
) -> Result<ReopenOutcome, PeriodError> {
    let period = period_repo::find_by_id(pool, period_id)
        .await?
        .ok_or(PeriodRepoError::NotFound(period_id))?;

    if period.status == PeriodStatus::Open {
        return Err(PeriodError::PeriodNotClosed(period_id));
    }

    let period = period_repo::mark_reopened(pool, period_id, actor_id, reason).await?;
    let closed_after = period_repo::list_later_closed(
        pool,
        &period.org_id,
        period.fiscal_year,
        period.period_number,
    )
    .await?
    .into_iter()
    .map(|p| p.id)
    .collect::<Vec<_>>();

    if !closed_after.is_empty() {
        tracing::warn!(
            period_id = %period_id,
            closed_after = closed_after.len(),
            "Reopened period is sandwiched by later closed periods"
        );
    }

    Ok(ReopenOutcome {
        period,
        closed_after,
    })
}

/// Fiscal year containing `today` for a (start month, start day) definition
pub fn current_fiscal_year(today: NaiveDate, start_month: u32, start_day: u32) -> i32 {
    let this_year_start = clamped_date(today.year(), start_month, start_day);
    if today >= this_year_start {
        today.year()
    } else {
        today.year() - 1
    }
}

/// Twelve (start, end) boundaries for a fiscal year. The configured start
/// day is clamped to each month's length, and each period ends the day
/// before the next one starts, so contiguity holds by construction.
pub fn period_boundaries(
    fiscal_year: i32,
    start_month: u32,
    start_day: u32,
) -> Vec<(NaiveDate, NaiveDate)> {
    let mut starts = Vec::with_capacity(13);
    for offset in 0..=12 {
        let months = (fiscal_year * 12 + start_month as i32 - 1) + offset;
        let year = months.div_euclid(12);
        let month = (months.rem_euclid(12) + 1) as u32;
        starts.push(clamped_date(year, month, start_day));
    }

    starts
        .windows(2)
        .map(|w| (w[0], w[1].pred_opt().expect("period start is not the minimum date")))
        .collect()
}

/// Build a date clamping the day to the target month's length
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| {
        let last = last_day_of_month(year, month);
        NaiveDate::from_ymd_opt(year, month, last).expect("valid month end")
    })
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid first of month")
        .pred_opt()
        .expect("valid previous day")
        .day()
}
