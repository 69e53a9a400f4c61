//! Reconciliation engine
//!
//! Independently verifies ledger invariants the per-operation checks might
//! miss: trial balance equality, inventory-to-GL agreement, and AR subledger
//! matching. Checks are isolated from each other; one erroring never stops
//! the rest, but any error forces the run to failed so operators never see
//! a false healthy status.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::alerts::AlertSink;
use crate::repos::account_repo::{self, AccountError, AccountRole};
use crate::repos::document_repo::{self, DocumentRepoError};
use crate::repos::inventory_repo::{self, InventoryRepoError};
use crate::repos::journal_repo::{self, JournalRepoError};
use crate::repos::recon_repo::{
    self, CheckStatus, ReconRepoError, RunStatus, VarianceDraft, VarianceSeverity,
};

/// Ledger-level checks tolerate a cent; subsystem comparisons a dollar.
const TRIAL_BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01
const CHECK_TOLERANCE: Decimal = Decimal::ONE;

/// Severity thresholds on the absolute variance amount.
const MEDIUM_MAX: Decimal = Decimal::from_parts(100, 0, 0, false, 0);
const HIGH_MAX: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Errors that can occur while reconciling
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("Reconciliation check failed: {check}: {message}")]
    CheckError { check: String, message: String },

    #[error("Journal repository error: {0}")]
    Journal(#[from] JournalRepoError),

    #[error("Inventory repository error: {0}")]
    Inventory(#[from] InventoryRepoError),

    #[error("Document repository error: {0}")]
    Document(#[from] DocumentRepoError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Reconciliation repository error: {0}")]
    Repo(#[from] ReconRepoError),
}

/// Result of one check before persistence
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub variances: Vec<VarianceDraft>,
    pub error: Option<String>,
}

impl CheckOutcome {
    fn clean() -> Self {
        Self {
            status: CheckStatus::Clean,
            variances: Vec::new(),
            error: None,
        }
    }

    fn with_variances(variances: Vec<VarianceDraft>) -> Self {
        let status = if variances.is_empty() {
            CheckStatus::Clean
        } else {
            CheckStatus::Variance
        };
        Self {
            status,
            variances,
            error: None,
        }
    }

    fn errored(check: &str, message: String) -> Self {
        tracing::error!(check = %check, error = %message, "Reconciliation check errored");
        Self {
            status: CheckStatus::Error,
            variances: Vec::new(),
            error: Some(format!("{check}: {message}")),
        }
    }
}

/// Structured summary of a reconciliation run
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSummary {
    pub run_id: Uuid,
    pub org_id: String,
    pub status: RunStatus,
    pub as_of_date: NaiveDate,
    pub trial_balance_status: CheckStatus,
    pub inventory_status: CheckStatus,
    pub subledger_status: CheckStatus,
    pub variance_count: i32,
    pub low_count: i32,
    pub medium_count: i32,
    pub high_count: i32,
    pub critical_count: i32,
    pub total_variance_amount: Decimal,
}

/// Map a variance magnitude to a severity bucket
pub fn severity_for(variance_amount: Decimal) -> VarianceSeverity {
    let magnitude = variance_amount.abs();
    if magnitude > HIGH_MAX {
        VarianceSeverity::Critical
    } else if magnitude > MEDIUM_MAX {
        VarianceSeverity::High
    } else if magnitude > CHECK_TOLERANCE {
        VarianceSeverity::Medium
    } else {
        VarianceSeverity::Low
    }
}

/// Trial balance check: ledger-wide debits must equal credits. An imbalance
/// is decomposed into the journals whose own entries do not net to zero.
pub async fn check_trial_balance(
    pool: &PgPool,
    org_id: &str,
    as_of: NaiveDate,
) -> Result<CheckOutcome, ReconciliationError> {
    let (total_debits, total_credits) = journal_repo::ledger_totals(pool, org_id, as_of).await?;
    let difference = total_debits - total_credits;

    if difference.abs() <= TRIAL_BALANCE_TOLERANCE {
        return Ok(CheckOutcome::clean());
    }

    let mut variances = vec![VarianceDraft {
        variance_type: "trial_balance".to_string(),
        expected_amount: Some(total_credits),
        actual_amount: Some(total_debits),
        variance_amount: difference,
        // Any structural imbalance is at least high severity.
        severity: severity_for(difference).max(VarianceSeverity::High),
        details: Some(serde_json::json!({
            "total_debits": total_debits,
            "total_credits": total_credits,
        })),
    }];

    for journal in
        journal_repo::find_unbalanced_journals(pool, org_id, as_of, TRIAL_BALANCE_TOLERANCE)
            .await?
    {
        let difference = journal.total_debit - journal.total_credit;
        variances.push(VarianceDraft {
            variance_type: "journal_unbalanced".to_string(),
            expected_amount: Some(journal.total_credit),
            actual_amount: Some(journal.total_debit),
            variance_amount: difference,
            severity: severity_for(difference),
            details: Some(serde_json::json!({ "journal_id": journal.journal_id })),
        });
    }

    Ok(CheckOutcome::with_variances(variances))
}

/// Inventory check: total active-layer value must match the GL inventory
/// asset balance within a dollar; mismatches carry a per-warehouse breakdown.
pub async fn check_inventory(
    pool: &PgPool,
    org_id: &str,
    as_of: NaiveDate,
) -> Result<CheckOutcome, ReconciliationError> {
    let layer_value = inventory_repo::total_active_layer_value(pool, org_id).await?;
    let inventory_account =
        account_repo::resolve_role(pool, org_id, AccountRole::InventoryAsset).await?;
    let gl_balance =
        journal_repo::account_balance(pool, org_id, inventory_account.id, as_of).await?;

    let difference = layer_value - gl_balance;
    if difference.abs() <= CHECK_TOLERANCE {
        return Ok(CheckOutcome::clean());
    }

    let per_warehouse = inventory_repo::warehouse_layer_values(pool, org_id).await?;
    let breakdown: Vec<serde_json::Value> = per_warehouse
        .iter()
        .map(|(warehouse_id, value)| {
            serde_json::json!({ "warehouse_id": warehouse_id, "layer_value": value })
        })
        .collect();

    Ok(CheckOutcome::with_variances(vec![VarianceDraft {
        variance_type: "inventory_gl".to_string(),
        expected_amount: Some(gl_balance),
        actual_amount: Some(layer_value),
        variance_amount: difference,
        severity: severity_for(difference),
        details: Some(serde_json::json!({ "warehouses": breakdown })),
    }]))
}

/// AR subledger check: the AR control account must match outstanding
/// invoices minus recorded receipts within a dollar.
pub async fn check_subledger(
    pool: &PgPool,
    org_id: &str,
    as_of: NaiveDate,
) -> Result<CheckOutcome, ReconciliationError> {
    let ar_account =
        account_repo::resolve_role(pool, org_id, AccountRole::AccountsReceivable).await?;
    let gl_balance = journal_repo::account_balance(pool, org_id, ar_account.id, as_of).await?;
    let outstanding = document_repo::outstanding_receivables(pool, org_id, as_of).await?;

    let difference = gl_balance - outstanding;
    if difference.abs() <= CHECK_TOLERANCE {
        return Ok(CheckOutcome::clean());
    }

    Ok(CheckOutcome::with_variances(vec![VarianceDraft {
        variance_type: "ar_subledger".to_string(),
        expected_amount: Some(outstanding),
        actual_amount: Some(gl_balance),
        variance_amount: difference,
        severity: severity_for(difference),
        details: None,
    }]))
}

/// Execute all three checks, persist the run and its variances, and return
/// a structured summary. A check error does not abort the other checks but
/// forces the run to failed.
pub async fn run_reconciliation(
    pool: &PgPool,
    org_id: &str,
    run_type: &str,
    actor_id: &str,
) -> Result<ReconciliationSummary, ReconciliationError> {
    let as_of = Utc::now().date_naive();

    let trial_balance = match check_trial_balance(pool, org_id, as_of).await {
        Ok(outcome) => outcome,
        Err(e) => CheckOutcome::errored("trial_balance", e.to_string()),
    };
    let inventory = match check_inventory(pool, org_id, as_of).await {
        Ok(outcome) => outcome,
        Err(e) => CheckOutcome::errored("inventory", e.to_string()),
    };
    let subledger = match check_subledger(pool, org_id, as_of).await {
        Ok(outcome) => outcome,
        Err(e) => CheckOutcome::errored("subledger", e.to_string()),
    };

    let checks = [&trial_balance, &inventory, &subledger];

    let status = if checks.iter().any(|c| c.status == CheckStatus::Error) {
        RunStatus::Failed
    } else if checks.iter().any(|c| c.status == CheckStatus::Variance) {
        RunStatus::Variance
    } else {
        RunStatus::Clean
    };

    let all_variances: Vec<VarianceDraft> = checks
        .iter()
        .flat_map(|c| c.variances.iter().cloned())
        .collect();

    let count_of = |severity: VarianceSeverity| {
        all_variances.iter().filter(|v| v.severity == severity).count() as i32
    };
    let low_count = count_of(VarianceSeverity::Low);
    let medium_count = count_of(VarianceSeverity::Medium);
    let high_count = count_of(VarianceSeverity::High);
    let critical_count = count_of(VarianceSeverity::Critical);
    let total_variance_amount: Decimal =
        all_variances.iter().map(|v| v.variance_amount.abs()).sum();

    let error_message = checks
        .iter()
        .filter_map(|c| c.error.clone())
        .collect::<Vec<_>>()
        .join("; ");

    let run_id = recon_repo::insert_run(
        pool,
        org_id,
        run_type,
        status,
        as_of,
        actor_id,
        trial_balance.status,
        inventory.status,
        subledger.status,
        all_variances.len() as i32,
        critical_count,
        total_variance_amount,
        if error_message.is_empty() {
            None
        } else {
            Some(error_message.as_str())
        },
    )
    .await?;

    recon_repo::insert_variances(pool, run_id, org_id, &all_variances).await?;

    tracing::info!(
        org_id = %org_id,
        run_id = %run_id,
        status = ?status,
        variances = all_variances.len(),
        "Reconciliation run finished"
    );

    Ok(ReconciliationSummary {
        run_id,
        org_id: org_id.to_string(),
        status,
        as_of_date: as_of,
        trial_balance_status: trial_balance.status,
        inventory_status: inventory.status,
        subledger_status: subledger.status,
        variance_count: all_variances.len() as i32,
        low_count,
        medium_count,
        high_count,
        critical_count,
        total_variance_amount,
    })
}

/// Mark a persisted variance resolved with triage notes
pub async fn resolve_variance(
    pool: &PgPool,
    variance_id: Uuid,
    actor_id: &str,
    notes: &str,
) -> Result<(), ReconciliationError> {
    recon_repo::resolve_variance(pool, variance_id, actor_id, notes).await?;
    Ok(())
}

/// Scheduled entry point: run the checks and raise the alert hook when any
/// critical variance is found (fire-and-forget).
pub async fn scheduled_daily_reconciliation(
    pool: &PgPool,
    org_id: &str,
    alerts: &dyn AlertSink,
) -> Result<ReconciliationSummary, ReconciliationError> {
    let summary = run_reconciliation(pool, org_id, "scheduled", "system").await?;

    if summary.critical_count > 0 {
        alerts.notify_critical_variances(org_id, summary.run_id, summary.critical_count as i64);
    }

    Ok(summary)
}
