//! Alert hook for critical reconciliation variances.
//!
//! The reconciliation engine only raises alerts; delivery (pager, email,
//! chat) belongs to an external notification service. The default sink
//! logs at error level so critical variances are never silently dropped.

use uuid::Uuid;

/// Fire-and-forget notification sink for critical reconciliation findings.
pub trait AlertSink: Send + Sync {
    fn notify_critical_variances(&self, org_id: &str, run_id: Uuid, critical_count: i64);
}

/// Default sink: structured error log only.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify_critical_variances(&self, org_id: &str, run_id: Uuid, critical_count: i64) {
        tracing::error!(
            org_id = %org_id,
            run_id = %run_id,
            critical_count = critical_count,
            "Critical reconciliation variances detected"
        );
    }
}
