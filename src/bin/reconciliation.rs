//! Nightly reconciliation runner
//!
//! Executes the reconciliation checks for one organization or for every
//! organization with a profile. Exits nonzero when any run fails or any
//! critical variance is found, so cron alerting fires.

use anyhow::Context;
use clap::Parser;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use ledger_core_rs::alerts::LogAlertSink;
use ledger_core_rs::config::Config;
use ledger_core_rs::db::init_pool;
use ledger_core_rs::repos::idempotency_repo;
use ledger_core_rs::repos::recon_repo::RunStatus;
use ledger_core_rs::services::reconciliation_service;

#[derive(Debug, Parser)]
#[command(name = "reconciliation", about = "Run ledger reconciliation checks")]
struct Args {
    /// Organization to reconcile; may be repeated
    #[arg(long = "org")]
    orgs: Vec<String>,

    /// Reconcile every organization with a profile
    #[arg(long, conflicts_with = "orgs")]
    all_orgs: bool,

    /// Also purge expired idempotency records
    #[arg(long)]
    purge_idempotency: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Config::from_env()
        .map_err(anyhow::Error::msg)
        .context("loading configuration")?;

    let pool = init_pool(&config.database_url)
        .await
        .context("connecting to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    let orgs = if args.all_orgs {
        list_profiled_orgs(&pool).await?
    } else {
        args.orgs.clone()
    };

    if orgs.is_empty() {
        anyhow::bail!("no organizations to reconcile (pass --org or --all-orgs)");
    }

    if args.purge_idempotency {
        let purged = idempotency_repo::purge_expired(&pool)
            .await
            .context("purging expired idempotency records")?;
        tracing::info!(purged = purged, "Purged expired idempotency records");
    }

    let alerts = LogAlertSink;
    let mut unhealthy = 0usize;

    for org_id in &orgs {
        let summary =
            reconciliation_service::scheduled_daily_reconciliation(&pool, org_id, &alerts)
                .await
                .with_context(|| format!("reconciling org {org_id}"))?;

        tracing::info!(
            org_id = %org_id,
            run_id = %summary.run_id,
            status = ?summary.status,
            variances = summary.variance_count,
            critical = summary.critical_count,
            total_variance = %summary.total_variance_amount,
            "Reconciliation run complete"
        );

        if summary.status == RunStatus::Failed || summary.critical_count > 0 {
            unhealthy += 1;
        }
    }

    if unhealthy > 0 {
        anyhow::bail!("{unhealthy} organization(s) unhealthy");
    }

    Ok(())
}

async fn list_profiled_orgs(pool: &PgPool) -> anyhow::Result<Vec<String>> {
    let orgs = sqlx::query_scalar::<_, String>("SELECT org_id FROM org_profiles ORDER BY org_id")
        .fetch_all(pool)
        .await
        .context("listing organizations")?;

    Ok(orgs)
}
