use anyhow::{bail, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use std::sync::Arc;
use crate::gateway::Gateway;

/// Initialize and start the reconciliation sweep
pub async fn start_reconciliation_scheduler(gateway: Arc<Gateway>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let minutes = gateway.config().reconcile_interval_minutes;
    let cron_expr = interval_to_cron(minutes)?;
    info!("Scheduling reconciliation every {} minutes (cron: {})", minutes, cron_expr);

    let gateway_clone = Arc::clone(&gateway);
    let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
        let gateway = Arc::clone(&gateway_clone);

        Box::pin(async move {
            info!("⏰ Reconciliation sweep triggered");
            run_reconciliation(&gateway).await;
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!("✓ Scheduler started");

    Ok(scheduler)
}

/// Convert a sweep interval in minutes to a cron expression
fn interval_to_cron(minutes: u32) -> Result<String> {
    if !(1..=59).contains(&minutes) {
        bail!("Invalid reconciliation interval: {}. Expected 1-59 minutes", minutes);
    }

    // Cron format: "second minute hour day month day_of_week"
    Ok(format!("0 */{} * * * *", minutes))
}

/// Run one sweep over every job awaiting translations
async fn run_reconciliation(gateway: &Gateway) {
    let results = match gateway.reconcile_pending().await {
        Ok(results) => results,
        Err(e) => {
            error!("Reconciliation sweep failed: {}", e);
            return;
        }
    };

    let mut with_errors = 0;
    for (job_id, result) in &results {
        match result {
            Ok(false) => {}
            Ok(true) => {
                with_errors += 1;
                warn!("Reconciliation of job {} finished with errors", job_id);
            }
            Err(e) => {
                with_errors += 1;
                error!("Reconciliation of job {} failed: {}", job_id, e);
            }
        }
    }

    info!(
        "✓ Reconciliation sweep done: {} jobs, {} with errors",
        results.len(),
        with_errors
    );
}
