//! Periodic reconciliation scheduling.
//!
//! One background task sweeps every tenant with connections on a fixed
//! interval, running each tenant's pass under the configured deadline. A
//! run-level failure for one tenant is logged and waits for the next tick;
//! there is no immediate retry, so a systemic outage is not compounded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::SchedulerConfig;
use crate::reconcile::ReconciliationEngine;

pub fn spawn_reconcile_scheduler(
    engine: Arc<ReconciliationEngine>,
    config: SchedulerConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if !config.enabled {
        tracing::info!("reconciliation scheduler disabled");
        return;
    }

    let interval_secs = config.interval_secs;
    let run_deadline_secs = config.run_deadline_secs;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("reconciliation scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    sweep_once(&engine, &config).await;
                }
            }
        }
    });

    tracing::info!(
        interval_secs = interval_secs,
        run_deadline_secs = run_deadline_secs,
        "reconciliation scheduler spawned"
    );
}

pub async fn sweep_once(engine: &ReconciliationEngine, config: &SchedulerConfig) {
    let tenants = match engine.tenants_with_connections().await {
        Ok(tenants) => tenants,
        Err(err) => {
            tracing::warn!(error = %err, "scheduled sweep could not list tenants");
            return;
        }
    };

    for tenant_id in tenants {
        let deadline = Instant::now() + Duration::from_secs(config.run_deadline_secs);
        match engine.reconcile_with_deadline(tenant_id, deadline).await {
            Ok(summary) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    imported = summary.imported,
                    updated = summary.updated,
                    skipped = summary.skipped,
                    "scheduled reconciliation finished"
                );
            }
            Err(err) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %err,
                    "scheduled reconciliation failed, awaiting next tick"
                );
            }
        }
    }
}
