use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use tb_engine::scheduler::spawn_reconcile_scheduler;

use super::Platform;

pub async fn run(state_path: &Path, interval_secs: Option<u64>) -> Result<()> {
    let platform = Platform::load(state_path)?;
    let engine = Arc::new(platform.engine()?);

    let mut config = platform.config.scheduler.clone();
    if let Some(secs) = interval_secs {
        config.interval_secs = secs.max(1);
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    spawn_reconcile_scheduler(Arc::clone(&engine), config, shutdown_rx);

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, stopping scheduler");
    let _ = shutdown_tx.send(());

    platform.save(state_path).await?;
    Ok(())
}
