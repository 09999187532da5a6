use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use uuid::Uuid;

use super::Platform;

pub async fn run(state_path: &Path, tenant: Uuid, deadline_secs: Option<u64>) -> Result<()> {
    let platform = Platform::load(state_path)?;
    let engine = platform.engine()?;

    let summary = match deadline_secs {
        Some(secs) => {
            let deadline = Instant::now() + Duration::from_secs(secs);
            engine.reconcile_with_deadline(tenant, deadline).await?
        }
        None => engine.reconcile(tenant).await?,
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    platform.save(state_path).await?;
    Ok(())
}
