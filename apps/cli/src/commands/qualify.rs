use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use tb_engine::qualify::BatchSelection;
use tb_engine::scorer::HttpLeadScorer;
use tb_engine::QualificationOrchestrator;

use super::Platform;

pub async fn run(state_path: &Path, tenant: Uuid, ids: Vec<Uuid>, limit: usize) -> Result<()> {
    let platform = Platform::load(state_path)?;
    let scorer = Arc::new(HttpLeadScorer::new(&platform.config.scorer)?);
    let orchestrator = QualificationOrchestrator::new(
        Arc::clone(&platform.leads) as _,
        scorer,
        platform.config.qualify.clone(),
    );

    let selection = if ids.is_empty() {
        BatchSelection::Recent { limit }
    } else {
        BatchSelection::Ids(ids)
    };

    let report = orchestrator.qualify_batch(tenant, selection).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    platform.save(state_path).await?;
    Ok(())
}
