pub mod qualify;
pub mod reconcile;
pub mod schedule;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use tb_engine::providers::AdapterRegistry;
use tb_engine::{EngineConfig, ReconciliationEngine};
use tb_storage::{MemoryConnectionStore, MemoryFormCatalog, MemoryLeadStore, StateSnapshot};

/// Platform state loaded from the snapshot file, wired into the in-memory
/// stores the engine runs against.
pub struct Platform {
    pub leads: Arc<MemoryLeadStore>,
    pub connections: Arc<MemoryConnectionStore>,
    pub forms: Arc<MemoryFormCatalog>,
    pub config: EngineConfig,
}

impl Platform {
    pub fn load(state_path: &Path) -> Result<Self> {
        let (leads, connections, forms) = StateSnapshot::load(state_path)?.into_stores();
        Ok(Self {
            leads: Arc::new(leads),
            connections: Arc::new(connections),
            forms: Arc::new(forms),
            config: EngineConfig::from_env(),
        })
    }

    pub fn engine(&self) -> Result<ReconciliationEngine> {
        let registry = AdapterRegistry::with_defaults(
            &self.config.oauth,
            Duration::from_secs(self.config.reconcile.fetch_timeout_secs),
        )?;
        Ok(ReconciliationEngine::new(
            Arc::clone(&self.leads) as _,
            Arc::clone(&self.connections) as _,
            Arc::clone(&self.forms) as _,
            registry,
            self.config.clone(),
        ))
    }

    pub async fn save(&self, state_path: &Path) -> Result<()> {
        StateSnapshot::from_stores(&self.leads, &self.connections, &self.forms)
            .await
            .save(state_path)?;
        Ok(())
    }
}
