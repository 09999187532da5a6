//! JSON snapshot persistence for the in-memory stores.
//!
//! The CLI loads platform state from a snapshot file, runs against the
//! in-memory stores, and writes the mutated state back. A missing file is
//! an empty platform, not an error.

use std::path::Path;

use serde::{Deserialize, Serialize};

use tb_core::{ImportForm, PlatformLead, ProviderConnection, TbError, TbResult};

use crate::memory::{MemoryConnectionStore, MemoryFormCatalog, MemoryLeadStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub leads: Vec<PlatformLead>,
    #[serde(default)]
    pub connections: Vec<ProviderConnection>,
    #[serde(default)]
    pub forms: Vec<ImportForm>,
}

impl StateSnapshot {
    pub fn load(path: &Path) -> TbResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TbError::Storage(format!("snapshot read failed: {e}")))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> TbResult<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .map_err(|e| TbError::Storage(format!("snapshot write failed: {e}")))
    }

    pub fn into_stores(self) -> (MemoryLeadStore, MemoryConnectionStore, MemoryFormCatalog) {
        (
            MemoryLeadStore::from_leads(self.leads),
            MemoryConnectionStore::from_connections(self.connections),
            MemoryFormCatalog::from_forms(self.forms),
        )
    }

    pub async fn from_stores(
        leads: &MemoryLeadStore,
        connections: &MemoryConnectionStore,
        forms: &MemoryFormCatalog,
    ) -> Self {
        Self {
            leads: leads.dump().await,
            connections: connections.dump().await,
            forms: forms.dump().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_core::{LeadOrigin, PlatformLead, ProviderConnection};
    use uuid::Uuid;

    #[test]
    fn missing_file_loads_empty() {
        let snapshot =
            StateSnapshot::load(Path::new("/nonexistent/tributary-state.json")).unwrap();
        assert!(snapshot.leads.is_empty());
        assert!(snapshot.connections.is_empty());
    }

    #[tokio::test]
    async fn roundtrip_through_stores_and_disk() {
        let tenant = Uuid::now_v7();
        let snapshot = StateSnapshot {
            leads: vec![PlatformLead::new(tenant, LeadOrigin::Platform).with_email("a@x.com")],
            connections: vec![ProviderConnection::new(tenant, "hubspot", "rt")],
            forms: vec![],
        };

        let dir = std::env::temp_dir().join(format!("tb-snapshot-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");
        snapshot.save(&path).unwrap();

        let loaded = StateSnapshot::load(&path).unwrap();
        let (leads, connections, forms) = loaded.into_stores();
        let back = StateSnapshot::from_stores(&leads, &connections, &forms).await;
        assert_eq!(back.leads.len(), 1);
        assert_eq!(back.leads[0].email, "a@x.com");
        assert_eq!(back.connections.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
