//! In-memory reference implementation of the store traits.
//!
//! The production document store is an external collaborator; this
//! implementation backs tests, the CLI, and local development. It carries
//! the two contracts the engine depends on: read-your-writes within a run,
//! and duplicate-create signalling for `(tenant, email)` and
//! `(tenant, provider, external id)`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use tb_core::{
    ConnectionStatus, ConnectionStore, FormCatalog, ImportForm, LeadStore, LeadSyncEdge,
    OauthTokens, PlatformLead, ProviderConnection, TbError, TbResult,
};

// ---------------------------------------------------------------------------
// Lead Store
// ---------------------------------------------------------------------------

pub struct MemoryLeadStore {
    leads: RwLock<HashMap<Uuid, PlatformLead>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self {
            leads: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_leads(leads: Vec<PlatformLead>) -> Self {
        Self {
            leads: RwLock::new(leads.into_iter().map(|l| (l.id, l)).collect()),
        }
    }

    pub async fn dump(&self) -> Vec<PlatformLead> {
        let mut leads: Vec<PlatformLead> = self.leads.read().await.values().cloned().collect();
        leads.sort_by_key(|l| l.created_at);
        leads
    }

    pub async fn count(&self, tenant_id: Uuid) -> usize {
        self.leads
            .read()
            .await
            .values()
            .filter(|l| l.tenant_id == tenant_id)
            .count()
    }

    fn conflicts_with(existing: &PlatformLead, lead: &PlatformLead) -> bool {
        if existing.tenant_id != lead.tenant_id {
            return false;
        }
        if !lead.email.is_empty() && existing.email == lead.email {
            return true;
        }
        lead.crm_id.is_some()
            && existing.crm_id == lead.crm_id
            && existing.crm_provider == lead.crm_provider
    }
}

impl Default for MemoryLeadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn insert(&self, lead: &PlatformLead) -> TbResult<()> {
        let mut leads = self.leads.write().await;
        if leads.contains_key(&lead.id) {
            return Err(TbError::DuplicateLead(lead.id.to_string()));
        }
        if let Some(existing) = leads.values().find(|l| Self::conflicts_with(l, lead)) {
            return Err(TbError::DuplicateLead(format!(
                "lead {} already holds this identity",
                existing.id
            )));
        }
        leads.insert(lead.id, lead.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> TbResult<Option<PlatformLead>> {
        Ok(self.leads.read().await.get(&id).cloned())
    }

    async fn update(&self, lead: &PlatformLead) -> TbResult<()> {
        let mut leads = self.leads.write().await;
        match leads.get_mut(&lead.id) {
            Some(slot) => {
                *slot = lead.clone();
                Ok(())
            }
            None => Err(TbError::LeadNotFound(lead.id)),
        }
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> TbResult<Vec<PlatformLead>> {
        let leads = self.leads.read().await;
        let mut scoped: Vec<PlatformLead> = leads
            .values()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect();
        // Newest first, mirroring the platform's default list ordering.
        scoped.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(scoped.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_match(
        &self,
        tenant_id: Uuid,
        email: &str,
        external_id: &str,
    ) -> TbResult<Option<PlatformLead>> {
        let leads = self.leads.read().await;
        Ok(leads
            .values()
            .find(|l| {
                l.tenant_id == tenant_id
                    && ((!email.is_empty() && l.email == email)
                        || (!external_id.is_empty()
                            && l.origin_crm_id.as_deref() == Some(external_id)))
            })
            .cloned())
    }

    async fn list_sync_edges(&self, tenant_id: Uuid) -> TbResult<Vec<LeadSyncEdge>> {
        let leads = self.leads.read().await;
        Ok(leads
            .values()
            .filter(|l| {
                l.tenant_id == tenant_id && (l.crm_id.is_some() || l.origin_crm_id.is_some())
            })
            .map(|l| LeadSyncEdge {
                lead_id: l.id,
                provider: l.crm_provider,
                imported_from: l.crm_id.clone(),
                exported_to: l.origin_crm_id.clone(),
                email: l.email.clone(),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Connection Store
// ---------------------------------------------------------------------------

pub struct MemoryConnectionStore {
    connections: RwLock<HashMap<Uuid, ProviderConnection>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_connections(connections: Vec<ProviderConnection>) -> Self {
        Self {
            connections: RwLock::new(connections.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    pub async fn seed(&self, connection: ProviderConnection) {
        self.connections
            .write()
            .await
            .insert(connection.id, connection);
    }

    pub async fn dump(&self) -> Vec<ProviderConnection> {
        let mut connections: Vec<ProviderConnection> =
            self.connections.read().await.values().cloned().collect();
        connections.sort_by_key(|c| c.created_at);
        connections
    }
}

impl Default for MemoryConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn get(&self, id: Uuid) -> TbResult<Option<ProviderConnection>> {
        Ok(self.connections.read().await.get(&id).cloned())
    }

    async fn list_active(&self, tenant_id: Uuid) -> TbResult<Vec<ProviderConnection>> {
        let connections = self.connections.read().await;
        let mut active: Vec<ProviderConnection> = connections
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.status == ConnectionStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|c| c.created_at);
        Ok(active)
    }

    async fn list_tenants(&self) -> TbResult<Vec<Uuid>> {
        let connections = self.connections.read().await;
        let mut tenants: Vec<Uuid> = connections.values().map(|c| c.tenant_id).collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    async fn save_tokens(&self, id: Uuid, tokens: &OauthTokens) -> TbResult<()> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(&id)
            .ok_or(TbError::ConnectionNotFound(id))?;
        connection.tokens = tokens.clone();
        connection.consecutive_failures = 0;
        connection.updated_at = Utc::now();
        Ok(())
    }

    async fn record_refresh_failure(&self, id: Uuid) -> TbResult<u32> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(&id)
            .ok_or(TbError::ConnectionNotFound(id))?;
        connection.consecutive_failures += 1;
        connection.updated_at = Utc::now();
        Ok(connection.consecutive_failures)
    }

    async fn deactivate(&self, id: Uuid) -> TbResult<()> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(&id)
            .ok_or(TbError::ConnectionNotFound(id))?;
        connection.status = ConnectionStatus::Inactive;
        connection.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Form Catalog
// ---------------------------------------------------------------------------

pub struct MemoryFormCatalog {
    forms: RwLock<HashMap<Uuid, ImportForm>>,
}

impl MemoryFormCatalog {
    pub fn new() -> Self {
        Self {
            forms: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_forms(forms: Vec<ImportForm>) -> Self {
        Self {
            forms: RwLock::new(forms.into_iter().map(|f| (f.id, f)).collect()),
        }
    }

    pub async fn dump(&self) -> Vec<ImportForm> {
        let mut forms: Vec<ImportForm> = self.forms.read().await.values().cloned().collect();
        forms.sort_by_key(|f| f.created_at);
        forms
    }

    pub async fn count(&self, tenant_id: Uuid) -> usize {
        self.forms
            .read()
            .await
            .values()
            .filter(|f| f.tenant_id == tenant_id)
            .count()
    }
}

impl Default for MemoryFormCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormCatalog for MemoryFormCatalog {
    async fn find_or_create_default(&self, tenant_id: Uuid) -> TbResult<ImportForm> {
        let mut forms = self.forms.write().await;
        // Marker-flag lookup, never by name: repeated runs must not create
        // duplicate forms.
        if let Some(form) = forms
            .values()
            .find(|f| f.tenant_id == tenant_id && f.is_default_import_form)
        {
            return Ok(form.clone());
        }
        let form = ImportForm::default_for(tenant_id);
        forms.insert(form.id, form.clone());
        Ok(form)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tb_core::{CrmProvider, LeadOrigin};

    #[tokio::test]
    async fn insert_rejects_duplicate_email_per_tenant() {
        let store = MemoryLeadStore::new();
        let tenant = Uuid::now_v7();
        let first = PlatformLead::new(tenant, LeadOrigin::Crm).with_email("a@x.com");
        store.insert(&first).await.unwrap();

        let duplicate = PlatformLead::new(tenant, LeadOrigin::Crm).with_email("a@x.com");
        let err = store.insert(&duplicate).await.unwrap_err();
        assert!(matches!(err, TbError::DuplicateLead(_)));

        // Same email under another tenant is fine.
        let other_tenant = PlatformLead::new(Uuid::now_v7(), LeadOrigin::Crm).with_email("a@x.com");
        store.insert(&other_tenant).await.unwrap();
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_external_identity() {
        let store = MemoryLeadStore::new();
        let tenant = Uuid::now_v7();
        let first = PlatformLead::new(tenant, LeadOrigin::Crm)
            .with_imported_from(CrmProvider::HubSpot, "101");
        store.insert(&first).await.unwrap();

        let duplicate = PlatformLead::new(tenant, LeadOrigin::Crm)
            .with_imported_from(CrmProvider::HubSpot, "101");
        assert!(store.insert(&duplicate).await.is_err());

        // Same external id from a different provider is a different record.
        let other_provider = PlatformLead::new(tenant, LeadOrigin::Crm)
            .with_imported_from(CrmProvider::Pipedrive, "101");
        store.insert(&other_provider).await.unwrap();
    }

    #[tokio::test]
    async fn empty_emails_never_conflict() {
        let store = MemoryLeadStore::new();
        let tenant = Uuid::now_v7();
        store
            .insert(&PlatformLead::new(tenant, LeadOrigin::Platform))
            .await
            .unwrap();
        store
            .insert(&PlatformLead::new(tenant, LeadOrigin::Platform))
            .await
            .unwrap();
        assert_eq!(store.count(tenant).await, 2);
    }

    #[tokio::test]
    async fn find_match_is_disjunctive() {
        let store = MemoryLeadStore::new();
        let tenant = Uuid::now_v7();
        let by_email = PlatformLead::new(tenant, LeadOrigin::Platform).with_email("a@x.com");
        let by_export = PlatformLead::new(tenant, LeadOrigin::Platform)
            .with_exported_to(CrmProvider::Zoho, "z-7");
        store.insert(&by_email).await.unwrap();
        store.insert(&by_export).await.unwrap();

        let hit = store.find_match(tenant, "a@x.com", "nope").await.unwrap();
        assert_eq!(hit.unwrap().id, by_email.id);

        let hit = store.find_match(tenant, "", "z-7").await.unwrap();
        assert_eq!(hit.unwrap().id, by_export.id);

        assert!(store.find_match(tenant, "", "").await.unwrap().is_none());
        assert!(store
            .find_match(Uuid::now_v7(), "a@x.com", "")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sync_edges_cover_both_directions() {
        let store = MemoryLeadStore::new();
        let tenant = Uuid::now_v7();
        store
            .insert(
                &PlatformLead::new(tenant, LeadOrigin::Crm)
                    .with_imported_from(CrmProvider::HubSpot, "in-1"),
            )
            .await
            .unwrap();
        store
            .insert(
                &PlatformLead::new(tenant, LeadOrigin::Platform)
                    .with_exported_to(CrmProvider::HubSpot, "out-1"),
            )
            .await
            .unwrap();
        // No edges at all: excluded from the projection.
        store
            .insert(&PlatformLead::new(tenant, LeadOrigin::Platform))
            .await
            .unwrap();

        let edges = store.list_sync_edges(tenant).await.unwrap();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().any(|e| e.imported_from.as_deref() == Some("in-1")));
        assert!(edges.iter().any(|e| e.exported_to.as_deref() == Some("out-1")));
    }

    #[tokio::test]
    async fn update_requires_existing_lead() {
        let store = MemoryLeadStore::new();
        let lead = PlatformLead::new(Uuid::now_v7(), LeadOrigin::Crm);
        assert!(matches!(
            store.update(&lead).await.unwrap_err(),
            TbError::LeadNotFound(_)
        ));
    }

    #[tokio::test]
    async fn connection_failure_counter_and_deactivation() {
        let store = MemoryConnectionStore::new();
        let connection = ProviderConnection::new(Uuid::now_v7(), "hubspot", "rt");
        let id = connection.id;
        store.seed(connection).await;

        assert_eq!(store.record_refresh_failure(id).await.unwrap(), 1);
        assert_eq!(store.record_refresh_failure(id).await.unwrap(), 2);

        let tokens = OauthTokens {
            access_token: "fresh".into(),
            refresh_token: "rt".into(),
            token_expiry: Some(Utc::now()),
        };
        store.save_tokens(id, &tokens).await.unwrap();
        let connection = store.get(id).await.unwrap().unwrap();
        assert_eq!(connection.consecutive_failures, 0);
        assert_eq!(connection.tokens.access_token, "fresh");

        store.deactivate(id).await.unwrap();
        let connection = store.get(id).await.unwrap().unwrap();
        assert_eq!(connection.status, ConnectionStatus::Inactive);
        assert!(store
            .list_active(connection.tenant_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn list_tenants_deduplicates() {
        let store = MemoryConnectionStore::new();
        let tenant = Uuid::now_v7();
        store
            .seed(ProviderConnection::new(tenant, "hubspot", "rt"))
            .await;
        store
            .seed(ProviderConnection::new(tenant, "zoho", "rt"))
            .await;
        store
            .seed(ProviderConnection::new(Uuid::now_v7(), "zoho", "rt"))
            .await;

        assert_eq!(store.list_tenants().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn default_form_is_created_once() {
        let catalog = MemoryFormCatalog::new();
        let tenant = Uuid::now_v7();

        let first = catalog.find_or_create_default(tenant).await.unwrap();
        let second = catalog.find_or_create_default(tenant).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.is_default_import_form);
        assert_eq!(catalog.count(tenant).await, 1);

        // Another tenant gets its own form.
        let other = catalog
            .find_or_create_default(Uuid::now_v7())
            .await
            .unwrap();
        assert_ne!(other.id, first.id);
    }
}
