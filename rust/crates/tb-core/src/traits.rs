use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TbResult;
use crate::model::*;

/// Storage backend for platform leads.
///
/// The reconciliation engine requires read-your-writes semantics within one
/// run, and `insert` must signal a duplicate `(tenant, email)` or
/// `(tenant, provider, external id)` as `TbError::DuplicateLead` so the
/// merge step can treat a lost create race as a skip.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn insert(&self, lead: &PlatformLead) -> TbResult<()>;
    async fn get(&self, id: Uuid) -> TbResult<Option<PlatformLead>>;
    async fn update(&self, lead: &PlatformLead) -> TbResult<()>;
    async fn list(&self, tenant_id: Uuid, limit: usize, offset: usize)
        -> TbResult<Vec<PlatformLead>>;

    /// Disjunctive identity lookup: a lead whose email equals `email` (when
    /// non-empty) or whose exported-to edge equals `external_id`.
    async fn find_match(
        &self,
        tenant_id: Uuid,
        email: &str,
        external_id: &str,
    ) -> TbResult<Option<PlatformLead>>;

    /// Project the directional sync edges of every lead that carries one.
    /// This is the loop-prevention input set.
    async fn list_sync_edges(&self, tenant_id: Uuid) -> TbResult<Vec<LeadSyncEdge>>;
}

fn _assert_lead_store_object_safe(_: &dyn LeadStore) {}

/// Storage backend for provider connections.
///
/// Token mutation goes through `save_tokens` exclusively; the credential
/// manager is its only caller. A successful save resets the
/// consecutive-failure counter.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> TbResult<Option<ProviderConnection>>;
    async fn list_active(&self, tenant_id: Uuid) -> TbResult<Vec<ProviderConnection>>;
    async fn list_tenants(&self) -> TbResult<Vec<Uuid>>;
    async fn save_tokens(&self, id: Uuid, tokens: &OauthTokens) -> TbResult<()>;

    /// Record one failed refresh attempt; returns the new consecutive count.
    async fn record_refresh_failure(&self, id: Uuid) -> TbResult<u32>;
    async fn deactivate(&self, id: Uuid) -> TbResult<()>;
}

fn _assert_connection_store_object_safe(_: &dyn ConnectionStore) {}

/// Catalog of lead-capture forms. Reconciliation needs exactly one call:
/// locate the tenant's default import form by marker flag, creating it on
/// first use.
#[async_trait]
pub trait FormCatalog: Send + Sync {
    async fn find_or_create_default(&self, tenant_id: Uuid) -> TbResult<ImportForm>;
}

fn _assert_form_catalog_object_safe(_: &dyn FormCatalog) {}

/// External qualification scorer, consumed as a black box.
#[async_trait]
pub trait LeadScorer: Send + Sync {
    async fn score(&self, lead: &PlatformLead) -> TbResult<LeadScore>;
}

fn _assert_lead_scorer_object_safe(_: &dyn LeadScorer) {}
