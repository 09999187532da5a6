//! The reconciliation engine.
//!
//! One pass gathers canonical leads from every active provider connection of
//! a tenant, screens them against the tenant's sync edges (loop prevention),
//! resolves identity against the lead store, and applies the
//! create/update/skip decision per record. Provider failures empty that
//! provider for the pass; record failures count as skipped; only store or
//! form-catalog unavailability aborts the run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use tb_core::{
    CanonicalLead, ConnectionStore, CrmProvider, CrmSyncStatus, FormCatalog, LeadOrigin,
    LeadStatus, LeadStore, LeadSyncEdge, PlatformLead, ProviderConnection, ReconciliationSummary,
    TbError, TbResult,
};

use crate::config::EngineConfig;
use crate::credentials::CredentialManager;
use crate::isolation::{run_isolated, StepOutcome};
use crate::providers::{AdapterRegistry, AdapterStatus, PageOptions, ProviderAdapter};

// ---------------------------------------------------------------------------
// Loop Prevention
// ---------------------------------------------------------------------------

/// Directional sync-edge index for one tenant, built once per pass.
///
/// A candidate is a reflection of the platform's own data when its
/// `(provider, external id)` pair already appears as an imported-from edge
/// (we pulled that record in before) or as an exported-to edge (we pushed a
/// platform lead out as that record). Reflections are skipped, never merged,
/// which closes the platform → CRM → platform duplication loop in both
/// directions.
#[derive(Debug, Default)]
pub struct LoopGuard {
    imported: HashSet<(CrmProvider, String)>,
    exported: HashSet<(CrmProvider, String)>,
}

impl LoopGuard {
    pub fn from_edges(edges: &[LeadSyncEdge]) -> Self {
        let mut guard = Self::default();
        for edge in edges {
            // Edges without a provider cannot be scoped to a candidate and
            // are left out: external ids are only unique per provider.
            let Some(provider) = edge.provider else {
                continue;
            };
            if let Some(id) = &edge.imported_from {
                guard.imported.insert((provider, id.clone()));
            }
            if let Some(id) = &edge.exported_to {
                guard.exported.insert((provider, id.clone()));
            }
        }
        guard
    }

    pub fn is_own_reflection(&self, candidate: &CanonicalLead) -> bool {
        let key = (candidate.source_provider, candidate.external_id.clone());
        self.imported.contains(&key) || self.exported.contains(&key)
    }
}

// ---------------------------------------------------------------------------
// Merge Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeAction {
    Created,
    Updated,
    Skipped,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ReconciliationEngine {
    leads: Arc<dyn LeadStore>,
    connections: Arc<dyn ConnectionStore>,
    forms: Arc<dyn FormCatalog>,
    credentials: CredentialManager,
    adapters: AdapterRegistry,
    config: EngineConfig,
    // One reconciliation run at a time per tenant: the identity-resolution
    // read-then-write in the merge step is a check-then-act race otherwise.
    tenant_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ReconciliationEngine {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        connections: Arc<dyn ConnectionStore>,
        forms: Arc<dyn FormCatalog>,
        adapters: AdapterRegistry,
        config: EngineConfig,
    ) -> Self {
        let credentials =
            CredentialManager::new(Arc::clone(&connections), config.credentials.clone());
        Self {
            leads,
            connections,
            forms,
            credentials,
            adapters,
            config,
            tenant_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn adapter_statuses(&self) -> Vec<AdapterStatus> {
        self.adapters.statuses()
    }

    /// Tenants that have any connection on record; the scheduler sweeps
    /// these.
    pub async fn tenants_with_connections(&self) -> TbResult<Vec<Uuid>> {
        self.connections.list_tenants().await
    }

    /// Run one reconciliation pass for the tenant.
    pub async fn reconcile(&self, tenant_id: Uuid) -> TbResult<ReconciliationSummary> {
        self.reconcile_until(tenant_id, None).await
    }

    /// Run one pass with a deadline. On expiry, in-flight provider fetches
    /// are abandoned (provider-unavailable semantics) and already-merged
    /// work is retained; reconciliation is incremental and re-runnable.
    pub async fn reconcile_with_deadline(
        &self,
        tenant_id: Uuid,
        deadline: Instant,
    ) -> TbResult<ReconciliationSummary> {
        self.reconcile_until(tenant_id, Some(deadline)).await
    }

    async fn reconcile_until(
        &self,
        tenant_id: Uuid,
        deadline: Option<Instant>,
    ) -> TbResult<ReconciliationSummary> {
        let lock = self.lock_for(tenant_id).await;
        let _guard = lock.lock().await;

        let connections = self.connections.list_active(tenant_id).await?;
        if connections.is_empty() {
            tracing::debug!(tenant_id = %tenant_id, "no active connections, nothing to do");
            return Ok(ReconciliationSummary::zero());
        }

        let form = self.forms.find_or_create_default(tenant_id).await?;
        let candidates = self.collect_candidates(&connections, deadline).await;

        let edges = self.leads.list_sync_edges(tenant_id).await?;
        let guard = LoopGuard::from_edges(&edges);

        let tasks = candidates
            .into_iter()
            .map(|candidate| {
                let label = format!(
                    "{}:{}",
                    candidate.source_provider, candidate.external_id
                );
                (label, self.apply_candidate(tenant_id, form.id, &guard, candidate))
            })
            .collect();
        let outcomes = run_isolated(tasks, None).await;

        let mut summary = ReconciliationSummary {
            total: outcomes.len(),
            ..ReconciliationSummary::zero()
        };
        for outcome in outcomes {
            match outcome {
                StepOutcome::Ok(MergeAction::Created) => summary.imported += 1,
                StepOutcome::Ok(MergeAction::Updated) => summary.updated += 1,
                StepOutcome::Ok(MergeAction::Skipped) => summary.skipped += 1,
                StepOutcome::Failed { .. } => summary.skipped += 1,
            }
        }

        tracing::info!(
            tenant_id = %tenant_id,
            imported = summary.imported,
            updated = summary.updated,
            skipped = summary.skipped,
            total = summary.total,
            "reconciliation pass complete"
        );
        Ok(summary)
    }

    /// Gather one page of canonical leads from every active connection.
    /// Each connection is isolated: an unsupported provider, a failed token
    /// refresh, a fetch error, or a deadline expiry leaves that provider
    /// empty for the pass and moves on.
    async fn collect_candidates(
        &self,
        connections: &[ProviderConnection],
        deadline: Option<Instant>,
    ) -> Vec<CanonicalLead> {
        let page = PageOptions {
            limit: self.config.reconcile.page_size,
        };
        let mut candidates = Vec::new();

        for connection in connections {
            let Some(adapter) = self.adapters.lookup(&connection.provider) else {
                tracing::debug!(
                    connection_id = %connection.id,
                    provider = %connection.provider,
                    "provider not supported, skipping connection"
                );
                continue;
            };

            match self
                .fetch_one_page(adapter.as_ref(), connection, &page, deadline)
                .await
            {
                Ok(mut leads) => {
                    tracing::debug!(
                        connection_id = %connection.id,
                        provider = %connection.provider,
                        count = leads.len(),
                        "fetched provider page"
                    );
                    candidates.append(&mut leads);
                }
                Err(err) => {
                    tracing::warn!(
                        connection_id = %connection.id,
                        provider = %connection.provider,
                        error = %err,
                        "provider unavailable for this pass"
                    );
                }
            }
        }

        candidates
    }

    async fn fetch_one_page(
        &self,
        adapter: &dyn ProviderAdapter,
        connection: &ProviderConnection,
        page: &PageOptions,
        deadline: Option<Instant>,
    ) -> TbResult<Vec<CanonicalLead>> {
        let token = with_deadline(
            deadline,
            self.credentials.ensure_fresh_token(adapter, connection),
        )
        .await??;
        with_deadline(deadline, adapter.fetch_leads(&token, connection, page)).await?
    }

    /// The merge decision for one candidate. Any error here is caught by the
    /// isolation helper and counted as skipped.
    async fn apply_candidate(
        &self,
        tenant_id: Uuid,
        form_id: Uuid,
        guard: &LoopGuard,
        candidate: CanonicalLead,
    ) -> TbResult<MergeAction> {
        if guard.is_own_reflection(&candidate) {
            tracing::debug!(
                provider = %candidate.source_provider,
                external_id = %candidate.external_id,
                "candidate reflects platform data, skipping"
            );
            return Ok(MergeAction::Skipped);
        }

        let existing = self
            .leads
            .find_match(tenant_id, &candidate.email, &candidate.external_id)
            .await?;

        match existing {
            None => self.create_lead(tenant_id, form_id, candidate).await,
            Some(lead) if lead.lead_origin == LeadOrigin::Platform => {
                // Platform-authored data is authoritative.
                Ok(MergeAction::Skipped)
            }
            Some(lead) => self.update_lead(lead, candidate).await,
        }
    }

    async fn create_lead(
        &self,
        tenant_id: Uuid,
        form_id: Uuid,
        candidate: CanonicalLead,
    ) -> TbResult<MergeAction> {
        let now = Utc::now();
        let mut lead = PlatformLead::new(tenant_id, LeadOrigin::Crm)
            .with_email(candidate.email)
            .with_name(candidate.first_name, candidate.last_name)
            .with_status(LeadStatus::from_inbound(&candidate.raw_status))
            .with_imported_from(candidate.source_provider, candidate.external_id);
        lead.phone = candidate.phone;
        lead.company = candidate.company;
        lead.job_title = candidate.job_title;
        lead.crm_sync_status = CrmSyncStatus::Synced;
        lead.last_synced_at = Some(now);
        lead.form_id = Some(form_id);

        match self.leads.insert(&lead).await {
            Ok(()) => Ok(MergeAction::Created),
            // Lost a create race: another run persisted this identity
            // between our lookup and our insert. The record exists, so the
            // candidate is a skip, not a failure.
            Err(TbError::DuplicateLead(_)) => Ok(MergeAction::Skipped),
            Err(err) => Err(err),
        }
    }

    async fn update_lead(
        &self,
        mut lead: PlatformLead,
        candidate: CanonicalLead,
    ) -> TbResult<MergeAction> {
        // Inbound empty fields never blank out existing values.
        if !candidate.first_name.is_empty() {
            lead.first_name = candidate.first_name;
        }
        if !candidate.last_name.is_empty() {
            lead.last_name = candidate.last_name;
        }
        if !candidate.phone.is_empty() {
            lead.phone = candidate.phone;
        }
        if !candidate.company.is_empty() {
            lead.company = candidate.company;
        }
        if !candidate.job_title.is_empty() {
            lead.job_title = candidate.job_title;
        }
        if !candidate.raw_status.is_empty() {
            lead.status = LeadStatus::from_inbound(&candidate.raw_status);
        }
        let now = Utc::now();
        lead.crm_sync_status = CrmSyncStatus::Synced;
        lead.last_synced_at = Some(now);
        lead.updated_at = now;

        self.leads.update(&lead).await?;
        Ok(MergeAction::Updated)
    }

    async fn lock_for(&self, tenant_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.tenant_locks.lock().await;
        Arc::clone(
            locks
                .entry(tenant_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Await a future against an optional deadline. Expiry surfaces as
/// `DeadlineExceeded`, which the caller treats as provider-unavailable.
async fn with_deadline<F>(deadline: Option<Instant>, future: F) -> TbResult<F::Output>
where
    F: std::future::Future,
{
    match deadline {
        None => Ok(future.await),
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| TbError::DeadlineExceeded),
    }
}
