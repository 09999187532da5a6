//! End-to-end reconciliation behavior against the in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use tb_core::{
    CanonicalLead, CrmProvider, CrmSyncStatus, FormCatalog, ImportForm, LeadOrigin, LeadStatus,
    LeadStore, PlatformLead, ProviderConnection, TbError, TbResult,
};
use tb_engine::config::EngineConfig;
use tb_engine::providers::{
    AdapterRegistry, AdapterStatus, PageOptions, ProviderAdapter, TokenGrant,
};
use tb_engine::ReconciliationEngine;
use tb_storage::{MemoryConnectionStore, MemoryFormCatalog, MemoryLeadStore};

// ---------------------------------------------------------------------------
// Stub adapter
// ---------------------------------------------------------------------------

enum Behavior {
    Ok,
    FailRefresh,
    FailFetch,
}

struct StubAdapter {
    provider: CrmProvider,
    behavior: Behavior,
    leads: Vec<CanonicalLead>,
    fetch_delay: Option<Duration>,
}

impl StubAdapter {
    fn returning(provider: CrmProvider, leads: Vec<CanonicalLead>) -> Arc<dyn ProviderAdapter> {
        Arc::new(Self {
            provider,
            behavior: Behavior::Ok,
            leads,
            fetch_delay: None,
        })
    }

    fn failing_refresh(provider: CrmProvider) -> Arc<dyn ProviderAdapter> {
        Arc::new(Self {
            provider,
            behavior: Behavior::FailRefresh,
            leads: vec![],
            fetch_delay: None,
        })
    }

    fn failing_fetch(provider: CrmProvider) -> Arc<dyn ProviderAdapter> {
        Arc::new(Self {
            provider,
            behavior: Behavior::FailFetch,
            leads: vec![],
            fetch_delay: None,
        })
    }

    fn slow(provider: CrmProvider, leads: Vec<CanonicalLead>, delay: Duration) -> Arc<dyn ProviderAdapter> {
        Arc::new(Self {
            provider,
            behavior: Behavior::Ok,
            leads,
            fetch_delay: Some(delay),
        })
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn provider(&self) -> CrmProvider {
        self.provider
    }

    async fn fetch_leads(
        &self,
        _access_token: &str,
        _connection: &ProviderConnection,
        _page: &PageOptions,
    ) -> TbResult<Vec<CanonicalLead>> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        match self.behavior {
            Behavior::FailFetch => Err(TbError::Provider("upstream outage".into())),
            _ => Ok(self.leads.clone()),
        }
    }

    async fn exchange_refresh_token(
        &self,
        _connection: &ProviderConnection,
    ) -> TbResult<TokenGrant> {
        match self.behavior {
            Behavior::FailRefresh => Err(TbError::Auth("refresh token revoked".into())),
            _ => Ok(TokenGrant {
                access_token: "stub-access".into(),
                refresh_token: None,
                expires_in_secs: Some(3600),
            }),
        }
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus {
            provider: self.provider,
            connected: true,
            last_fetch: None,
            leads_fetched: 0,
            errors: 0,
            message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Fixture {
    tenant: Uuid,
    leads: Arc<MemoryLeadStore>,
    connections: Arc<MemoryConnectionStore>,
    forms: Arc<MemoryFormCatalog>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            tenant: Uuid::now_v7(),
            leads: Arc::new(MemoryLeadStore::new()),
            connections: Arc::new(MemoryConnectionStore::new()),
            forms: Arc::new(MemoryFormCatalog::new()),
        }
    }

    async fn connect(&self, provider: &str) {
        let mut connection = ProviderConnection::new(self.tenant, provider, "refresh");
        connection.tokens.access_token = "access".into();
        connection.tokens.token_expiry = Some(Utc::now() + chrono::Duration::hours(1));
        self.connections.seed(connection).await;
    }

    /// A connection whose access token has expired, forcing a refresh.
    async fn connect_stale(&self, provider: &str) {
        let mut connection = ProviderConnection::new(self.tenant, provider, "refresh");
        connection.tokens.access_token = "expired".into();
        connection.tokens.token_expiry = Some(Utc::now() - chrono::Duration::hours(1));
        self.connections.seed(connection).await;
    }

    fn engine(&self, adapters: Vec<Arc<dyn ProviderAdapter>>) -> ReconciliationEngine {
        let mut registry = AdapterRegistry::empty();
        for adapter in adapters {
            registry.insert(adapter);
        }
        ReconciliationEngine::new(
            Arc::clone(&self.leads) as _,
            Arc::clone(&self.connections) as _,
            Arc::clone(&self.forms) as _,
            registry,
            EngineConfig::default(),
        )
    }
}

fn contact(provider: CrmProvider, id: &str, email: &str) -> CanonicalLead {
    let mut lead = CanonicalLead::new(provider, id);
    lead.email = email.to_string();
    lead
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn imports_two_contacts_into_an_empty_store() {
    let fx = Fixture::new();
    fx.connect("hubspot").await;
    let engine = fx.engine(vec![StubAdapter::returning(
        CrmProvider::HubSpot,
        vec![
            contact(CrmProvider::HubSpot, "1", "a@x.com"),
            contact(CrmProvider::HubSpot, "2", "b@x.com"),
        ],
    )]);

    let summary = engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.total, 2);

    let stored = fx.leads.dump().await;
    assert_eq!(stored.len(), 2);
    for lead in &stored {
        assert_eq!(lead.lead_origin, LeadOrigin::Crm);
        assert_eq!(lead.crm_provider, Some(CrmProvider::HubSpot));
        assert_eq!(lead.crm_sync_status, CrmSyncStatus::Synced);
        assert!(lead.last_synced_at.is_some());
        assert!(lead.form_id.is_some());
    }
    let mut ids: Vec<&str> = stored.iter().filter_map(|l| l.crm_id.as_deref()).collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn platform_lead_is_never_overwritten() {
    let fx = Fixture::new();
    fx.connect("hubspot").await;
    let platform_lead = PlatformLead::new(fx.tenant, LeadOrigin::Platform)
        .with_email("a@x.com")
        .with_name("Original", "Owner");
    fx.leads.insert(&platform_lead).await.unwrap();

    let engine = fx.engine(vec![StubAdapter::returning(
        CrmProvider::HubSpot,
        vec![
            {
                let mut c = contact(CrmProvider::HubSpot, "1", "a@x.com");
                c.first_name = "Inbound".into();
                c.phone = "+1 555 0000".into();
                c
            },
            contact(CrmProvider::HubSpot, "2", "b@x.com"),
        ],
    )]);

    let summary = engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.total, 2);

    let untouched = fx.leads.get(platform_lead.id).await.unwrap().unwrap();
    assert_eq!(untouched.first_name, "Original");
    assert_eq!(untouched.phone, "");
    assert!(untouched.last_synced_at.is_none());
}

#[tokio::test]
async fn second_run_imports_nothing() {
    let fx = Fixture::new();
    fx.connect("hubspot").await;
    let engine = fx.engine(vec![StubAdapter::returning(
        CrmProvider::HubSpot,
        vec![
            contact(CrmProvider::HubSpot, "1", "a@x.com"),
            contact(CrmProvider::HubSpot, "2", "b@x.com"),
        ],
    )]);

    let first = engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(first.imported, 2);

    let second = engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.total, 2);
    assert_eq!(fx.leads.count(fx.tenant).await, 2);
}

#[tokio::test]
async fn provider_failure_does_not_sink_the_others() {
    let fx = Fixture::new();
    fx.connect_stale("hubspot").await;
    fx.connect("zoho").await;
    fx.connect("pipedrive").await;

    let engine = fx.engine(vec![
        StubAdapter::failing_refresh(CrmProvider::HubSpot),
        StubAdapter::returning(
            CrmProvider::Zoho,
            vec![contact(CrmProvider::Zoho, "z1", "z@x.com")],
        ),
        StubAdapter::failing_fetch(CrmProvider::Pipedrive),
    ]);

    // Not a run-level error: the summary reflects what the healthy
    // provider contributed.
    let summary = engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.total, 1);

    let stored = fx.leads.dump().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].crm_provider, Some(CrmProvider::Zoho));

    // The failing connection accrued a refresh-failure mark.
    let connections = fx.connections.dump().await;
    let hubspot = connections.iter().find(|c| c.provider == "hubspot").unwrap();
    assert_eq!(hubspot.consecutive_failures, 1);
}

#[tokio::test]
async fn update_never_blanks_existing_fields() {
    let fx = Fixture::new();
    fx.connect("hubspot").await;
    let mut existing = PlatformLead::new(fx.tenant, LeadOrigin::Crm)
        .with_email("a@x.com")
        .with_name("Ada", "Lovelace")
        .with_imported_from(CrmProvider::HubSpot, "old-9");
    existing.phone = "+44 20 7946 0958".into();
    existing.company = "Analytical Engines".into();
    fx.leads.insert(&existing).await.unwrap();

    let engine = fx.engine(vec![StubAdapter::returning(CrmProvider::HubSpot, vec![{
        let mut c = contact(CrmProvider::HubSpot, "new-1", "a@x.com");
        c.first_name = "Augusta".into();
        c.raw_status = "hot".into();
        // phone and company intentionally empty
        c
    }])]);

    let summary = engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.imported, 0);

    let updated = fx.leads.get(existing.id).await.unwrap().unwrap();
    assert_eq!(updated.first_name, "Augusta");
    assert_eq!(updated.phone, "+44 20 7946 0958");
    assert_eq!(updated.company, "Analytical Engines");
    assert_eq!(updated.status, LeadStatus::Hot);
    assert!(updated.last_synced_at.is_some());
}

#[tokio::test]
async fn exported_lead_is_not_reimported() {
    let fx = Fixture::new();
    fx.connect("hubspot").await;
    // A platform lead previously pushed out to HubSpot as record "55".
    let exported = PlatformLead::new(fx.tenant, LeadOrigin::Platform)
        .with_email("p@x.com")
        .with_exported_to(CrmProvider::HubSpot, "55");
    fx.leads.insert(&exported).await.unwrap();

    // HubSpot hands the record back, possibly with a different email.
    let engine = fx.engine(vec![StubAdapter::returning(
        CrmProvider::HubSpot,
        vec![contact(CrmProvider::HubSpot, "55", "mirror@x.com")],
    )]);

    let summary = engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(summary.imported, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(fx.leads.count(fx.tenant).await, 1);
}

#[tokio::test]
async fn no_connections_is_a_zero_summary_not_an_error() {
    let fx = Fixture::new();
    let engine = fx.engine(vec![]);
    let summary = engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(summary, tb_core::ReconciliationSummary::zero());
    // Nothing to do: the default form is not even created.
    assert_eq!(fx.forms.count(fx.tenant).await, 0);
}

#[tokio::test]
async fn unsupported_provider_connection_is_skipped() {
    let fx = Fixture::new();
    fx.connect("legacy-crm").await;
    fx.connect("hubspot").await;

    let engine = fx.engine(vec![StubAdapter::returning(
        CrmProvider::HubSpot,
        vec![contact(CrmProvider::HubSpot, "1", "a@x.com")],
    )]);

    let summary = engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.total, 1);
}

#[tokio::test]
async fn repeated_runs_reuse_one_import_form() {
    let fx = Fixture::new();
    fx.connect("hubspot").await;
    let engine = fx.engine(vec![StubAdapter::returning(
        CrmProvider::HubSpot,
        vec![contact(CrmProvider::HubSpot, "1", "a@x.com")],
    )]);

    engine.reconcile(fx.tenant).await.unwrap();
    engine.reconcile(fx.tenant).await.unwrap();
    engine.reconcile(fx.tenant).await.unwrap();
    assert_eq!(fx.forms.count(fx.tenant).await, 1);
}

#[tokio::test]
async fn concurrent_runs_do_not_double_create() {
    let fx = Fixture::new();
    fx.connect("hubspot").await;
    let engine = Arc::new(fx.engine(vec![StubAdapter::returning(
        CrmProvider::HubSpot,
        vec![
            contact(CrmProvider::HubSpot, "1", "a@x.com"),
            contact(CrmProvider::HubSpot, "2", "b@x.com"),
        ],
    )]));

    let (first, second) = tokio::join!(engine.reconcile(fx.tenant), engine.reconcile(fx.tenant));
    let first = first.unwrap();
    let second = second.unwrap();

    // The per-tenant lock serializes the runs: whichever went second saw
    // the other's work and imported nothing.
    assert_eq!(first.imported + second.imported, 2);
    assert_eq!(fx.leads.count(fx.tenant).await, 2);
}

#[tokio::test(start_paused = true)]
async fn deadline_expiry_abandons_the_fetch_and_keeps_merged_work() {
    let fx = Fixture::new();
    fx.connect("zoho").await;
    fx.connect("hubspot").await;

    let engine = fx.engine(vec![
        StubAdapter::returning(
            CrmProvider::Zoho,
            vec![contact(CrmProvider::Zoho, "z1", "z@x.com")],
        ),
        StubAdapter::slow(
            CrmProvider::HubSpot,
            vec![contact(CrmProvider::HubSpot, "1", "a@x.com")],
            Duration::from_secs(600),
        ),
    ]);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let summary = engine
        .reconcile_with_deadline(fx.tenant, deadline)
        .await
        .unwrap();

    // The fast provider landed before the deadline; the slow fetch was
    // abandoned as provider-unavailable.
    assert_eq!(summary.imported, 1);
    let stored = fx.leads.dump().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].crm_provider, Some(CrmProvider::Zoho));
}

#[tokio::test]
async fn form_catalog_outage_is_a_run_level_error() {
    struct DownCatalog;

    #[async_trait]
    impl FormCatalog for DownCatalog {
        async fn find_or_create_default(&self, _tenant_id: Uuid) -> TbResult<ImportForm> {
            Err(TbError::FormCatalog("catalog unreachable".into()))
        }
    }

    let fx = Fixture::new();
    fx.connect("hubspot").await;
    let mut registry = AdapterRegistry::empty();
    registry.insert(StubAdapter::returning(
        CrmProvider::HubSpot,
        vec![contact(CrmProvider::HubSpot, "1", "a@x.com")],
    ));
    let engine = ReconciliationEngine::new(
        Arc::clone(&fx.leads) as _,
        Arc::clone(&fx.connections) as _,
        Arc::new(DownCatalog),
        registry,
        EngineConfig::default(),
    );

    let err = engine.reconcile(fx.tenant).await.unwrap_err();
    assert!(matches!(err, TbError::FormCatalog(_)));
    assert_eq!(fx.leads.count(fx.tenant).await, 0);
}

#[tokio::test]
async fn inbound_status_maps_through_the_allow_list() {
    let fx = Fixture::new();
    fx.connect("zoho").await;
    let engine = fx.engine(vec![StubAdapter::returning(
        CrmProvider::Zoho,
        vec![
            {
                let mut c = contact(CrmProvider::Zoho, "1", "q@x.com");
                c.raw_status = "qualified".into();
                c
            },
            {
                let mut c = contact(CrmProvider::Zoho, "2", "u@x.com");
                c.raw_status = "contact in future".into();
                c
            },
        ],
    )]);

    engine.reconcile(fx.tenant).await.unwrap();
    let stored = fx.leads.dump().await;
    let by_email = |email: &str| {
        stored
            .iter()
            .find(|l| l.email == email)
            .cloned()
            .unwrap()
    };
    assert_eq!(by_email("q@x.com").status, LeadStatus::Qualified);
    assert_eq!(by_email("u@x.com").status, LeadStatus::New);
}
