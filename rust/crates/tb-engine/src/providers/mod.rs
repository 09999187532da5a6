pub mod hubspot;
pub mod pipedrive;
pub mod salesforce;
pub mod zoho;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tb_core::{CanonicalLead, CrmProvider, ProviderConnection, TbError, TbResult};

use crate::config::OauthAppsConfig;

// ---------------------------------------------------------------------------
// Page Options
// ---------------------------------------------------------------------------

/// Bounds one provider fetch. The engine requests a single page per pass
/// rather than exhausting all provider pages.
#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    pub limit: usize,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self { limit: 100 }
    }
}

// ---------------------------------------------------------------------------
// Token Grant
// ---------------------------------------------------------------------------

/// Result of a refresh-token exchange. Providers that rotate refresh tokens
/// return a new one; providers that omit `expires_in` get a default lifetime
/// from the credential manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: Option<i64>,
}

// ---------------------------------------------------------------------------
// Adapter Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub provider: CrmProvider,
    pub connected: bool,
    pub last_fetch: Option<DateTime<Utc>>,
    pub leads_fetched: u64,
    pub errors: u64,
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider Adapter Trait
// ---------------------------------------------------------------------------

/// One implementation per connected CRM. An adapter hides the provider's
/// pagination semantics and field schema behind a bounded-page fetch that
/// yields canonical leads, and owns the provider-specific wire shape of the
/// refresh-token exchange. Stateless given valid credentials.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> CrmProvider;

    /// Fetch one bounded page of leads and normalize them.
    async fn fetch_leads(
        &self,
        access_token: &str,
        connection: &ProviderConnection,
        page: &PageOptions,
    ) -> TbResult<Vec<CanonicalLead>>;

    /// Exchange the connection's refresh token for a fresh grant at the
    /// provider's token endpoint.
    async fn exchange_refresh_token(&self, connection: &ProviderConnection)
        -> TbResult<TokenGrant>;

    fn status(&self) -> AdapterStatus;
}

fn _assert_provider_adapter_object_safe(_: &dyn ProviderAdapter) {}

// ---------------------------------------------------------------------------
// Adapter Registry
// ---------------------------------------------------------------------------

/// Closed lookup table of provider adapters keyed on the provider
/// identifier. Adding a provider means adding one implementation and one
/// registry entry. Unknown identifiers resolve to `None`; the engine skips
/// them since the connection catalog may reference providers no longer
/// supported.
pub struct AdapterRegistry {
    adapters: HashMap<CrmProvider, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the four production adapters.
    pub fn with_defaults(oauth: &OauthAppsConfig, fetch_timeout: Duration) -> TbResult<Self> {
        let mut registry = Self::empty();
        registry.insert(Arc::new(hubspot::HubSpotAdapter::new(
            oauth.hubspot.clone(),
            fetch_timeout,
        )?));
        registry.insert(Arc::new(salesforce::SalesforceAdapter::new(
            oauth.salesforce.clone(),
            fetch_timeout,
        )?));
        registry.insert(Arc::new(pipedrive::PipedriveAdapter::new(
            oauth.pipedrive.clone(),
            fetch_timeout,
        )?));
        registry.insert(Arc::new(zoho::ZohoAdapter::new(
            oauth.zoho.clone(),
            fetch_timeout,
        )?));
        Ok(registry)
    }

    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: CrmProvider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).map(Arc::clone)
    }

    /// Resolve a raw provider identifier from a connection record. Unknown
    /// or unregistered identifiers return `None`.
    pub fn lookup(&self, raw: &str) -> Option<Arc<dyn ProviderAdapter>> {
        raw.parse::<CrmProvider>()
            .ok()
            .and_then(|provider| self.get(provider))
    }

    pub fn statuses(&self) -> Vec<AdapterStatus> {
        self.adapters.values().map(|a| a.status()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------------

pub(crate) fn http_client(timeout: Duration) -> TbResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TbError::Internal(format!("http client error: {e}")))
}

/// POST a form-encoded OAuth refresh grant and decode the provider's token
/// response. All four providers speak this wire shape, differing only in
/// endpoint and response field coverage.
pub(crate) async fn post_refresh_grant<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> TbResult<T> {
    let response = client
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| TbError::Auth(format!("token request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(TbError::Auth(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| TbError::Auth(format!("token response parse failed: {e}")))
}
