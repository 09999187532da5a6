//! HubSpot adapter.
//!
//! Contacts come from the v3 objects API, one `limit`-bounded page per pass;
//! token refresh goes through the v1 OAuth endpoint. Timestamps arrive as
//! RFC 3339; the lead status lives in the `hs_lead_status` property.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use tb_core::{CanonicalLead, CrmProvider, ProviderConnection, TbError, TbResult};

use crate::config::OauthClientConfig;
use crate::normalize;

use super::{
    http_client, post_refresh_grant, AdapterStatus, PageOptions, ProviderAdapter, TokenGrant,
};

const DEFAULT_API_BASE: &str = "https://api.hubapi.com";

const CONTACT_PROPERTIES: &str =
    "firstname,lastname,email,phone,company,jobtitle,hs_lead_status";

pub struct HubSpotAdapter {
    oauth: OauthClientConfig,
    api_base: String,
    token_url: String,
    client: reqwest::Client,
    leads_fetched: AtomicU64,
    errors: AtomicU64,
    last_fetch: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl HubSpotAdapter {
    pub fn new(oauth: OauthClientConfig, timeout: Duration) -> TbResult<Self> {
        Ok(Self {
            oauth,
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: format!("{DEFAULT_API_BASE}/oauth/v1/token"),
            client: http_client(timeout)?,
            leads_fetched: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_fetch: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.token_url = format!("{base}/oauth/v1/token");
        self.api_base = base;
        self
    }

    fn normalize_contact(contact: HubSpotContact) -> CanonicalLead {
        let props = contact.properties;
        let first_name = normalize::clean(props.firstname.as_deref());
        let last_name = normalize::clean(props.lastname.as_deref());
        let mut lead = CanonicalLead::new(CrmProvider::HubSpot, contact.id);
        lead.full_name = normalize::full_name("", &first_name, &last_name);
        lead.first_name = first_name;
        lead.last_name = last_name;
        lead.email = normalize::clean(props.email.as_deref());
        lead.phone = normalize::clean(props.phone.as_deref());
        lead.company = normalize::clean(props.company.as_deref());
        lead.job_title = normalize::clean(props.jobtitle.as_deref());
        lead.raw_status = normalize::raw_status(props.hs_lead_status.as_deref());
        lead.created_at = normalize::parse_timestamp(contact.created_at.as_deref());
        lead.updated_at = normalize::parse_timestamp(contact.updated_at.as_deref());
        lead
    }

    fn parse_page(body: &str) -> TbResult<Vec<CanonicalLead>> {
        let page: HubSpotPage = serde_json::from_str(body)
            .map_err(|e| TbError::Provider(format!("hubspot response parse failed: {e}")))?;
        Ok(page
            .results
            .into_iter()
            .map(Self::normalize_contact)
            .collect())
    }

    fn record_error(&self, message: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl ProviderAdapter for HubSpotAdapter {
    fn provider(&self) -> CrmProvider {
        CrmProvider::HubSpot
    }

    async fn fetch_leads(
        &self,
        access_token: &str,
        _connection: &ProviderConnection,
        page: &PageOptions,
    ) -> TbResult<Vec<CanonicalLead>> {
        let url = format!("{}/crm/v3/objects/contacts", self.api_base);
        let limit = page.limit.to_string();

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("limit", limit.as_str()),
                ("properties", CONTACT_PROPERTIES),
            ])
            .send()
            .await
            .map_err(|e| {
                let err = format!("hubspot fetch failed: {e}");
                self.record_error(&err);
                TbError::Provider(err)
            })?;

        if !response.status().is_success() {
            let err = format!("hubspot fetch returned {}", response.status());
            self.record_error(&err);
            return Err(TbError::Provider(err));
        }

        let body = response.text().await.map_err(|e| {
            let err = format!("hubspot body read failed: {e}");
            self.record_error(&err);
            TbError::Provider(err)
        })?;

        let leads = Self::parse_page(&body)?;
        self.leads_fetched
            .fetch_add(leads.len() as u64, Ordering::SeqCst);
        *self.last_fetch.lock().unwrap() = Some(Utc::now());
        *self.last_error.lock().unwrap() = None;
        Ok(leads)
    }

    async fn exchange_refresh_token(
        &self,
        connection: &ProviderConnection,
    ) -> TbResult<TokenGrant> {
        let response: HubSpotTokenResponse = post_refresh_grant(
            &self.client,
            &self.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", &self.oauth.client_id),
                ("client_secret", &self.oauth.client_secret),
                ("refresh_token", &connection.tokens.refresh_token),
            ],
        )
        .await?;

        Ok(TokenGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in_secs: response.expires_in,
        })
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus {
            provider: CrmProvider::HubSpot,
            connected: self.last_error.lock().unwrap().is_none(),
            last_fetch: *self.last_fetch.lock().unwrap(),
            leads_fetched: self.leads_fetched.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            message: self.last_error.lock().unwrap().clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HubSpotPage {
    #[serde(default)]
    results: Vec<HubSpotContact>,
}

#[derive(Debug, Deserialize)]
struct HubSpotContact {
    id: String,
    #[serde(default)]
    properties: HubSpotProperties,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    #[serde(rename = "updatedAt")]
    updated_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HubSpotProperties {
    firstname: Option<String>,
    lastname: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    company: Option<String>,
    jobtitle: Option<String>,
    hs_lead_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HubSpotTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}
