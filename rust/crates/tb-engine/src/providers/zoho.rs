//! Zoho CRM adapter.
//!
//! Leads come from the v2 records API with `page`/`per_page` pagination
//! against the connection's `api_domain` (Zoho is region-sharded); token
//! refresh goes through the accounts server. Authorization uses the
//! `Zoho-oauthtoken` scheme rather than plain Bearer.

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

const DEFAULT_API_DOMAIN: &str = "https://www.zohoapis.com";
const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.zoho.com";

pub struct ZohoAdapter {
    oauth: OauthClientConfig,
    accounts_url: String,
    client: reqwest::Client,
    leads_fetched: AtomicU64,
    errors: AtomicU64,
    last_fetch: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl ZohoAdapter {
    pub fn new(oauth: OauthClientConfig, timeout: Duration) -> TbResult<Self> {
        Ok(Self {
            oauth,
            accounts_url: DEFAULT_ACCOUNTS_URL.to_string(),
            client: http_client(timeout)?,
            leads_fetched: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_fetch: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    pub fn with_accounts_url(mut self, url: impl Into<String>) -> Self {
        self.accounts_url = url.into();
        self
    }

    fn normalize_record(record: ZohoLead) -> CanonicalLead {
        let first_name = normalize::clean(record.first_name.as_deref());
        let last_name = normalize::clean(record.last_name.as_deref());
        let explicit = normalize::clean(record.full_name.as_deref());
        let mut lead = CanonicalLead::new(CrmProvider::Zoho, record.id);
        lead.full_name = normalize::full_name(&explicit, &first_name, &last_name);
        lead.first_name = first_name;
        lead.last_name = last_name;
        lead.email = normalize::clean(record.email.as_deref());
        lead.phone = normalize::clean(record.phone.as_deref());
        lead.company = normalize::clean(record.company.as_deref());
        lead.job_title = normalize::clean(record.designation.as_deref());
        lead.raw_status = normalize::raw_status(record.lead_status.as_deref());
        lead.created_at = normalize::parse_timestamp(record.created_time.as_deref());
        lead.updated_at = normalize::parse_timestamp(record.modified_time.as_deref());
        lead
    }

    fn parse_page(body: &str) -> TbResult<Vec<CanonicalLead>> {
        // Zoho returns 204 with an empty body when a module has no records.
        if body.trim().is_empty() {
            return Ok(vec![]);
        }
        let page: ZohoResponse = serde_json::from_str(body)
            .map_err(|e| TbError::Provider(format!("zoho response parse failed: {e}")))?;
        Ok(page
            .data
            .unwrap_or_default()
            .into_iter()
            .map(Self::normalize_record)
            .collect())
    }

    fn record_error(&self, message: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl ProviderAdapter for ZohoAdapter {
    fn provider(&self) -> CrmProvider {
        CrmProvider::Zoho
    }

    async fn fetch_leads(
        &self,
        access_token: &str,
        connection: &ProviderConnection,
        page: &PageOptions,
    ) -> TbResult<Vec<CanonicalLead>> {
        let api_domain = connection
            .credential("api_domain")
            .unwrap_or(DEFAULT_API_DOMAIN);
        let url = format!("{api_domain}/crm/v2/Leads");
        let per_page = page.limit.to_string();

        let response = self
            .client
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Zoho-oauthtoken {access_token}"),
            )
            .query(&[("page", "1"), ("per_page", per_page.as_str())])
            .send()
            .await
            .map_err(|e| {
                let err = format!("zoho fetch failed: {e}");
                self.record_error(&err);
                TbError::Provider(err)
            })?;

        if !response.status().is_success() {
            let err = format!("zoho fetch returned {}", response.status());
            self.record_error(&err);
            return Err(TbError::Provider(err));
        }

        let body = response.text().await.map_err(|e| {
            let err = format!("zoho body read failed: {e}");
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
        let token_url = format!("{}/oauth/v2/token", self.accounts_url);
        let response: ZohoTokenResponse = post_refresh_grant(
            &self.client,
            &token_url,
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
            // Zoho refresh tokens are long-lived and never rotated here.
            refresh_token: None,
            expires_in_secs: response.expires_in,
        })
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus {
            provider: CrmProvider::Zoho,
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
struct ZohoResponse {
    data: Option<Vec<ZohoLead>>,
}

#[derive(Debug, Deserialize)]
struct ZohoLead {
    id: String,
    #[serde(rename = "First_Name")]
    first_name: Option<String>,
    #[serde(rename = "Last_Name")]
    last_name: Option<String>,
    #[serde(rename = "Full_Name")]
    full_name: Option<String>,
    #[serde(rename = "Email")]
    email: Option<String>,
    #[serde(rename = "Phone")]
    phone: Option<String>,
    #[serde(rename = "Company")]
    company: Option<String>,
    #[serde(rename = "Designation")]
    designation: Option<String>,
    #[serde(rename = "Lead_Status")]
    lead_status: Option<String>,
    #[serde(rename = "Created_Time")]
    created_time: Option<String>,
    #[serde(rename = "Modified_Time")]
    modified_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZohoTokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}
