//! Salesforce adapter.
//!
//! Leads come from a SOQL query against the connection's `instance_url`;
//! token refresh goes through the login server. Salesforce omits
//! `expires_in` from refresh grants, so the credential manager applies its
//! default lifetime.

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

const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";
const API_VERSION: &str = "v59.0";

pub struct SalesforceAdapter {
    oauth: OauthClientConfig,
    login_url: String,
    client: reqwest::Client,
    leads_fetched: AtomicU64,
    errors: AtomicU64,
    last_fetch: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl SalesforceAdapter {
    pub fn new(oauth: OauthClientConfig, timeout: Duration) -> TbResult<Self> {
        Ok(Self {
            oauth,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            client: http_client(timeout)?,
            leads_fetched: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_fetch: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = url.into();
        self
    }

    fn soql(limit: usize) -> String {
        format!(
            "SELECT Id, FirstName, LastName, Name, Email, Phone, Company, Title, Status, \
             CreatedDate, LastModifiedDate FROM Lead ORDER BY LastModifiedDate DESC LIMIT {limit}"
        )
    }

    fn normalize_record(record: SalesforceLead) -> CanonicalLead {
        let first_name = normalize::clean(record.first_name.as_deref());
        let last_name = normalize::clean(record.last_name.as_deref());
        let explicit = normalize::clean(record.name.as_deref());
        let mut lead = CanonicalLead::new(CrmProvider::Salesforce, record.id);
        lead.full_name = normalize::full_name(&explicit, &first_name, &last_name);
        lead.first_name = first_name;
        lead.last_name = last_name;
        lead.email = normalize::clean(record.email.as_deref());
        lead.phone = normalize::clean(record.phone.as_deref());
        lead.company = normalize::clean(record.company.as_deref());
        lead.job_title = normalize::clean(record.title.as_deref());
        lead.raw_status = normalize::raw_status(record.status.as_deref());
        lead.created_at = normalize::parse_timestamp(record.created_date.as_deref());
        lead.updated_at = normalize::parse_timestamp(record.last_modified_date.as_deref());
        lead
    }

    fn parse_page(body: &str) -> TbResult<Vec<CanonicalLead>> {
        let page: SalesforceQueryResponse = serde_json::from_str(body)
            .map_err(|e| TbError::Provider(format!("salesforce response parse failed: {e}")))?;
        Ok(page
            .records
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
impl ProviderAdapter for SalesforceAdapter {
    fn provider(&self) -> CrmProvider {
        CrmProvider::Salesforce
    }

    async fn fetch_leads(
        &self,
        access_token: &str,
        connection: &ProviderConnection,
        page: &PageOptions,
    ) -> TbResult<Vec<CanonicalLead>> {
        let instance_url = connection
            .credential("instance_url")
            .ok_or_else(|| TbError::Provider("salesforce connection missing instance_url".into()))?;
        let url = format!("{instance_url}/services/data/{API_VERSION}/query");

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("q", Self::soql(page.limit))])
            .send()
            .await
            .map_err(|e| {
                let err = format!("salesforce fetch failed: {e}");
                self.record_error(&err);
                TbError::Provider(err)
            })?;

        if !response.status().is_success() {
            let err = format!("salesforce fetch returned {}", response.status());
            self.record_error(&err);
            return Err(TbError::Provider(err));
        }

        let body = response.text().await.map_err(|e| {
            let err = format!("salesforce body read failed: {e}");
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
        let token_url = format!("{}/services/oauth2/token", self.login_url);
        let response: SalesforceTokenResponse = post_refresh_grant(
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
            refresh_token: None,
            expires_in_secs: None,
        })
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus {
            provider: CrmProvider::Salesforce,
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
struct SalesforceQueryResponse {
    #[serde(default)]
    records: Vec<SalesforceLead>,
}

#[derive(Debug, Deserialize)]
struct SalesforceLead {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "FirstName")]
    first_name: Option<String>,
    #[serde(rename = "LastName")]
    last_name: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Email")]
    email: Option<String>,
    #[serde(rename = "Phone")]
    phone: Option<String>,
    #[serde(rename = "Company")]
    company: Option<String>,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Status")]
    status: Option<String>,
    #[serde(rename = "CreatedDate")]
    created_date: Option<String>,
    #[serde(rename = "LastModifiedDate")]
    last_modified_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SalesforceTokenResponse {
    access_token: String,
}
