//! Pipedrive adapter.
//!
//! Persons come from the v1 REST API with `start`/`limit` pagination; email
//! and phone arrive as arrays of labeled values, with one marked primary.
//! Persons carry no status vocabulary, so `raw_status` stays empty and the
//! engine's allow-list maps it to the default.

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

const DEFAULT_API_BASE: &str = "https://api.pipedrive.com";
const DEFAULT_TOKEN_URL: &str = "https://oauth.pipedrive.com/oauth/token";

pub struct PipedriveAdapter {
    oauth: OauthClientConfig,
    token_url: String,
    client: reqwest::Client,
    leads_fetched: AtomicU64,
    errors: AtomicU64,
    last_fetch: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl PipedriveAdapter {
    pub fn new(oauth: OauthClientConfig, timeout: Duration) -> TbResult<Self> {
        Ok(Self {
            oauth,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client: http_client(timeout)?,
            leads_fetched: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_fetch: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    fn primary_value(values: &[PipedriveContactValue]) -> String {
        values
            .iter()
            .find(|v| v.primary.unwrap_or(false))
            .or_else(|| values.first())
            .map(|v| normalize::clean(v.value.as_deref()))
            .unwrap_or_default()
    }

    fn normalize_person(person: PipedrivePerson) -> CanonicalLead {
        let first_name = normalize::clean(person.first_name.as_deref());
        let last_name = normalize::clean(person.last_name.as_deref());
        let explicit = normalize::clean(person.name.as_deref());
        let mut lead = CanonicalLead::new(CrmProvider::Pipedrive, person.id.to_string());
        lead.full_name = normalize::full_name(&explicit, &first_name, &last_name);
        lead.first_name = first_name;
        lead.last_name = last_name;
        lead.email = Self::primary_value(&person.email);
        lead.phone = Self::primary_value(&person.phone);
        lead.company = normalize::clean(person.org_name.as_deref());
        lead.job_title = normalize::clean(person.job_title.as_deref());
        lead.created_at = normalize::parse_timestamp(person.add_time.as_deref());
        lead.updated_at = normalize::parse_timestamp(person.update_time.as_deref());
        lead
    }

    fn parse_page(body: &str) -> TbResult<Vec<CanonicalLead>> {
        let page: PipedriveResponse = serde_json::from_str(body)
            .map_err(|e| TbError::Provider(format!("pipedrive response parse failed: {e}")))?;
        Ok(page
            .data
            .unwrap_or_default()
            .into_iter()
            .map(Self::normalize_person)
            .collect())
    }

    fn record_error(&self, message: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl ProviderAdapter for PipedriveAdapter {
    fn provider(&self) -> CrmProvider {
        CrmProvider::Pipedrive
    }

    async fn fetch_leads(
        &self,
        access_token: &str,
        connection: &ProviderConnection,
        page: &PageOptions,
    ) -> TbResult<Vec<CanonicalLead>> {
        let api_base = connection
            .credential("api_domain")
            .unwrap_or(DEFAULT_API_BASE);
        let url = format!("{api_base}/v1/persons");
        let limit = page.limit.to_string();

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("start", "0"), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|e| {
                let err = format!("pipedrive fetch failed: {e}");
                self.record_error(&err);
                TbError::Provider(err)
            })?;

        if !response.status().is_success() {
            let err = format!("pipedrive fetch returned {}", response.status());
            self.record_error(&err);
            return Err(TbError::Provider(err));
        }

        let body = response.text().await.map_err(|e| {
            let err = format!("pipedrive body read failed: {e}");
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
        let response: PipedriveTokenResponse = post_refresh_grant(
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
            provider: CrmProvider::Pipedrive,
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
struct PipedriveResponse {
    data: Option<Vec<PipedrivePerson>>,
}

#[derive(Debug, Deserialize)]
struct PipedrivePerson {
    id: i64,
    name: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    #[serde(default)]
    email: Vec<PipedriveContactValue>,
    #[serde(default)]
    phone: Vec<PipedriveContactValue>,
    org_name: Option<String>,
    job_title: Option<String>,
    add_time: Option<String>,
    update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PipedriveContactValue {
    value: Option<String>,
    primary: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PipedriveTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "success": true,
        "data": [
            {
                "id": 7,
                "name": "Margaret Hamilton",
                "first_name": "Margaret",
                "last_name": "Hamilton",
                "email": [
                    {"label": "work", "value": "margaret@example.com", "primary": true},
                    {"label": "home", "value": "mh@home.example", "primary": false}
                ],
                "phone": [
                    {"label": "work", "value": "555-0100", "primary": false}
                ],
                "org_name": "MIT",
                "add_time": "2024-01-05T10:00:00Z",
                "update_time": "2024-01-06T10:00:00Z"
            }
        ],
        "additional_data": {"pagination": {"start": 0, "limit": 100, "more_items_in_collection": false}}
    }"#;

    #[test]
    fn parse_page_picks_primary_contact_values() {
        let leads = PipedriveAdapter::parse_page(PAGE).unwrap();
        assert_eq!(leads.len(), 1);
        let lead = &leads[0];
        assert_eq!(lead.external_id, "7");
        assert_eq!(lead.email, "margaret@example.com");
        // No primary phone flagged: first entry wins.
        assert_eq!(lead.phone, "555-0100");
        assert_eq!(lead.company, "MIT");
        assert_eq!(lead.raw_status, "");
    }

    #[test]
    fn parse_page_handles_null_data() {
        let leads = PipedriveAdapter::parse_page(r#"{"success": true, "data": null}"#).unwrap();
        assert!(leads.is_empty());
    }

    #[test]
    fn primary_value_of_empty_list_is_empty() {
        assert_eq!(PipedriveAdapter::primary_value(&[]), "");
    }
}
