use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CRM Provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmProvider {
    HubSpot,
    Salesforce,
    Pipedrive,
    Zoho,
}

impl CrmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HubSpot => "hubspot",
            Self::Salesforce => "salesforce",
            Self::Pipedrive => "pipedrive",
            Self::Zoho => "zoho",
        }
    }

    pub fn all() -> [CrmProvider; 4] {
        [
            Self::HubSpot,
            Self::Salesforce,
            Self::Pipedrive,
            Self::Zoho,
        ]
    }
}

impl std::str::FromStr for CrmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hubspot" => Ok(Self::HubSpot),
            "salesforce" => Ok(Self::Salesforce),
            "pipedrive" => Ok(Self::Pipedrive),
            "zoho" => Ok(Self::Zoho),
            _ => Err(format!("unknown crm provider: {s}")),
        }
    }
}

impl std::fmt::Display for CrmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Lead Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Hot,
    Warm,
    Cold,
    Qualified,
    Unqualified,
    Converted,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Qualified => "qualified",
            Self::Unqualified => "unqualified",
            Self::Converted => "converted",
        }
    }

    /// Map a provider's raw status string into the platform enumeration.
    ///
    /// Only {hot, warm, cold, qualified} are accepted from inbound data
    /// (case-insensitive); everything else lands on `New`.
    pub fn from_inbound(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hot" => Self::Hot,
            "warm" => Self::Warm,
            "cold" => Self::Cold,
            "qualified" => Self::Qualified,
            _ => Self::New,
        }
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            "qualified" => Ok(Self::Qualified),
            "unqualified" => Ok(Self::Unqualified),
            "converted" => Ok(Self::Converted),
            _ => Err(format!("unknown lead status: {s}")),
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Lead Origin
// ---------------------------------------------------------------------------

/// Authoritative-source marker. A `Platform` lead was authored on the
/// platform and is never overwritten by inbound reconciliation; a `Crm` lead
/// mirrors an external record and accepts updates from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadOrigin {
    Platform,
    Crm,
}

impl LeadOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Crm => "crm",
        }
    }
}

impl std::fmt::Display for LeadOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CRM Sync Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmSyncStatus {
    NotSynced,
    Synced,
    Failed,
}

impl CrmSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSynced => "not_synced",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical Lead
// ---------------------------------------------------------------------------

/// Provider-agnostic lead record produced by an adapter's normalizer.
///
/// String fields are empty, never null, so downstream assembly (full-name
/// concatenation, display fallbacks) is always well-defined. `external_id`
/// plus `source_provider` uniquely identify the record within one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalLead {
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub job_title: String,
    pub raw_status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub source_provider: CrmProvider,
}

impl CanonicalLead {
    pub fn new(source_provider: CrmProvider, external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            first_name: String::new(),
            last_name: String::new(),
            full_name: String::new(),
            email: String::new(),
            phone: String::new(),
            company: String::new(),
            job_title: String::new(),
            raw_status: String::new(),
            created_at: None,
            updated_at: None,
            source_provider,
        }
    }
}

// ---------------------------------------------------------------------------
// Platform Lead
// ---------------------------------------------------------------------------

/// The persisted lead entity, scoped to one tenant.
///
/// `crm_id` and `origin_crm_id` are disjoint directional sync edges:
/// `crm_id` marks "imported from that external record", `origin_crm_id`
/// marks "exported to that external record".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformLead {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub company: String,
    pub job_title: String,
    pub status: LeadStatus,
    pub lead_origin: LeadOrigin,
    pub crm_provider: Option<CrmProvider>,
    pub crm_id: Option<String>,
    pub origin_crm_id: Option<String>,
    pub crm_sync_status: CrmSyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub form_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlatformLead {
    pub fn new(tenant_id: Uuid, origin: LeadOrigin) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            phone: String::new(),
            company: String::new(),
            job_title: String::new(),
            status: LeadStatus::New,
            lead_origin: origin,
            crm_provider: None,
            crm_id: None,
            origin_crm_id: None,
            crm_sync_status: CrmSyncStatus::NotSynced,
            last_synced_at: None,
            form_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_name(
        mut self,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }

    pub fn with_status(mut self, status: LeadStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_imported_from(mut self, provider: CrmProvider, external_id: impl Into<String>) -> Self {
        self.crm_provider = Some(provider);
        self.crm_id = Some(external_id.into());
        self
    }

    pub fn with_exported_to(mut self, provider: CrmProvider, external_id: impl Into<String>) -> Self {
        self.crm_provider = Some(provider);
        self.origin_crm_id = Some(external_id.into());
        self
    }

    /// Display name, assembled from parts when both are present.
    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (true, true) => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync Edge
// ---------------------------------------------------------------------------

/// The directional sync edges of one platform lead, projected out of the
/// store for loop prevention. `imported_from` carries the lead's `crm_id`,
/// `exported_to` its `origin_crm_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadSyncEdge {
    pub lead_id: Uuid,
    pub provider: Option<CrmProvider>,
    pub imported_from: Option<String>,
    pub exported_to: Option<String>,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Provider Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: Option<DateTime<Utc>>,
}

/// Per-tenant, per-provider credential record. Created on OAuth linking,
/// mutated only by the credential manager on refresh, deactivated after
/// persistent auth failure.
///
/// `provider` stays a raw string: the catalog may reference providers the
/// platform no longer supports, and those connections are skipped, not
/// rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConnection {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider: String,
    pub status: ConnectionStatus,
    pub tokens: OauthTokens,
    pub credentials: HashMap<String, String>,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderConnection {
    pub fn new(tenant_id: Uuid, provider: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            provider: provider.into(),
            status: ConnectionStatus::Active,
            tokens: OauthTokens {
                access_token: String::new(),
                refresh_token: refresh_token.into(),
                token_expiry: None,
            },
            credentials: HashMap::new(),
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    pub fn with_tokens(mut self, tokens: OauthTokens) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(|s| s.as_str())
    }
}

// ---------------------------------------------------------------------------
// Import Form
// ---------------------------------------------------------------------------

/// Lead-capture form reference. CRM-imported leads satisfy the lead schema's
/// required form reference through one default import form per tenant,
/// located by the marker flag rather than by name so repeated reconciliation
/// runs never create duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportForm {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub is_default_import_form: bool,
    pub created_at: DateTime<Utc>,
}

impl ImportForm {
    pub fn default_for(tenant_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            name: "CRM Import".to_string(),
            is_default_import_form: true,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation Summary
// ---------------------------------------------------------------------------

/// Ephemeral result of one reconciliation pass. Returned to the trigger and
/// logged, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub total: usize,
}

impl ReconciliationSummary {
    pub fn zero() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Qualification
// ---------------------------------------------------------------------------

/// Black-box scorer output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadScore {
    pub score: f64,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredLead {
    pub lead_id: Uuid,
    pub score: LeadScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualificationError {
    pub lead_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualificationReport {
    pub qualified: usize,
    pub failed: usize,
    pub results: Vec<ScoredLead>,
    pub errors: Vec<QualificationError>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
