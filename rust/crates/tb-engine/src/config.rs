use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
    #[serde(default)]
    pub qualify: QualifyConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub oauth: OauthAppsConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
}

/// Configuration for one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum records fetched per provider per pass. One bounded page per
    /// provider trades completeness-per-run for responsiveness; a full
    /// backfill is a separate operation.
    pub page_size: usize,
    /// Timeout for a single provider fetch, in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            fetch_timeout_secs: 30,
        }
    }
}

/// Configuration for credential refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Tokens expiring within this margin are refreshed before use.
    pub refresh_margin_secs: i64,
    /// Consecutive refresh failures after which a connection is deactivated.
    pub failure_threshold: u32,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: 120,
            failure_threshold: 3,
        }
    }
}

/// Configuration for batch qualification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifyConfig {
    /// Hard cap on leads scored per batch.
    pub max_batch: usize,
    /// Fixed delay between scorer calls, in milliseconds.
    pub inter_call_delay_ms: u64,
}

impl Default for QualifyConfig {
    fn default() -> Self {
        Self {
            max_batch: 50,
            inter_call_delay_ms: 250,
        }
    }
}

/// Configuration for the periodic reconciliation scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Interval between scheduled passes, in seconds.
    pub interval_secs: u64,
    /// Deadline for one scheduled run, in seconds. On expiry, remaining
    /// providers are treated as unavailable and merged work is kept.
    pub run_deadline_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            run_deadline_secs: 300,
        }
    }
}

/// OAuth app credentials per provider (the platform's client id/secret used
/// for refresh-token exchange).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OauthAppsConfig {
    #[serde(default)]
    pub hubspot: OauthClientConfig,
    #[serde(default)]
    pub salesforce: OauthClientConfig,
    #[serde(default)]
    pub pipedrive: OauthClientConfig,
    #[serde(default)]
    pub zoho: OauthClientConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OauthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// Configuration for the external qualification scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8200".into(),
            timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults overridden by `TRIBUTARY_*` environment
    /// variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("TRIBUTARY_PAGE_SIZE") {
            config.reconcile.page_size = v;
        }
        if let Some(v) = env_parse("TRIBUTARY_FETCH_TIMEOUT_SECS") {
            config.reconcile.fetch_timeout_secs = v;
        }
        if let Some(v) = env_parse("TRIBUTARY_REFRESH_MARGIN_SECS") {
            config.credentials.refresh_margin_secs = v;
        }
        if let Some(v) = env_parse("TRIBUTARY_FAILURE_THRESHOLD") {
            config.credentials.failure_threshold = v;
        }
        if let Some(v) = env_parse("TRIBUTARY_BATCH_MAX") {
            config.qualify.max_batch = v;
        }
        if let Some(v) = env_parse("TRIBUTARY_BATCH_DELAY_MS") {
            config.qualify.inter_call_delay_ms = v;
        }
        if let Some(v) = env_flag("TRIBUTARY_SCHEDULER_ENABLED") {
            config.scheduler.enabled = v;
        }
        if let Some(v) = env_parse::<u64>("TRIBUTARY_SCHEDULER_INTERVAL_SECS") {
            config.scheduler.interval_secs = v.max(60);
        }
        if let Some(v) = env_parse("TRIBUTARY_RUN_DEADLINE_SECS") {
            config.scheduler.run_deadline_secs = v;
        }
        if let Ok(v) = std::env::var("TRIBUTARY_SCORER_URL") {
            config.scorer.base_url = v;
        }

        for (app, prefix) in [
            (&mut config.oauth.hubspot, "TRIBUTARY_HUBSPOT"),
            (&mut config.oauth.salesforce, "TRIBUTARY_SALESFORCE"),
            (&mut config.oauth.pipedrive, "TRIBUTARY_PIPEDRIVE"),
            (&mut config.oauth.zoho, "TRIBUTARY_ZOHO"),
        ] {
            if let Ok(v) = std::env::var(format!("{prefix}_CLIENT_ID")) {
                app.client_id = v;
            }
            if let Ok(v) = std::env::var(format!("{prefix}_CLIENT_SECRET")) {
                app.client_secret = v;
            }
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.reconcile.page_size, 100);
        assert_eq!(config.credentials.refresh_margin_secs, 120);
        assert_eq!(config.credentials.failure_threshold, 3);
        assert_eq!(config.qualify.max_batch, 50);
        assert_eq!(config.qualify.inter_call_delay_ms, 250);
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn serde_roundtrip_with_partial_input() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"reconcile": {"page_size": 25, "fetch_timeout_secs": 5}}"#)
                .unwrap();
        assert_eq!(config.reconcile.page_size, 25);
        // Untouched sections fall back to defaults.
        assert_eq!(config.qualify.max_batch, 50);
    }
}
