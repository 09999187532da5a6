//! Per-connection OAuth credential management.
//!
//! The credential manager is the only writer of connection tokens. Before a
//! provider fetch it hands out the stored access token when still fresh, or
//! exchanges the refresh token at the provider's endpoint and persists the
//! new pair. Refresh failure marks the provider unavailable for the pass;
//! hitting the consecutive-failure threshold deactivates the connection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use tb_core::{ConnectionStore, OauthTokens, ProviderConnection, TbError, TbResult};

use crate::config::CredentialConfig;
use crate::providers::ProviderAdapter;

/// Lifetime applied when a provider's grant omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Whether the stored access token must be exchanged before use: missing,
/// expiry unknown, or expiring within the safety margin.
pub fn is_stale(tokens: &OauthTokens, margin_secs: i64, now: DateTime<Utc>) -> bool {
    if tokens.access_token.is_empty() {
        return true;
    }
    match tokens.token_expiry {
        Some(expiry) => expiry <= now + Duration::seconds(margin_secs),
        None => true,
    }
}

pub struct CredentialManager {
    connections: Arc<dyn ConnectionStore>,
    config: CredentialConfig,
    // One refresh in flight per connection.
    refresh_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CredentialManager {
    pub fn new(connections: Arc<dyn ConnectionStore>, config: CredentialConfig) -> Self {
        Self {
            connections,
            config,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, connection_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        Arc::clone(
            locks
                .entry(connection_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Return a usable access token for the connection, refreshing first
    /// when the stored one is stale. Tokens are persisted only on a
    /// successful exchange.
    pub async fn ensure_fresh_token(
        &self,
        adapter: &dyn ProviderAdapter,
        connection: &ProviderConnection,
    ) -> TbResult<String> {
        if connection.tokens.refresh_token.is_empty() {
            return Err(TbError::Auth(format!(
                "connection {} has no refresh token",
                connection.id
            )));
        }

        let now = Utc::now();
        if !is_stale(&connection.tokens, self.config.refresh_margin_secs, now) {
            return Ok(connection.tokens.access_token.clone());
        }

        let lock = self.lock_for(connection.id).await;
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent caller may have refreshed
        // while this one waited.
        let current = self
            .connections
            .get(connection.id)
            .await?
            .ok_or(TbError::ConnectionNotFound(connection.id))?;
        if !is_stale(&current.tokens, self.config.refresh_margin_secs, Utc::now()) {
            return Ok(current.tokens.access_token.clone());
        }

        match adapter.exchange_refresh_token(&current).await {
            Ok(grant) => {
                let lifetime = grant.expires_in_secs.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
                let tokens = OauthTokens {
                    access_token: grant.access_token.clone(),
                    refresh_token: grant
                        .refresh_token
                        .unwrap_or_else(|| current.tokens.refresh_token.clone()),
                    token_expiry: Some(Utc::now() + Duration::seconds(lifetime)),
                };
                self.connections.save_tokens(current.id, &tokens).await?;
                tracing::debug!(
                    connection_id = %current.id,
                    provider = %current.provider,
                    "access token refreshed"
                );
                Ok(grant.access_token)
            }
            Err(err) => {
                let failures = self.connections.record_refresh_failure(current.id).await?;
                tracing::warn!(
                    connection_id = %current.id,
                    provider = %current.provider,
                    failures,
                    error = %err,
                    "token refresh failed"
                );
                if failures >= self.config.failure_threshold {
                    self.connections.deactivate(current.id).await?;
                    tracing::warn!(
                        connection_id = %current.id,
                        provider = %current.provider,
                        "connection deactivated after repeated refresh failures"
                    );
                }
                Err(TbError::Auth(format!(
                    "token refresh failed for connection {}: {err}",
                    current.id
                )))
            }
        }
    }
}
