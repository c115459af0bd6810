//! OAuth token refresh
//!
//! [`OAuthTokenRefresher`] performs the OAuth 2.1 `refresh_token` grant
//! against an authorization server's token endpoint.
//! [`InstallationTokenManager`] combines a [`TokenRefresher`] with an
//! [`InstallationStore`] so a refreshed token is persisted in one step.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::mcp::auth::installation::{Installation, InstallationStore, SensitiveConfig};
use crate::mcp::transport::{truncate_chars, MAX_ERROR_BODY_CHARS};

/// Tokens returned by a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    /// New access token
    pub access_token: String,
    /// Rotated refresh token, when the server issues one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the new access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Run the `refresh_token` grant.
    ///
    /// # Errors
    ///
    /// Implementations report every failure as
    /// [`BridgeError::TokenRefresh`].
    async fn refresh_token(
        &self,
        token_url: &str,
        refresh_token: &str,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<TokenGrant>;
}

/// [`TokenRefresher`] that talks to a real token endpoint.
#[derive(Debug, Clone, Default)]
pub struct OAuthTokenRefresher {
    http: reqwest::Client,
}

impl OAuthTokenRefresher {
    /// Create a refresher sharing `http`'s connection pool.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TokenRefresher for OAuthTokenRefresher {
    async fn refresh_token(
        &self,
        token_url: &str,
        refresh_token: &str,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<TokenGrant> {
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        if let Some(secret) = client_secret {
            params.push(("client_secret", secret));
        }

        let resp = self
            .http
            .post(token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| BridgeError::TokenRefresh(format!("refresh token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::TokenRefresh(format!(
                "token endpoint returned {status}: {}",
                truncate_chars(&body, MAX_ERROR_BODY_CHARS)
            ))
            .into());
        }

        resp.json::<TokenGrant>().await.map_err(|e| {
            BridgeError::TokenRefresh(format!("failed to parse token response: {e}")).into()
        })
    }
}

/// Refreshes installation tokens and persists the result.
#[derive(Clone)]
pub struct InstallationTokenManager {
    store: Arc<dyn InstallationStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl std::fmt::Debug for InstallationTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationTokenManager")
            .finish_non_exhaustive()
    }
}

impl InstallationTokenManager {
    /// Create a manager over `store` and `refresher`.
    pub fn new(store: Arc<dyn InstallationStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { store, refresher }
    }

    /// Refresh `installation`'s access token and persist the new credentials.
    ///
    /// The new credentials record the current time as `token_retrieved_at`.
    /// When the server does not rotate the refresh token, the previous one is
    /// kept. `needs_reauth` is cleared. A failed store write is logged and the
    /// new credentials are still returned, since the grant may have rotated
    /// the refresh token.
    ///
    /// # Returns
    ///
    /// The updated [`SensitiveConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TokenRefresh`] when the installation has no
    /// refresh token or OAuth registration, or when the grant fails.
    pub async fn refresh(&self, installation: &Installation) -> Result<SensitiveConfig> {
        let current = &installation.sensitive_config;
        let refresh_token = current
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                BridgeError::TokenRefresh(format!(
                    "installation '{}' has no refresh token",
                    installation.id
                ))
            })?;
        let oauth = installation.oauth.as_ref().ok_or_else(|| {
            BridgeError::TokenRefresh(format!(
                "installation '{}' has no OAuth client registration",
                installation.id
            ))
        })?;

        let grant = self
            .refresher
            .refresh_token(
                &oauth.token_endpoint,
                refresh_token,
                &oauth.client_id,
                oauth.client_secret.as_deref(),
            )
            .await?;

        let updated = SensitiveConfig {
            access_token: Some(grant.access_token),
            refresh_token: grant.refresh_token.or_else(|| current.refresh_token.clone()),
            token_retrieved_at: Some(chrono::Utc::now().timestamp()),
            expires_in: grant.expires_in,
            needs_reauth: false,
            api_key: current.api_key.clone(),
        };

        if let Err(e) = self
            .store
            .update_sensitive_config(&installation.id, updated.clone())
            .await
        {
            tracing::error!(
                installation = %installation.id,
                "failed to persist refreshed OAuth credentials: {e:#}"
            );
        }

        tracing::info!(installation = %installation.id, "refreshed OAuth access token");
        Ok(updated)
    }

    /// Flag `installation` as needing re-authentication.
    pub async fn mark_needs_reauth(&self, installation: &Installation) -> Result<()> {
        self.store.mark_needs_reauth(&installation.id).await
    }
}
