//! Installed MCP servers and their credentials
//!
//! An [`Installation`] is one remote MCP server a user has connected, along
//! with the credentials needed to call it. Persistence is behind the
//! [`InstallationStore`] trait; [`InMemoryInstallationStore`] backs the CLI
//! and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// How requests to an installation are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// No credentials
    #[default]
    None,
    /// Static API key sent as a bearer token
    ApiKey,
    /// OAuth access token, refreshable with a refresh token
    Oauth,
}

/// Secret per-installation credential material.
///
/// `Debug` output redacts every secret.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveConfig {
    /// OAuth access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// OAuth refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When the access token was issued (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_retrieved_at: Option<i64>,
    /// Access token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Set when refresh failed and the user must re-authenticate
    #[serde(default)]
    pub needs_reauth: bool,
    /// Static API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl SensitiveConfig {
    /// Returns `true` when more than half of the access token's lifetime has
    /// elapsed at `now` (Unix seconds).
    ///
    /// Tokens without an issue time or lifetime are never considered
    /// half-expired.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcpbridge::mcp::auth::installation::SensitiveConfig;
    ///
    /// let config = SensitiveConfig {
    ///     token_retrieved_at: Some(1_000),
    ///     expires_in: Some(3_600),
    ///     ..Default::default()
    /// };
    /// assert!(!config.is_half_expired(2_800));
    /// assert!(config.is_half_expired(2_801));
    /// ```
    pub fn is_half_expired(&self, now: i64) -> bool {
        match (self.token_retrieved_at, self.expires_in) {
            (Some(retrieved), Some(expires_in)) if expires_in > 0 => {
                now > retrieved + expires_in / 2
            }
            _ => false,
        }
    }
}

fn redact(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "<redacted>"
    } else {
        "<none>"
    }
}

impl fmt::Debug for SensitiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensitiveConfig")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_retrieved_at", &self.token_retrieved_at)
            .field("expires_in", &self.expires_in)
            .field("needs_reauth", &self.needs_reauth)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

/// OAuth client registration used to refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientMetadata {
    /// Token endpoint of the authorization server
    pub token_endpoint: String,
    /// Registered client id
    pub client_id: String,
    /// Client secret, for confidential clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// A remote MCP server connected by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    /// Stable identifier
    pub id: String,
    /// Name shown to users
    #[serde(default)]
    pub display_name: String,
    /// MCP endpoint URL
    pub url: String,
    /// Authentication scheme
    #[serde(default)]
    pub auth_type: AuthType,
    /// Credentials
    #[serde(default)]
    pub sensitive_config: SensitiveConfig,
    /// OAuth client registration (OAuth installations only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthClientMetadata>,
}

impl Installation {
    /// Headers that authenticate a request to this installation.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcpbridge::mcp::auth::installation::{AuthType, Installation, SensitiveConfig};
    ///
    /// let installation = Installation {
    ///     id: "i1".into(),
    ///     display_name: "Docs".into(),
    ///     url: "https://mcp.example.com/mcp".into(),
    ///     auth_type: AuthType::ApiKey,
    ///     sensitive_config: SensitiveConfig {
    ///         api_key: Some("k-123".into()),
    ///         ..Default::default()
    ///     },
    ///     oauth: None,
    /// };
    /// let headers = installation.auth_headers();
    /// assert_eq!(headers["Authorization"], "Bearer k-123");
    /// ```
    pub fn auth_headers(&self) -> HashMap<String, String> {
        let token = match self.auth_type {
            AuthType::None => None,
            AuthType::ApiKey => self.sensitive_config.api_key.as_deref(),
            AuthType::Oauth => self.sensitive_config.access_token.as_deref(),
        };

        token
            .map(|t| HashMap::from([("Authorization".to_string(), format!("Bearer {t}"))]))
            .unwrap_or_default()
    }

    /// Returns `true` for OAuth installations that hold a non-empty refresh token.
    pub fn can_refresh(&self) -> bool {
        self.auth_type == AuthType::Oauth
            && self
                .sensitive_config
                .refresh_token
                .as_deref()
                .is_some_and(|t| !t.is_empty())
    }
}

/// Persistence for installations and their credentials.
#[async_trait]
pub trait InstallationStore: Send + Sync {
    /// All installations visible to `owner`.
    async fn installations(&self, owner: &str) -> Result<Vec<Installation>>;

    /// Replace the credentials of installation `id`.
    async fn update_sensitive_config(&self, id: &str, config: SensitiveConfig) -> Result<()>;

    /// Flag installation `id` as requiring the user to re-authenticate.
    async fn mark_needs_reauth(&self, id: &str) -> Result<()>;
}

/// Process-local [`InstallationStore`].
#[derive(Debug, Default)]
pub struct InMemoryInstallationStore {
    by_owner: RwLock<HashMap<String, Vec<Installation>>>,
}

impl InMemoryInstallationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `installations` for `owner`.
    pub fn with_installations(owner: &str, installations: Vec<Installation>) -> Self {
        let store = Self::new();
        store.insert(owner, installations);
        store
    }

    /// Add installations for `owner`.
    pub fn insert(&self, owner: &str, installations: Vec<Installation>) {
        let mut guard = self
            .by_owner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .entry(owner.to_string())
            .or_default()
            .extend(installations);
    }

    /// Look up an installation by id across all owners.
    pub fn get(&self, id: &str) -> Option<Installation> {
        let guard = self
            .by_owner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.values().flatten().find(|i| i.id == id).cloned()
    }

    fn update<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut SensitiveConfig),
    {
        let mut guard = self
            .by_owner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let installation = guard
            .values_mut()
            .flatten()
            .find(|i| i.id == id)
            .ok_or_else(|| BridgeError::Validation(format!("unknown installation: {id}")))?;
        apply(&mut installation.sensitive_config);
        Ok(())
    }
}

#[async_trait]
impl InstallationStore for InMemoryInstallationStore {
    async fn installations(&self, owner: &str) -> Result<Vec<Installation>> {
        let guard = self
            .by_owner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.get(owner).cloned().unwrap_or_default())
    }

    async fn update_sensitive_config(&self, id: &str, config: SensitiveConfig) -> Result<()> {
        self.update(id, |current| *current = config)
    }

    async fn mark_needs_reauth(&self, id: &str) -> Result<()> {
        self.update(id, |current| current.needs_reauth = true)
    }
}
