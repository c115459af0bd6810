//! Configuration management for mcpbridge
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::mcp::auth::installation::Installation;
use crate::mcp::types::CLIENT_VERSION;

/// Main configuration structure for mcpbridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// MCP client identity and timeouts
    #[serde(default)]
    pub client: ClientConfig,
    /// Shared session cache settings
    #[serde(default)]
    pub session_cache: SessionCacheConfig,
    /// Outbound URL policy
    #[serde(default)]
    pub security: SecurityConfig,
    /// Installed MCP servers available to the CLI
    #[serde(default)]
    pub installations: Vec<Installation>,
}

/// MCP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// `clientInfo.name` sent in `initialize`
    #[serde(default = "default_client_name")]
    pub name: String,

    /// `clientInfo.version` sent in `initialize`
    #[serde(default = "default_client_version")]
    pub version: String,

    /// Timeout for each HTTP POST
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// How long an SSE-transport request waits for its response event
    #[serde(default = "default_sse_response_timeout")]
    pub sse_response_timeout_seconds: u64,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_client_name() -> String {
    "mcpbridge".to_string()
}

fn default_client_version() -> String {
    CLIENT_VERSION.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_sse_response_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            request_timeout_seconds: default_request_timeout(),
            sse_response_timeout_seconds: default_sse_response_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

/// Session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCacheConfig {
    /// Lifetime of cached session ids
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
}

fn default_session_ttl() -> u64 {
    3600
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
        }
    }
}

/// Outbound URL policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Allow loopback and private destinations (local development only)
    #[serde(default)]
    pub allow_private_ips: bool,

    /// Resolve hostnames and reject those pointing at blocked addresses
    #[serde(default = "default_resolve_dns")]
    pub resolve_dns: bool,
}

fn default_resolve_dns() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_private_ips: false,
            resolve_dns: default_resolve_dns(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and CLI
    ///
    /// A missing file yields defaults.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - Parsed command line, for overrides
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(name) = std::env::var("MCPBRIDGE_CLIENT_NAME") {
            self.client.name = name;
        }

        if let Ok(timeout) = std::env::var("MCPBRIDGE_REQUEST_TIMEOUT_SECS") {
            if let Ok(value) = timeout.parse() {
                self.client.request_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid MCPBRIDGE_REQUEST_TIMEOUT_SECS: {}", timeout);
            }
        }

        if let Ok(timeout) = std::env::var("MCPBRIDGE_SSE_RESPONSE_TIMEOUT_SECS") {
            if let Ok(value) = timeout.parse() {
                self.client.sse_response_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid MCPBRIDGE_SSE_RESPONSE_TIMEOUT_SECS: {}", timeout);
            }
        }

        if let Ok(ttl) = std::env::var("MCPBRIDGE_SESSION_TTL_SECS") {
            if let Ok(value) = ttl.parse() {
                self.session_cache.ttl_seconds = value;
            } else {
                tracing::warn!("Invalid MCPBRIDGE_SESSION_TTL_SECS: {}", ttl);
            }
        }

        if let Ok(allow) = std::env::var("MCPBRIDGE_ALLOW_PRIVATE_IPS") {
            match allow.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.security.allow_private_ips = true,
                "0" | "false" | "no" => self.security.allow_private_ips = false,
                _ => tracing::warn!("Invalid MCPBRIDGE_ALLOW_PRIVATE_IPS: {}", allow),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if cli.allow_private_ips {
            tracing::warn!("Private and loopback MCP server URLs are allowed");
            self.security.allow_private_ips = true;
        }

        if let Some(timeout) = cli.request_timeout {
            self.client.request_timeout_seconds = timeout;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if any timeout is zero, the client
    /// name is empty, or an installation is malformed or duplicated.
    pub fn validate(&self) -> Result<()> {
        if self.client.name.trim().is_empty() {
            return Err(BridgeError::Config("client.name cannot be empty".to_string()).into());
        }

        if self.client.request_timeout_seconds == 0 {
            return Err(BridgeError::Config(
                "client.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.sse_response_timeout_seconds == 0 {
            return Err(BridgeError::Config(
                "client.sse_response_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.connect_timeout_seconds == 0 {
            return Err(BridgeError::Config(
                "client.connect_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session_cache.ttl_seconds == 0 {
            return Err(BridgeError::Config(
                "session_cache.ttl_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        let mut seen = std::collections::HashSet::new();
        for installation in &self.installations {
            if installation.id.is_empty() {
                return Err(
                    BridgeError::Config("installation id cannot be empty".to_string()).into(),
                );
            }
            url::Url::parse(&installation.url).map_err(|e| {
                BridgeError::Config(format!(
                    "installation '{}' has an invalid url '{}': {}",
                    installation.id, installation.url, e
                ))
            })?;
            if !seen.insert(installation.url.as_str()) {
                return Err(BridgeError::Config(format!(
                    "duplicate installation url: {}",
                    installation.url
                ))
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.client.name, "mcpbridge");
        assert_eq!(config.client.version, "1.0.0");
        assert_eq!(config.client.request_timeout_seconds, 30);
        assert_eq!(config.client.sse_response_timeout_seconds, 30);
        assert_eq!(config.session_cache.ttl_seconds, 3600);
        assert!(!config.security.allow_private_ips);
        assert!(config.installations.is_empty());
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.client.request_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_ttl() {
        let mut config = Config::default();
        config.session_cache.ttl_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_duplicate_urls() {
        let yaml = r#"
installations:
  - id: a
    url: https://mcp.example.com/mcp
  - id: b
    url: https://mcp.example.com/mcp
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate installation url"));
    }

    #[test]
    fn test_config_validation_rejects_bad_url() {
        let yaml = r#"
installations:
  - id: a
    url: "not a url"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
client:
  name: my-agent
security:
  allow_private_ips: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.client.name, "my-agent");
        assert_eq!(config.client.request_timeout_seconds, 30);
        assert!(config.security.allow_private_ips);
        assert!(config.security.resolve_dns);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("MCPBRIDGE_CLIENT_NAME", "env-agent");
        std::env::set_var("MCPBRIDGE_REQUEST_TIMEOUT_SECS", "12");
        std::env::set_var("MCPBRIDGE_SESSION_TTL_SECS", "not-a-number");
        std::env::set_var("MCPBRIDGE_ALLOW_PRIVATE_IPS", "true");

        let mut config = Config::default();
        config.apply_env_vars();

        std::env::remove_var("MCPBRIDGE_CLIENT_NAME");
        std::env::remove_var("MCPBRIDGE_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("MCPBRIDGE_SESSION_TTL_SECS");
        std::env::remove_var("MCPBRIDGE_ALLOW_PRIVATE_IPS");

        assert_eq!(config.client.name, "env-agent");
        assert_eq!(config.client.request_timeout_seconds, 12);
        assert_eq!(config.session_cache.ttl_seconds, 3600);
        assert!(config.security.allow_private_ips);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let cli = crate::cli::Cli::default();
        let config = Config::load("/nonexistent/mcpbridge.yaml", &cli).unwrap();
        assert_eq!(config.client.name, "mcpbridge");
    }

    #[test]
    #[serial]
    fn test_load_from_file_with_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "client:\n  request_timeout_seconds: 45\ninstallations:\n  - id: docs\n    url: https://docs.example.com/mcp\n",
        )
        .unwrap();

        let mut cli = crate::cli::Cli::default();
        cli.allow_private_ips = true;
        let config = Config::load(path.to_str().unwrap(), &cli).unwrap();

        assert_eq!(config.client.request_timeout_seconds, 45);
        assert_eq!(config.installations.len(), 1);
        assert!(config.security.allow_private_ips);
    }

    #[test]
    #[serial]
    fn test_load_invalid_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "client: [not, a, map").unwrap();

        let err = Config::load(path.to_str().unwrap(), &crate::cli::Cli::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::Config(_))
        ));
    }
}
