//! Outbound URL policy
//!
//! Every MCP server URL is checked before the bridge connects to it.
//! [`SsrfValidator`] rejects non-HTTP schemes and destinations on loopback,
//! private, link-local, and cloud-metadata addresses. It can optionally
//! resolve hostnames and check every address they resolve to.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use url::{Host, Url};

use crate::error::{BridgeError, Result};

/// Hostnames that always point at internal infrastructure.
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "metadata",
    "metadata.google.internal",
    "metadata.azure.internal",
    "instance-data",
];

/// Decides whether the bridge may connect to a URL.
#[async_trait]
pub trait UrlAllowChecker: Send + Sync {
    /// Returns `(allowed, reason)`; `reason` explains a rejection.
    async fn is_url_allowed(&self, url: &str) -> (bool, String);
}

/// SSRF (Server-Side Request Forgery) prevention validator
///
/// Prevents requests to private IP ranges and dangerous schemes.
///
/// # Examples
///
/// ```
/// use mcpbridge::security::SsrfValidator;
///
/// let validator = SsrfValidator::new();
/// assert!(validator.validate("https://mcp.example.com/mcp").is_ok());
/// assert!(validator.validate("http://169.254.169.254/latest/meta-data").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SsrfValidator {
    /// Whether to allow private IPs (local development and tests)
    allow_private_ips: bool,
    /// Whether to resolve hostnames and check the resulting addresses
    resolve_dns: bool,
}

impl SsrfValidator {
    /// Create a validator that blocks private destinations without DNS
    /// lookups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator that allows private IPs (local development only)
    pub fn allow_private_ips() -> Self {
        Self {
            allow_private_ips: true,
            resolve_dns: false,
        }
    }

    /// Also resolve hostnames and reject those pointing at blocked addresses.
    pub fn with_dns_resolution(mut self) -> Self {
        self.resolve_dns = true;
        self
    }

    /// Validate a URL without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Security`] if the URL is unparsable, uses a
    /// scheme other than http/https, or names a blocked host.
    pub fn validate(&self, url: &str) -> Result<()> {
        let parsed =
            Url::parse(url).map_err(|e| BridgeError::Security(format!("Invalid URL: {e}")))?;

        self.validate_scheme(parsed.scheme())?;

        match parsed.host() {
            Some(Host::Domain(domain)) => self.validate_domain(domain),
            Some(Host::Ipv4(v4)) => self.validate_ip(IpAddr::V4(v4)),
            Some(Host::Ipv6(v6)) => self.validate_ip(IpAddr::V6(v6)),
            None => Err(BridgeError::Security("URL has no host".to_string()).into()),
        }
    }

    /// Validate a URL, resolving its hostname when DNS checks are enabled.
    ///
    /// A hostname that fails to resolve is not rejected here; the connection
    /// attempt will fail on its own.
    ///
    /// # Errors
    ///
    /// As [`SsrfValidator::validate`], plus [`BridgeError::Security`] when any
    /// resolved address is blocked.
    pub async fn validate_resolved(&self, url: &str) -> Result<()> {
        self.validate(url)?;
        if !self.resolve_dns || self.allow_private_ips {
            return Ok(());
        }

        let parsed =
            Url::parse(url).map_err(|e| BridgeError::Security(format!("Invalid URL: {e}")))?;
        let Some(Host::Domain(domain)) = parsed.host() else {
            return Ok(());
        };
        let port = parsed.port_or_known_default().unwrap_or(443);

        let result = match tokio::net::lookup_host((domain, port)).await {
            Ok(addrs) => {
                let ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
                self.validate_resolved_ips(domain, &ips)
            }
            Err(e) => {
                tracing::debug!("DNS lookup for {domain} failed: {e}");
                Ok(())
            }
        };
        result
    }

    fn validate_resolved_ips(&self, domain: &str, ips: &[IpAddr]) -> Result<()> {
        for ip in ips {
            self.validate_ip(*ip).map_err(|e| {
                BridgeError::Security(format!("{domain} resolves to a blocked address: {e}"))
            })?;
        }
        Ok(())
    }

    fn validate_scheme(&self, scheme: &str) -> Result<()> {
        match scheme {
            "http" | "https" => Ok(()),
            "file" | "ftp" => Err(BridgeError::Security(format!(
                "{scheme}:// URLs are not allowed for security reasons"
            ))
            .into()),
            _ => Err(BridgeError::Security(format!("Unsupported URL scheme: {scheme}")).into()),
        }
    }

    fn validate_domain(&self, domain: &str) -> Result<()> {
        if self.allow_private_ips {
            return Ok(());
        }

        let host = domain.trim_end_matches('.').to_ascii_lowercase();
        if BLOCKED_HOSTNAMES.contains(&host.as_str()) || host.ends_with(".localhost") {
            return Err(
                BridgeError::Security(format!("Requests to {host} are not allowed")).into(),
            );
        }
        Ok(())
    }

    fn validate_ip(&self, ip: IpAddr) -> Result<()> {
        if self.allow_private_ips {
            return Ok(());
        }

        let reason = match ip {
            IpAddr::V4(v4) => blocked_v4_reason(v4),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => blocked_v4_reason(v4),
                None => blocked_v6_reason(v6),
            },
        };

        match reason {
            Some(reason) => {
                Err(BridgeError::Security(format!("Requests to {reason} are not allowed")).into())
            }
            None => Ok(()),
        }
    }
}

fn blocked_v4_reason(v4: Ipv4Addr) -> Option<&'static str> {
    let o = v4.octets();
    if o[0] == 127 {
        Some("loopback addresses")
    } else if o[0] == 10 || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
    {
        Some("private IP ranges")
    } else if o[0] == 169 && o[1] == 254 {
        // Includes 169.254.169.254, the cloud metadata endpoint.
        Some("link-local addresses")
    } else if o[0] == 0 {
        Some("this network")
    } else if v4 == Ipv4Addr::BROADCAST {
        Some("broadcast address")
    } else {
        None
    }
}

fn blocked_v6_reason(v6: Ipv6Addr) -> Option<&'static str> {
    let first = v6.segments()[0];
    if v6.is_loopback() {
        Some("loopback addresses")
    } else if v6.is_unspecified() {
        Some("this network")
    } else if (first & 0xfe00) == 0xfc00 {
        // fc00::/7, which also covers the fd00:ec2::254 metadata endpoint.
        Some("private IP ranges")
    } else if (first & 0xffc0) == 0xfe80 {
        Some("link-local addresses")
    } else {
        None
    }
}

#[async_trait]
impl UrlAllowChecker for SsrfValidator {
    async fn is_url_allowed(&self, url: &str) -> (bool, String) {
        match self.validate_resolved(url).await {
            Ok(()) => (true, String::new()),
            Err(e) => (false, e.to_string()),
        }
    }
}
