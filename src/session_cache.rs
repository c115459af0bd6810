//! Shared MCP session cache
//!
//! MCP servers that issue an `Mcp-Session-Id` let a later call skip the
//! `initialize` handshake by presenting the same id. Session ids are cached
//! per conversation and server under [`session_cache_key`], bounded by a
//! TTL ([`SESSION_CACHE_TTL`] by default).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;

/// Default lifetime of a cached session id.
pub const SESSION_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Cache key for the session of `conversation_id` with `server_url`.
///
/// # Examples
///
/// ```
/// use mcpbridge::session_cache::session_cache_key;
///
/// assert_eq!(
///     session_cache_key("conv-1", "https://mcp.example.com/mcp"),
///     "mcp_session:conv-1:https://mcp.example.com/mcp"
/// );
/// ```
pub fn session_cache_key(conversation_id: &str, server_url: &str) -> String {
    format!("mcp_session:{conversation_id}:{server_url}")
}

/// Key/value store for session ids, shared across tool invocations.
///
/// Writers race with last-writer-wins semantics.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Value stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove `key`.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local [`SessionCache`]; expired entries are evicted on read.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mcpbridge::session_cache::{InMemorySessionCache, SessionCache};
///
/// # tokio_test::block_on(async {
/// let cache = InMemorySessionCache::new();
/// cache.set("k", "sess-1", Duration::from_secs(60)).await.unwrap();
/// assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("sess-1"));
///
/// cache.delete("k").await.unwrap();
/// assert!(cache.get("k").await.unwrap().is_none());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemorySessionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InMemorySessionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including any not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.lock().insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}
