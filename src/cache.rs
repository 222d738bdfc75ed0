//! TTL-bounded cache in front of the embedding and search paths.
//!
//! Two logical caches share one backend:
//! - the **embedding cache** maps normalized query text to its embedding
//!   vector (`embed:` keys, 24h TTL by default),
//! - the **match cache** maps a hash of a query vector to its ranked
//!   matches (`match:` keys, 1h TTL by default).
//!
//! The backend is chosen once at construction: a shared Redis-over-REST
//! service when `[cache].shared_url` is configured and reachable, else
//! an in-process map. Callers must not assume which backend is active;
//! shared-service errors degrade to cache misses and never interrupt
//! the request path.
//!
//! Eviction is purely TTL-driven — no capacity bound, no LRU. A read
//! after an entry's expiry is absent regardless of whether the entry
//! was physically evicted; [`CacheLayer::sweep_expired`] does the
//! physical eviction for the in-process map.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::models::SearchMatch;
use crate::query::normalize_query;
use crate::similarity::vec_to_blob;

struct MemoryEntry {
    value: Value,
    expires_at: Instant,
}

/// Client for a shared Redis-compatible REST cache service.
///
/// Speaks the single-command POST protocol: the command as a JSON array
/// in the body, a bearer token, and a `{"result": ...}` response.
struct SharedCache {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl SharedCache {
    async fn command(&self, cmd: &[&str]) -> Result<Value> {
        let resp = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&cmd)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("cache command failed: {} {}", status, text);
        }

        let mut body: Value = resp.json().await?;
        Ok(body
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let result = self.command(&["KEYS", pattern]).await?;
        Ok(result
            .as_array()
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| k.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

enum CacheBackend {
    Shared(SharedCache),
    Memory(Mutex<HashMap<String, MemoryEntry>>),
}

/// Cache statistics for the `stats` command.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub embedding_keys: usize,
    pub match_keys: usize,
}

/// TTL cache over computed embeddings and search results.
pub struct CacheLayer {
    backend: CacheBackend,
    enabled: bool,
    embedding_ttl: Duration,
    match_ttl: Duration,
}

impl CacheLayer {
    /// Choose a backend and build the cache.
    ///
    /// Tries the shared service when one is configured (a `PING` probes
    /// reachability); any failure falls back to the in-process map,
    /// mirroring how the rest of the cache API degrades.
    pub async fn connect(config: &CacheConfig) -> Self {
        let backend = match (&config.shared_url, config.enabled) {
            (Some(url), true) => {
                let shared = SharedCache {
                    client: reqwest::Client::new(),
                    base_url: url.trim_end_matches('/').to_string(),
                    token: config.shared_token.clone().unwrap_or_default(),
                };
                match shared.command(&["PING"]).await {
                    Ok(_) => {
                        info!(url = %url, "connected to shared cache service");
                        CacheBackend::Shared(shared)
                    }
                    Err(e) => {
                        warn!("shared cache unreachable ({}); using in-process map", e);
                        CacheBackend::Memory(Mutex::new(HashMap::new()))
                    }
                }
            }
            _ => CacheBackend::Memory(Mutex::new(HashMap::new())),
        };

        Self {
            backend,
            enabled: config.enabled,
            embedding_ttl: Duration::from_secs(config.embedding_ttl_secs),
            match_ttl: Duration::from_secs(config.match_ttl_secs),
        }
    }

    fn embedding_key(text: &str) -> String {
        format!("embed:{}", normalize_query(text))
    }

    fn match_key(query: &[f32]) -> String {
        format!("match:{}", crate::models::content_hash_bytes(&vec_to_blob(query)))
    }

    async fn get_value(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        match &self.backend {
            CacheBackend::Shared(shared) => match shared.command(&["GET", key]).await {
                Ok(Value::String(raw)) => serde_json::from_str(&raw).ok(),
                Ok(_) => None,
                Err(e) => {
                    warn!("cache get failed: {}", e);
                    None
                }
            },
            CacheBackend::Memory(map) => {
                let map = map.lock().unwrap();
                let entry = map.get(key)?;
                // Expired entries are absent even before the sweep
                // physically evicts them.
                if entry.expires_at <= Instant::now() {
                    return None;
                }
                Some(entry.value.clone())
            }
        }
    }

    async fn set_value(&self, key: &str, value: Value, ttl: Duration) {
        if !self.enabled {
            return;
        }
        match &self.backend {
            CacheBackend::Shared(shared) => {
                let raw = match serde_json::to_string(&value) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("cache encode failed: {}", e);
                        return;
                    }
                };
                let ttl_secs = ttl.as_secs().max(1).to_string();
                if let Err(e) = shared.command(&["SET", key, &raw, "EX", &ttl_secs]).await {
                    warn!("cache set failed: {}", e);
                }
            }
            CacheBackend::Memory(map) => {
                map.lock().unwrap().insert(
                    key.to_string(),
                    MemoryEntry {
                        value,
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
        }
    }

    /// Cached embedding for a query text, if present and unexpired.
    pub async fn get_embedding(&self, text: &str) -> Option<Vec<f32>> {
        let value = self.get_value(&Self::embedding_key(text)).await?;
        serde_json::from_value(value).ok()
    }

    /// Cache an embedding under the normalized query text.
    pub async fn set_embedding(&self, text: &str, embedding: &[f32]) {
        match serde_json::to_value(embedding) {
            Ok(value) => {
                self.set_value(&Self::embedding_key(text), value, self.embedding_ttl)
                    .await;
                debug!(chars = text.len(), "cached embedding");
            }
            Err(e) => warn!("embedding encode failed: {}", e),
        }
    }

    /// Cached matches for a query vector, if present and unexpired.
    pub async fn get_matches(&self, query: &[f32]) -> Option<Vec<SearchMatch>> {
        let value = self.get_value(&Self::match_key(query)).await?;
        serde_json::from_value(value).ok()
    }

    /// Cache the ranked matches for a query vector.
    pub async fn set_matches(&self, query: &[f32], matches: &[SearchMatch]) {
        match serde_json::to_value(matches) {
            Ok(value) => {
                self.set_value(&Self::match_key(query), value, self.match_ttl)
                    .await;
                debug!(matches = matches.len(), "cached search matches");
            }
            Err(e) => warn!("match encode failed: {}", e),
        }
    }

    /// Drop every cache entry (both key spaces).
    pub async fn clear(&self) {
        match &self.backend {
            CacheBackend::Shared(shared) => {
                for pattern in ["embed:*", "match:*"] {
                    let keys = match shared.keys(pattern).await {
                        Ok(keys) => keys,
                        Err(e) => {
                            warn!("cache clear failed: {}", e);
                            continue;
                        }
                    };
                    for key in keys {
                        if let Err(e) = shared.command(&["DEL", &key]).await {
                            warn!("cache delete failed: {}", e);
                        }
                    }
                }
            }
            CacheBackend::Memory(map) => map.lock().unwrap().clear(),
        }
    }

    /// Key counts per cache, by backend.
    pub async fn stats(&self) -> CacheStats {
        match &self.backend {
            CacheBackend::Shared(shared) => CacheStats {
                backend: "shared",
                embedding_keys: shared.keys("embed:*").await.map(|k| k.len()).unwrap_or(0),
                match_keys: shared.keys("match:*").await.map(|k| k.len()).unwrap_or(0),
            },
            CacheBackend::Memory(map) => {
                let map = map.lock().unwrap();
                CacheStats {
                    backend: "memory",
                    embedding_keys: map.keys().filter(|k| k.starts_with("embed:")).count(),
                    match_keys: map.keys().filter(|k| k.starts_with("match:")).count(),
                }
            }
        }
    }

    /// Physically evict expired entries from the in-process map.
    ///
    /// The shared service expires keys server-side; this only matters
    /// for the memory backend, where reads already treat expired entries
    /// as absent. Returns the number of evicted entries.
    pub fn sweep_expired(&self) -> usize {
        match &self.backend {
            CacheBackend::Shared(_) => 0,
            CacheBackend::Memory(map) => {
                let mut map = map.lock().unwrap();
                let before = map.len();
                let now = Instant::now();
                map.retain(|_, entry| entry.expires_at > now);
                before - map.len()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn memory_cache(embedding_ttl_secs: u64, match_ttl_secs: u64) -> CacheLayer {
        CacheLayer {
            backend: CacheBackend::Memory(Mutex::new(HashMap::new())),
            enabled: true,
            embedding_ttl: Duration::from_secs(embedding_ttl_secs),
            match_ttl: Duration::from_secs(match_ttl_secs),
        }
    }

    #[tokio::test]
    async fn test_embedding_set_then_get() {
        let cache = memory_cache(60, 60);
        let v = vec![0.1f32, 0.2, 0.3];
        cache.set_embedding("What is a lease?", &v).await;
        assert_eq!(cache.get_embedding("What is a lease?").await, Some(v));
    }

    #[tokio::test]
    async fn test_embedding_key_normalizes_text() {
        let cache = memory_cache(60, 60);
        let v = vec![1.0f32];
        cache.set_embedding("  What is a LEASE? ", &v).await;
        assert_eq!(cache.get_embedding("what is a lease?").await, Some(v));
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let cache = memory_cache(60, 60);
        assert!(cache.get_embedding("nothing here").await.is_none());
        assert!(cache.get_matches(&[1.0, 2.0]).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_read_is_absent_before_sweep() {
        let cache = memory_cache(60, 60);
        cache.set_embedding("q", &[1.0]).await;

        // Force expiry without waiting.
        if let CacheBackend::Memory(map) = &cache.backend {
            for entry in map.lock().unwrap().values_mut() {
                entry.expires_at = Instant::now() - Duration::from_secs(1);
            }
        }

        assert!(cache.get_embedding("q").await.is_none());
        // The entry was still physically present until the sweep.
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.stats().await.embedding_keys, 0);
    }

    #[tokio::test]
    async fn test_match_cache_roundtrip_and_clear() {
        let cache = memory_cache(60, 60);
        let query = vec![0.5f32, -0.5];
        let matches = vec![SearchMatch {
            id: "r1".to_string(),
            content: "chunk".to_string(),
            source_file: "a.pdf".to_string(),
            similarity: 0.93,
            metadata: Map::new(),
        }];

        cache.set_matches(&query, &matches).await;
        let cached = cache.get_matches(&query).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, "r1");
        // A different query vector is a different key.
        assert!(cache.get_matches(&[0.5, 0.5]).await.is_none());

        cache.clear().await;
        assert!(cache.get_matches(&query).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let mut cache = memory_cache(60, 60);
        cache.enabled = false;
        cache.set_embedding("q", &[1.0]).await;
        assert!(cache.get_embedding("q").await.is_none());
    }

    #[tokio::test]
    async fn test_stats_counts_key_spaces() {
        let cache = memory_cache(60, 60);
        cache.set_embedding("a", &[1.0]).await;
        cache.set_embedding("b", &[2.0]).await;
        cache.set_matches(&[1.0], &[]).await;

        let stats = cache.stats().await;
        assert_eq!(stats.backend, "memory");
        assert_eq!(stats.embedding_keys, 2);
        assert_eq!(stats.match_keys, 1);
    }
}
