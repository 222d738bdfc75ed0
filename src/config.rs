//! TOML configuration parsing and validation.
//!
//! The backend is selected at construction time from `[storage].backend`:
//! `"local"` (file-backed), `"remote"` (hosted), or `"sync"` (local
//! authoritative + remote mirror). A remote backend requires the
//! `[remote]` section; the sync backend degrades to local-only when the
//! remote section is missing, with a warning.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `"local"`, `"remote"`, or `"sync"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Directory for the local store's persisted artifacts.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_storage_path() -> PathBuf {
    PathBuf::from("data/embeddings")
}

/// Credentials for the hosted backend.
///
/// Both fields are required: constructing a remote store without them
/// fails immediately at startup (a configuration error, deliberately
/// distinguished from runtime failures).
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL of the shared cache service. When unset or unreachable,
    /// an in-process map is used instead.
    #[serde(default)]
    pub shared_url: Option<String>,
    #[serde(default)]
    pub shared_token: Option<String>,
    #[serde(default = "default_embedding_ttl")]
    pub embedding_ttl_secs: u64,
    #[serde(default = "default_match_ttl")]
    pub match_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shared_url: None,
            shared_token: None,
            embedding_ttl_secs: default_embedding_ttl(),
            match_ttl_secs: default_match_ttl(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_embedding_ttl() -> u64 {
    24 * 60 * 60
}
fn default_match_ttl() -> u64 {
    60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_mirror_sync_interval")]
    pub mirror_sync_interval_secs: u64,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_cache_sweep_interval")]
    pub cache_sweep_interval_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mirror_sync_interval_secs: default_mirror_sync_interval(),
            scan_interval_secs: default_scan_interval(),
            cache_sweep_interval_secs: default_cache_sweep_interval(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_mirror_sync_interval() -> u64 {
    30
}
fn default_scan_interval() -> u64 {
    60
}
fn default_cache_sweep_interval() -> u64 {
    300
}
fn default_shutdown_grace() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    /// Directory scanned for chunk-batch JSON files dropped by the
    /// external ingestion collaborator. Scanning is disabled when unset.
    #[serde(default)]
    pub scan_dir: Option<PathBuf>,
}

impl Config {
    /// Minimal local-only configuration, used by tooling and tests.
    pub fn minimal() -> Self {
        Self {
            storage: StorageConfig {
                backend: "local".to_string(),
                path: default_storage_path(),
            },
            remote: None,
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            ingest: IngestConfig::default(),
        }
    }

    pub fn is_sync_backend(&self) -> bool {
        self.storage.backend == "sync"
    }

    pub fn has_remote_config(&self) -> bool {
        self.remote
            .as_ref()
            .map(|r| !r.url.is_empty() && !r.api_key.is_empty())
            .unwrap_or(false)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.storage.backend.as_str() {
        "local" | "remote" | "sync" => {}
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be local, remote, or sync.",
            other
        ),
    }

    if config.storage.backend == "remote" && !config.has_remote_config() {
        anyhow::bail!("storage.backend = \"remote\" requires [remote] url and api_key");
    }

    if config.storage.backend == "sync" && !config.has_remote_config() {
        warn!("sync backend configured without [remote] credentials; running local-only");
    }

    if config.cache.embedding_ttl_secs == 0 || config.cache.match_ttl_secs == 0 {
        anyhow::bail!("cache TTLs must be > 0");
    }

    if config.scheduler.mirror_sync_interval_secs == 0
        || config.scheduler.scan_interval_secs == 0
        || config.scheduler.cache_sweep_interval_secs == 0
    {
        anyhow::bail!("scheduler intervals must be > 0");
    }

    Ok(config)
}
