//! Storage abstraction for the embedding record store.
//!
//! The [`VectorStore`] trait defines the four-operation contract shared
//! by every backend, enabling pluggable storage selected at
//! construction time:
//!
//! | Backend | Module | Role |
//! |---------|--------|------|
//! | [`LocalVectorStore`](local::LocalVectorStore) | [`local`] | file-backed, authoritative |
//! | [`RemoteVectorStore`](remote::RemoteVectorStore) | [`remote`] | hosted mirror with the same contract |
//! | [`SyncVectorStore`](sync::SyncVectorStore) | [`sync`] | dual-write composite with a retry queue |
//!
//! Per the error-handling contract, trait operations report failure
//! through their return values (a success boolean or an empty result
//! set) and log the cause; callers check return values, not errors.
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod local;
pub mod remote;
pub mod sync;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::models::{BatchMetadata, ChunkPayload, SearchMatch, StoreStats};

use local::LocalVectorStore;
use remote::RemoteVectorStore;
use sync::SyncVectorStore;

/// Abstract storage backend for embedding records.
///
/// All operations are async (via `async-trait`); the local backend
/// returns immediately-ready futures.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store a batch of vectors and their chunks under
    /// `metadata.source_file`.
    ///
    /// A prior batch for the same source file is removed first (an
    /// implicit per-file clear). Returns `true` on success.
    async fn store(
        &self,
        vectors: &[Vec<f32>],
        chunks: &[ChunkPayload],
        metadata: &BatchMetadata,
    ) -> bool;

    /// Rank all stored vectors against `query` by cosine similarity.
    ///
    /// Matches below `threshold` are excluded; the result is sorted by
    /// similarity descending and truncated to `top_k`. Failures yield an
    /// empty result.
    async fn search(&self, query: &[f32], top_k: usize, threshold: f32) -> Vec<SearchMatch>;

    /// Remove the batch for `source_file`, or everything when `None`.
    ///
    /// Idempotent: clearing an absent file returns `true` without side
    /// effects.
    async fn clear(&self, source_file: Option<&str>) -> bool;

    /// Whether a batch exists for `source_file`.
    async fn exists(&self, source_file: &str) -> bool;

    /// Statistics snapshot for this backend.
    async fn stats(&self) -> StoreStats;
}

/// The backend selected from configuration.
///
/// Keeps the concrete types reachable: the reconciliation job needs the
/// sync store's queue operations, which are not part of the
/// [`VectorStore`] contract.
pub enum Backend {
    Local(Arc<LocalVectorStore>),
    Remote(Arc<RemoteVectorStore>),
    Sync(Arc<SyncVectorStore>),
}

impl Backend {
    /// The backend as a shared trait object.
    pub fn as_store(&self) -> Arc<dyn VectorStore> {
        match self {
            Backend::Local(s) => s.clone(),
            Backend::Remote(s) => s.clone(),
            Backend::Sync(s) => s.clone(),
        }
    }

    /// The composite store, when the sync backend is active.
    pub fn as_sync(&self) -> Option<&Arc<SyncVectorStore>> {
        match self {
            Backend::Sync(s) => Some(s),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::Remote(_) => "remote",
            Backend::Sync(_) => "sync",
        }
    }
}

/// Construct the backend selected by `[storage].backend`.
///
/// Store and embedding-model handles are process-wide singletons:
/// construct the backend once at startup and share it by reference.
///
/// # Errors
///
/// Fails when the local artifacts cannot be loaded, or when a remote
/// backend is requested without credentials (the one fail-fast case).
/// A sync backend whose remote credentials are missing degrades to
/// local-only with a warning instead.
pub fn create_store(config: &Config) -> Result<Backend> {
    match config.storage.backend.as_str() {
        "local" => {
            let store = LocalVectorStore::open(&config.storage.path)?;
            Ok(Backend::Local(Arc::new(store)))
        }
        "remote" => {
            let remote = config
                .remote
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[remote] section required for remote backend"))?;
            let store = RemoteVectorStore::new(remote)?;
            Ok(Backend::Remote(Arc::new(store)))
        }
        "sync" => {
            let mirror: Option<Arc<dyn VectorStore>> = match config.remote.as_ref() {
                Some(remote) if config.has_remote_config() => {
                    Some(Arc::new(RemoteVectorStore::new(remote)?))
                }
                _ => {
                    tracing::warn!("sync backend has no remote mirror; writes stay local-only");
                    None
                }
            };
            let local = match LocalVectorStore::open(&config.storage.path) {
                Ok(local) => Some(Arc::new(local)),
                Err(e) if mirror.is_some() => {
                    // Degraded mode: reads come from the mirror, writes
                    // are refused until the local store is repaired.
                    tracing::warn!("local store unavailable ({:#}); reads served by mirror only", e);
                    None
                }
                Err(e) => return Err(e),
            };
            Ok(Backend::Sync(Arc::new(SyncVectorStore::with_fallback(
                local, mirror,
            ))))
        }
        other => anyhow::bail!("Unknown storage backend: {}", other),
    }
}
