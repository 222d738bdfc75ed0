//! File-backed [`VectorStore`] implementation.
//!
//! Three artifacts live in the storage directory and are rewritten
//! together on every successful mutation:
//!
//! | File | Contents |
//! |------|----------|
//! | `embeddings.bin` | all vectors in array order, little-endian f32 |
//! | `chunks.json` | array of [`ChunkRecord`] |
//! | `index.json` | vector dimensionality + per-file index ranges |
//!
//! Persisting stages every artifact to a temp file before renaming any
//! of them, so a failed write leaves the previous on-disk set intact.
//! Mutations are atomic with respect to readers too: the in-memory
//! state is snapshotted before the change and restored if persisting
//! fails, so a read never observes state that was not durably written.
//!
//! The trait methods run their work on tokio's bounded blocking pool:
//! full-array ranking and artifact I/O would otherwise stall every task
//! sharing the runtime thread. Mutations still serialize behind the
//! write lock inside the blocking task; the range re-indexing in
//! `remove_file_locked` would corrupt index bounds under interleaving.
//! Searches take the read lock and run concurrently with each other.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::{
    record_id, BatchMetadata, ChunkPayload, ChunkRecord, FileIndexEntry, SearchMatch, StoreStats,
};
use crate::similarity::{blob_to_vec, rank, vec_to_blob};

use super::VectorStore;

const EMBEDDINGS_FILE: &str = "embeddings.bin";
const CHUNKS_FILE: &str = "chunks.json";
const INDEX_FILE: &str = "index.json";

/// Serialized form of `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct IndexFile {
    /// Vector dimensionality; 0 until the first batch is stored.
    dims: usize,
    files: BTreeMap<String, FileIndexEntry>,
}

#[derive(Debug, Clone, Default)]
struct LocalState {
    dims: usize,
    embeddings: Vec<Vec<f32>>,
    chunks: Vec<ChunkRecord>,
    index: BTreeMap<String, FileIndexEntry>,
}

/// Directory plus guarded state, shared with blocking-pool tasks.
struct Inner {
    dir: PathBuf,
    state: RwLock<LocalState>,
}

/// File-backed persistent store of vectors, chunks, and per-file index
/// ranges. The authoritative side of the dual-write composite.
pub struct LocalVectorStore {
    inner: Arc<Inner>,
}

impl LocalVectorStore {
    /// Open (or create) a store at `dir`, loading any existing artifacts.
    ///
    /// Unreadable artifacts are logged and treated as empty rather than
    /// failing construction; the next successful mutation rewrites them.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create storage dir: {}", dir.display()))?;

        let state = Inner::load(dir);
        debug!(
            records = state.embeddings.len(),
            files = state.index.len(),
            dir = %dir.display(),
            "opened local vector store"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                dir: dir.to_path_buf(),
                state: RwLock::new(state),
            }),
        })
    }

    /// Re-read one file's batch for mirroring.
    ///
    /// Used by the composite store's reconciliation: returns the
    /// vectors, payloads, and batch metadata exactly as `store` would
    /// accept them, or `None` when the file is no longer indexed.
    pub fn file_batch(
        &self,
        source_file: &str,
    ) -> Option<(Vec<Vec<f32>>, Vec<ChunkPayload>, BatchMetadata)> {
        let state = self.inner.state.read().unwrap();
        let entry = state.index.get(source_file)?;

        let vectors: Vec<Vec<f32>> = state.embeddings[entry.start_idx..=entry.end_idx].to_vec();
        let chunks: Vec<ChunkPayload> = state
            .chunks
            .iter()
            .filter(|c| c.source_file == source_file)
            .map(|c| ChunkPayload {
                id: Some(c.id.clone()),
                content: c.content.clone(),
                metadata: c.metadata.clone(),
            })
            .collect();
        let metadata = BatchMetadata {
            source_file: source_file.to_string(),
            extra: entry.extra.clone(),
        };

        Some((vectors, chunks, metadata))
    }
}

impl Inner {
    fn load(dir: &Path) -> LocalState {
        let index: IndexFile = match fs::read(dir.join(INDEX_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("could not parse {}: {}", INDEX_FILE, e);
                IndexFile::default()
            }),
            Err(_) => IndexFile::default(),
        };

        let chunks: Vec<ChunkRecord> = match fs::read(dir.join(CHUNKS_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("could not parse {}: {}", CHUNKS_FILE, e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };

        let embeddings: Vec<Vec<f32>> = match fs::read(dir.join(EMBEDDINGS_FILE)) {
            Ok(bytes) if index.dims > 0 => {
                let flat = blob_to_vec(&bytes);
                flat.chunks(index.dims).map(|c| c.to_vec()).collect()
            }
            _ => Vec::new(),
        };

        if embeddings.len() != chunks.len() {
            warn!(
                vectors = embeddings.len(),
                chunks = chunks.len(),
                "vector and chunk artifacts disagree; starting empty"
            );
            return LocalState::default();
        }

        LocalState {
            dims: index.dims,
            embeddings,
            chunks,
            index: index.files,
        }
    }

    /// Write all three artifacts. Called with the write lock held.
    ///
    /// Every artifact is staged to a `.tmp` sibling first; the renames
    /// only start once all stage writes succeeded, so a failed write
    /// leaves the previous consistent artifact set on disk.
    fn persist(&self, state: &LocalState) -> Result<()> {
        let mut flat = Vec::with_capacity(state.embeddings.len() * state.dims);
        for v in &state.embeddings {
            flat.extend_from_slice(v);
        }
        let index = IndexFile {
            dims: state.dims,
            files: state.index.clone(),
        };
        let artifacts: [(&str, Vec<u8>); 3] = [
            (EMBEDDINGS_FILE, vec_to_blob(&flat)),
            (CHUNKS_FILE, serde_json::to_vec_pretty(&state.chunks)?),
            (INDEX_FILE, serde_json::to_vec_pretty(&index)?),
        ];

        for (name, bytes) in &artifacts {
            let staged = self.dir.join(format!("{}.tmp", name));
            fs::write(&staged, bytes)
                .with_context(|| format!("Failed to stage {}", name))?;
        }
        for (name, _) in &artifacts {
            fs::rename(self.dir.join(format!("{}.tmp", name)), self.dir.join(name))
                .with_context(|| format!("Failed to replace {}", name))?;
        }

        Ok(())
    }

    /// Remove one file's records from `state` (no persistence).
    ///
    /// Deletes the file's vector slots and chunks, then shifts every
    /// surviving index range and chunk `embedding_idx` that sat after
    /// the removed range down by the removed count.
    fn remove_file_locked(state: &mut LocalState, source_file: &str) {
        let entry = match state.index.remove(source_file) {
            Some(e) => e,
            None => return,
        };
        let removed_start = entry.start_idx;
        let removed_count = entry.end_idx - entry.start_idx + 1;

        state.embeddings.drain(removed_start..removed_start + removed_count);
        state.chunks.retain(|c| c.source_file != source_file);

        for meta in state.index.values_mut() {
            if meta.start_idx > removed_start {
                meta.start_idx -= removed_count;
                meta.end_idx -= removed_count;
            }
        }
        for chunk in &mut state.chunks {
            if chunk.embedding_idx > removed_start {
                chunk.embedding_idx -= removed_count;
            }
        }
    }

    fn store_batch(
        &self,
        vectors: &[Vec<f32>],
        chunks: &[ChunkPayload],
        metadata: &BatchMetadata,
    ) -> Result<(), StoreError> {
        if vectors.is_empty() || vectors.len() != chunks.len() {
            return Err(StoreError::PersistenceFailure(format!(
                "batch shape mismatch: {} vectors, {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let dims = vectors[0].len();
        if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
            return Err(StoreError::PersistenceFailure(
                "batch vectors have inconsistent dimensions".to_string(),
            ));
        }

        let mut state = self.state.write().unwrap();
        if state.dims != 0 && state.dims != dims {
            return Err(StoreError::PersistenceFailure(format!(
                "batch dims {} do not match store dims {}",
                dims, state.dims
            )));
        }

        let snapshot = state.clone();

        Self::remove_file_locked(&mut state, &metadata.source_file);

        let start_idx = state.embeddings.len();
        let now = Utc::now();
        state.dims = dims;
        state.embeddings.extend(vectors.iter().cloned());
        for (i, chunk) in chunks.iter().enumerate() {
            state.chunks.push(ChunkRecord {
                id: record_id(chunk),
                content: chunk.content.clone(),
                source_file: metadata.source_file.clone(),
                embedding_idx: start_idx + i,
                stored_at: now,
                metadata: chunk.metadata.clone(),
            });
        }
        state.index.insert(
            metadata.source_file.clone(),
            FileIndexEntry {
                start_idx,
                end_idx: start_idx + chunks.len() - 1,
                chunk_count: chunks.len(),
                stored_at: now,
                extra: metadata.extra.clone(),
            },
        );

        match self.persist(&state) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Roll back so reads never observe unpersisted state.
                *state = snapshot;
                Err(StoreError::PersistenceFailure(e.to_string()))
            }
        }
    }

    fn clear_inner(&self, source_file: Option<&str>) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();

        match source_file {
            Some(f) => {
                if !state.index.contains_key(f) {
                    // Idempotent: clearing an absent file is a no-op success.
                    return Ok(());
                }
                let snapshot = state.clone();
                Self::remove_file_locked(&mut state, f);
                if let Err(e) = self.persist(&state) {
                    *state = snapshot;
                    return Err(StoreError::PersistenceFailure(e.to_string()));
                }
            }
            None => {
                let snapshot = state.clone();
                *state = LocalState::default();
                if let Err(e) = self.persist(&state) {
                    *state = snapshot;
                    return Err(StoreError::PersistenceFailure(e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn search_ranked(&self, query: &[f32], top_k: usize, threshold: f32) -> Vec<SearchMatch> {
        let state = self.state.read().unwrap();
        if state.embeddings.is_empty() {
            return Vec::new();
        }
        if query.len() != state.dims {
            let e = StoreError::SearchFailure(format!(
                "query has {} dims, store has {}",
                query.len(),
                state.dims
            ));
            warn!("{}", e);
            return Vec::new();
        }

        rank(query, &state.embeddings, top_k, threshold)
            .into_iter()
            .filter_map(|(idx, score)| {
                let chunk = state.chunks.iter().find(|c| c.embedding_idx == idx)?;
                Some(SearchMatch {
                    id: chunk.id.clone(),
                    content: chunk.content.clone(),
                    source_file: chunk.source_file.clone(),
                    similarity: score,
                    metadata: chunk.metadata.clone(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn store(
        &self,
        vectors: &[Vec<f32>],
        chunks: &[ChunkPayload],
        metadata: &BatchMetadata,
    ) -> bool {
        let inner = self.inner.clone();
        let vectors = vectors.to_vec();
        let chunks = chunks.to_vec();
        let metadata = metadata.clone();
        let source_file = metadata.source_file.clone();
        let count = chunks.len();

        let result = tokio::task::spawn_blocking(move || {
            inner.store_batch(&vectors, &chunks, &metadata)
        })
        .await;

        match result {
            Ok(Ok(())) => {
                debug!(
                    source_file = %source_file,
                    chunks = count,
                    "stored batch locally"
                );
                true
            }
            Ok(Err(e)) => {
                warn!(source_file = %source_file, "{}", e);
                false
            }
            Err(e) => {
                warn!(source_file = %source_file, "store task panicked: {}", e);
                false
            }
        }
    }

    async fn search(&self, query: &[f32], top_k: usize, threshold: f32) -> Vec<SearchMatch> {
        let inner = self.inner.clone();
        let query = query.to_vec();

        match tokio::task::spawn_blocking(move || inner.search_ranked(&query, top_k, threshold))
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!("search task panicked: {}", e);
                Vec::new()
            }
        }
    }

    async fn clear(&self, source_file: Option<&str>) -> bool {
        let inner = self.inner.clone();
        let source_file = source_file.map(|s| s.to_string());

        let result =
            tokio::task::spawn_blocking(move || inner.clear_inner(source_file.as_deref())).await;

        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("{}", e);
                false
            }
            Err(e) => {
                warn!("clear task panicked: {}", e);
                false
            }
        }
    }

    async fn exists(&self, source_file: &str) -> bool {
        self.inner.state.read().unwrap().index.contains_key(source_file)
    }

    async fn stats(&self) -> StoreStats {
        let state = self.inner.state.read().unwrap();
        let storage_size_bytes = [EMBEDDINGS_FILE, CHUNKS_FILE, INDEX_FILE]
            .iter()
            .filter_map(|f| fs::metadata(self.inner.dir.join(f)).ok())
            .map(|m| m.len())
            .sum();

        StoreStats {
            record_count: state.embeddings.len(),
            file_count: state.index.len(),
            storage_size_bytes,
            files: state.index.keys().cloned().collect(),
            backend: "local",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn payload(content: &str) -> ChunkPayload {
        ChunkPayload {
            id: None,
            content: content.to_string(),
            metadata: Map::new(),
        }
    }

    fn meta(source_file: &str) -> BatchMetadata {
        BatchMetadata {
            source_file: source_file.to_string(),
            extra: Map::new(),
        }
    }

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let n = (x * x + y * y).sqrt();
        vec![x / n, y / n]
    }

    #[tokio::test]
    async fn test_store_then_exists_and_search() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();

        let ok = store
            .store(
                &[unit(1.0, 0.0), unit(0.0, 1.0)],
                &[payload("alpha"), payload("beta")],
                &meta("a.pdf"),
            )
            .await;
        assert!(ok);
        assert!(store.exists("a.pdf").await);
        assert!(!store.exists("b.pdf").await);

        let matches = store.search(&unit(1.0, 0.0), 1, 0.0).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content, "alpha");
        assert!(matches[0].similarity >= 0.999999);
    }

    #[tokio::test]
    async fn test_restore_replaces_prior_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();

        store
            .store(
                &[unit(1.0, 0.0), unit(0.0, 1.0)],
                &[payload("old-1"), payload("old-2")],
                &meta("a.pdf"),
            )
            .await;
        store
            .store(&[unit(1.0, 1.0)], &[payload("new-1")], &meta("a.pdf"))
            .await;

        let stats = store.stats().await;
        assert_eq!(stats.record_count, 1);
        assert_eq!(stats.file_count, 1);

        let matches = store.search(&unit(1.0, 1.0), 5, 0.0).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content, "new-1");
    }

    #[tokio::test]
    async fn test_clear_reindexes_subsequent_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();

        // File A: 3 chunks, file B: 2 chunks.
        store
            .store(
                &[unit(1.0, 0.0), unit(1.0, 0.1), unit(1.0, 0.2)],
                &[payload("a1"), payload("a2"), payload("a3")],
                &meta("a.pdf"),
            )
            .await;
        store
            .store(
                &[unit(0.0, 1.0), unit(0.1, 1.0)],
                &[payload("b1"), payload("b2")],
                &meta("b.pdf"),
            )
            .await;

        assert!(store.clear(Some("a.pdf")).await);
        assert!(!store.exists("a.pdf").await);
        assert!(store.exists("b.pdf").await);

        // B's chunks remain searchable with unchanged content, and B's
        // range no longer overlaps any removed slot.
        let matches = store.search(&unit(0.0, 1.0), 2, 0.0).await;
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].content, "b1");
        assert_eq!(matches[1].content, "b2");

        let state = store.inner.state.read().unwrap();
        let entry = state.index.get("b.pdf").unwrap();
        assert_eq!(entry.start_idx, 0);
        assert_eq!(entry.end_idx, 1);
        assert_eq!(state.embeddings.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();

        store
            .store(&[unit(1.0, 0.0)], &[payload("a1")], &meta("a.pdf"))
            .await;
        assert!(store.clear(Some("a.pdf")).await);
        assert!(store.clear(Some("a.pdf")).await);
        assert_eq!(store.stats().await.record_count, 0);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();

        store
            .store(&[unit(1.0, 0.0)], &[payload("a1")], &meta("a.pdf"))
            .await;
        store
            .store(&[unit(0.0, 1.0)], &[payload("b1")], &meta("b.pdf"))
            .await;
        assert!(store.clear(None).await);

        let stats = store.stats().await;
        assert_eq!(stats.record_count, 0);
        assert_eq!(stats.file_count, 0);
        assert!(store.search(&unit(1.0, 0.0), 5, 0.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = LocalVectorStore::open(tmp.path()).unwrap();
            store
                .store(
                    &[unit(1.0, 0.0), unit(0.0, 1.0)],
                    &[payload("alpha"), payload("beta")],
                    &meta("a.pdf"),
                )
                .await;
        }

        let reopened = LocalVectorStore::open(tmp.path()).unwrap();
        assert!(reopened.exists("a.pdf").await);
        let matches = reopened.search(&unit(0.0, 1.0), 1, 0.0).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content, "beta");
    }

    #[tokio::test]
    async fn test_batch_shape_mismatch_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();

        let ok = store
            .store(&[unit(1.0, 0.0)], &[payload("a"), payload("b")], &meta("a.pdf"))
            .await;
        assert!(!ok);
        assert!(!store.exists("a.pdf").await);
    }

    #[tokio::test]
    async fn test_mismatched_query_dims_returns_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();

        store
            .store(&[unit(1.0, 0.0)], &[payload("a1")], &meta("a.pdf"))
            .await;
        assert!(store.search(&[1.0, 0.0, 0.0], 5, 0.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_file_batch_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();

        store
            .store(
                &[unit(1.0, 0.0), unit(0.0, 1.0)],
                &[payload("a1"), payload("a2")],
                &meta("a.pdf"),
            )
            .await;

        let (vectors, chunks, metadata) = store.file_batch("a.pdf").unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(metadata.source_file, "a.pdf");
        assert_eq!(chunks[0].content, "a1");
        assert!(store.file_batch("missing.pdf").is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_mutations_and_searches_complete_on_one_runtime_thread() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();
        store
            .store(
                &[unit(1.0, 0.0), unit(0.0, 1.0)],
                &[payload("alpha"), payload("beta")],
                &meta("a.pdf"),
            )
            .await;

        // The heavy work runs on the blocking pool, so a single runtime
        // thread can interleave a mutation with concurrent searches.
        let q1 = unit(1.0, 0.0);
        let q2 = unit(0.0, 1.0);
        let q3 = unit(1.0, 0.5);
        let vectors = [unit(1.0, 1.0)];
        let payloads = [payload("c1")];
        let c_meta = meta("c.pdf");
        let (stored, m1, m2, m3) = tokio::join!(
            store.store(&vectors, &payloads, &c_meta),
            store.search(&q1, 5, 0.0),
            store.search(&q2, 5, 0.0),
            store.search(&q3, 5, 0.0),
        );
        assert!(stored);
        assert!(!m1.is_empty());
        assert!(!m2.is_empty());
        assert!(!m3.is_empty());
        assert!(store.exists("c.pdf").await);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_previous_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalVectorStore::open(tmp.path()).unwrap();
        store
            .store(&[unit(1.0, 0.0)], &[payload("a1")], &meta("a.pdf"))
            .await;

        // A directory squatting on the staging path makes the next
        // persist fail before any artifact is replaced.
        fs::create_dir(tmp.path().join(format!("{}.tmp", CHUNKS_FILE))).unwrap();

        let ok = store
            .store(
                &[unit(0.0, 1.0), unit(0.1, 1.0)],
                &[payload("b1"), payload("b2")],
                &meta("b.pdf"),
            )
            .await;
        assert!(!ok);
        // In-memory state rolled back: the failed batch is invisible.
        assert!(!store.exists("b.pdf").await);
        assert_eq!(store.stats().await.record_count, 1);

        // The on-disk set is the previous consistent one, not a partial
        // mix that would be discarded on reload.
        let reopened = LocalVectorStore::open(tmp.path()).unwrap();
        assert!(reopened.exists("a.pdf").await);
        assert_eq!(reopened.stats().await.record_count, 1);
        let matches = reopened.search(&unit(1.0, 0.0), 1, 0.0).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content, "a1");
    }
}
