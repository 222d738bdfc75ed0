//! Drop-directory ingestion of chunk-batch files.
//!
//! The external ingestion collaborator (PDF extraction + embedding)
//! writes one JSON file per processed source file into a drop
//! directory:
//!
//! ```json
//! {
//!   "source_file": "lease-act.pdf",
//!   "metadata": { "jurisdiction": "EU" },
//!   "chunks": [
//!     { "content": "...", "vector": [0.1, 0.2], "metadata": {} }
//!   ]
//! }
//! ```
//!
//! The scheduler's `file-scan` job calls [`scan_once`], which stores
//! every new or modified batch file (tracked by mtime) and skips the
//! rest. Parsing happens on the blocking pool so large batches never
//! stall the scheduler loop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::{BatchMetadata, ChunkPayload};
use crate::store::VectorStore;

/// On-disk form of one ingestion batch.
#[derive(Debug, Deserialize)]
pub struct ChunkBatch {
    pub source_file: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub chunks: Vec<BatchChunk>,
}

/// One chunk within a [`ChunkBatch`] file.
#[derive(Debug, Deserialize)]
pub struct BatchChunk {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Per-file mtimes from previous scans, so each batch is ingested once.
#[derive(Default)]
pub struct ScanState {
    seen: Mutex<HashMap<PathBuf, SystemTime>>,
}

/// Parse and validate a batch file.
pub fn read_batch(path: &Path) -> Result<ChunkBatch> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
    let batch: ChunkBatch = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse batch file: {}", path.display()))?;

    if batch.source_file.is_empty() {
        bail!("batch file {} has no source_file", path.display());
    }
    if batch.chunks.is_empty() {
        bail!("batch file {} has no chunks", path.display());
    }
    let dims = batch.chunks[0].vector.len();
    if dims == 0 || batch.chunks.iter().any(|c| c.vector.len() != dims) {
        bail!(
            "batch file {} has inconsistent vector dimensions",
            path.display()
        );
    }

    Ok(batch)
}

/// Parse a batch file and store it.
///
/// Parsing runs on the blocking pool; the store call follows on the
/// async side.
pub async fn store_batch_file(store: &dyn VectorStore, path: &Path) -> Result<()> {
    let owned = path.to_path_buf();
    let batch = tokio::task::spawn_blocking(move || read_batch(&owned))
        .await
        .context("batch parse task panicked")??;

    let (vectors, chunks): (Vec<Vec<f32>>, Vec<ChunkPayload>) = batch
        .chunks
        .into_iter()
        .map(|c| {
            (
                c.vector,
                ChunkPayload {
                    id: c.id,
                    content: c.content,
                    metadata: c.metadata,
                },
            )
        })
        .unzip();
    let metadata = BatchMetadata {
        source_file: batch.source_file,
        extra: batch.metadata,
    };

    if !store.store(&vectors, &chunks, &metadata).await {
        bail!("store rejected batch for {}", metadata.source_file);
    }
    info!(
        source_file = %metadata.source_file,
        chunks = vectors.len(),
        "ingested batch file {}",
        path.display()
    );
    Ok(())
}

/// One scan pass over the drop directory.
///
/// Stores every `.json` file that is new or has a newer mtime than the
/// last pass. Per-file failures are logged and do not stop the pass.
pub async fn scan_once(
    store: Arc<dyn VectorStore>,
    dir: &Path,
    state: &ScanState,
) -> Result<()> {
    if !dir.exists() {
        // Nothing to do until the collaborator creates the directory.
        return Ok(());
    }

    let mut current: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).into_iter().flatten() {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json")
        {
            continue;
        }
        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        current.push((path.to_path_buf(), mtime));
    }

    let pending: Vec<PathBuf> = {
        let seen = state.seen.lock().unwrap();
        current
            .iter()
            .filter(|(path, mtime)| seen.get(path).map(|prev| mtime > prev).unwrap_or(true))
            .map(|(path, _)| path.clone())
            .collect()
    };

    if !pending.is_empty() {
        info!(files = pending.len(), "found new or changed batch files");
    }

    for path in &pending {
        if let Err(e) = store_batch_file(store.as_ref(), path).await {
            warn!("failed to ingest {}: {:#}", path.display(), e);
        }
    }

    *state.seen.lock().unwrap() = current.into_iter().collect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::local::LocalVectorStore;

    fn write_batch(dir: &Path, name: &str, source_file: &str, contents: &[(&str, [f32; 2])]) {
        let chunks: Vec<Value> = contents
            .iter()
            .map(|(text, v)| {
                serde_json::json!({ "content": text, "vector": v, "metadata": {} })
            })
            .collect();
        let batch = serde_json::json!({
            "source_file": source_file,
            "metadata": {},
            "chunks": chunks,
        });
        std::fs::write(dir.join(name), serde_json::to_vec(&batch).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_scan_ingests_new_batches_once() {
        let drop_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn VectorStore> =
            Arc::new(LocalVectorStore::open(store_dir.path()).unwrap());
        let state = ScanState::default();

        write_batch(drop_dir.path(), "a.json", "a.pdf", &[("alpha", [1.0, 0.0])]);
        write_batch(drop_dir.path(), "b.json", "b.pdf", &[("beta", [0.0, 1.0])]);

        scan_once(store.clone(), drop_dir.path(), &state).await.unwrap();
        assert!(store.exists("a.pdf").await);
        assert!(store.exists("b.pdf").await);
        assert_eq!(store.stats().await.record_count, 2);

        // Unchanged files are not re-ingested.
        scan_once(store.clone(), drop_dir.path(), &state).await.unwrap();
        assert_eq!(store.stats().await.record_count, 2);
    }

    #[tokio::test]
    async fn test_scan_skips_malformed_batch_and_continues() {
        let drop_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn VectorStore> =
            Arc::new(LocalVectorStore::open(store_dir.path()).unwrap());
        let state = ScanState::default();

        std::fs::write(drop_dir.path().join("bad.json"), b"{not json").unwrap();
        write_batch(drop_dir.path(), "ok.json", "ok.pdf", &[("fine", [1.0, 0.0])]);

        scan_once(store.clone(), drop_dir.path(), &state).await.unwrap();
        assert!(store.exists("ok.pdf").await);
        assert_eq!(store.stats().await.file_count, 1);
    }

    #[tokio::test]
    async fn test_scan_missing_dir_is_noop() {
        let store_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn VectorStore> =
            Arc::new(LocalVectorStore::open(store_dir.path()).unwrap());
        let state = ScanState::default();

        scan_once(store, Path::new("/nonexistent/drop"), &state)
            .await
            .unwrap();
    }

    #[test]
    fn test_read_batch_rejects_inconsistent_dims() {
        let dir = tempfile::tempdir().unwrap();
        let batch = serde_json::json!({
            "source_file": "x.pdf",
            "chunks": [
                { "content": "a", "vector": [1.0, 0.0] },
                { "content": "b", "vector": [1.0] },
            ],
        });
        let path = dir.path().join("x.json");
        std::fs::write(&path, serde_json::to_vec(&batch).unwrap()).unwrap();
        assert!(read_batch(&path).is_err());
    }
}
