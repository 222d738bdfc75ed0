//! Core data types shared across the store backends.
//!
//! The store family works in terms of ingestion batches: a set of
//! embedding vectors, the chunks they were computed from, and one
//! [`BatchMetadata`] describing the source file the batch belongs to.
//! The local backend persists chunks as [`ChunkRecord`]s and tracks
//! per-file ownership with [`FileIndexEntry`] ranges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// One chunk of source text submitted for storage.
///
/// The embedding vector travels separately (in array order) so that the
/// same payload type serves both the local and the remote backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Caller-supplied record key. When absent, the sha256 hex digest of
    /// `content` is used as the record id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Source text the embedding was computed from.
    pub content: String,
    /// Open extension map carried through to search results.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Metadata describing one ingestion batch.
///
/// A fixed core schema (the provenance key) plus an explicit open
/// extension map, so invariants on the core fields stay checkable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    /// Provenance key: all records of a batch belong to this source file.
    pub source_file: String,
    /// Caller-supplied metadata for the whole batch.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// A chunk as persisted by the local store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Record id (caller key or content hash).
    pub id: String,
    /// Source text.
    pub content: String,
    /// Provenance key of the owning batch.
    pub source_file: String,
    /// Position of this record's vector in the store's vector array.
    pub embedding_idx: usize,
    /// When the record was stored.
    pub stored_at: DateTime<Utc>,
    /// Open extension map from the chunk payload.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// The contiguous vector-array range owned by one ingested source file.
///
/// Invariant: ranges for distinct files never overlap, and the union of
/// all ranges equals the set of live vector slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIndexEntry {
    /// First vector slot owned by the file (inclusive).
    pub start_idx: usize,
    /// Last vector slot owned by the file (inclusive).
    pub end_idx: usize,
    /// Number of chunks in the batch.
    pub chunk_count: usize,
    /// When the batch was stored.
    pub stored_at: DateTime<Utc>,
    /// Caller-supplied batch metadata.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// A ranked search hit returned by every backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Record id of the matched chunk.
    pub id: String,
    /// Original chunk content.
    pub content: String,
    /// Provenance key of the owning batch.
    pub source_file: String,
    /// Cosine similarity to the query vector, in `[-1.0, 1.0]`.
    pub similarity: f32,
    /// Chunk metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Statistics snapshot for a store backend.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Number of stored vector records.
    pub record_count: usize,
    /// Number of ingested source files.
    pub file_count: usize,
    /// Bytes used by the persisted artifacts (0 for remote backends).
    pub storage_size_bytes: u64,
    /// Provenance keys of all ingested files.
    pub files: Vec<String>,
    /// Backend label: `"local"`, `"remote"`, or `"sync"`.
    pub backend: &'static str,
}

/// A record whose local write succeeded but whose mirror write failed.
///
/// Entries are created only after a confirmed local success and removed
/// only after a confirmed remote success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueEntry {
    /// Record id of the affected chunk.
    pub record_id: String,
    /// Provenance key, used to re-read the batch from the local store.
    pub source_file: String,
}

/// sha256 hex digest of a text, used as the default record id.
pub fn content_hash(text: &str) -> String {
    content_hash_bytes(text.as_bytes())
}

/// sha256 hex digest of raw bytes (also used for vector cache keys).
pub fn content_hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Resolve the record id for a chunk payload: the caller-supplied key,
/// or the content hash when none was given.
pub fn record_id(chunk: &ChunkPayload) -> String {
    chunk
        .id
        .clone()
        .unwrap_or_else(|| content_hash(&chunk.content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }

    #[test]
    fn test_record_id_prefers_caller_key() {
        let chunk = ChunkPayload {
            id: Some("k-1".to_string()),
            content: "text".to_string(),
            metadata: Map::new(),
        };
        assert_eq!(record_id(&chunk), "k-1");
    }

    #[test]
    fn test_record_id_falls_back_to_hash() {
        let chunk = ChunkPayload {
            id: None,
            content: "text".to_string(),
            metadata: Map::new(),
        };
        assert_eq!(record_id(&chunk), content_hash("text"));
    }
}
