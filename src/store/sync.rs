//! Dual-write composite [`VectorStore`]: local authoritative, remote
//! best-effort mirror.
//!
//! Writes land locally first; a local failure fails the whole call. On
//! local success the mirror write is attempted, and a mirror failure is
//! absorbed: the affected record ids go onto an in-memory retry queue
//! and the call still reports success, since durability is guaranteed
//! locally. [`sync_pending`](SyncVectorStore::sync_pending) drains the
//! queue by re-reading each batch from the local store and replaying it
//! against the mirror, with unbounded retries (callers needing backoff
//! compose it around the call).
//!
//! The queue is in-memory only: a process restart loses pending mirror
//! writes. That limitation is accepted; a full re-sync can always be
//! forced by re-storing the affected files.
//!
//! Asymmetry, preserved intentionally: only `store` failures are
//! tracked by the retry queue. A failed mirror `clear` fails the call
//! but is never queued; the caller decides whether to retry it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{
    record_id, BatchMetadata, ChunkPayload, SearchMatch, StoreStats, SyncQueueEntry,
};

use super::local::LocalVectorStore;
use super::VectorStore;

/// Composite store over a local authoritative side and an optional
/// remote mirror.
pub struct SyncVectorStore {
    local: Option<Arc<LocalVectorStore>>,
    mirror: Option<Arc<dyn VectorStore>>,
    queue: Mutex<Vec<SyncQueueEntry>>,
}

impl SyncVectorStore {
    /// Compose a local store with an optional mirror.
    pub fn new(local: Arc<LocalVectorStore>, mirror: Option<Arc<dyn VectorStore>>) -> Self {
        Self {
            local: Some(local),
            mirror,
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Compose with an explicitly absent local side.
    ///
    /// The fallback path for when local construction failed: reads are
    /// served by the mirror, and every write is refused.
    pub fn with_fallback(
        local: Option<Arc<LocalVectorStore>>,
        mirror: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        Self {
            local,
            mirror,
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Number of record ids awaiting a mirror retry.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn enqueue(&self, entries: Vec<SyncQueueEntry>) {
        let mut queue = self.queue.lock().unwrap();
        for entry in entries {
            if !queue.contains(&entry) {
                queue.push(entry);
            }
        }
    }

    /// Retry every queued mirror write.
    ///
    /// Groups queue entries by source file, re-reads each batch from the
    /// local store, and replays it against the mirror. Success removes
    /// the batch's entries; failure leaves them queued for the next
    /// invocation. Entries whose file is no longer indexed locally are
    /// dropped — the records were cleared and there is nothing to
    /// mirror. No-op when no mirror is configured.
    ///
    /// Returns `(synced, remaining)` record counts.
    pub async fn sync_pending(&self) -> (usize, usize) {
        let (mirror, local) = match (&self.mirror, &self.local) {
            (Some(m), Some(l)) => (m, l),
            _ => return (0, 0),
        };

        let pending = std::mem::take(&mut *self.queue.lock().unwrap());
        if pending.is_empty() {
            return (0, 0);
        }

        let mut by_file: BTreeMap<String, Vec<SyncQueueEntry>> = BTreeMap::new();
        for entry in pending {
            by_file.entry(entry.source_file.clone()).or_default().push(entry);
        }

        let mut synced = 0usize;
        let mut failed: Vec<SyncQueueEntry> = Vec::new();

        for (source_file, entries) in by_file {
            let Some((vectors, chunks, metadata)) = local.file_batch(&source_file) else {
                debug!(
                    source_file = %source_file,
                    records = entries.len(),
                    "dropping queue entries for cleared file"
                );
                continue;
            };

            if mirror.store(&vectors, &chunks, &metadata).await {
                info!(
                    source_file = %source_file,
                    records = entries.len(),
                    "synced pending records to mirror"
                );
                synced += entries.len();
            } else {
                warn!(source_file = %source_file, "mirror retry failed; keeping records queued");
                failed.extend(entries);
            }
        }

        let remaining = {
            // Entries enqueued while we were syncing stay behind the
            // retried failures.
            let mut queue = self.queue.lock().unwrap();
            let newly_queued = std::mem::take(&mut *queue);
            *queue = failed;
            for entry in newly_queued {
                if !queue.contains(&entry) {
                    queue.push(entry);
                }
            }
            queue.len()
        };

        (synced, remaining)
    }
}

#[async_trait]
impl VectorStore for SyncVectorStore {
    async fn store(
        &self,
        vectors: &[Vec<f32>],
        chunks: &[ChunkPayload],
        metadata: &BatchMetadata,
    ) -> bool {
        let Some(local) = &self.local else {
            warn!(
                "{}",
                StoreError::StorageUnavailable("no local store; refusing write".to_string())
            );
            return false;
        };

        // Local first: the authoritative write decides the outcome.
        if !local.store(vectors, chunks, metadata).await {
            return false;
        }

        if let Some(mirror) = &self.mirror {
            if !mirror.store(vectors, chunks, metadata).await {
                let entries: Vec<SyncQueueEntry> = chunks
                    .iter()
                    .map(|chunk| SyncQueueEntry {
                        record_id: record_id(chunk),
                        source_file: metadata.source_file.clone(),
                    })
                    .collect();
                for entry in &entries {
                    warn!(
                        "{}",
                        StoreError::ConsistencyDrift {
                            record_id: entry.record_id.clone(),
                            source_file: entry.source_file.clone(),
                            reason: "mirror write failed; queued for retry".to_string(),
                        }
                    );
                }
                self.enqueue(entries);
            }
        }

        // Durability is guaranteed locally; mirror failure does not fail
        // the call.
        true
    }

    async fn search(&self, query: &[f32], top_k: usize, threshold: f32) -> Vec<SearchMatch> {
        if let Some(local) = &self.local {
            return local.search(query, top_k, threshold).await;
        }
        // Explicit fallback: remote is consulted only when the local
        // side is entirely unavailable.
        if let Some(mirror) = &self.mirror {
            warn!("local store unavailable; serving search from mirror");
            return mirror.search(query, top_k, threshold).await;
        }
        warn!(
            "{}",
            StoreError::StorageUnavailable("no backend available for search".to_string())
        );
        Vec::new()
    }

    async fn clear(&self, source_file: Option<&str>) -> bool {
        let Some(local) = &self.local else {
            warn!(
                "{}",
                StoreError::StorageUnavailable("no local store; refusing clear".to_string())
            );
            return false;
        };

        let local_ok = local.clear(source_file).await;

        let mut mirror_ok = true;
        if let Some(mirror) = &self.mirror {
            // Clear failures are not tracked by the retry queue (only
            // write failures are); the failure surfaces in the return
            // value instead.
            mirror_ok = mirror.clear(source_file).await;
            if !mirror_ok {
                warn!(
                    source_file = source_file.unwrap_or("<all>"),
                    "mirror clear failed; not queued for retry"
                );
            }
        }

        local_ok && mirror_ok
    }

    async fn exists(&self, source_file: &str) -> bool {
        match &self.local {
            Some(local) => local.exists(source_file).await,
            None => false,
        }
    }

    async fn stats(&self) -> StoreStats {
        match &self.local {
            Some(local) => {
                let mut stats = local.stats().await;
                stats.backend = "sync";
                stats
            }
            None => StoreStats {
                record_count: 0,
                file_count: 0,
                storage_size_bytes: 0,
                files: Vec::new(),
                backend: "sync",
            },
        }
    }
}
