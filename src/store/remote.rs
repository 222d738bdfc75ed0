//! Hosted [`VectorStore`] implementation over a PostgREST-style API.
//!
//! Three related tables, keyed by a server-generated file id:
//!
//! | Table | Columns |
//! |-------|---------|
//! | `files` | `id, source_file, chunk_count, metadata, created_at` |
//! | `chunks` | `id, file_id, content, metadata, created_at` |
//! | `embeddings` | `id, chunk_id, file_id, vector, created_at` |
//!
//! `clear` cascades the delete from `embeddings` through `chunks` to
//! `files` for the file's id.
//!
//! `search` fetches the full embeddings collection and ranks it
//! client-side with [`rank`], so remote ranking is semantically
//! identical to the local store's. This is O(total records) per query —
//! a known scalability limit that is accepted at the target data scale;
//! do not swap in a different ranking algorithm to "fix" it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::error::StoreError;
use crate::models::{
    content_hash, record_id, BatchMetadata, ChunkPayload, SearchMatch, StoreStats,
};
use crate::similarity::rank;

use super::VectorStore;

const FILES_TABLE: &str = "files";
const CHUNKS_TABLE: &str = "chunks";
const EMBEDDINGS_TABLE: &str = "embeddings";

/// Hosted store with the same external contract as the local one.
pub struct RemoteVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct FileJoin {
    source_file: String,
}

#[derive(Debug, Deserialize)]
struct ChunkJoin {
    content: String,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    vector: Vec<f32>,
    chunks: Option<ChunkJoin>,
    files: Option<FileJoin>,
}

impl RemoteVectorStore {
    /// Create a client for the hosted backend.
    ///
    /// # Errors
    ///
    /// Fails immediately when the url or api key is missing — the one
    /// fail-fast case in the store family, since running without
    /// credentials is a configuration error, not a runtime condition.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        if config.url.is_empty() || config.api_key.is_empty() {
            bail!("remote storage requires both url and api_key");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Insert rows and return the created representations.
    async fn insert(&self, table: &str, body: &Value) -> Result<Vec<Value>> {
        let resp = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{} insert failed: {} {}", table, status, text);
        }
        Ok(resp.json().await?)
    }

    async fn select(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
        let resp = self
            .authed(self.client.get(self.table_url(table)))
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{} select failed: {} {}", table, status, text);
        }
        Ok(resp.json().await?)
    }

    async fn delete_where(&self, table: &str, column: &str, filter: String) -> Result<()> {
        let resp = self
            .authed(self.client.delete(self.table_url(table)))
            .query(&[(column, filter)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{} delete failed: {} {}", table, status, text);
        }
        Ok(())
    }

    /// Exact row count via the `count=exact` preference and the
    /// `Content-Range` response header (`items 0-24/3573`).
    async fn count(&self, table: &str) -> Result<usize> {
        let resp = self
            .authed(self.client.get(self.table_url(table)))
            .query(&[("select", "id".to_string()), ("limit", "1".to_string())])
            .header("Prefer", "count=exact")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            bail!("{} count failed: {}", table, status);
        }

        let total = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        Ok(total)
    }

    async fn file_ids(&self, source_file: &str) -> Result<Vec<i64>> {
        let rows = self
            .select(
                FILES_TABLE,
                &[
                    ("select", "id".to_string()),
                    ("source_file", format!("eq.{}", source_file)),
                ],
            )
            .await?;
        let ids = rows
            .into_iter()
            .filter_map(|row| serde_json::from_value::<IdRow>(row).ok())
            .map(|r| r.id)
            .collect();
        Ok(ids)
    }

    async fn clear_file(&self, source_file: &str) -> Result<()> {
        let ids = self.file_ids(source_file).await?;
        // Absent file: success without side effects.
        for id in ids {
            self.delete_where(EMBEDDINGS_TABLE, "file_id", format!("eq.{}", id))
                .await?;
            self.delete_where(CHUNKS_TABLE, "file_id", format!("eq.{}", id))
                .await?;
            self.delete_where(FILES_TABLE, "id", format!("eq.{}", id))
                .await?;
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.delete_where(EMBEDDINGS_TABLE, "id", "neq.0".to_string())
            .await?;
        self.delete_where(CHUNKS_TABLE, "id", "neq.0".to_string())
            .await?;
        self.delete_where(FILES_TABLE, "id", "neq.0".to_string())
            .await?;
        Ok(())
    }

    async fn store_batch(
        &self,
        vectors: &[Vec<f32>],
        chunks: &[ChunkPayload],
        metadata: &BatchMetadata,
    ) -> Result<()> {
        if vectors.is_empty() || vectors.len() != chunks.len() {
            bail!(
                "batch shape mismatch: {} vectors, {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        // Replace any prior batch for this source file.
        self.clear_file(&metadata.source_file).await?;

        let now = Utc::now();
        let file_rows = self
            .insert(
                FILES_TABLE,
                &json!({
                    "source_file": metadata.source_file,
                    "chunk_count": chunks.len(),
                    "metadata": Value::Object(metadata.extra.clone()),
                    "created_at": now,
                }),
            )
            .await?;
        let file_id = file_rows
            .first()
            .and_then(|row| row.get("id"))
            .and_then(|id| id.as_i64())
            .context("files insert returned no id")?;

        // The record id rides inside the open metadata map; the chunks
        // table has no column for it.
        let chunk_bodies: Vec<Value> = chunks
            .iter()
            .map(|chunk| {
                let mut meta = chunk.metadata.clone();
                meta.insert("record_id".to_string(), Value::String(record_id(chunk)));
                json!({
                    "file_id": file_id,
                    "content": chunk.content,
                    "metadata": Value::Object(meta),
                    "created_at": now,
                })
            })
            .collect();
        let chunk_rows = self.insert(CHUNKS_TABLE, &Value::Array(chunk_bodies)).await?;
        if chunk_rows.len() != chunks.len() {
            bail!(
                "chunks insert returned {} rows for {} chunks",
                chunk_rows.len(),
                chunks.len()
            );
        }

        let embedding_bodies: Vec<Value> = chunk_rows
            .iter()
            .zip(vectors.iter())
            .map(|(row, vector)| {
                json!({
                    "chunk_id": row.get("id").cloned().unwrap_or(Value::Null),
                    "file_id": file_id,
                    "vector": vector,
                    "created_at": now,
                })
            })
            .collect();
        self.insert(EMBEDDINGS_TABLE, &Value::Array(embedding_bodies))
            .await?;

        Ok(())
    }

    async fn search_inner(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchMatch>> {
        // Full fetch, ranked client-side. O(total records) per query.
        let rows = self
            .select(
                EMBEDDINGS_TABLE,
                &[(
                    "select",
                    "vector,chunks(content,metadata),files(source_file)".to_string(),
                )],
            )
            .await?;

        let rows: Vec<EmbeddingRow> = rows
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect();

        let candidates: Vec<Vec<f32>> = rows.iter().map(|r| r.vector.clone()).collect();
        let ranked = rank(query, &candidates, top_k, threshold);

        let matches = ranked
            .into_iter()
            .filter_map(|(idx, score)| {
                let row = rows.get(idx)?;
                let chunk = row.chunks.as_ref()?;
                let metadata = chunk
                    .metadata
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                let id = metadata
                    .get("record_id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| content_hash(&chunk.content));
                Some(SearchMatch {
                    id,
                    content: chunk.content.clone(),
                    source_file: row
                        .files
                        .as_ref()
                        .map(|f| f.source_file.clone())
                        .unwrap_or_default(),
                    similarity: score,
                    metadata,
                })
            })
            .collect();

        Ok(matches)
    }
}

#[async_trait]
impl VectorStore for RemoteVectorStore {
    async fn store(
        &self,
        vectors: &[Vec<f32>],
        chunks: &[ChunkPayload],
        metadata: &BatchMetadata,
    ) -> bool {
        match self.store_batch(vectors, chunks, metadata).await {
            Ok(()) => {
                debug!(
                    source_file = %metadata.source_file,
                    chunks = chunks.len(),
                    "stored batch remotely"
                );
                true
            }
            Err(e) => {
                let e = StoreError::PersistenceFailure(e.to_string());
                warn!(source_file = %metadata.source_file, "{}", e);
                false
            }
        }
    }

    async fn search(&self, query: &[f32], top_k: usize, threshold: f32) -> Vec<SearchMatch> {
        match self.search_inner(query, top_k, threshold).await {
            Ok(matches) => matches,
            Err(e) => {
                let e = StoreError::SearchFailure(e.to_string());
                warn!("{}", e);
                Vec::new()
            }
        }
    }

    async fn clear(&self, source_file: Option<&str>) -> bool {
        let result = match source_file {
            Some(f) => self.clear_file(f).await,
            None => self.clear_all().await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                let e = StoreError::PersistenceFailure(e.to_string());
                warn!("{}", e);
                false
            }
        }
    }

    async fn exists(&self, source_file: &str) -> bool {
        match self.file_ids(source_file).await {
            Ok(ids) => !ids.is_empty(),
            Err(e) => {
                warn!("exists check failed: {}", e);
                false
            }
        }
    }

    async fn stats(&self) -> StoreStats {
        let record_count = self.count(EMBEDDINGS_TABLE).await.unwrap_or_else(|e| {
            warn!("embedding count failed: {}", e);
            0
        });

        let files = match self
            .select(FILES_TABLE, &[("select", "source_file".to_string())])
            .await
        {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| {
                    row.get("source_file")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                })
                .collect(),
            Err(e) => {
                warn!("file listing failed: {}", e);
                Vec::new()
            }
        };

        StoreStats {
            record_count,
            file_count: files.len(),
            storage_size_bytes: 0,
            files,
            backend: "remote",
        }
    }
}
