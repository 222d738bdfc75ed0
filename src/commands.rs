//! Command implementations for the `vsync` binary.
//!
//! Each command builds the shared [`Service`] handles from configuration,
//! does its work, and prints a human-readable or JSON summary. Store
//! operations follow the error-handling contract: a failed operation is
//! reported through the command's exit status, with the cause already
//! logged by the store itself.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::Config;
use crate::query::cached_search;
use crate::scan::{self, ScanState};
use crate::scheduler::BackgroundScheduler;
use crate::service::{build_service, Service};

/// `vsync init` — create the local store artifacts.
pub async fn run_init(config: &Config) -> Result<()> {
    let service = build_service(config.clone()).await?;
    let stats = service.backend.as_store().stats().await;
    println!(
        "Initialized {} store at {} ({} records, {} files).",
        stats.backend,
        config.storage.path.display(),
        stats.record_count,
        stats.file_count
    );
    Ok(())
}

/// `vsync store <batch.json>` — ingest one chunk-batch file.
pub async fn run_store(config: &Config, path: &Path) -> Result<()> {
    let service = build_service(config.clone()).await?;
    let store = service.backend.as_store();
    scan::store_batch_file(store.as_ref(), path).await?;
    println!("Stored batch from {}.", path.display());

    if let Some(sync) = service.backend.as_sync() {
        let pending = sync.queue_len();
        if pending > 0 {
            println!("{} record(s) pending mirror sync.", pending);
        }
    }
    Ok(())
}

/// `vsync search --vector-file <query.json>` — ranked retrieval.
///
/// The query vector arrives as a JSON array of floats, written by the
/// external embedding collaborator. Results go through the match cache.
pub async fn run_search(
    config: &Config,
    vector_file: &Path,
    top_k: usize,
    threshold: f32,
) -> Result<()> {
    let raw = std::fs::read_to_string(vector_file)
        .with_context(|| format!("Failed to read query vector: {}", vector_file.display()))?;
    let query: Vec<f32> = serde_json::from_str(&raw)
        .with_context(|| format!("Query vector must be a JSON float array: {}", vector_file.display()))?;
    if query.is_empty() {
        bail!("query vector is empty");
    }

    let service = build_service(config.clone()).await?;
    let store = service.backend.as_store();
    let matches = cached_search(store.as_ref(), &service.cache, &query, top_k, threshold).await;

    if matches.is_empty() {
        println!("No matches at or above similarity {}.", threshold);
        return Ok(());
    }
    for (i, m) in matches.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            m.similarity,
            m.id,
            m.source_file
        );
        let snippet: String = m.content.chars().take(160).collect();
        println!("   {}", snippet);
    }
    Ok(())
}

/// `vsync stats` — store and cache statistics as JSON.
pub async fn run_stats(config: &Config) -> Result<()> {
    let service = build_service(config.clone()).await?;
    let store_stats = service.backend.as_store().stats().await;
    let cache_stats = service.cache.stats().await;
    let pending = service
        .backend
        .as_sync()
        .map(|sync| sync.queue_len())
        .unwrap_or(0);

    let report = serde_json::json!({
        "store": store_stats,
        "cache": cache_stats,
        "pending_sync_records": pending,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// `vsync clear [--file <source>]` — drop stored records.
///
/// Clears the whole store when no file is given, and always clears the
/// cache: cached matches may reference records that no longer exist.
pub async fn run_clear(config: &Config, source_file: Option<&str>) -> Result<()> {
    let service = build_service(config.clone()).await?;
    let store = service.backend.as_store();

    if !store.clear(source_file).await {
        bail!("clear failed; see log for details");
    }
    service.cache.clear().await;

    match source_file {
        Some(file) => println!("Cleared records for {}.", file),
        None => println!("Cleared all records."),
    }
    Ok(())
}

/// `vsync sync` — one reconciliation pass against the mirror.
pub async fn run_sync(config: &Config) -> Result<()> {
    let service = build_service(config.clone()).await?;
    let Some(sync) = service.backend.as_sync() else {
        bail!("storage.backend must be \"sync\" to reconcile a mirror");
    };

    let (synced, remaining) = sync.sync_pending().await;
    println!(
        "Synced {} record(s); {} still pending.",
        synced, remaining
    );
    Ok(())
}

/// `vsync run` — long-running mode with the background scheduler.
///
/// Registers the periodic jobs that apply to the configured backend and
/// runs until Ctrl-C, then shuts the scheduler down within the grace
/// period.
pub async fn run_daemon(config: &Config) -> Result<()> {
    let service = Arc::new(build_service(config.clone()).await?);
    let mut scheduler =
        BackgroundScheduler::new(Duration::from_secs(config.scheduler.shutdown_grace_secs));

    register_jobs(&mut scheduler, &service);
    if scheduler.job_count() == 0 {
        bail!("no background jobs apply to this configuration; nothing to run");
    }
    info!(jobs = scheduler.job_count(), "scheduler running; Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    scheduler.shutdown().await;
    println!("Scheduler stopped.");
    Ok(())
}

/// Register the periodic jobs that apply to this service.
///
/// | Job | Condition | Work |
/// |-----|-----------|------|
/// | `mirror-sync` | sync backend active | replay queued mirror writes |
/// | `file-scan` | `[ingest].scan_dir` set | ingest dropped batch files |
/// | `cache-sweep` | cache enabled | evict expired in-process entries |
fn register_jobs(scheduler: &mut BackgroundScheduler, service: &Arc<Service>) {
    let intervals = &service.config.scheduler;

    if service.backend.as_sync().is_some() {
        let service = service.clone();
        scheduler.spawn_job(
            "mirror-sync",
            Duration::from_secs(intervals.mirror_sync_interval_secs),
            move || {
                let service = service.clone();
                async move {
                    // Registration is gated on the sync backend, so the
                    // handle is always present here.
                    if let Some(sync) = service.backend.as_sync() {
                        let (synced, remaining) = sync.sync_pending().await;
                        if synced > 0 || remaining > 0 {
                            info!(synced, remaining, "mirror sync pass");
                        }
                    }
                    Ok(())
                }
            },
        );
    }

    if let Some(scan_dir) = service.config.ingest.scan_dir.clone() {
        let store = service.backend.as_store();
        let state = Arc::new(ScanState::default());
        scheduler.spawn_job(
            "file-scan",
            Duration::from_secs(intervals.scan_interval_secs),
            move || {
                let store = store.clone();
                let state = state.clone();
                let scan_dir = scan_dir.clone();
                async move { scan::scan_once(store, &scan_dir, &state).await }
            },
        );
    }

    if service.config.cache.enabled {
        let cache = service.cache.clone();
        scheduler.spawn_job(
            "cache-sweep",
            Duration::from_secs(intervals.cache_sweep_interval_secs),
            move || {
                let cache = cache.clone();
                async move {
                    let evicted = cache.sweep_expired();
                    if evicted > 0 {
                        info!(evicted, "swept expired cache entries");
                    }
                    Ok(())
                }
            },
        );
    }
}
