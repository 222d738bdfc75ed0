//! Process-wide service wiring.
//!
//! Builds the store backend and cache layer once from configuration and
//! hands them out as shared handles. Every command goes through this so
//! the singletons are constructed exactly once per process.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::cache::CacheLayer;
use crate::config::Config;
use crate::store::{create_store, Backend};

/// Shared handles for one running process.
pub struct Service {
    pub config: Config,
    pub backend: Backend,
    pub cache: Arc<CacheLayer>,
}

/// Build the store backend and cache layer from configuration.
pub async fn build_service(config: Config) -> Result<Service> {
    let backend = create_store(&config)?;
    let cache = Arc::new(CacheLayer::connect(&config.cache).await);
    info!(backend = backend.label(), "service initialized");

    Ok(Service {
        config,
        backend,
        cache,
    })
}
