//! # Vector Sync
//!
//! An embedding storage and synchronization layer: file-backed local
//! storage of embedding vectors and their source chunks, an optional
//! hosted mirror with write-failure reconciliation, cosine-similarity
//! retrieval, a TTL cache over the query path, and a background
//! scheduler for the recurring maintenance work.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Shared data types (chunks, batches, matches, stats) |
//! | [`error`] | Store failure taxonomy |
//! | [`similarity`] | Cosine ranking and vector blob codec |
//! | [`config`] | TOML configuration parsing and validation |
//! | [`store`] | [`VectorStore`](store::VectorStore) trait and the local / remote / sync backends |
//! | [`cache`] | TTL cache over embeddings and search matches |
//! | [`query`] | Cache-checked search path |
//! | [`scan`] | Drop-directory ingestion of chunk-batch files |
//! | [`scheduler`] | Fixed-interval background job runner |
//! | [`service`] | Process-wide service wiring |
//! | [`commands`] | `vsync` command implementations |
//!
//! The store contract is deliberately forgiving: operations report
//! failure through return values (a success boolean or an empty result
//! set) and log the cause, so one failed write never takes down a
//! request path. The exceptions are configuration errors, which fail
//! fast at startup.

pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod scan;
pub mod scheduler;
pub mod service;
pub mod similarity;
pub mod store;
