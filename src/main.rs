//! # Vector Sync CLI (`vsync`)
//!
//! The `vsync` binary manages the embedding store: initialization,
//! batch ingestion, similarity search, statistics, clearing, mirror
//! reconciliation, and the long-running scheduler mode.
//!
//! ## Usage
//!
//! ```bash
//! vsync --config ./config/vsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vsync init` | Create the local store artifacts |
//! | `vsync store <batch.json>` | Ingest one chunk-batch file |
//! | `vsync search --vector-file <q.json>` | Ranked cosine retrieval |
//! | `vsync stats` | Store and cache statistics as JSON |
//! | `vsync clear [--file <source>]` | Drop records for a file, or everything |
//! | `vsync sync` | One mirror reconciliation pass |
//! | `vsync run` | Run the background scheduler until Ctrl-C |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the local store
//! vsync init --config ./config/vsync.toml
//!
//! # Ingest a batch produced by the embedding pipeline
//! vsync store ./drop/lease-act.json
//!
//! # Search with a precomputed query vector
//! vsync search --vector-file ./query.json --top-k 5 --threshold 0.7
//!
//! # Replay queued mirror writes once
//! vsync sync
//!
//! # Long-running mode: mirror sync, file scan, cache sweep
//! vsync run
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vector_sync::{commands, config};

/// Vector Sync CLI — embedding storage with an optional hosted mirror.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vsync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "vsync",
    about = "Vector Sync — embedding storage and synchronization layer",
    version,
    long_about = "Vector Sync stores embedding vectors and their source chunks in a \
    file-backed local store, optionally mirrors every write to a hosted backend with \
    automatic retry of failed mirror writes, and serves cosine-similarity search with \
    a TTL cache in front."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/vsync.toml`. Storage backend, remote
    /// credentials, cache, and scheduler settings are read from this file.
    #[arg(long, global = true, default_value = "./config/vsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the store.
    ///
    /// Creates the storage directory and empty artifacts for the local
    /// backend. This command is idempotent — running it multiple times
    /// is safe and never touches existing records.
    Init,

    /// Ingest one chunk-batch JSON file.
    ///
    /// The file carries a source file name, batch metadata, and the
    /// chunks with their embedding vectors. A prior batch for the same
    /// source file is replaced.
    Store {
        /// Path to the chunk-batch JSON file.
        path: PathBuf,
    },

    /// Search stored chunks by cosine similarity.
    ///
    /// The query vector is read from a JSON float-array file (as written
    /// by the embedding pipeline). Results are ranked descending and cut
    /// off below the threshold; repeated queries hit the match cache.
    Search {
        /// Path to the query vector (JSON array of floats).
        #[arg(long)]
        vector_file: PathBuf,

        /// Maximum number of matches to return.
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Minimum cosine similarity for a match to count.
        #[arg(long, default_value_t = 0.7)]
        threshold: f32,
    },

    /// Print store and cache statistics as JSON.
    Stats,

    /// Remove stored records.
    ///
    /// With `--file`, removes only that source file's batch; without,
    /// removes everything. The cache is cleared either way, since cached
    /// matches may reference removed records.
    Clear {
        /// Source file whose records should be removed.
        #[arg(long)]
        file: Option<String>,
    },

    /// Run one mirror reconciliation pass.
    ///
    /// Replays queued mirror writes from the local store against the
    /// remote mirror and reports how many records were synced. Requires
    /// the sync backend.
    Sync,

    /// Run the background scheduler until Ctrl-C.
    ///
    /// Registers the jobs that apply to the configuration: mirror
    /// reconciliation (sync backend), drop-directory scanning
    /// (`[ingest].scan_dir`), and cache sweeping.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Store { path } => commands::run_store(&cfg, &path).await?,
        Commands::Search {
            vector_file,
            top_k,
            threshold,
        } => commands::run_search(&cfg, &vector_file, top_k, threshold).await?,
        Commands::Stats => commands::run_stats(&cfg).await?,
        Commands::Clear { file } => commands::run_clear(&cfg, file.as_deref()).await?,
        Commands::Sync => commands::run_sync(&cfg).await?,
        Commands::Run => commands::run_daemon(&cfg).await?,
    }

    Ok(())
}
