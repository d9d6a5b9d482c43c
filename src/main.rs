//! # Catalog Search CLI (`catalog`)
//!
//! ```bash
//! catalog --config ./config/catalog.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catalog init` | Create the SQLite database and run schema migrations |
//! | `catalog rebuild` | Build a new catalog version from the source file and activate it |
//! | `catalog search "<query>"` | Hybrid search against the active version |
//! | `catalog active` | Print the active version id |
//! | `catalog versions` | List catalog versions, newest first |
//! | `catalog rollback` | Reactivate the previous published version |
//! | `catalog prune` | Delete old inactive versions |
//! | `catalog stats` | Database and index summary |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use catalog_search::{config, migrate, rebuild, search, stats, versions};

/// Catalog Search: versioned hybrid product search.
#[derive(Parser)]
#[command(
    name = "catalog",
    about = "Catalog Search: versioned hybrid (BM25 + vector) product search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catalog.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Build a new catalog version from the configured source and activate it.
    ///
    /// On any failure the previously active version keeps serving.
    Rebuild {
        /// Free-text label stored with the version.
        #[arg(long)]
        description: Option<String>,

        /// Only re-read records updated on or after this time and overlay
        /// them on the active version (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        since: Option<String>,
    },

    /// Search the active catalog version.
    Search {
        /// The search query string.
        query: String,

        /// Number of results to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Override the lexical fusion weight for this query.
        #[arg(long)]
        lexical_weight: Option<f64>,

        /// Override the vector fusion weight for this query.
        #[arg(long)]
        vector_weight: Option<f64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the active catalog version.
    Active,

    /// List catalog versions with product counts.
    Versions,

    /// Reactivate the previous published version.
    ///
    /// Versions whose build never finished are skipped.
    Rollback,

    /// Delete inactive versions beyond the newest `--keep`.
    Prune {
        #[arg(long, default_value_t = 3)]
        keep: usize,
    },

    /// Show database and index statistics.
    Stats,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Rebuild { description, since } => {
            rebuild::run_rebuild(&cfg, description, since).await?;
        }
        Commands::Search {
            query,
            top_k,
            lexical_weight,
            vector_weight,
            json,
        } => {
            search::run_search(&cfg, &query, top_k, lexical_weight, vector_weight, json).await?;
        }
        Commands::Active => {
            versions::run_active(&cfg).await?;
        }
        Commands::Versions => {
            versions::run_versions(&cfg).await?;
        }
        Commands::Rollback => {
            versions::run_rollback(&cfg).await?;
        }
        Commands::Prune { keep } => {
            versions::run_prune(&cfg, keep).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
