use anyhow::Context;
use clap::{Parser, Subcommand};
use docvec::Result;
use docvec::commands::{
    clear, delete, import_records, list_records, parse_vector, run_health_check, search,
    show_config, show_stats, update_config,
};
use docvec::config::{Config, get_config_dir};
use docvec::index::VectorStore;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docvec")]
#[command(about = "Vector similarity index and document ranking for retrieval backends")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the default data directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or update the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Embedding dimension of the store
        #[arg(long)]
        dimension: Option<usize>,
        /// Default number of results
        #[arg(long)]
        top_k: Option<usize>,
        /// Default minimum cosine similarity
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<f32>,
    },
    /// Show record and storage statistics
    Stats,
    /// Check array alignment and the persistence round trip
    Health,
    /// Import records from a JSON Lines file
    Import {
        /// Path of the JSON Lines file
        file: PathBuf,
    },
    /// List stored records page by page
    List {
        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Records per page
        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },
    /// Search with a raw query vector
    Search {
        /// Comma separated query vector, e.g. "0.1,0.2,0.3"
        #[arg(allow_hyphen_values = true)]
        vector: String,
        /// Maximum number of results
        #[arg(long)]
        top_k: Option<usize>,
        /// Minimum cosine similarity
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<f32>,
        /// Aggregate chunk hits into documents
        #[arg(long)]
        documents: bool,
    },
    /// Delete a record, or a whole document with --document
    Delete {
        /// Record id, or document id with --document
        target: String,
        /// Treat the target as a document id
        #[arg(long)]
        document: bool,
    },
    /// Remove every record and the snapshot files
    Clear {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir().context("Failed to determine config directory")?,
    };
    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Config {
            show,
            dimension,
            top_k,
            threshold,
        } => {
            if show || (dimension.is_none() && top_k.is_none() && threshold.is_none()) {
                show_config(&config)?;
            } else {
                update_config(config, dimension, top_k, threshold)?;
            }
        }
        Commands::Stats => {
            let store = VectorStore::open(&config).await?;
            show_stats(&store).await?;
        }
        Commands::Health => {
            let store = VectorStore::open(&config).await?;
            run_health_check(&store).await?;
        }
        Commands::Import { file } => {
            let store = VectorStore::open(&config).await?;
            import_records(&store, &file).await?;
        }
        Commands::List { page, page_size } => {
            let store = VectorStore::open(&config).await?;
            list_records(&store, page, page_size).await?;
        }
        Commands::Search {
            vector,
            top_k,
            threshold,
            documents,
        } => {
            let query = parse_vector(&vector)?;
            let store = VectorStore::open(&config).await?;
            search(&store, &config, &query, top_k, threshold, documents).await?;
        }
        Commands::Delete { target, document } => {
            let store = VectorStore::open(&config).await?;
            delete(&store, &target, document).await?;
        }
        Commands::Clear { yes } => {
            let store = VectorStore::open(&config).await?;
            clear(&store, yes).await?;
        }
    }

    Ok(())
}
