use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docuchat::commands::{
    delete_all_documents, delete_document, ingest_document, list_documents, optimize_store,
    search_documents, show_status,
};
use docuchat::config::{Config, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "docuchat")]
#[command(about = "Store document chunk embeddings and retrieve the most relevant ones")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the document store and embedding provider
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed a document and store its chunks, replacing any earlier version
    Ingest {
        /// A JSON chunk file, or a text file to split
        path: PathBuf,
        /// Name to store the document under, defaults to the recorded or file name
        #[arg(long)]
        filename: Option<String>,
    },
    /// Find the stored chunks most similar to a query
    Search {
        query: String,
        /// Number of chunks to return
        #[arg(short, default_value_t = 5)]
        k: usize,
        /// Print the context block handed to the answer model
        #[arg(long)]
        context: bool,
    },
    /// List stored documents
    List,
    /// Delete a stored document
    Delete {
        filename: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete every stored document
    DeleteAll {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show store and provider status
    Status,
    /// Rebuild vector indexes and compact storage
    Optimize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Config { show } = cli.command {
        if show {
            show_config()?;
        } else {
            run_interactive_config()?;
        }
        return Ok(());
    }

    let config = Config::load_default().context("Failed to load configuration")?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Ingest { path, filename } => {
            ingest_document(&config, &path, filename).await?;
        }
        Commands::Search { query, k, context } => {
            search_documents(&config, &query, k, context).await?;
        }
        Commands::List => {
            list_documents(&config).await?;
        }
        Commands::Delete { filename, yes } => {
            delete_document(&config, &filename, yes).await?;
        }
        Commands::DeleteAll { yes } => {
            delete_all_documents(&config, yes).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Optimize => {
            optimize_store(&config).await?;
        }
    }

    Ok(())
}
