use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codebase_rag::config::Config;
use codebase_rag::db::Db;
use codebase_rag::embedder;
use codebase_rag::indexer::{Pipeline, extract_codebase};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "codebase-rag",
    version,
    about = "Index a codebase into function chunks and search them by similarity"
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Use hash-based mock embeddings instead of the model (trial runs only)
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract function chunks into the intermediate log
    Extract { codebase: String },
    /// Embed the intermediate log and store it in the vector index
    Embed { codebase: String },
    /// Extract, then embed and store
    Run { codebase: String },
    /// Print the chunks closest to a piece of text
    Query {
        codebase: String,
        text: String,

        /// Number of results (defaults to search_top_k from the config)
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // 1. Load config
    let mut config = Config::load(&cli.config)?;
    if cli.mock {
        config.model.mock = true;
    }
    config.validate().context("invalid configuration")?;
    let config = Arc::new(config);

    // 2. Cancel the running phase on Ctrl-C
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current unit of work");
            ctrl_c.cancel();
        }
    });

    // Extraction needs neither the model nor the index
    if let Command::Extract { codebase } = &cli.command {
        let report = extract_codebase(&config, codebase, cancel).await?;
        info!(
            "Extracted {} chunks from {} files into {}",
            report.stats.chunks,
            report.stats.files_parsed,
            report.log_path.display()
        );
        return Ok(());
    }

    let codebase = match &cli.command {
        Command::Extract { codebase }
        | Command::Embed { codebase }
        | Command::Run { codebase }
        | Command::Query { codebase, .. } => codebase.clone(),
    };

    // 3. Init embedder
    let embedder = embedder::from_config(&config.model).context(
        "Failed to load embedding model (pass --mock or set model.mock for a trial run)",
    )?;

    // 4. Init vector index for the codebase
    let db = Db::open(
        config.vector_db_path(&codebase),
        &Config::collection_name(&codebase),
        embedder.dimensions(),
        config.distance,
    )
    .context("Failed to open vector index")?;
    let db = Arc::new(TokioMutex::new(db));

    let pipeline = Pipeline::new(config.clone(), db, embedder).with_cancellation(cancel);

    match cli.command {
        Command::Extract { .. } => {}
        Command::Embed { codebase } => {
            let report = pipeline.embed_and_store(&codebase).await?;
            info!(
                "Stored {} new chunks ({} already present)",
                report.inserted, report.skipped_existing
            );
        }
        Command::Run { codebase } => {
            let report = pipeline.run(&codebase).await?;
            info!(
                "Indexed {}: {} chunks extracted, {} new, {} already present",
                codebase,
                report.extract.stats.chunks,
                report.store.inserted,
                report.store.skipped_existing
            );
        }
        Command::Query { text, top_k, .. } => {
            let top_k = top_k.unwrap_or(config.search_top_k);
            let results = pipeline.search(&text, top_k).await?;
            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (rank, (id, (metadata, distance))) in results
                .ids
                .iter()
                .zip(results.metadatas.iter().zip(&results.distances))
                .enumerate()
            {
                let file = metadata
                    .get("file")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                let start = metadata
                    .get("start")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                let end = metadata.get("end").and_then(|v| v.as_u64()).unwrap_or(0);
                println!(
                    "{:>2}. {file}:{start}-{end}  distance={distance:.4}  [{id}]",
                    rank + 1
                );
            }
            println!("\n{}", results.context());
        }
    }

    Ok(())
}
