//! Semango CLI.
//!
//! Thin shell over `semango-core`: runs ingestion, executes hybrid
//! queries, and prints index statistics. Exit codes: 0 on success, 1 on
//! generic failure, 78 when the configuration contains unknown fields.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use semango_core::{Engine, SemangoError};

/// Exit code for configuration files with unknown fields.
const EXIT_CONFIG: u8 = 78;

/// Semango - local hybrid search over your files
#[derive(Parser, Debug)]
#[command(name = "semango", version, about = "Local hybrid (BM25 + semantic) file search")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Root directory of the corpus (where semango.toml lives).
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Log level filter.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl and index the configured tree.
    Index,

    /// Search the index.
    Search {
        /// Search query.
        query: String,

        /// Maximum number of results.
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,

        /// Print hits as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.clone())
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if matches!(
                e.downcast_ref::<SemangoError>(),
                Some(SemangoError::ConfigUnknownField { .. })
            ) {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    let engine = Engine::new(&cli.root)?;

    match cli.command {
        Commands::Index => {
            let report = engine.index().await?;
            println!(
                "indexed {} files ({} skipped, {} failed), {} chunks, {} vectors",
                report.files_processed,
                report.files_skipped,
                report.files_failed,
                report.reps_indexed,
                report.vectors_indexed
            );
        }
        Commands::Search { query, top_k, json } => {
            let hits = engine.search(&query, top_k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("no results");
            } else {
                for hit in &hits {
                    println!(
                        "{:>2}. {:.4}  {} [{}] (lex {:.3}, sem {:.3})",
                        hit.rank,
                        hit.score,
                        hit.path,
                        hit.modality,
                        hit.lexical_score,
                        hit.semantic_score
                    );
                    let preview: String = hit.text.chars().take(160).collect();
                    println!("     {}", preview.replace('\n', " "));
                }
            }
        }
        Commands::Stats => {
            let stats = engine.stats()?;
            println!(
                "documents: {}\nchunks: {}\nindex size: {} bytes",
                stats.total_documents, stats.total_chunks, stats.index_size_bytes
            );
        }
    }

    engine.shutdown()?;
    Ok(())
}
