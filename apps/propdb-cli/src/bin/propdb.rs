use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use propdb_core::config::Config;
use propdb_core::types::QueryResult;
use propdb_rag::{LifecycleState, PropertyIndex, RefreshReport};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "propdb", about = "Build and query the property knowledge index", version)]
struct Cli {
    /// Directory of property documents (overrides corpus.dir)
    #[arg(long, global = true)]
    corpus: Option<String>,

    /// Directory holding index generations (overrides index.root)
    #[arg(long, global = true)]
    index_root: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Load the existing index, building it if missing or unusable
    Build,

    /// Rebuild from the corpus and swap the new generation in
    Refresh,

    /// Top matching chunks for a question
    Query {
        query: String,
        /// Number of chunks
        #[arg(short, default_value_t = 3)]
        k: usize,
    },

    /// Prompt-ready context block (general overview without a query)
    Context { query: Option<String> },

    /// Retrieval diagnostics for a question
    Insights { query: String },

    /// Lifecycle state and store statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Config::load()?.settings()?;
    if let Some(dir) = cli.corpus {
        settings.corpus.dir = dir;
    }
    if let Some(root) = cli.index_root {
        settings.index.root = root;
    }
    info!(corpus = %settings.corpus.dir, index_root = %settings.index.root, provider = ?settings.embedding.provider, "opening property index");
    let base = std::env::current_dir().context("resolving working directory")?;
    let embedding = settings.embedding.clone();
    let embedder = tokio::task::spawn_blocking(move || propdb_embed::get_default_embedder(&embedding)).await??;
    let index = Arc::new(PropertyIndex::new(&settings, &base, embedder)?);

    let start = with_spinner("loading property index", index.start()).await?;
    match cli.command {
        Command::Build => print_report(cli.format, &start)?,
        Command::Refresh => {
            let report = with_spinner("rebuilding property index", index.refresh()).await?;
            print_report(cli.format, &report)?;
        }
        Command::Query { query, k } => {
            let hits = index.query_property_info(&query, k).await;
            match cli.format {
                OutputFormat::Json => print_json(&hits)?,
                OutputFormat::Plain => print_hits(&hits),
            }
        }
        Command::Context { query } => {
            let context = index.format_context(query.as_deref()).await;
            match cli.format {
                OutputFormat::Json => print_json(&context)?,
                OutputFormat::Plain => println!("{context}"),
            }
        }
        Command::Insights { query } => {
            let insights = index.insights(&query).await;
            match cli.format {
                OutputFormat::Json => print_json(&insights)?,
                OutputFormat::Plain => {
                    println!("Query: {}", insights.query);
                    println!("Relevant chunks: {}", insights.relevant_chunks);
                    print_hits(&insights.all_results);
                    println!("\n{}", insights.context);
                }
            }
        }
        Command::Stats => {
            let stats = index.stats();
            match cli.format {
                OutputFormat::Json => print_json(&stats)?,
                OutputFormat::Plain => {
                    println!("State:      {}", stats.state);
                    println!("Generation: {}", stats.generation);
                    println!("Durable:    {}", stats.durable);
                    println!("Store id:   {}", stats.store_id);
                    println!("Corpus:     {}", stats.corpus_dir.display());
                    println!("Index root: {}", stats.index_root.display());
                    if let Some(store) = &stats.store {
                        println!("Records:    {}", store.record_count);
                        println!("Model:      {}", store.embedding_model);
                        println!("Chunking:   {} / {} overlap", store.chunk_size, store.chunk_overlap);
                    }
                    if let Some(err) = &stats.last_error {
                        println!("Last error: {err}");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Runs a build step behind a spinner; a failed report becomes the exit error.
async fn with_spinner<F>(message: &'static str, step: F) -> Result<RefreshReport>
where
    F: std::future::Future<Output = RefreshReport>,
{
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    let report = step.await;
    pb.finish_and_clear();
    if report.state == LifecycleState::Failed {
        bail!("{message} failed: {}", report.error.as_deref().unwrap_or("unknown error"));
    }
    Ok(report)
}

fn print_report(format: OutputFormat, report: &RefreshReport) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Plain => {
            let status = if report.success { "✅" } else { "⚠️ " };
            println!(
                "{status} {} (generation {}, {} chunks, {} ms)",
                report.state, report.generation, report.record_count, report.duration_ms
            );
            if let Some(err) = &report.error {
                println!("   {err}");
            }
            Ok(())
        }
    }
}

fn print_hits(hits: &[QueryResult]) {
    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        let section = hit.metadata.section.as_deref().unwrap_or("-");
        println!("{}. [{:.4}] {} #{} ({section})", i + 1, hit.score, hit.metadata.filename, hit.sequence_index);
        println!("   {}", hit.content.replace('\n', "\n   "));
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
