use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use ragdb_core::config::{Config, Settings};
use ragdb_core::traits::Embedder;
use ragdb_embed::get_default_embedder;
use ragdb_retrieval::{generator_from_settings, Answer, RagService};
use ragdb_vector::{CorpusPaths, IndexedCorpus};

#[derive(Parser)]
#[command(name = "ragdb")]
#[command(about = "Offline semantic search and grounded answers over local text files", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (RUST_LOG wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index .txt files
    Ingest(IngestArgs),
    /// Raw nearest-neighbour search
    Search(QueryArgs),
    /// Answer a question from the indexed documents
    Ask(QueryArgs),
    /// Show corpus size, dimension and generation
    Status,
}

#[derive(Args)]
struct IngestArgs {
    /// File or directory to ingest (defaults to data.raw_txt_dir)
    path: Option<PathBuf>,
}

#[derive(Args)]
struct QueryArgs {
    query: String,

    /// Results to return (defaults to retrieval.top_k)
    #[arg(short = 'k', long)]
    top_k: Option<usize>,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]").unwrap_or_else(|_| ProgressStyle::default_spinner()));
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn open_corpus(settings: &Settings) -> Result<Arc<IndexedCorpus>> {
    let paths = CorpusPaths::from(&settings.data);
    let corpus = IndexedCorpus::open(paths.clone())
        .with_context(|| format!("opening corpus at {}", paths.index_path.display()))?;
    Ok(Arc::new(corpus))
}

fn load_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    let pb = spinner("loading embedding model");
    let embedder = get_default_embedder(&settings.embedding);
    pb.finish_and_clear();
    Ok(Arc::from(embedder?))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Config::load().and_then(|c| c.settings()).context("loading configuration")?;
    let corpus = open_corpus(&settings)?;

    if let Commands::Status = cli.command {
        let stats = corpus.stats();
        if cli.json {
            println!(
                "{}",
                serde_json::json!({
                    "count": stats.count,
                    "dim": stats.dim,
                    "generation": stats.generation,
                    "index_path": corpus.paths().index_path,
                    "meta_path": corpus.paths().meta_path,
                })
            );
        } else {
            println!("📦 {} chunks", stats.count);
            println!("📐 dimension: {}", stats.dim.map_or_else(|| "unset".to_string(), |d| d.to_string()));
            println!("🔢 generation: {}", stats.generation);
            println!("🗂  index: {}", corpus.paths().index_path.display());
            println!("🗂  metadata: {}", corpus.paths().meta_path.display());
        }
        return Ok(());
    }

    let embedder = load_embedder(&settings)?;
    let mut service = RagService::from_settings(corpus, embedder, &settings);
    // The blocking HTTP client must be built and dropped outside the runtime.
    if matches!(cli.command, Commands::Ask(_)) {
        service = service.with_generator(generator_from_settings(&settings.generation)?);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(&cli, &settings, &service));
    drop(runtime);
    result
}

async fn run(cli: &Cli, settings: &Settings, service: &RagService) -> Result<()> {
    match &cli.command {
        Commands::Ingest(args) => {
            let path = args.path.clone().unwrap_or_else(|| settings.data.raw_txt_dir());
            let pb = spinner(&format!("ingesting {}", path.display()));
            let added = service.ingest_path(path.clone()).await;
            pb.finish_and_clear();
            let added = added.with_context(|| format!("ingesting {}", path.display()))?;
            let status = service.status();
            if cli.json {
                println!("{}", serde_json::json!({ "status": "ok", "chunks_added": added, "total": status.count }));
            } else {
                println!("✅ Ingested {added} chunks from {} ({} total)", path.display(), status.count);
            }
        }
        Commands::Search(args) => {
            let top_k = args.top_k.unwrap_or(settings.retrieval.top_k);
            let hits = service.search(&args.query, top_k).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "query": args.query, "results": hits }))?);
            } else {
                println!("🔍 {} results for: \"{}\"", hits.len(), args.query);
                for (i, hit) in hits.iter().enumerate() {
                    let source = hit.record.source.as_deref().unwrap_or("unknown");
                    let page = hit.record.page.map_or_else(|| "NA".to_string(), |p| p.to_string());
                    println!("\n  {}. score={:.4}  source={source}  page={page}", i + 1, hit.score);
                    println!("     📝 {}", hit.record.text);
                }
            }
        }
        Commands::Ask(args) => {
            let top_k = args.top_k.unwrap_or(settings.retrieval.top_k);
            let pb = spinner("thinking");
            let answer = service.ask(&args.query, top_k).await;
            pb.finish_and_clear();
            print_answer(&answer?, cli.json)?;
        }
        Commands::Status => {}
    }
    Ok(())
}

fn print_answer(answer: &Answer, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }
    println!("💬 {}", answer.answer);
    if !answer.citations.is_empty() {
        println!("\n📚 Citations:");
        for (i, c) in answer.citations.iter().enumerate() {
            let page = c.page.map_or_else(|| "NA".to_string(), |p| p.to_string());
            println!("  [{}] {} page={page} score={:.4}", i + 1, c.source, c.score);
            if let Some(excerpt) = &c.excerpt {
                println!("      {excerpt}");
            }
        }
    }
    Ok(())
}
