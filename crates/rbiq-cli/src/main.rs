//! CLI entry point for rbiq: preprocess, build, update, and query snapshots.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rbiq_core::{
    app_data_dir, build_index, export_bundle, load_config, load_config_from, load_documents,
    preprocess_documents, read_chunks, save_config, save_config_to, update_index, write_chunks,
    ChunkSummary, Config, Embedder, ProcessedIds, Retriever, SnapshotLayout,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rbiq")]
#[command(about = "rbiq: retrieval over scraped RBI documents")]
struct Cli {
    /// Config file (default: config.toml in the app data directory).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Snapshot directory; overrides `index_dir` from the config.
    #[arg(long, global = true, value_name = "DIR")]
    index_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show the snapshot's size and dimension.
    Info,
    /// Show where rbiq stores its config and snapshot (app data directory).
    DataDir,
    /// Set and persist the snapshot directory in the config file.
    SetIndexDir {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Clean and chunk scraped documents into a chunks file.
    Preprocess {
        /// Documents JSON file, or a directory of .json/.txt/.md files.
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(long, default_value = "data/chunks.json")]
        out: PathBuf,
    },
    /// Embed a chunks file and replace the snapshot with it.
    Build {
        #[arg(long, default_value = "data/chunks.json")]
        chunks: PathBuf,
    },
    /// Append documents not indexed before.
    Update {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        /// Keep running and update whenever INPUT (a directory) changes.
        #[arg(long, conflicts_with = "interval_secs")]
        watch: bool,
        /// Keep running and update every N seconds.
        #[arg(long, value_name = "N")]
        interval_secs: Option<u64>,
    },
    /// Export the snapshot as a single bundle file.
    Bundle {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Retrieve the chunks nearest to a question.
    Query {
        #[arg(value_name = "TEXT")]
        text: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Serve from a bundle file instead of the split snapshot.
        #[arg(long)]
        bundle: Option<PathBuf>,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config(),
    };
    let layout = match &cli.index_dir {
        Some(dir) => SnapshotLayout::new(dir),
        None => config.layout()?,
    };

    match cli.command.unwrap_or(Commands::Info) {
        Commands::Info => {
            let store = layout.load()?;
            let ledger = ProcessedIds::load(&layout.ledger_path())?;
            println!("Snapshot {}", layout.dir().display());
            println!("  chunks:    {}", store.len());
            println!("  dimension: {}", store.dimension());
            println!("  processed documents (ledger): {}", ledger.len());
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => anyhow::bail!("could not determine app data directory"),
        },
        Commands::SetIndexDir { dir } => {
            let dir = config.set_index_dir(&dir)?;
            match &cli.config {
                Some(path) => save_config_to(path, &config)?,
                None => save_config(&config)?,
            }
            println!("Snapshot directory set to {}", dir.display());
        }
        Commands::Preprocess { input, out } => {
            let docs = load_documents(&input)?;
            let prepared = preprocess_documents(&docs, &config.chunking)?;
            write_chunks(&out, &prepared.chunks)?;
            let summary_path = ChunkSummary::path_for(&out);
            ChunkSummary::from_chunks(&prepared.chunks)
                .write(&summary_path)
                .with_context(|| format!("writing {}", summary_path.display()))?;
            println!(
                "Preprocessed {} chunk(s) from {} document(s) ({} skipped) into {}",
                prepared.chunks.len(),
                prepared.processed_documents,
                prepared.skipped_documents,
                out.display()
            );
        }
        Commands::Build { chunks } => {
            let chunks = read_chunks(&chunks)?;
            let embedder = config.embedder.build()?;
            let options = config.index_options();
            let report = build_index(chunks, embedder.as_ref(), &layout, &options).await?;
            println!(
                "Stored {} vector(s) of dimension {} in {}",
                report.chunks,
                report.dimension,
                layout.dir().display()
            );
        }
        Commands::Update {
            input,
            watch,
            interval_secs,
        } => {
            let embedder = config.embedder.build()?;
            run_update(&input, &embedder, &layout, &config).await?;
            if watch {
                watch_updates(input, embedder, layout, config).await?;
            } else if let Some(secs) = interval_secs {
                loop {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    if let Err(e) = run_update(&input, &embedder, &layout, &config).await {
                        tracing::error!(error = %format!("{e:#}"), "scheduled update failed");
                    }
                }
            }
        }
        Commands::Bundle { out } => {
            let out = out.unwrap_or_else(|| layout.bundle_path());
            let n = export_bundle(&layout, &out)?;
            println!("Bundled {} chunk(s) into {}", n, out.display());
        }
        Commands::Query {
            text,
            top_k,
            bundle,
            json,
        } => {
            let embedder = config.embedder.build()?;
            let retriever = match bundle {
                Some(path) => Retriever::open_bundle(&path, embedder)?,
                None => Retriever::open(&layout, embedder)?,
            };
            let results = retriever
                .retrieve(&text, top_k.unwrap_or(config.retrieval.top_k))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                println!(
                    "{} of {} chunk(s), nearest first:",
                    results.len(),
                    retriever.store().len()
                );
                for (rank, r) in results.iter().enumerate() {
                    let preview: String = r.content.chars().take(160).collect();
                    println!("{:>2}. [{:.4}] {}", rank + 1, r.score, r.title);
                    if !r.source.is_empty() {
                        println!("    {}", r.source);
                    }
                    println!("    {}", preview);
                }
            }
        }
    }
    Ok(())
}

async fn run_update(
    input: &Path,
    embedder: &Arc<dyn Embedder>,
    layout: &SnapshotLayout,
    config: &Config,
) -> anyhow::Result<()> {
    let docs = load_documents(input)?;
    let report = update_index(docs, embedder.as_ref(), layout, &config.index_options()).await?;
    if report.new_documents == 0 {
        println!("No new documents found.");
    } else {
        println!(
            "{} new document(s), {} chunk(s) appended, {} total",
            report.new_documents, report.appended_chunks, report.total_chunks
        );
    }
    Ok(())
}

/// Blocks on the inbox watcher; each change runs an update on the runtime.
async fn watch_updates(
    inbox: PathBuf,
    embedder: Arc<dyn Embedder>,
    layout: SnapshotLayout,
    config: Config,
) -> anyhow::Result<()> {
    let handle = tokio::runtime::Handle::current();
    let watched = inbox.clone();
    tokio::task::spawn_blocking(move || {
        rbiq_core::watch_inbox(&watched, move |docs| {
            let docs = match docs {
                Ok(docs) => docs,
                Err(e) => {
                    tracing::warn!(error = %e, "could not read inbox");
                    return;
                }
            };
            let options = config.index_options();
            match handle.block_on(update_index(docs, embedder.as_ref(), &layout, &options)) {
                Ok(report) if report.new_documents > 0 => tracing::info!(
                    new_documents = report.new_documents,
                    appended = report.appended_chunks,
                    "inbox update applied"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "inbox update failed"),
            }
        })
    })
    .await
    .context("watcher thread panicked")?
    .with_context(|| format!("watching {}", inbox.display()))?;
    Ok(())
}
