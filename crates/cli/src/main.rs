//! whence binary — thin CLI shell over the `whence-core` and `whence-http`
//! library crates.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use whence_core::config::Settings;
use whence_core::embed::create_embedder;
use whence_core::importer::placeholder_timestamp;
use whence_core::lookup;
use whence_core::pypi::{
    canonicalize_name, parse_shard_spec, select_candidates, url_shard, PyPiClient,
};
use whence_core::{Importer, Store};

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Index package archives and locate where a source file came from.
#[derive(Parser)]
#[command(name = "whence", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Postgres connection string
    #[arg(long, env = "WHENCE_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Embedding model: simple (default), minilm, bge-small, bge-base
    #[arg(long, env = "WHENCE_MODEL", global = true)]
    model: Option<String>,

    /// Embedding dimension override (must match the stored schema)
    #[arg(long, env = "WHENCE_DIM", global = true)]
    dim: Option<usize>,

    /// Alternate package index base URL
    #[arg(long, env = "WHENCE_INDEX_URL", global = true)]
    index_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the schema (and the vector extension)
    Createdb {
        /// Drop all tables first
        #[arg(long)]
        clear: bool,
    },
    /// Ingest a project's distributions from the package index
    ImportProject {
        /// Project names
        #[arg(required = true)]
        projects: Vec<String>,

        /// Shards handled by this worker, e.g. "3,5-9"
        #[arg(long, default_value = "0-99")]
        shard: String,

        /// Total shard count
        #[arg(long, default_value_t = 100)]
        of_shards: u32,
    },
    /// Ingest one distribution URL
    ImportUrl { url: String },
    /// Ingest an archive from disk
    ImportLocalArchive { path: PathBuf },
    /// Ingest one source file and print its normalized hash
    ImportLocalFile { path: PathBuf },
    /// Query the index
    Lookup {
        #[command(subcommand)]
        what: LookupCommands,
    },
    /// Launch the HTTP façade
    Web {
        #[arg(long, default_value_t = 8000)]
        port: u16,

        /// Accepted for parity with other servers; has no effect
        #[arg(long)]
        reload: bool,
    },
}

#[derive(Subcommand)]
enum LookupCommands {
    /// Tiered lookup of a local source file
    LocalFile { path: PathBuf },
    /// List the snippet hashes of a normalized file
    NormalizedHash { hash: String },
    /// List the normalized files containing a snippet
    SnippetHash { hash: String },
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("whence=info".parse().expect("static directive")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let database_url = cli
        .database_url
        .clone()
        .context("a connection string is required (--database-url or WHENCE_DATABASE_URL)")?;
    let settings = Settings::new(database_url, cli.model.clone(), cli.dim, cli.index_url.clone());
    let store = Store::connect(&settings.database_url, settings.dim).await?;

    match cli.command {
        Commands::Createdb { clear } => {
            store.create_schema(clear).await?;
            println!("schema ready (dim={})", settings.dim);
        }
        Commands::ImportProject { projects, shard, of_shards } => {
            let importer = build_importer(&settings, store)?;
            let shards = parse_shard_spec(&shard)?;
            if of_shards as usize != shards.len() {
                println!(
                    "Importing {:.1}% of project",
                    shards.len() as f64 * 100.0 / of_shards as f64
                );
            }
            let index = PyPiClient::new(settings.index_url.as_deref());
            for project in projects {
                let canonical = canonicalize_name(&project);
                let packages = index.project_page(&canonical).await?;
                for dp in select_candidates(&packages) {
                    if !shards.contains(&url_shard(&dp.url, of_shards)) {
                        println!("omit {}", dp.url);
                        continue;
                    }
                    importer
                        .import_url(
                            dp.sha256.as_deref(),
                            &dp.url,
                            dp.upload_time.unwrap_or_else(placeholder_timestamp),
                            Some(&canonical),
                            dp.version.as_deref(),
                        )
                        .await?;
                }
            }
        }
        Commands::ImportUrl { url } => {
            let importer = build_importer(&settings, store)?;
            let hash =
                importer.import_url(None, &url, placeholder_timestamp(), None, None).await?;
            println!("{hash}");
        }
        Commands::ImportLocalArchive { path } => {
            let importer = build_importer(&settings, store)?;
            let hash = importer.import_local_archive(&path).await?;
            println!("{hash}");
        }
        Commands::ImportLocalFile { path } => {
            let importer = build_importer(&settings, store)?;
            let imported = importer.import_one_local_file(&path).await?;
            println!("{}", imported.normalized_hash);
        }
        Commands::Lookup { what } => match what {
            LookupCommands::LocalFile { path } => {
                let importer = build_importer(&settings, store)?;
                let bytes = tokio::fs::read(&path).await?;
                let outcome = lookup::lookup_file(&importer, &bytes).await?;
                print_lookup(&outcome);
            }
            LookupCommands::NormalizedHash { hash } => {
                let hashes = store.normalized_snippet_hashes(&hash).await?;
                if hashes.is_empty() && !store.normalized_exists(&hash).await? {
                    println!("Not yet available");
                } else {
                    for h in hashes {
                        println!("{h}");
                    }
                }
            }
            LookupCommands::SnippetHash { hash } => {
                let snippet = store
                    .get_snippet(&hash)
                    .await?
                    .with_context(|| format!("unknown snippet {hash}"))?;
                for normalized in store.normalized_containing_snippet(&snippet.hash).await? {
                    println!("{normalized}");
                }
            }
        },
        Commands::Web { port, reload } => {
            if reload {
                warn!("--reload has no effect");
            }
            let importer = build_importer(&settings, store)?;
            let ctx = whence_http::AppContext {
                importer: Arc::new(importer),
                index: Arc::new(PyPiClient::new(settings.index_url.as_deref())),
            };
            let app = whence_http::router(ctx);
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
                .await
                .with_context(|| format!("could not bind port {port}"))?;
            info!(port, "http://127.0.0.1:{port}");
            axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
        }
    }
    Ok(())
}

fn build_importer(settings: &Settings, store: Store) -> anyhow::Result<Importer> {
    let embedder = create_embedder(settings.model.as_deref(), settings.dim)?;
    Ok(Importer::new(store, embedder))
}

fn print_lookup(outcome: &lookup::LookupOutcome) {
    println!("hash: {}", outcome.hash);
    println!("normalized: {}", outcome.normalized_hash);

    for m in &outcome.exact_matches {
        println!("{} in {} {}", m.sample_name, m.archive, m.vendor_level);
    }
    if outcome.exact_matches.is_empty() {
        println!("No exact matches, checking near matches...");
        for m in &outcome.normalized_matches {
            println!("{} in {} {}", m.sample_name, m.archive, m.vendor_level);
        }
        for near in &outcome.near_matches {
            println!("{:?}", near.snippet_text);
            for m in &near.matches {
                println!(
                    "{} in {} {} {:.4}",
                    m.sample_name, m.archive, m.vendor_level, m.distance
                );
            }
            println!("----");
        }
    }
}
