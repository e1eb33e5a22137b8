//! `cdx`: resolve stable ids and ingest analyzed repositories

mod manifest;

use anyhow::{bail, Context, Result};
use cdx_ingest::{BatchReport, IngestConfig, IngestionSession};
use cdx_model::Uid;
use cdx_registry::StableIdRegistry;
use clap::{ArgAction, Parser, Subcommand};
use manifest::Manifest;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cdx")]
#[command(about = "Stable id registry and incremental repository ingestion", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "CDX_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// More log output (repeat for trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve uids to stable ids, allocating ids for unseen uids
    Resolve {
        /// Uids to resolve
        #[arg(required = true)]
        uids: Vec<String>,
    },

    /// Show the committed stable id of a uid
    Lookup {
        /// Uid to look up
        uid: String,
    },

    /// Ingest an analysis manifest and seal its index
    Ingest {
        /// Manifest JSON file
        manifest: PathBuf,

        /// Target index (default: derived from repository name and time)
        #[arg(long)]
        index: Option<String>,

        /// Seal the index even if some entities failed
        #[arg(long)]
        allow_partial: bool,
    },

    /// Show durable store statistics
    Stats,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs, cli.verbose);

    let config = match &cli.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };

    match cli.command {
        Commands::Resolve { uids } => resolve(&config, uids).await,
        Commands::Lookup { uid } => lookup(&config, uid).await,
        Commands::Ingest {
            manifest,
            index,
            allow_partial,
        } => ingest(&config, &manifest, index, allow_partial).await,
        Commands::Stats => stats(&config).await,
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool, verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_registry(config: &IngestConfig) -> Result<Arc<StableIdRegistry>> {
    let store = config
        .store
        .open()
        .await
        .context("cannot open stable id store")?;
    Ok(Arc::new(StableIdRegistry::new(store, config.registry.clone())))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn resolve(config: &IngestConfig, uids: Vec<String>) -> Result<()> {
    let registry = open_registry(config).await?;
    let uids: Vec<Uid> = uids.into_iter().map(Uid::new).collect();
    let ids = registry.resolve(&uids).await?;

    let mapping: serde_json::Map<String, serde_json::Value> = uids
        .iter()
        .zip(ids)
        .map(|(uid, id)| (uid.to_string(), id.get().into()))
        .collect();
    print_json(&serde_json::json!({
        "ids": mapping,
        "stats": registry.stats(),
    }))
}

async fn lookup(config: &IngestConfig, uid: String) -> Result<()> {
    let registry = open_registry(config).await?;
    let uid = Uid::new(uid);
    let id = registry.lookup_committed(&uid).await?;
    print_json(&serde_json::json!({ "uid": uid.to_string(), "id": id.get() }))
}

async fn stats(config: &IngestConfig) -> Result<()> {
    let store = config
        .store
        .open()
        .await
        .context("cannot open stable id store")?;
    let mappings = store.len().await?;
    print_json(&serde_json::json!({ "store": store.name(), "mappings": mappings }))
}

async fn ingest(
    config: &IngestConfig,
    manifest: &Path,
    index: Option<String>,
    allow_partial: bool,
) -> Result<()> {
    let manifest = Manifest::load(manifest).await?;
    let registry = open_registry(config).await?;

    let mut session_config = config.session.clone();
    if let Some(index) = index {
        session_config = session_config.with_index_name(index);
    }
    let session = IngestionSession::new(Arc::clone(&registry), config.backend.open(), session_config);

    session
        .initialize(manifest.repository, manifest.commit)
        .await
        .context("cannot initialize session")?;
    let (text, bound, projects, commit_files, languages) = tokio::try_join!(
        session.add_text_files(manifest.text_files),
        session.add_bound_files(manifest.bound_files),
        session.add_projects(manifest.projects),
        session.add_commit_files(manifest.commit_files),
        session.add_languages(manifest.languages),
    )?;
    let reports = [text, bound, projects, commit_files, languages];

    let failed: usize = reports.iter().map(BatchReport::failed).sum();
    for report in &reports {
        for failure in report.failures() {
            tracing::error!(operation = report.operation, "{failure}");
        }
    }
    if failed > 0 && !allow_partial {
        bail!(
            "{failed} entities failed; index {} left unsealed",
            session.index_name().unwrap_or_default()
        );
    }

    session.finalize().await.context("cannot finalize session")?;
    print_json(&serde_json::json!({
        "index": session.index_name(),
        "session": session.stats(),
        "registry": registry.stats(),
    }))
}
