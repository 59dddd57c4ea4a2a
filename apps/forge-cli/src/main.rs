//! # forge
//!
//! Local driver for Forge Profile Sync.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               forge CLI                                 │
//! │                                                                         │
//! │  snapshot.json ───► SyncOrchestrator ───► LocalDirectoryStore (--store) │
//! │        ▲                   │                                            │
//! │        │                   ├──► SyncEvent JSON lines on stdout          │
//! │        └── written back ◄──┘    (logs go to stderr)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Commands
//! - `forge export --snapshot m.json --name "PLA Fine" --info "0.1mm"`
//! - `forge import --snapshot m.json --name "PLA Fine" --url file:///...`
//! - `forge import --snapshot m.json --name "PLA Fine" --file profile.txt`
//! - `forge list`
//!
//! Export and import write the snapshot back, since both modify durable
//! layers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use forge_core::{Component, ComponentId, ComponentSet, SettingSchema};
use forge_sync::{ChannelEmitter, LocalDirectoryStore, StagingArea, SyncConfig, SyncEvent, SyncOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "forge")]
#[command(about = "Export and import slicer profiles through a local profile store")]
struct Cli {
    /// Directory acting as the cloud profile store
    #[arg(long, default_value = "./forge-store")]
    store: PathBuf,

    /// Sync config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Staging directory override
    #[arg(long)]
    staging: Option<PathBuf>,

    /// Log monitored keys and unsaved must-persist keys
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Persist and upload the current configuration
    Export {
        /// Component set snapshot (JSON)
        #[arg(long)]
        snapshot: PathBuf,

        /// Profile name shown in the cloud list
        #[arg(long)]
        name: String,

        /// Free-form description
        #[arg(long, default_value = "")]
        info: String,
    },

    /// Apply a profile to the machine in the snapshot
    Import {
        /// Component set snapshot (JSON)
        #[arg(long)]
        snapshot: PathBuf,

        /// Profile name for new durable layers
        #[arg(long)]
        name: String,

        /// Profile URL from `forge list`
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        url: Option<String>,

        /// Settings text file
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List cloud profiles for the configured device and slicer
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let mut config = SyncConfig::load(cli.config.clone()).context("loading sync config")?;
    if cli.debug {
        config.engine.debug_mode = true;
    }
    info!(store = %cli.store.display(), device = %config.cloud.device_type, "Configuration loaded");

    let store = Arc::new(LocalDirectoryStore::new(&cli.store));

    match cli.command {
        Command::Export { snapshot, name, info } => {
            let set = read_snapshot(&snapshot).await?;
            let (mut orchestrator, printer) = connect(config, set, &store, cli.staging.as_deref())?;

            let outcome = orchestrator.export_profile(&name, &info).await;
            let set = orchestrator.into_components();
            printer.await?;

            // Durable writes from the merge passes stay even when the upload fails.
            write_snapshot(&snapshot, &set).await?;
            let receipt = outcome?;
            eprintln!("{}", serde_json::to_string_pretty(&receipt.report)?);
        }
        Command::Import { snapshot, name, url, file } => {
            let set = read_snapshot(&snapshot).await?;
            let (mut orchestrator, printer) = connect(config, set, &store, cli.staging.as_deref())?;

            let outcome = match (url, file) {
                (Some(url), _) => orchestrator.import_from_url(&url, &name).await,
                (None, Some(file)) => {
                    let content = tokio::fs::read_to_string(&file)
                        .await
                        .with_context(|| format!("reading {}", file.display()))?;
                    orchestrator.import_content(&content, &name).await
                }
                (None, None) => bail!("either --url or --file is required"),
            };
            let set = orchestrator.into_components();
            printer.await?;

            // Chunks applied before a failure are kept.
            write_snapshot(&snapshot, &set).await?;
            let summary = outcome?;
            eprintln!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::List => {
            // Listing never touches layers.
            let empty = ComponentSet::new(Component::new(ComponentId::Global, SettingSchema::default()));
            let (orchestrator, printer) = connect(config, empty, &store, cli.staging.as_deref())?;
            let outcome = orchestrator.fetch_cloud_profiles().await;
            drop(orchestrator);
            printer.await?;
            outcome?;
        }
    }

    Ok(())
}

/// Builds an orchestrator over the local store and starts printing its events.
fn connect(
    config: SyncConfig,
    set: ComponentSet,
    store: &Arc<LocalDirectoryStore>,
    staging: Option<&Path>,
) -> anyhow::Result<(SyncOrchestrator, JoinHandle<()>)> {
    let (emitter, events) = ChannelEmitter::new();
    let mut builder = SyncOrchestrator::builder(config, set)
        .with_catalog(store.clone())
        .with_uploader(store.clone())
        .with_downloader(store.clone())
        .with_emitter(Arc::new(emitter));
    if let Some(dir) = staging {
        builder = builder.with_staging(StagingArea::new(dir, "txt"));
    }

    let orchestrator = builder.build().context("building orchestrator")?;
    Ok((orchestrator, tokio::spawn(print_events(events))))
}

/// Prints each event as one JSON line until the orchestrator is dropped.
async fn print_events(mut events: UnboundedReceiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
        }
    }
}

async fn read_snapshot(path: &Path) -> anyhow::Result<ComponentSet> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing snapshot {}", path.display()))
}

async fn write_snapshot(path: &Path, set: &ComponentSet) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(set)?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("writing snapshot {}", path.display()))?;
    info!(path = %path.display(), "Snapshot updated");
    Ok(())
}
