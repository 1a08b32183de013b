//! docs: browse and manage the document tree of a piece of equipment.
//!
//! Every command loads the equipment's tree through the coordinator, so
//! changes are validated locally and applied only once the store confirms
//! them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docs_cli::config::Overrides;
use docs_cli::{Config, JsonFileStore};
use docs_core::{
    DocumentIndex, DocumentNode, DocumentRecord, ListingOrder, NavigationCursor, OutcomeStatus,
    PathKey, SyncCoordinator, UploadCandidate, UploadConflict,
};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docs")]
#[command(about = "Equipment document index")]
struct Args {
    /// Directory holding the document trees (default ~/.equipment-docs)
    #[arg(long, global = true)]
    store_dir: Option<String>,

    /// Equipment whose documents to manage
    #[arg(short, long, global = true)]
    equipment: Option<String>,

    /// Extension enforced on uploads, or "none"
    #[arg(long, global = true)]
    extension: Option<String>,

    /// Print records as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty document tree for the equipment
    Init { root_name: String },
    /// List a folder (the root by default)
    Ls {
        folder: Option<String>,
        /// Keep stored order instead of folders first
        #[arg(long)]
        stored: bool,
    },
    /// Print the whole tree
    Tree,
    /// Print the breadcrumb trail of a node
    Path { id: String },
    /// Create a folder
    Mkdir { parent: String, name: String },
    /// Rename a file or folder
    Rename { id: String, new_name: String },
    /// Delete files and folders with their contents
    Rm {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Upload local files into a folder
    Upload {
        parent: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,docs_cli=debug,docs_core=debug"
    } else {
        "info,docs_cli=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env(Overrides {
        store_dir: args.store_dir.clone(),
        equipment: args.equipment.clone(),
        extension: args.extension.clone(),
    })?;
    debug!("Store directory: {:?}", config.store_dir);

    let store = JsonFileStore::new(config.store_dir.clone());

    if let Command::Init { root_name } = &args.command {
        let snapshot = store
            .init(&config.equipment, root_name)
            .await
            .with_context(|| format!("Failed to initialize {}", config.equipment))?;
        info!("Initialized {} with root {}", config.equipment, snapshot.root_id);
        return Ok(());
    }

    let mut coordinator =
        SyncCoordinator::new(store).with_upload_policy(config.upload_policy.clone());
    coordinator
        .select_equipment(&config.equipment)
        .await
        .with_context(|| format!("Failed to load documents of {}", config.equipment))?;

    run(&mut coordinator, args.command, args.json).await
}

async fn run(
    coordinator: &mut SyncCoordinator<JsonFileStore>,
    command: Command,
    json: bool,
) -> Result<()> {
    match command {
        Command::Init { .. } => Ok(()),
        Command::Ls { folder, stored } => {
            let index = loaded(coordinator)?;
            let mut cursor = NavigationCursor::new(index);
            if let Some(folder) = folder {
                cursor.enter(index, &PathKey::new(folder))?;
            }
            let order = if stored {
                ListingOrder::Stored
            } else {
                ListingOrder::FoldersFirst
            };
            let listing = cursor.listing(index, order)?;
            if json {
                print_json(&listing)?;
            } else {
                for node in listing {
                    println!("{}", describe(node));
                }
            }
            Ok(())
        }
        Command::Tree => {
            let index = loaded(coordinator)?;
            let root = index.root();
            let nodes = index.descendants_of(root.id())?;
            if json {
                let mut all = vec![root];
                all.extend(nodes);
                return print_json(&all);
            }
            println!("{}/", root.name());
            for node in nodes {
                let depth = node.id().depth_below(root.id()).unwrap_or(1);
                println!("{}{}", "  ".repeat(depth), describe(node));
            }
            Ok(())
        }
        Command::Path { id } => {
            let chain = coordinator.ancestor_chain(&PathKey::new(id))?;
            let names: Vec<&str> = chain.iter().map(|node| node.name()).collect();
            println!("{}", names.join(" > "));
            Ok(())
        }
        Command::Mkdir { parent, name } => {
            let id = coordinator.request_create_folder(&PathKey::new(parent), &name).await?;
            println!("{}", id);
            Ok(())
        }
        Command::Rename { id, new_name } => {
            let outcome = coordinator.request_rename(&PathKey::new(id), &new_name).await?;
            if outcome.old_id == outcome.new_id {
                println!("{}", outcome.new_id);
            } else {
                println!("{} -> {}", outcome.old_id, outcome.new_id);
            }
            Ok(())
        }
        Command::Rm { ids } => {
            let ids: Vec<PathKey> = ids.into_iter().map(PathKey::new).collect();
            let report = coordinator.request_delete(&ids).await?;
            for id in &report.deleted {
                println!("deleted {}", id);
            }
            for missing in &report.not_confirmed {
                eprintln!("{}", missing);
            }
            if report.status() == OutcomeStatus::Rejected {
                bail!("Nothing was deleted");
            }
            Ok(())
        }
        Command::Upload { parent, files } => {
            let candidates = read_candidates(&files).await?;
            let report = coordinator.request_upload(&PathKey::new(parent), candidates).await?;
            for id in &report.uploaded {
                println!("uploaded {}", id);
            }
            for name in &report.failed {
                eprintln!("not accepted: {}", name);
            }
            for excluded in &report.excluded {
                let reason = match &excluded.conflict {
                    UploadConflict::ExistingSibling => "name already exists".to_string(),
                    UploadConflict::DuplicateInBatch => "duplicate in this upload".to_string(),
                    UploadConflict::InvalidName(e) => e.to_string(),
                };
                eprintln!("skipped {}: {}", excluded.normalized, reason);
            }
            if let Some(partial) = report.partial() {
                eprintln!("{}", partial);
            }
            if report.status() == OutcomeStatus::Rejected {
                bail!("Nothing was uploaded");
            }
            Ok(())
        }
    }
}

fn loaded(coordinator: &SyncCoordinator<JsonFileStore>) -> Result<&DocumentIndex> {
    coordinator.index().context("No equipment loaded")
}

/// Read local files concurrently, named by their file names.
async fn read_candidates(files: &[PathBuf]) -> Result<Vec<UploadCandidate>> {
    let reads = files.iter().map(|path| async move {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("Not a file: {:?}", path))?;
        Ok::<_, anyhow::Error>(UploadCandidate::new(name, bytes))
    });
    futures::future::try_join_all(reads).await
}

fn describe(node: &DocumentNode) -> String {
    if node.is_directory() {
        format!("{}/  ({} items)  [{}]", node.name(), node.children_count(), node.id())
    } else {
        let size = node
            .size_bytes()
            .map(|s| format!("{} bytes", s))
            .unwrap_or_else(|| "-".to_string());
        format!("{}  {}  [{}]", node.name(), size, node.id())
    }
}

fn print_json(nodes: &[&DocumentNode]) -> Result<()> {
    let records: Vec<DocumentRecord> = nodes.iter().map(|node| node.to_record()).collect();
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
