//! Mnemonic command-line client
//!
//! Runs one vault operation per invocation against a local storage root.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mnemonic_core::{
    indexer::LiveIndex,
    model::{FileId, GroupingKind, Taggable, ROOT_ASPECT_GROUP_ID},
    search::SearchIndex,
    Vault, VaultConfig,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mnemonic")]
#[command(about = "Per-user versioned document vault")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage root, overriding the configuration
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// User whose vault to operate on
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the user's vault
    Init,

    /// List users
    Users,

    /// Store a file
    Save {
        path: PathBuf,

        /// Name to store under; defaults to the file name
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long, default_value = "")]
        narration: String,

        /// Skip full-text indexing
        #[arg(long)]
        no_index: bool,
    },

    /// Write a stored file to disk or stdout
    Get {
        id: FileId,

        /// Version to fetch; the latest when omitted
        #[arg(short, long)]
        version: Option<u32>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Commit a new version of a file
    CheckIn {
        id: FileId,
        path: PathBuf,

        /// The version this edit was based on
        #[arg(short, long)]
        base: u32,

        #[arg(short, long, default_value = "")]
        comment: String,
    },

    /// Show the versions of a file
    History { id: FileId },

    /// Delete a file with all its versions
    Delete { id: FileId },

    /// Files with the same content as a file
    Duplicates { id: FileId },

    Aspect {
        #[command(subcommand)]
        action: AspectAction,
    },

    Briefcase {
        #[command(subcommand)]
        action: BriefcaseAction,
    },

    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Pack the originals of a grouping into one container
    Archive {
        /// aspect, briefcase or collection
        kind: GroupingKind,
        id: u64,

        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        #[arg(short, long)]
        name: String,

        /// Leave unencrypted when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Full-text search over indexed files
    Search {
        query: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Audit trail of a file
    Logs { id: FileId },

    /// Storage usage of the vault
    Stats,
}

#[derive(Subcommand)]
enum AspectAction {
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    List,
    Apply { aspect: u64, file: FileId },
    /// Create an aspect group under `parent`
    CreateGroup {
        name: String,
        #[arg(long, default_value_t = ROOT_ASPECT_GROUP_ID)]
        parent: u64,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Child groups of an aspect group
    Groups {
        #[arg(default_value_t = ROOT_ASPECT_GROUP_ID)]
        parent: u64,
    },
    DeleteGroup { group: u64 },
    Unapply { aspect: u64, file: FileId },
    Delete { aspect: u64 },
}

#[derive(Subcommand)]
enum BriefcaseAction {
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    List,
    Move { file: FileId, briefcase: u64 },
    Delete { briefcase: u64 },
}

#[derive(Subcommand)]
enum CollectionAction {
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    List,
    Add { collection: u64, file: FileId },
    Remove { collection: u64, file: FileId },
    Delete { collection: u64 },
}

#[derive(Serialize)]
struct Duplicate {
    id: FileId,
    name: String,
    score: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!(root = %config.root.display(), "Using storage root");

    match cli.command {
        Commands::Users => {
            for user in Vault::users(&config)? {
                println!("{user}");
            }
            return Ok(());
        }
        Commands::Init => {
            let user = require_user(&cli.user)?;
            Vault::create(config, user).with_context(|| format!("creating user {user}"))?;
            info!(user, "Vault ready");
            return Ok(());
        }
        _ => {}
    }

    let user = require_user(&cli.user)?;
    let vault = Vault::open(config, user).with_context(|| format!("opening vault of {user}"))?;
    let index = Arc::new(SearchIndex::new(vault.index_dir()).context("opening search index")?);
    let (live, worker) = LiveIndex::spawn(index);
    let live = Arc::new(live);
    let vault = vault.with_indexer(live.clone());

    run(&vault, cli.command)?;

    live.flush().await;
    drop(vault);
    drop(live);
    let _ = worker.await;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<VaultConfig> {
    let mut config = match &cli.config {
        Some(path) => VaultConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => VaultConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    Ok(config)
}

fn require_user(user: &Option<String>) -> Result<&str> {
    match user {
        Some(user) => Ok(user),
        None => bail!("--user is required for this command"),
    }
}

fn run(vault: &Vault, command: Commands) -> Result<()> {
    match command {
        Commands::Init | Commands::Users => {}
        Commands::Save { path, name, narration, no_index } => {
            let data = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .context("path has no usable file name; pass --name")?,
            };
            let id = vault.save_file(&name, &narration, &data, None, !no_index)?;
            println!("{id}");
        }
        Commands::Get { id, version, output } => {
            let data = match version {
                Some(version) => vault.retrieve_version(id, version)?,
                None => vault.retrieve_last_version(id)?.0,
            };
            match output {
                Some(path) => std::fs::write(&path, &data)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().write_all(&data)?,
            }
        }
        Commands::CheckIn { id, path, base, comment } => {
            let data = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let version = vault.check_in(id, &data, &comment, base)?;
            println!("{version}");
        }
        Commands::History { id } => {
            let file = vault.file(id)?;
            println!("v0\t{}\t{}", file.saved_at.to_rfc3339(), file.name);
            for version in vault.version_history(id)? {
                println!(
                    "v{}\t{}\t{}",
                    version.version,
                    version.checked_in_at.to_rfc3339(),
                    version.comment
                );
            }
        }
        Commands::Delete { id } => {
            let removed = vault.delete_file(id)?;
            println!("removed {removed} stored versions");
        }
        Commands::Duplicates { id } => {
            let duplicates = vault
                .duplicate_files(id)?
                .into_iter()
                .map(|(id, score)| -> Result<Duplicate> {
                    Ok(Duplicate {
                        id,
                        name: vault.file_name(id)?,
                        score,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&duplicates)?);
        }
        Commands::Aspect { action } => match action {
            AspectAction::Create { name, description } => {
                println!("{}", vault.create_aspect(&name, &description)?);
            }
            AspectAction::List => {
                println!("{}", serde_json::to_string_pretty(&vault.aspects()?)?)
            }
            AspectAction::CreateGroup { name, parent, description } => {
                println!("{}", vault.create_aspect_group(parent, &name, &description)?);
            }
            AspectAction::Groups { parent } => {
                let groups = vault
                    .child_aspect_groups(parent)?
                    .into_iter()
                    .map(|id| vault.aspect_group(id))
                    .collect::<mnemonic_core::Result<Vec<_>>>()?;
                println!("{}", serde_json::to_string_pretty(&groups)?);
            }
            AspectAction::DeleteGroup { group } => vault.delete_aspect_group(group)?,
            AspectAction::Apply { aspect, file } => {
                vault.apply_aspect(aspect, Taggable::File, file)?;
            }
            AspectAction::Unapply { aspect, file } => {
                vault.unapply_aspect(aspect, Taggable::File, file)?;
            }
            AspectAction::Delete { aspect } => vault.delete_aspect(aspect)?,
        },
        Commands::Briefcase { action } => match action {
            BriefcaseAction::Create { name, description } => {
                println!("{}", vault.create_briefcase(&name, &description)?);
            }
            BriefcaseAction::List => {
                println!("{}", serde_json::to_string_pretty(&vault.briefcases()?)?)
            }
            BriefcaseAction::Move { file, briefcase } => vault.move_to_briefcase(file, briefcase)?,
            BriefcaseAction::Delete { briefcase } => vault.delete_briefcase(briefcase)?,
        },
        Commands::Collection { action } => match action {
            CollectionAction::Create { name, description } => {
                println!("{}", vault.create_collection(&name, &description)?);
            }
            CollectionAction::List => {
                println!("{}", serde_json::to_string_pretty(&vault.collections()?)?)
            }
            CollectionAction::Add { collection, file } => {
                vault.add_to_collection(collection, file)?;
            }
            CollectionAction::Remove { collection, file } => {
                vault.remove_from_collection(collection, file)?;
            }
            CollectionAction::Delete { collection } => vault.delete_collection(collection)?,
        },
        Commands::Archive { kind, id, out_dir, name, password } => {
            let path = vault
                .archive_grouping(kind, id, &out_dir, &name, password.as_deref())
                .with_context(|| format!("archiving {kind} {id}"))?;
            println!("{}", path.display());
        }
        Commands::Search { query, limit } => {
            for id in vault.search(&query, limit)? {
                println!("{id}\t{}", vault.file_name(id)?);
            }
        }
        Commands::Logs { id } => {
            for entry in vault.file_logs(id)? {
                let when = entry
                    .time()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| entry.timestamp.to_string());
                println!("{}\t{when}\t{}", entry.sequence, entry.event.describe());
            }
        }
        Commands::Stats => print!("{}", vault.storage_metrics()?.summary()),
    }
    Ok(())
}
