//! # tagweave CLI (`tw`)
//!
//! The `tw` binary manages semantic tags in a vault of text documents and
//! builds a corpus index over them.
//!
//! ## Usage
//!
//! ```bash
//! tw --config ./config/tw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tw estimate` | Count characters and tokens a classification pass would send |
//! | `tw index` | Build the concept index and save the snapshot |
//! | `tw stats` | Summarize the saved snapshot |
//! | `tw search <query>` | Find concepts by label |
//! | `tw concept <label>` | Show one concept and its occurrences |
//! | `tw related <path>` | Documents sharing concepts with a document |
//! | `tw top` | Most frequent concepts |
//! | `tw by-type <type>` | Concepts tagged with a given type |
//! | `tw tags <path>` | List a document's tags |
//! | `tw tag add\|remove\|clear` | Edit a document's tag block |
//! | `tw registry list\|show\|alias\|merge\|reset` | Manage concept identities |
//!
//! ## Examples
//!
//! ```bash
//! # Tag a note, reusing the registry id for the concept
//! tw tag add notes/energy.md Axiom "Conservation of Energy"
//!
//! # Make a second phrasing resolve to the same concept
//! tw registry alias "Conservation of Energy" "Energy conservation"
//!
//! # Index one folder with JSON progress on stderr
//! tw index --folder notes --progress json
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tagweave::config::{self, Config};
use tagweave::engine::IndexEngine;
use tagweave::export::{load_snapshot, save_snapshot};
use tagweave::models::{TagDraft, TagType};
use tagweave::progress::{format_number, ProgressMode};
use tagweave::registry::ConceptRegistry;
use tagweave::snapshot::{IndexSnapshot, Scope};
use tagweave::tag_codec::WriteMode;
use tagweave::tag_store::TagStore;
use tagweave::traits::Vault;
use tagweave::vault_fs::FsVault;
use tagweave::{get, search, stats};

/// tagweave CLI: typed semantic tags and a concept index for text vaults.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tw.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tw",
    about = "tagweave: typed semantic tags and a concept index for text vaults",
    version,
    long_about = "tagweave stores typed, identified annotations inside plain-text documents, \
    keeps one stable id per concept across the vault, and indexes the corpus into concepts, \
    cross-document relations and co-occurrence rankings."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tw.toml")]
    config: PathBuf,

    /// Log more to stderr (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the size of a classification pass.
    ///
    /// Counts document characters (tag blocks excluded) and converts them to
    /// tokens and cost using the `[cost]` section. Makes no AI calls.
    Estimate {
        /// Only documents under this folder.
        #[arg(long)]
        folder: Option<String>,
    },

    /// Build the concept index and save the snapshot.
    ///
    /// Ctrl-C aborts the run at the next batch boundary; the partial
    /// snapshot is still saved and marked as aborted.
    Index {
        /// Only documents under this folder.
        #[arg(long)]
        folder: Option<String>,

        /// Progress on stderr. Defaults to human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Summarize the saved index snapshot.
    Stats,

    /// Find concepts whose label matches a query.
    Search { query: String },

    /// Show one concept: occurrences, types and related concepts.
    Concept { label: String },

    /// List documents that share concepts with a document.
    Related { path: String },

    /// List the most frequent concepts.
    Top {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List concepts tagged with a type (`Claim`, `Custom:Lemma`, ...).
    ByType {
        #[arg(value_name = "TYPE")]
        tag_type: String,
    },

    /// List the tags in a document.
    Tags { path: String },

    /// Edit a document's tag block.
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Manage the concept identity registry.
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
}

#[derive(Subcommand)]
enum TagAction {
    /// Add a tag. The id comes from the registry, so the same concept gets
    /// the same id in every document.
    Add {
        path: String,
        #[arg(value_name = "TYPE")]
        tag_type: String,
        label: String,
        /// Label of the parent concept.
        #[arg(long)]
        parent: Option<String>,
        /// Replace the whole tag block instead of merging into it.
        #[arg(long)]
        replace: bool,
    },
    /// Remove tags by id.
    Remove {
        path: String,
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// Remove the tag block.
    Clear { path: String },
}

#[derive(Subcommand)]
enum RegistryAction {
    /// List every registered concept.
    List,
    /// Show one concept by label or alias.
    Show { label: String },
    /// Make `alias` resolve to the concept registered as `label`.
    Alias { label: String, alias: String },
    /// Fold `merge` into `keep`. The merged id keeps resolving to `keep`.
    Merge { keep: String, merge: String },
    /// Forget every registered concept.
    Reset {
        /// Required; resetting cannot be undone.
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tagweave={},tw={}", default_level, default_level).into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let vault: Arc<dyn Vault> = Arc::new(FsVault::from_config(&cfg.vault)?);
    let store = TagStore::new(vault.clone());

    match cli.command {
        Commands::Estimate { folder } => {
            let engine = IndexEngine::from_config(store, &cfg);
            let estimate = engine
                .estimate_cost(&Scope::from_folder(folder.as_deref()))
                .await?;
            println!("Documents:  {}", format_number(estimate.document_count as u64));
            println!("Characters: {}", format_number(estimate.total_characters as u64));
            println!("Tokens:     ~{}", format_number(estimate.estimated_tokens));
            println!("Cost:       ~${:.4}", estimate.estimated_cost_usd);
            if let Some(warning) = estimate.warning {
                println!("Warning:    {}", warning);
            }
        }
        Commands::Index { folder, progress } => {
            run_index(&cfg, vault.as_ref(), store, folder.as_deref(), progress).await?;
        }
        Commands::Stats => {
            let snapshot = require_snapshot(&cfg, vault.as_ref()).await?;
            stats::run_stats(&snapshot, &cfg.index.snapshot_path)?;
        }
        Commands::Search { query } => {
            search::run_search(&require_snapshot(&cfg, vault.as_ref()).await?, &query)?;
        }
        Commands::Concept { label } => {
            search::run_concept(&require_snapshot(&cfg, vault.as_ref()).await?, &label)?;
        }
        Commands::Related { path } => {
            search::run_related(&require_snapshot(&cfg, vault.as_ref()).await?, &path)?;
        }
        Commands::Top { limit } => {
            search::run_top(&require_snapshot(&cfg, vault.as_ref()).await?, limit)?;
        }
        Commands::ByType { tag_type } => {
            let tag_type = TagType::from_name(&tag_type);
            search::run_by_type(&require_snapshot(&cfg, vault.as_ref()).await?, &tag_type)?;
        }
        Commands::Tags { path } => {
            get::run_tags(&store, &path).await?;
        }
        Commands::Tag { action } => {
            run_tag_action(&cfg, vault.as_ref(), &store, action).await?;
        }
        Commands::Registry { action } => {
            run_registry_action(&cfg, vault.as_ref(), action).await?;
        }
    }

    Ok(())
}

async fn run_index(
    cfg: &Config,
    vault: &dyn Vault,
    store: TagStore,
    folder: Option<&str>,
    progress: Option<ProgressMode>,
) -> Result<()> {
    let mut registry = ConceptRegistry::load(vault, &cfg.registry.path).await?;
    let engine = Arc::new(IndexEngine::from_config(store, cfg));
    let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();

    let interrupt = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.abort();
            }
        })
    };
    let result = engine
        .build_index(&registry, &Scope::from_folder(folder), reporter.as_ref())
        .await;
    interrupt.abort();
    let snapshot = result?;

    save_snapshot(vault, &cfg.index.snapshot_path, &snapshot).await?;
    registry.save(vault).await?;

    let m = &snapshot.metadata;
    println!(
        "{} {} documents ({} tagged), {} annotations, {} concepts, {} relations in {} ms",
        if m.was_aborted { "Aborted after" } else { "Indexed" },
        format_number(m.total_documents as u64),
        format_number(m.documents_with_tags as u64),
        format_number(m.total_annotations as u64),
        format_number(m.total_concepts as u64),
        format_number(snapshot.relations.len() as u64),
        m.timing_ms
    );
    for warning in &m.warnings {
        println!("warning: {}", warning);
    }
    Ok(())
}

async fn require_snapshot(cfg: &Config, vault: &dyn Vault) -> Result<IndexSnapshot> {
    match load_snapshot(vault, &cfg.index.snapshot_path).await? {
        Some(snapshot) => Ok(snapshot),
        None => bail!("No index snapshot at {}. Run `tw index` first.", cfg.index.snapshot_path),
    }
}

async fn run_tag_action(cfg: &Config, vault: &dyn Vault, store: &TagStore, action: TagAction) -> Result<()> {
    match action {
        TagAction::Add {
            path,
            tag_type,
            label,
            parent,
            replace,
        } => {
            if label.trim().is_empty() {
                bail!("Tag label must not be empty");
            }
            let mut registry = ConceptRegistry::load(vault, &cfg.registry.path).await?;
            let mut draft = TagDraft::new(TagType::from_name(&tag_type), label);
            if let Some(parent) = parent {
                draft = draft.with_parent(parent);
            }
            let mode = if replace { WriteMode::Replace } else { WriteMode::Merge };
            let tags = store.write_drafts(&mut registry, &path, &[draft], mode).await?;
            registry.save(vault).await?;
            println!("{} now has {} tag(s).", path, tags.len());
        }
        TagAction::Remove { path, ids } => {
            let removed = store.remove(&path, &ids).await?;
            println!("Removed {} tag(s) from {}.", removed, path);
        }
        TagAction::Clear { path } => {
            if store.clear(&path).await? {
                println!("Cleared tags from {}.", path);
            } else {
                println!("{} has no tag block.", path);
            }
        }
    }
    Ok(())
}

async fn run_registry_action(cfg: &Config, vault: &dyn Vault, action: RegistryAction) -> Result<()> {
    let mut registry = ConceptRegistry::load(vault, &cfg.registry.path).await?;

    match action {
        RegistryAction::List => {
            if registry.is_empty() {
                println!("No concepts registered.");
            } else {
                println!("{:<36}  {:<14} {}", "ID", "TYPE", "LABEL");
                for entry in registry.entries() {
                    println!("{:<36}  {:<14} {}", entry.id, entry.tag_type, entry.canonical_label);
                }
            }
        }
        RegistryAction::Show { label } => match registry.get_entry(&label) {
            Some(entry) => {
                println!("{}", entry.canonical_label);
                println!("  id:          {}", entry.id);
                println!("  key:         {}", entry.normalized_label);
                println!("  type:        {}", entry.tag_type);
                println!(
                    "  first seen:  {} ({})",
                    entry.first_seen_document,
                    entry.first_seen_timestamp.format("%Y-%m-%d %H:%M")
                );
                if !entry.aliases.is_empty() {
                    let aliases: Vec<&str> = entry.aliases.iter().map(|a| a.as_str()).collect();
                    println!("  aliases:     {}", aliases.join(", "));
                }
            }
            None => println!("Concept not found: {}", label),
        },
        RegistryAction::Alias { label, alias } => {
            if !registry.add_alias(&label, &alias) {
                bail!("Could not add alias '{}' to '{}'", alias, label);
            }
            println!("'{}' now resolves to '{}'.", alias, label);
        }
        RegistryAction::Merge { keep, merge } => {
            if !registry.merge(&keep, &merge) {
                bail!("Could not merge '{}' into '{}'", merge, keep);
            }
            println!("Merged '{}' into '{}'.", merge, keep);
        }
        RegistryAction::Reset { yes } => {
            if !yes {
                bail!("Refusing to reset the registry without --yes");
            }
            registry.reset();
            println!("Registry reset.");
        }
    }

    registry.save(vault).await?;
    Ok(())
}
