//! Administrative CLI over a SQLite lineage database
//!
//! Configuration comes from `LINEAGE_CONFIG` (a TOML file), then
//! `LINEAGE_DB`, then the command-line flags.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use lineage::{
    config::CONFIG_ENV, DrawDepth, Gender, LineageConfig, MutationEngine, Node, NodeRepository,
    SqliteTreeStore, TreeId,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "lineage")]
#[command(about = "Inspect and edit materialized-path family trees")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Tree name or UUID
    #[arg(short, long, global = true, default_value = "default")]
    tree: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the root of an empty tree
    Root {
        /// JSON payload, or a bare name
        payload: String,
        #[arg(short, long, default_value = "male")]
        gender: Gender,
    },
    /// Add a child under the node at LOCATION
    Child {
        location: String,
        payload: String,
        #[arg(short, long, default_value = "male")]
        gender: Gender,
    },
    /// Add a sibling after the youngest sibling of the node at LOCATION
    Sibling {
        location: String,
        payload: String,
        #[arg(short, long, default_value = "male")]
        gender: Gender,
    },
    /// Put a new father above the current root
    Ancestor { payload: String },
    /// Move the node at LOCATION (with its subtree)
    Move {
        location: String,
        #[command(flatten)]
        target: MoveTarget,
    },
    /// Delete the node at LOCATION and everything below it
    Delete { location: String },
    /// Marry the nodes at two locations
    Marry {
        location: String,
        spouse: String,
        /// Tree of the spouse, if different
        #[arg(long)]
        spouse_tree: Option<String>,
    },
    /// Print the tree, one node per line
    Show {
        #[arg(long)]
        from: Option<String>,
        /// `all`, a number, or a word such as `three`
        #[arg(long, default_value = "all")]
        depth: DrawDepth,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct MoveTarget {
    /// Become the youngest child of this location
    #[arg(long)]
    under: Option<String>,

    /// Become the sibling right before this location
    #[arg(long)]
    before: Option<String>,

    /// Become the sibling right after this location
    #[arg(long)]
    after: Option<String>,
}

fn load_config(cli: &Cli) -> anyhow::Result<LineageConfig> {
    let file = cli
        .config
        .clone()
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));
    let mut config = match file {
        Some(path) => LineageConfig::from_toml_file(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => LineageConfig::default(),
    };
    config.merge_env();
    if let Some(db) = &cli.db {
        config.database = db.clone();
    }
    Ok(config)
}

/// A UUID is taken as is; anything else names a tree
fn resolve_tree(tree: &str) -> TreeId {
    tree.parse().unwrap_or_else(|_| TreeId::from_name(tree))
}

fn parse_payload(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap_or_else(|_| json!({ "name": payload }))
}

fn print_node(node: &Node) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(node)?);
    Ok(())
}

fn label(node: &Node) -> String {
    match node.payload.get("name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => node.payload.to_string(),
    }
}

async fn show(
    repo: &NodeRepository,
    tree_id: TreeId,
    from: Option<&str>,
    depth: DrawDepth,
) -> anyhow::Result<()> {
    let rows = repo.lineage(tree_id, from, depth).await?;
    let base = match rows.first() {
        Some(row) => repo.codec().generation(&row.node.location)?,
        None => return Ok(()),
    };
    for row in &rows {
        let indent = repo.codec().generation(&row.node.location)? - base;
        let mut line = format!(
            "{}{} [{}] {}",
            "  ".repeat(indent),
            row.node.location,
            row.node.gender,
            label(&row.node)
        );
        for spouse in &row.spouses {
            line.push_str(&format!(" + {}", label(spouse)));
        }
        println!("{}", line);
    }
    Ok(())
}

async fn run(engine: &MutationEngine, tree_id: TreeId, command: Command) -> anyhow::Result<()> {
    let repo = engine.repository();
    match command {
        Command::Root { payload, gender } => {
            let node = engine.create_root(tree_id, parse_payload(&payload), gender).await?;
            print_node(&node)?;
        }
        Command::Child {
            location,
            payload,
            gender,
        } => {
            let parent = repo.find(tree_id, &location).await?;
            let node = engine
                .create_child(&parent, parse_payload(&payload), gender)
                .await?;
            print_node(&node)?;
        }
        Command::Sibling {
            location,
            payload,
            gender,
        } => {
            let sibling = repo.find(tree_id, &location).await?;
            let node = engine
                .create_sibling(&sibling, parse_payload(&payload), gender)
                .await?;
            print_node(&node)?;
        }
        Command::Ancestor { payload } => {
            let node = engine
                .create_ancestor_above_root(tree_id, parse_payload(&payload))
                .await?;
            print_node(&node)?;
        }
        Command::Move { location, target } => {
            let node = repo.find(tree_id, &location).await?;
            let moved = match (target.under, target.before, target.after) {
                (Some(parent), _, _) => {
                    let parent = repo.find(tree_id, &parent).await?;
                    engine.move_to_parent(&node, &parent).await?
                }
                (_, Some(sibling), _) => {
                    let sibling = repo.find(tree_id, &sibling).await?;
                    engine.move_before_sibling(&node, &sibling).await?
                }
                (_, _, Some(sibling)) => {
                    let sibling = repo.find(tree_id, &sibling).await?;
                    engine.move_after_sibling(&node, &sibling).await?
                }
                (None, None, None) => anyhow::bail!("one of --under, --before or --after is required"),
            };
            print_node(&moved)?;
        }
        Command::Delete { location } => {
            let node = repo.find(tree_id, &location).await?;
            let deleted = engine.delete_with_descendants(&node).await?;
            println!("Deleted {} node(s)", deleted);
        }
        Command::Marry {
            location,
            spouse,
            spouse_tree,
        } => {
            let spouse_tree = spouse_tree.as_deref().map(resolve_tree).unwrap_or(tree_id);
            let a = repo.find(tree_id, &location).await?;
            let b = repo.find(spouse_tree, &spouse).await?;
            let marriage = engine.marry(&a, &b, None).await?;
            println!("{}", serde_json::to_string_pretty(&marriage)?);
        }
        Command::Show { from, depth } => {
            show(&repo, tree_id, from.as_deref(), depth).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (silently ignore if not found)
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lineage=info,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::debug!(database = %config.database.display(), "Opening lineage database");

    let store = SqliteTreeStore::new(config.store_config()).await?;
    let engine: MutationEngine = MutationEngine::new(Arc::new(store), config.codec()?);
    run(&engine, resolve_tree(&cli.tree), cli.command).await
}
