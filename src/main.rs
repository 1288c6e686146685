//! mkvs CLI - inspect and maintain a node database from the command line

use anyhow::Context;
use clap::{Parser, Subcommand};
use mkvs_db::db::{MemoryNodeDb, NodeDb};
use mkvs_db::node::{pointer_hash, LeafNode, Node};
use mkvs_db::{Config, Namespace, Root};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mkvs")]
#[command(about = "Inspect and maintain a Merklized key-value store node database")]
#[command(version)]
struct Cli {
    /// Path to the database file (default: node.mkvs)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Namespace of the database, as 64 hex characters
    #[arg(short, long)]
    namespace: Option<Namespace>,

    /// Open the database read-only
    #[arg(long)]
    read_only: bool,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Show database status
    Info,

    /// List the roots committed at a version
    Roots {
        /// The version
        version: u64,
    },

    /// Decode a hex-encoded node
    Decode {
        /// The node encoding, in hex
        encoded: String,
    },

    /// Compute the hash and encoding of a leaf node
    HashLeaf {
        /// The key
        key: String,
        /// The value
        value: String,
    },

    /// Abort an interrupted multipart insert
    AbortMultipart,

    /// Prune the earliest version
    Prune {
        /// The version to prune (must be the earliest one)
        version: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Info => {
            let db = open_db(&cli)?;
            let stats = db.stats();
            output(
                cli.format,
                &serde_json::json!({
                    "database": db.config().db.display().to_string(),
                    "namespace": db.config().namespace.to_hex(),
                    "read_only": db.config().read_only,
                    "stats": stats,
                }),
            )?;
        }

        Commands::Roots { version } => {
            let db = open_db(&cli)?;
            let roots = db.get_roots_for_version(*version)?;
            output(
                cli.format,
                &serde_json::json!({
                    "version": version,
                    "finalized": db.get_latest_version().is_some_and(|v| v >= *version)
                        && *version >= db.get_earliest_version(),
                    "roots": roots.iter().map(root_json).collect::<Vec<_>>(),
                }),
            )?;
        }

        Commands::Decode { encoded } => {
            let data = hex::decode(encoded.trim()).context("node encoding is not valid hex")?;
            let node = Node::unmarshal_binary(&data)?;
            output(cli.format, &node_json(&node))?;
        }

        Commands::HashLeaf { key, value } => {
            let mut leaf = LeafNode::new(key.as_str(), value.as_bytes().to_vec());
            leaf.update_hash();
            output(
                cli.format,
                &serde_json::json!({
                    "hash": leaf.hash.to_hex(),
                    "encoded": hex::encode(leaf.marshal_binary()?),
                }),
            )?;
        }

        Commands::AbortMultipart => {
            let db = open_db(&cli)?;
            let version = db.stats().multipart_version;
            db.abort_multipart_insert()?;
            db.sync()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "aborted_version": version,
                }),
            )?;
        }

        Commands::Prune { version } => {
            let db = open_db(&cli)?;
            db.prune(*version)
                .with_context(|| format!("failed to prune version {version}"))?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "pruned": version,
                    "earliest_version": db.get_earliest_version(),
                }),
            )?;
        }
    }

    Ok(())
}

fn open_db(cli: &Cli) -> anyhow::Result<MemoryNodeDb> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(database) = &cli.database {
        config.db = database.clone();
    } else if config.db.as_os_str().is_empty() {
        config.db = PathBuf::from("node.mkvs");
    }
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }
    config.read_only |= cli.read_only;

    MemoryNodeDb::open(&config)
        .with_context(|| format!("failed to open database at {}", config.db.display()))
}

fn root_json(root: &Root) -> serde_json::Value {
    serde_json::json!({
        "namespace": root.namespace.to_hex(),
        "version": root.version,
        "type": root.root_type.to_string(),
        "hash": root.hash.to_hex(),
    })
}

fn node_json(node: &Node) -> serde_json::Value {
    match node {
        Node::Leaf(leaf) => serde_json::json!({
            "kind": "leaf",
            "clean": leaf.clean,
            "hash": leaf.hash.to_hex(),
            "key": hex::encode(leaf.key.as_bytes()),
            "value": hex::encode(&leaf.value),
        }),
        Node::Internal(internal) => serde_json::json!({
            "kind": "internal",
            "clean": internal.clean,
            "hash": internal.clean.then(|| internal.hash.to_hex()),
            "label": hex::encode(internal.label.as_bytes()),
            "label_bit_length": internal.label_bit_length.0,
            "leaf": internal.leaf_node.as_ref().map(|p| p.hash.to_hex()),
            "left": pointer_hash(internal.left.as_ref()).to_hex(),
            "right": pointer_hash(internal.right.as_ref()).to_hex(),
        }),
    }
}

fn output(format: OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
