//! # Recon CLI Module
//!
//! This module implements the CLI interface for recon.
//!
//! The session file (`--database`) stores the graph only. The working set
//! does not survive between invocations, so commands that operate on it take
//! `--select`/`--traverse` to build it first.
//!
//! ## Available Commands
//!
//! - `init` - Create an empty session file
//! - `status` - Show graph counts
//! - `add` - Upsert node specs from a JSON file
//! - `select` / `traverse` - Print the elements an expression yields
//! - `transforms` - List registered transforms
//! - `transform` - Run a transform over the working set
//! - `group` / `ungroup` - Reparent the working set
//! - `measure` / `unmeasure` - Set or reset node weights
//! - `remove` - Remove the working set
//! - `export` / `import` - Structural JSON form
//! - `server` - Start the HTTP server

mod commands;

use crate::scope::Scope;
use clap::{Args, Parser, Subcommand};
use recon_core::ReconError;
use serde_json::Value;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Recon - reconnaissance graph engine
///
/// Collects hosts, domains, accounts and organizations into a graph and
/// enriches it with pluggable transforms.
#[derive(Parser, Debug)]
#[command(name = "recon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Print every engine event
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner and summary output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the session file
    #[arg(short = 'D', long, global = true, default_value = "recon.db")]
    pub database: PathBuf,

    /// Path to the TOML configuration (default: recon.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty session file
    Init {
        /// Overwrite an existing session file
        #[arg(short, long)]
        force: bool,
    },

    /// Show graph status
    Status,

    /// Upsert node specs from a JSON file (array or {"nodes": [...]})
    Add {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print the elements matching selector expressions
    Select {
        #[arg(required = true)]
        expressions: Vec<String>,
    },

    /// Print the elements a traversal yields
    Traverse {
        #[arg(required = true)]
        expressions: Vec<String>,
    },

    /// List registered transforms
    Transforms,

    /// Run a transform (name, alias or '*') over the working set
    Transform(TransformArgs),

    /// Reparent the working set under a group node
    Group {
        label: String,
        #[command(flatten)]
        scope: Scope,
    },

    /// Detach the working set from its parents
    Ungroup {
        #[command(flatten)]
        scope: Scope,
    },

    /// Set each node's weight to its edge count
    Measure {
        #[command(flatten)]
        scope: Scope,
    },

    /// Reset node weights to zero
    Unmeasure {
        #[command(flatten)]
        scope: Scope,
    },

    /// Remove the working set (node removal takes incident edges along)
    Remove {
        #[command(flatten)]
        scope: Scope,
    },

    /// Export the graph as structural JSON
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replace the graph with a structural JSON file
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Start HTTP server
    Server {
        /// Host to bind to (default from config)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (default from config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// Arguments of `recon transform`.
#[derive(Args, Debug, Clone)]
pub struct TransformArgs {
    /// Transform name, alias or '*'
    pub name: String,

    #[command(flatten)]
    pub scope: Scope,

    /// Parent each job's results under a group node
    #[arg(long)]
    pub group: bool,

    /// Re-measure the input nodes afterwards
    #[arg(long)]
    pub weight: bool,

    /// Maximum noise level for '*'
    #[arg(long)]
    pub noise: Option<u32>,

    /// Regex over transform names ('*' only)
    #[arg(long)]
    pub name_filter: Option<String>,

    /// Regex over transform aliases ('*' only)
    #[arg(long)]
    pub alias_filter: Option<String>,

    /// Regex over transform titles ('*' only)
    #[arg(long)]
    pub title_filter: Option<String>,

    /// Regex over transform tags ('*' only)
    #[arg(long)]
    pub tag_filter: Option<String>,

    /// Property path whose value replaces each input label
    #[arg(long)]
    pub extract: Option<String>,

    /// Prefix for extracted labels
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Suffix for extracted labels
    #[arg(long, default_value = "")]
    pub suffix: String,

    /// Warn when a job returns more nodes than this (0 keeps the configured value)
    #[arg(long)]
    pub max_warn: Option<usize>,

    /// Truncate each job's results to this many nodes (0 keeps the configured value)
    #[arg(long)]
    pub max_cap: Option<usize>,

    /// Transform option as key=value (value parsed as JSON when possible)
    #[arg(short = 'o', long = "option", value_parser = parse_option)]
    pub options: Vec<(String, Value)>,
}

/// Parse `key=value`; the value is JSON when it parses, a string otherwise.
pub fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("option '{raw}' is not key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("option '{raw}' has an empty key"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), ReconError> {
    let ctx = Context {
        database: cli.database,
        config: cli.config,
        json_mode: cli.json_mode,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&ctx, force),
        Some(Commands::Status) | None => cmd_status(&ctx),
        Some(Commands::Add { file }) => cmd_add(&ctx, &file),
        Some(Commands::Select { expressions }) => cmd_select(&ctx, &expressions),
        Some(Commands::Traverse { expressions }) => cmd_traverse(&ctx, &expressions),
        Some(Commands::Transforms) => cmd_transforms(&ctx),
        Some(Commands::Transform(args)) => cmd_transform(&ctx, args).await,
        Some(Commands::Group { label, scope }) => cmd_group(&ctx, &label, &scope),
        Some(Commands::Ungroup { scope }) => {
            cmd_scoped(&ctx, &scope, "Ungrouped", |session| session.ungroup(None))
        }
        Some(Commands::Measure { scope }) => {
            cmd_scoped(&ctx, &scope, "Measured", |session| session.measure(None))
        }
        Some(Commands::Unmeasure { scope }) => {
            cmd_scoped(&ctx, &scope, "Unmeasured", |session| session.unmeasure(None))
        }
        Some(Commands::Remove { scope }) => {
            cmd_scoped(&ctx, &scope, "Removed", |session| session.remove(None).len())
        }
        Some(Commands::Export { output }) => cmd_export(&ctx, &output),
        Some(Commands::Import { input }) => cmd_import(&ctx, &input),
        Some(Commands::Server { host, port }) => cmd_server(&ctx, host, port).await,
    }
}
