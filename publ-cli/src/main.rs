//! # publ CLI
//!
//! Command-line interface and web server for the Publ publishing system.

mod cache;
mod commands;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "publ")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "publ.yml", env = "PUBL_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the content and serve the site, reindexing on changes
    Serve {
        /// Server port (overrides the configuration)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Index the content once, applying header fixups
    Scan {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show a single entry
    Entry {
        /// Entry ID
        id: i64,

        /// Output format
        #[arg(long, value_enum, default_value_t = EntryFormat::Json)]
        format: EntryFormat,
    },

    /// List a category's entries and subcategories
    Category {
        /// Category path (defaults to the root)
        #[arg(default_value = "")]
        path: String,

        /// Include entries from every subcategory
        #[arg(long)]
        recurse: bool,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Resolve a URL path through aliases and redirect rules
    Alias {
        /// URL path, e.g. /old/page.php
        path: String,
    },
}

#[derive(Copy, Clone, ValueEnum)]
pub enum EntryFormat {
    Json,
    Html,
    Headers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve { port } => commands::serve(&cli.config, port).await,
        Commands::Scan { json } => commands::scan_content(&cli.config, json),
        Commands::Entry { id, format } => commands::show_entry(&cli.config, id, format),
        Commands::Category {
            path,
            recurse,
            json,
        } => commands::show_category(&cli.config, &path, recurse, json),
        Commands::Alias { path } => commands::resolve_alias(&cli.config, &path),
    }
}
