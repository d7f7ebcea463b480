//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "brainvault",
    version,
    author = "neur0map",
    about = "Curated knowledge snippets with embedding-backed, time-aware retrieval",
    long_about = "Brainvault collects meeting notes, policy reminders and parsed documents, keeps the \
                  most authoritative record per topic, and retrieves the most relevant, currently-valid \
                  snippets for a natural-language question."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/brainvault/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Curate the registry, rebuild the index and write the health report
    Refresh,

    /// Recompute the knowledge registry only
    Curate,

    /// Rebuild the index from the existing registry
    Index,

    /// Search the knowledge index
    Search {
        /// Search query text; date expressions such as "last month" narrow the results
        query: String,

        /// Maximum number of results to return
        #[arg(short, default_value = "5")]
        k: usize,

        /// Prefer results from this category
        #[arg(long)]
        category: Option<String>,

        /// Favor the most recently dated records
        #[arg(long)]
        recent: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Resolve a date expression to its window
    Window {
        /// Expression such as "this week", "Q3 2025" or "2025-09-02"
        expr: String,
    },

    /// Save a reminder into the reminders directory
    Remember {
        /// Reminder text, or a block with Title:/Tags:/Body: lines
        content: String,

        /// Title (defaults to the first line of the content)
        #[arg(short, long)]
        title: Option<String>,

        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,

        /// First day the reminder applies
        #[arg(long)]
        valid_from: Option<String>,

        /// Last day the reminder applies
        #[arg(long)]
        valid_to: Option<String>,

        /// Date of the meeting the reminder records
        #[arg(long)]
        meeting_date: Option<String>,
    },

    /// Show the last health report
    Health {
        /// Only list sparse documents
        #[arg(long)]
        sparse: bool,
    },

    /// Show the knowledge registry
    Registry {
        /// Include archived entries
        #[arg(short, long)]
        all: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
