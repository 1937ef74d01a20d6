//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sqlrag",
    version,
    author = "neur0map",
    about = "Ask questions of a SQLite database in plain language",
    long_about = "sqlrag retrieves the relevant table schemas for a question, asks an LLM for a \
                  SELECT statement, validates it against the live catalog and a read-only safety \
                  gate, and runs it, retrying with feedback when validation or execution fails."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/sqlrag/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config file
    #[arg(short, long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer a question by generating and running SQL
    Ask {
        /// Question in natural language
        question: String,

        /// Extra context appended to the question (repeatable)
        #[arg(long = "hint", value_name = "TEXT")]
        hints: Vec<String>,

        /// Print the full response record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the reranked schema candidates for a query
    Search {
        /// Search query text
        query: String,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check SQL against the schema catalog and the safety gate
    Validate {
        /// SQL statement to check
        sql: String,
    },

    /// Sync schema documents into the index store
    Index,

    /// Print the tables and columns of the target database
    Catalog,

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

    /// Print the default config file location
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
