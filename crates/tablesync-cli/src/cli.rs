use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tablesync")]
#[command(about = "Bulk upsert and sync JSON records into SQLite tables")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the CLI config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Insert new records and update existing ones, matched by unique fields
    Upsert(UpsertArgs),
    /// Upsert, then delete rows in the filtered scope that the input lacks
    Sync(UpsertArgs),
    /// Show the schema tablesync reads for a table
    Schema {
        /// Table name
        #[arg(long)]
        table: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or write the CLI config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct UpsertArgs {
    /// Target table
    #[arg(long)]
    pub table: String,

    /// JSON array of records (stdin when omitted or "-")
    #[arg(short, long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Fields matching input records to stored rows
    #[arg(long = "unique", required = true, value_delimiter = ',', value_name = "FIELD")]
    pub unique: Vec<String>,

    /// Fields written when a row already exists (default: every other field)
    #[arg(long = "update", value_delimiter = ',', value_name = "FIELD")]
    pub update: Vec<String>,

    /// Never modify existing rows
    #[arg(long, conflicts_with = "update")]
    pub no_update: bool,

    /// Fields reported for each row (default: none, or the primary key on sync)
    #[arg(long = "returning", value_delimiter = ',', value_name = "FIELD")]
    pub returning: Vec<String>,

    /// Report every field
    #[arg(long, conflicts_with = "returning")]
    pub returning_all: bool,

    /// Also report matched rows that were left unchanged
    #[arg(long)]
    pub return_untouched: bool,

    /// Rewrite matched rows even when no compared field changed
    #[arg(long)]
    pub keep_duplicate_updates: bool,

    /// Keep the last record when the input repeats a unique key
    #[arg(long)]
    pub drop_duplicates: bool,

    /// Use the read-then-write path
    #[arg(long)]
    pub naive: bool,

    /// Restrict the scope, e.g. `tenant=3` or `score>=10` (repeatable)
    #[arg(long = "filter", value_name = "EXPR")]
    pub filters: Vec<String>,

    /// Timestamp fields set when a row is created
    #[arg(long = "auto-on-create", value_delimiter = ',', value_name = "FIELD")]
    pub auto_on_create: Vec<String>,

    /// Timestamp fields set on every write
    #[arg(long = "auto-on-write", value_delimiter = ',', value_name = "FIELD")]
    pub auto_on_write: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective config
    Show,
    /// Print the config file location
    Path,
    /// Create or update the config file
    Init {
        /// Default database file
        #[arg(long, value_name = "PATH")]
        database: Option<PathBuf>,
        /// Cap on bound parameters per statement
        #[arg(long, value_name = "N")]
        max_parameters: Option<usize>,
        /// Always use the read-then-write path
        #[arg(long)]
        force_naive: bool,
        /// Rewrite unchanged rows by default
        #[arg(long)]
        keep_duplicate_updates: bool,
    },
}
