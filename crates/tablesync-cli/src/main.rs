//! tablesync CLI - Upsert and sync JSON batches into SQLite tables
//!
//! Reads records from a file or stdin, reconciles them against a table by a
//! unique key and reports what was created, updated, untouched or deleted.

mod cli;
mod commands;
mod config;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::schema::run_schema;
use crate::commands::upsert::run_upsert;
use crate::config::CliConfig;
use crate::error::CliError;

fn main() {
    if let Err(error) = run() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "tablesync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => CliConfig::load_from_path(path),
        None => CliConfig::load(),
    }
    .map_err(CliError::Config)?;

    match cli.command {
        Commands::Upsert(args) => {
            let db_path = resolve_db_path(cli.db_path, &config);
            run_upsert(&args, false, &config, &db_path)?;
        }
        Commands::Sync(args) => {
            let db_path = resolve_db_path(cli.db_path, &config);
            run_upsert(&args, true, &config, &db_path)?;
        }
        Commands::Schema { table, json } => {
            let db_path = resolve_db_path(cli.db_path, &config);
            run_schema(&table, json, &config, &db_path)?;
        }
        Commands::Config { command } => run_config(command, cli.config.as_deref())?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
