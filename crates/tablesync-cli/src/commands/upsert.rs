use std::path::Path;

use serde::Serialize;
use tablesync_core::upsert::Counts;
use tablesync_core::{BulkSync, ExecutionPath, ResultRow, Returning, UpsertOptions, UpsertResult};

use crate::cli::UpsertArgs;
use crate::commands::common::{load_table, open_database, read_records, scope_from_filters};
use crate::config::CliConfig;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct UpsertReport<'a> {
    pub table: &'a str,
    pub path: ExecutionPath,
    pub counts: Counts,
    pub rows: &'a [ResultRow],
}

pub fn upsert_options(args: &UpsertArgs, sync: bool, config: &CliConfig) -> UpsertOptions {
    let mut options = UpsertOptions::new()
        .sync(sync)
        .ignore_duplicate_updates(config.ignore_duplicate_updates && !args.keep_duplicate_updates)
        .return_untouched(args.return_untouched)
        .drop_duplicates(args.drop_duplicates);
    if args.no_update {
        options = options.no_update_fields();
    } else if !args.update.is_empty() {
        options = options.update_fields(args.update.iter().cloned());
    }
    if args.returning_all {
        options = options.returning_all();
    } else if !args.returning.is_empty() {
        options = options.returning(Returning::Fields(args.returning.clone()));
    }
    options
}

pub fn run_upsert(
    args: &UpsertArgs,
    sync: bool,
    config: &CliConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let mut records = read_records(args.input.as_deref())?;

    let db = open_database(config, db_path, args.naive)?;
    let table = load_table(&db, &args.table, &args.auto_on_create, &args.auto_on_write)?;
    let scope = scope_from_filters(&table, &args.filters)?;
    let options = upsert_options(args, sync, config);

    let result = BulkSync::new(&db).upsert(&scope, &mut records, &args.unique, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report(&args.table, &result))?);
    } else {
        for line in format_summary(&result) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn report<'a>(table: &'a str, result: &'a UpsertResult) -> UpsertReport<'a> {
    UpsertReport {
        table,
        path: result.path(),
        counts: result.counts(),
        rows: result,
    }
}

pub fn format_summary(result: &UpsertResult) -> Vec<String> {
    let counts = result.counts();
    let mut lines = vec![format!(
        "{} created, {} updated, {} untouched, {} deleted ({} path)",
        counts.created,
        counts.updated,
        counts.untouched,
        counts.deleted,
        result.path()
    )];
    for row in result.iter() {
        let values = row
            .values()
            .iter()
            .map(|(name, value)| {
                let shown = serde_json::to_string(value).unwrap_or_default();
                format!("{name}={shown}")
            })
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("{:<9} {values}", row.status().to_string()));
    }
    lines
}
