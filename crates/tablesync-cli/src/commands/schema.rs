use std::path::Path;

use tablesync_core::{AutoPopulate, Table};

use crate::commands::common::{open_database, FieldItem};
use crate::config::CliConfig;
use crate::error::CliError;

pub fn run_schema(
    table: &str,
    as_json: bool,
    config: &CliConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(config, db_path, false)?;
    let table = db.introspect(table)?;

    if as_json {
        let items = table.fields().iter().map(FieldItem::from).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_schema_lines(&table) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_schema_lines(table: &Table) -> Vec<String> {
    table
        .fields()
        .iter()
        .map(|field| {
            let mut flags = Vec::new();
            if field.primary_key {
                flags.push("primary key");
            }
            if field.identity {
                flags.push("identity");
            }
            if field.nullable {
                flags.push("nullable");
            }
            match field.auto {
                AutoPopulate::OnCreate => flags.push("set on create"),
                AutoPopulate::OnWrite => flags.push("set on write"),
                AutoPopulate::Never => {}
            }
            let kind = format!("{:?}", field.kind).to_lowercase();
            format!("{:<20} {kind:<10} {}", field.name, flags.join(", "))
            .trim_end()
            .to_string()
        })
        .collect()
}
