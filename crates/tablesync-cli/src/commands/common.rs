use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tablesync_core::scope::Comparison;
use tablesync_core::{
    AutoPopulate, BulkSync, Database, DynamicRecord, Field, FieldKind, Scope, Table, Value,
};

use crate::config::CliConfig;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct FieldItem {
    pub name: String,
    pub kind: FieldKind,
    pub primary_key: bool,
    pub identity: bool,
    pub nullable: bool,
    pub auto: AutoPopulate,
}

impl From<&Field> for FieldItem {
    fn from(field: &Field) -> Self {
        Self {
            name: field.name.clone(),
            kind: field.kind.clone(),
            primary_key: field.primary_key,
            identity: field.identity,
            nullable: field.nullable,
            auto: field.auto,
        }
    }
}

/// `--db-path`, then `TABLESYNC_DB`, then the config file, then the data dir
pub fn resolve_db_path(cli_db_path: Option<PathBuf>, config: &CliConfig) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TABLESYNC_DB").map(PathBuf::from))
        .or_else(|| config.database.path.clone())
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tablesync")
        .join("tablesync.db")
}

pub fn open_database(config: &CliConfig, path: &Path, naive: bool) -> Result<Database, CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut database = config.database.clone();
    database.path = Some(path.to_path_buf());
    database.force_naive |= naive;
    let db = Database::open_with_config(&database)?;
    tracing::info!(
        "Opened {} ({} path)",
        path.display(),
        BulkSync::new(&db).execution_path()
    );
    Ok(db)
}

/// Introspect `name` and mark the listed timestamp fields as auto-populated
pub fn load_table(
    db: &Database,
    name: &str,
    auto_on_create: &[String],
    auto_on_write: &[String],
) -> Result<Table, CliError> {
    let table = db.introspect(name)?;
    if auto_on_create.is_empty() && auto_on_write.is_empty() {
        return Ok(table);
    }

    for field in auto_on_create.iter().chain(auto_on_write) {
        table.field(field)?;
    }
    let fields = table
        .fields()
        .iter()
        .cloned()
        .map(|field| {
            if auto_on_write.contains(&field.name) {
                field.auto_now()
            } else if auto_on_create.contains(&field.name) {
                field.auto_now_add()
            } else {
                field
            }
        })
        .collect();
    Ok(Table::new(name, fields)?)
}

/// Read a JSON array of records from `input`, or stdin for `None` / `-`
pub fn read_records(input: Option<&Path>) -> Result<Vec<DynamicRecord>, CliError> {
    let raw = match input {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)?,
        _ => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    parse_records(&raw)
}

pub fn parse_records(raw: &str) -> Result<Vec<DynamicRecord>, CliError> {
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| DynamicRecord::from_json(item).map_err(|_| CliError::InvalidInput))
            .collect(),
        _ => Err(CliError::InvalidInput),
    }
}

fn filter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(>=|<=|!=|=|>|<)\s*(.*?)\s*$")
            .unwrap_or_else(|error| panic!("invalid filter pattern: {error}"))
    })
}

/// Parse `field OP value`; the value is read as JSON, falling back to text
pub fn parse_filter(expr: &str) -> Result<(String, Comparison, Value), CliError> {
    let captures = filter_pattern()
        .captures(expr)
        .ok_or_else(|| CliError::InvalidFilter(expr.to_string()))?;
    let op = match &captures[2] {
        "=" => Comparison::Eq,
        "!=" => Comparison::Ne,
        ">" => Comparison::Gt,
        ">=" => Comparison::Gte,
        "<" => Comparison::Lt,
        "<=" => Comparison::Lte,
        _ => return Err(CliError::InvalidFilter(expr.to_string())),
    };
    let raw = &captures[3];
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .map_or_else(|_| Value::Text(raw.to_string()), Value::from_json);
    Ok((captures[1].to_string(), op, value))
}

pub fn scope_from_filters<'t>(table: &'t Table, filters: &[String]) -> Result<Scope<'t>, CliError> {
    filters.iter().try_fold(table.all(), |scope, expr| {
        let (field, op, value) = parse_filter(expr)?;
        Ok(scope.filter(field, op, value))
    })
}
