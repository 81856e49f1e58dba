use std::path::{Path, PathBuf};

use clap::Parser;
use pretty_assertions::assert_eq;
use tablesync_core::scope::Comparison;
use tablesync_core::{
    AutoPopulate, BulkSync, Database, DynamicRecord, ExecutionPath, Record, Returning, Value,
};

use crate::cli::{Cli, Commands, CompletionShell, UpsertArgs};
use crate::commands::common::{
    load_table, open_database, parse_filter, parse_records, resolve_db_path, scope_from_filters,
};
use crate::commands::completions::render_completions;
use crate::commands::config::run_config_init;
use crate::commands::schema::format_schema_lines;
use crate::commands::upsert::{format_summary, report, run_upsert, upsert_options};
use crate::config::CliConfig;
use crate::error::CliError;

fn create_items(path: &Path) {
    let db = Database::open(path).unwrap();
    db.connection()
        .execute_batch(
            "CREATE TABLE items (
                id INTEGER PRIMARY KEY,
                tenant INTEGER NOT NULL,
                code TEXT NOT NULL,
                qty INTEGER,
                updated_at TIMESTAMP,
                UNIQUE (tenant, code)
            )",
        )
        .unwrap();
}

fn write_input(dir: &Path, json: &str) -> PathBuf {
    let path = dir.join("input.json");
    std::fs::write(&path, json).unwrap();
    path
}

fn args(input: PathBuf) -> UpsertArgs {
    UpsertArgs {
        table: "items".to_string(),
        input: Some(input),
        unique: vec!["tenant".to_string(), "code".to_string()],
        ..UpsertArgs::default()
    }
}

#[test]
fn parse_filter_reads_operator_and_json_value() {
    let (field, op, value) = parse_filter("tenant >= 3").unwrap();
    assert_eq!(field, "tenant");
    assert_eq!(op, Comparison::Gte);
    assert_eq!(value, Value::Integer(3));

    let (_, op, value) = parse_filter("code!=abc").unwrap();
    assert_eq!(op, Comparison::Ne);
    assert_eq!(value, Value::Text("abc".to_string()));

    let (_, op, value) = parse_filter("qty=null").unwrap();
    assert_eq!(op, Comparison::Eq);
    assert_eq!(value, Value::Null);
}

#[test]
fn parse_filter_rejects_garbage() {
    assert!(matches!(
        parse_filter("no operator here"),
        Err(CliError::InvalidFilter(_))
    ));
    assert!(matches!(parse_filter("=3"), Err(CliError::InvalidFilter(_))));
}

#[test]
fn parse_records_requires_array_of_objects() {
    let records = parse_records(r#"[{"code": "a", "qty": 1}, {"code": "b"}]"#).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("qty"), Some(Value::Integer(1)));

    assert!(matches!(parse_records(r#"{"code": "a"}"#), Err(CliError::InvalidInput)));
    assert!(matches!(parse_records("[1, 2]"), Err(CliError::InvalidInput)));
    assert!(matches!(parse_records("not json"), Err(CliError::Serialization(_))));
}

#[test]
fn cli_parses_comma_separated_field_lists() {
    let cli = Cli::try_parse_from([
        "tablesync",
        "sync",
        "--table",
        "items",
        "--unique",
        "tenant,code",
        "--update",
        "qty",
        "--filter",
        "tenant=1",
        "--db-path",
        "/tmp/x.db",
    ])
    .unwrap();
    assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/x.db")));
    let Commands::Sync(args) = cli.command else {
        panic!("expected sync");
    };
    assert_eq!(args.unique, vec!["tenant", "code"]);
    assert_eq!(args.update, vec!["qty"]);
    assert_eq!(args.filters, vec!["tenant=1"]);
}

#[test]
fn cli_rejects_update_with_no_update() {
    let parsed = Cli::try_parse_from([
        "tablesync", "upsert", "--table", "t", "--unique", "k", "--update", "v", "--no-update",
    ]);
    assert!(parsed.is_err());
}

#[test]
fn upsert_options_follow_flags_and_config() {
    let mut config = CliConfig::default();
    let mut upsert_args = UpsertArgs {
        update: vec!["qty".to_string()],
        returning: vec!["id".to_string()],
        return_untouched: true,
        ..UpsertArgs::default()
    };
    let options = upsert_options(&upsert_args, true, &config);
    assert!(options.sync);
    assert!(options.ignore_duplicate_updates);
    assert!(options.return_untouched);
    assert_eq!(options.update_fields, Some(vec!["qty".to_string()]));
    assert_eq!(options.returning, Returning::Fields(vec!["id".to_string()]));

    upsert_args.keep_duplicate_updates = true;
    assert!(!upsert_options(&upsert_args, false, &config).ignore_duplicate_updates);

    config.ignore_duplicate_updates = false;
    upsert_args.keep_duplicate_updates = false;
    upsert_args.no_update = true;
    let options = upsert_options(&upsert_args, false, &config);
    assert!(!options.ignore_duplicate_updates);
    assert_eq!(options.update_fields, Some(Vec::new()));
}

#[test]
fn resolve_db_path_prefers_flag() {
    let mut config = CliConfig::default();
    config.database.path = Some(PathBuf::from("/from/config.db"));
    assert_eq!(
        resolve_db_path(Some(PathBuf::from("/from/flag.db")), &config),
        PathBuf::from("/from/flag.db")
    );
}

#[test]
fn load_table_marks_auto_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.db");
    create_items(&path);
    let db = Database::open(&path).unwrap();

    let table = load_table(&db, "items", &[], &["updated_at".to_string()]).unwrap();
    assert_eq!(table.field("updated_at").unwrap().auto, AutoPopulate::OnWrite);
    assert!(table.primary_key().identity);

    assert!(load_table(&db, "items", &["qty".to_string()], &[]).is_err());
    assert!(load_table(&db, "items", &["missing".to_string()], &[]).is_err());

    let lines = format_schema_lines(&table);
    assert_eq!(lines.len(), 5);
    assert!(lines[0].contains("primary key, identity"));
    assert!(lines[4].contains("set on write"));
}

#[test]
fn run_upsert_then_sync_against_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data.db");
    create_items(&db_path);
    let config = CliConfig::default();

    let input = write_input(
        dir.path(),
        r#"[
            {"tenant": 1, "code": "a", "qty": 1},
            {"tenant": 1, "code": "b", "qty": 2},
            {"tenant": 2, "code": "a", "qty": 3}
        ]"#,
    );
    let mut upsert_args = args(input);
    upsert_args.auto_on_write = vec!["updated_at".to_string()];
    run_upsert(&upsert_args, false, &config, &db_path).unwrap();

    let input = write_input(dir.path(), r#"[{"tenant": 1, "code": "b", "qty": 5}]"#);
    let mut sync_args = args(input);
    sync_args.filters = vec!["tenant=1".to_string()];
    run_upsert(&sync_args, true, &config, &db_path).unwrap();

    let db = open_database(&config, &db_path, false).unwrap();
    let table = load_table(&db, "items", &[], &[]).unwrap();
    let rows: Vec<DynamicRecord> = BulkSync::new(&db).fetch(&table.all()).unwrap();
    let kept: Vec<(i64, String, i64)> = rows
        .iter()
        .map(|row| {
            (
                row.get("tenant").unwrap().into_typed("tenant").unwrap(),
                row.get("code").unwrap().into_typed("code").unwrap(),
                row.get("qty").unwrap().into_typed("qty").unwrap(),
            )
        })
        .collect();
    assert_eq!(
        kept,
        vec![(1, "b".to_string(), 5), (2, "a".to_string(), 3)]
    );
    assert!(rows[0].get("updated_at").is_some_and(|value| !value.is_null()));
}

#[test]
fn open_database_creates_parent_and_honors_naive_flag() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("sync.db");
    let config = CliConfig::default();

    let db = open_database(&config, &db_path, true).unwrap();
    assert!(db_path.exists());
    assert_eq!(BulkSync::new(&db).execution_path(), ExecutionPath::Naive);
    drop(db);

    let db = open_database(&config, &db_path, false).unwrap();
    assert_eq!(BulkSync::new(&db).execution_path(), ExecutionPath::Atomic);
}

#[test]
fn upsert_accepts_numbers_for_numeric_columns() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("prices.db");
    Database::open(&db_path)
        .unwrap()
        .connection()
        .execute_batch(
            "CREATE TABLE prices (id INTEGER PRIMARY KEY, k INTEGER NOT NULL UNIQUE, amount NUMERIC)",
        )
        .unwrap();
    let config = CliConfig::default();

    let input = write_input(dir.path(), r#"[{"k": 1, "amount": 1.5}, {"k": 2, "amount": "2.25"}]"#);
    let upsert_args = UpsertArgs {
        table: "prices".to_string(),
        input: Some(input),
        unique: vec!["k".to_string()],
        ..UpsertArgs::default()
    };
    run_upsert(&upsert_args, false, &config, &db_path).unwrap();

    let db = open_database(&config, &db_path, false).unwrap();
    let table = load_table(&db, "prices", &[], &[]).unwrap();
    let rows: Vec<DynamicRecord> = BulkSync::new(&db).fetch(&table.all()).unwrap();
    let amounts: Vec<Option<Value>> = rows.iter().map(|row| row.get("amount")).collect();
    assert_eq!(amounts, vec![Some(Value::Real(1.5)), Some(Value::Real(2.25))]);
}

#[test]
fn summary_and_report_describe_the_result() {
    let db = Database::open_in_memory().unwrap();
    db.connection()
        .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, k INTEGER NOT NULL UNIQUE)")
        .unwrap();
    let table = db.introspect("t").unwrap();
    let scope = scope_from_filters(&table, &[]).unwrap();
    let mut records = vec![DynamicRecord::new().with("k", 1)];
    let result = BulkSync::new(&db)
        .upsert(
            &scope,
            &mut records,
            &["k"],
            &tablesync_core::UpsertOptions::new().returning_all(),
        )
        .unwrap();

    let lines = format_summary(&result);
    assert_eq!(lines[0], "1 created, 0 updated, 0 untouched, 0 deleted (atomic path)");
    assert_eq!(lines[1], "created   id=1 k=1");

    let json = serde_json::to_value(report("t", &result)).unwrap();
    assert_eq!(json["counts"]["created"], 1);
    assert_eq!(json["path"], "atomic");
    assert_eq!(json["rows"][0]["status"], "created");
}

#[test]
fn completions_are_generated_for_each_shell() {
    for shell in [CompletionShell::Bash, CompletionShell::Zsh, CompletionShell::Fish] {
        let script = String::from_utf8(render_completions(shell)).unwrap();
        assert!(script.contains("tablesync"));
    }
}

#[test]
fn config_init_updates_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    run_config_init(&path, Some(PathBuf::from("/data/a.db")), Some(500), false, false).unwrap();
    let config = run_config_init(&path, None, None, true, true).unwrap();
    assert_eq!(config.database.path, Some(PathBuf::from("/data/a.db")));
    assert_eq!(config.database.max_parameters, Some(500));
    assert!(config.database.force_naive);
    assert!(!config.ignore_duplicate_updates);
    assert_eq!(CliConfig::load_from_path(&path).unwrap(), config);

    assert!(matches!(
        run_config_init(&path, None, Some(0), false, false),
        Err(CliError::Config(_))
    ));
}
