use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};

use pretty_assertions::assert_eq;

use super::*;
use crate::db::Database;
use crate::dialect::{Capabilities, Dialect};
use crate::record::DynamicRecord;
use crate::schema::Field;
use crate::services::BulkSync;
use crate::sql::Statement;

fn setup(capabilities: Option<Capabilities>) -> Database {
    let db = Database::open_in_memory().unwrap();
    db.connection()
        .execute_batch(
            "CREATE TABLE t (
                id INTEGER PRIMARY KEY,
                k INTEGER NOT NULL UNIQUE,
                v TEXT CHECK (v IS NULL OR v <> 'boom'),
                created_at INTEGER,
                updated_at INTEGER
            );
            CREATE TABLE grouped (
                id INTEGER PRIMARY KEY,
                grp INTEGER NOT NULL,
                k INTEGER NOT NULL,
                v TEXT,
                UNIQUE (grp, k)
            );",
        )
        .unwrap();
    match capabilities {
        Some(capabilities) => db.with_capabilities(capabilities),
        None => db,
    }
}

/// Run `check` once per execution path
fn on_both_paths(check: impl Fn(&Database)) {
    check(&setup(None));
    check(&setup(Some(Capabilities::naive(Dialect::Sqlite))));
}

fn table() -> Table {
    Table::new(
        "t",
        vec![
            Field::integer("id").primary_key().identity(),
            Field::integer("k"),
            Field::text("v").nullable(),
            Field::timestamp("created_at").nullable().auto_now_add(),
            Field::timestamp("updated_at").nullable().auto_now(),
        ],
    )
    .unwrap()
}

fn grouped() -> Table {
    Table::new(
        "grouped",
        vec![
            Field::integer("id").primary_key().identity(),
            Field::integer("grp"),
            Field::integer("k"),
            Field::text("v").nullable(),
        ],
    )
    .unwrap()
}

fn rec(k: i64, v: &str) -> DynamicRecord {
    DynamicRecord::new().with("k", k).with("v", v)
}

fn seed(db: &Database, table: &Table, records: Vec<DynamicRecord>) {
    let mut records = records;
    BulkSync::new(db).bulk_create(table, &mut records).unwrap();
}

fn stored(db: &Database, table: &Table) -> Vec<(i64, Option<String>)> {
    BulkSync::new(db)
        .fetch::<DynamicRecord>(&table.all())
        .unwrap()
        .iter()
        .map(|record| {
            let k = record.get("k").unwrap().into_typed::<i64>("k").unwrap();
            let v = record.get("v").unwrap().into_typed::<Option<String>>("v").unwrap();
            (k, v)
        })
        .collect()
}

fn keys<'a>(rows: impl IntoIterator<Item = &'a ResultRow>) -> Vec<i64> {
    rows.into_iter()
        .map(|row| row.try_get::<i64>("k").unwrap())
        .collect()
}

#[test]
fn test_empty_sync_deletes_every_row_in_scope() {
    on_both_paths(|db| {
        let table = table();
        seed(db, &table, vec![rec(1, "a"), rec(2, "b"), rec(3, "c")]);

        let mut batch: Vec<DynamicRecord> = Vec::new();
        let result = BulkSync::new(db)
            .sync(&table.all(), &mut batch, &["k"], &UpsertOptions::new())
            .unwrap();

        let counts = result.counts();
        assert_eq!(counts.created + counts.updated, 0);
        assert_eq!(counts.deleted, 3);
        assert!(stored(db, &table).is_empty());
        for row in result.deleted() {
            assert_eq!(row.values().len(), 1);
            assert!(row.get("id").is_some());
        }
    });
}

#[test]
fn test_insert_into_empty_table() {
    on_both_paths(|db| {
        let table = table();
        let mut batch = vec![rec(1, "a")];
        let result = BulkSync::new(db)
            .upsert(
                &table.all(),
                &mut batch,
                &["k"],
                &UpsertOptions::new().update_fields(["v"]).returning_all(),
            )
            .unwrap();

        assert_eq!(result.created().count(), 1);
        let created = result.created().iter().next().unwrap();
        assert_eq!(created.try_get::<String>("v").unwrap(), "a");
        assert!(created.try_get::<i64>("id").unwrap() > 0);
        assert_eq!(stored(db, &table), vec![(1, Some("a".to_string()))]);
    });
}

#[test]
fn test_unchanged_row_is_reported_untouched() {
    on_both_paths(|db| {
        let table = table();
        seed(db, &table, vec![rec(1, "old")]);

        let mut batch = vec![rec(1, "old")];
        let result = BulkSync::new(db)
            .upsert(
                &table.all(),
                &mut batch,
                &["k"],
                &UpsertOptions::new()
                    .ignore_duplicate_updates(true)
                    .return_untouched(true)
                    .returning_all(),
            )
            .unwrap();

        assert!(result.updated().is_empty());
        assert_eq!(result.untouched().count(), 1);
        let row = result.untouched().iter().next().unwrap();
        assert_eq!(row.try_get::<String>("v").unwrap(), "old");
    });
}

#[test]
fn test_sync_reconciles_overlapping_keys() {
    on_both_paths(|db| {
        let table = table();
        seed(db, &table, vec![rec(1, "a"), rec(2, "b"), rec(3, "c")]);

        let mut batch = vec![rec(2, "changed"), rec(3, "c"), rec(4, "d")];
        let result = BulkSync::new(db)
            .sync(
                &table.all(),
                &mut batch,
                &["k"],
                &UpsertOptions::new().returning_all(),
            )
            .unwrap();

        assert_eq!(keys(result.created()), vec![4]);
        assert_eq!(keys(result.updated()), vec![2]);
        assert_eq!(keys(result.untouched()), vec![3]);
        assert_eq!(result.deleted().count(), 1);
        assert_eq!(
            stored(db, &table)
                .into_iter()
                .map(|(k, _)| k)
                .collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
    });
}

#[test]
fn test_bulk_update_with_nothing_executes_nothing() {
    let db = setup(None);
    let table = table();
    let mut service = BulkSync::new(&db);
    let events = std::rc::Rc::new(RefCell::new(0));
    let sink = std::rc::Rc::clone(&events);
    service.observe(move |_: &crate::notify::BulkEvent| *sink.borrow_mut() += 1);

    let none: [&str; 0] = [];
    assert_eq!(
        service
            .bulk_update::<DynamicRecord, _>(&table, &[], &none)
            .unwrap(),
        0
    );
    assert_eq!(*events.borrow(), 0);
}

#[test]
fn test_repeating_an_upsert_changes_nothing() {
    on_both_paths(|db| {
        let table = table();
        let service = BulkSync::new(db);
        let options = UpsertOptions::new().return_untouched(true).returning_all();

        let mut first = vec![rec(1, "a"), rec(2, "b")];
        service.upsert(&table.all(), &mut first, &["k"], &options).unwrap();
        let before = service.fetch::<DynamicRecord>(&table.all()).unwrap();

        let mut second = vec![rec(1, "a"), rec(2, "b")];
        let result = service.upsert(&table.all(), &mut second, &["k"], &options).unwrap();
        assert_eq!(result.counts().created, 0);
        assert_eq!(result.counts().updated, 0);
        assert_eq!(result.counts().untouched, 2);

        // Unchanged rows keep their write timestamp
        let after = service.fetch::<DynamicRecord>(&table.all()).unwrap();
        assert_eq!(before, after);
    });
}

#[test]
fn test_partitions_cover_every_key_once() {
    on_both_paths(|db| {
        let table = table();
        seed(db, &table, vec![rec(1, "a"), rec(2, "b"), rec(5, "e")]);

        let mut batch = vec![rec(1, "a"), rec(2, "x"), rec(3, "c")];
        let result = BulkSync::new(db)
            .sync(&table.all(), &mut batch, &["k"], &UpsertOptions::new())
            .unwrap();

        let ids: Vec<i64> = result
            .iter()
            .map(|row| row.try_get::<i64>("id").unwrap())
            .collect();
        let distinct: BTreeSet<i64> = ids.iter().copied().collect();
        assert_eq!(ids.len(), distinct.len());
        assert_eq!(ids.len(), 4);
        let counts = result.counts();
        assert_eq!(
            (counts.created, counts.updated, counts.untouched, counts.deleted),
            (1, 1, 1, 1)
        );
    });
}

#[test]
fn test_sync_leaves_rows_outside_scope_alone() {
    on_both_paths(|db| {
        let table = grouped();
        let row = |grp: i64, k: i64| DynamicRecord::new().with("grp", grp).with("k", k);
        seed(db, &table, vec![row(1, 1), row(1, 2), row(2, 1), row(2, 2)]);

        let mut batch = vec![row(1, 2), row(1, 3)];
        let result = BulkSync::new(db)
            .sync(
                &table.all().eq("grp", 1),
                &mut batch,
                &["grp", "k"],
                &UpsertOptions::new(),
            )
            .unwrap();
        assert_eq!(result.counts().deleted, 1);
        assert_eq!(result.counts().created, 1);

        let service = BulkSync::new(db);
        let other: Vec<DynamicRecord> = service.fetch(&table.all().eq("grp", 2)).unwrap();
        assert_eq!(other.len(), 2);
        let mine: Vec<DynamicRecord> = service.fetch(&table.all().eq("grp", 1)).unwrap();
        assert_eq!(mine.len(), 2);
    });
}

#[test]
fn test_returned_rows_match_storage() {
    on_both_paths(|db| {
        let table = table();
        seed(db, &table, vec![rec(1, "a")]);

        let mut batch = vec![rec(1, "b"), rec(2, "c")];
        let result = BulkSync::new(db)
            .upsert(&table.all(), &mut batch, &["k"], &UpsertOptions::new().returning_all())
            .unwrap();

        let returned: Vec<DynamicRecord> =
            result.iter().map(|row| row.decode().unwrap()).collect();
        let fetched: Vec<DynamicRecord> = BulkSync::new(db).fetch(&table.all()).unwrap();
        assert_eq!(returned, fetched);
    });
}

#[test]
fn test_one_timestamp_per_call() {
    on_both_paths(|db| {
        let table = table();
        seed(db, &table, vec![rec(1, "a")]);
        std::thread::sleep(std::time::Duration::from_millis(2));

        let mut batch = vec![rec(1, "b"), rec(2, "c"), rec(3, "d")];
        let result = BulkSync::new(db)
            .upsert(&table.all(), &mut batch, &["k"], &UpsertOptions::new().returning_all())
            .unwrap();

        let written: BTreeSet<String> = result
            .iter()
            .map(|row| format!("{:?}", row.get("updated_at")))
            .collect();
        assert_eq!(written.len(), 1);
        assert_eq!(batch[0].get("updated_at"), batch[2].get("updated_at"));

        // Creation time survives the update
        let updated = result.updated().iter().next().unwrap();
        assert_ne!(updated.get("created_at"), updated.get("updated_at"));
        let created = result.created().iter().next().unwrap();
        assert_eq!(created.get("created_at"), created.get("updated_at"));
    });
}

#[test]
fn test_duplicate_keys_are_rejected_unless_dropped() {
    on_both_paths(|db| {
        let table = table();
        let service = BulkSync::new(db);

        let mut batch = vec![rec(1, "first"), rec(1, "second")];
        let err = service
            .upsert(&table.all(), &mut batch, &["k"], &UpsertOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(stored(db, &table).is_empty());

        let result = service
            .upsert(
                &table.all(),
                &mut batch,
                &["k"],
                &UpsertOptions::new().drop_duplicates(true).returning_all(),
            )
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(stored(db, &table), vec![(1, Some("second".to_string()))]);
    });
}

#[test]
fn test_no_update_fields_only_inserts() {
    on_both_paths(|db| {
        let table = table();
        seed(db, &table, vec![rec(1, "keep")]);

        let mut batch = vec![rec(1, "lost"), rec(2, "new")];
        let result = BulkSync::new(db)
            .upsert(
                &table.all(),
                &mut batch,
                &["k"],
                &UpsertOptions::new()
                    .no_update_fields()
                    .return_untouched(true)
                    .returning_all(),
            )
            .unwrap();
        assert_eq!(keys(result.created()), vec![2]);
        assert_eq!(keys(result.untouched()), vec![1]);
        assert_eq!(
            stored(db, &table),
            vec![(1, Some("keep".to_string())), (2, Some("new".to_string()))]
        );
    });
}

#[test]
fn test_guard_disabled_rewrites_identical_rows() {
    on_both_paths(|db| {
        let table = table();
        seed(db, &table, vec![rec(1, "same")]);

        let mut batch = vec![rec(1, "same")];
        let result = BulkSync::new(db)
            .upsert(
                &table.all(),
                &mut batch,
                &["k"],
                &UpsertOptions::new()
                    .ignore_duplicate_updates(false)
                    .returning_all(),
            )
            .unwrap();
        assert_eq!(keys(result.updated()), vec![1]);
    });
}

#[test]
fn test_without_returning_nothing_is_reported() {
    on_both_paths(|db| {
        let table = table();
        let mut batch = vec![rec(1, "a"), rec(2, "b")];
        let result = BulkSync::new(db)
            .upsert(&table.all(), &mut batch, &["k"], &UpsertOptions::new())
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(stored(db, &table).len(), 2);
    });
}

#[test]
fn test_batches_larger_than_the_parameter_limit() {
    let small = Capabilities::sqlite().with_max_parameters(12);
    for db in [
        setup(Some(small)),
        setup(Some(Capabilities::naive(Dialect::Sqlite).with_max_parameters(12))),
    ] {
        let table = table();
        let mut batch: Vec<DynamicRecord> = (0..25).map(|k| rec(k, "v")).collect();
        let result = BulkSync::new(&db)
            .sync(&table.all(), &mut batch, &["k"], &UpsertOptions::new())
            .unwrap();
        assert_eq!(result.counts().created, 25);
        assert_eq!(stored(&db, &table).len(), 25);
    }
}

#[test]
fn test_failed_sync_rolls_back() {
    on_both_paths(|db| {
        let table = table();
        seed(db, &table, vec![rec(1, "a")]);

        let mut batch = vec![rec(2, "b"), rec(3, "boom")];
        let err = BulkSync::new(db)
            .sync(&table.all(), &mut batch, &["k"], &UpsertOptions::new())
            .unwrap_err();
        assert!(err.is_storage());
        assert_eq!(stored(db, &table), vec![(1, Some("a".to_string()))]);
    });
}

#[test]
fn test_untouched_reporting_needs_join_back() {
    let db = setup(Some(Capabilities {
        untouched_join_back: false,
        ..Capabilities::sqlite()
    }));
    let table = table();
    let mut batch = vec![rec(1, "a")];
    let err = BulkSync::new(&db)
        .sync(&table.all(), &mut batch, &["k"], &UpsertOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));

    // Plain upserts still run
    BulkSync::new(&db)
        .upsert(&table.all(), &mut batch, &["k"], &UpsertOptions::new())
        .unwrap();
}

#[test]
fn test_composite_key_needs_composite_conflict_target() {
    let db = setup(Some(Capabilities {
        composite_conflict_target: false,
        ..Capabilities::sqlite()
    }));
    let table = grouped();
    let mut batch = vec![DynamicRecord::new().with("grp", 1).with("k", 1)];
    let err = BulkSync::new(&db)
        .upsert(&table.all(), &mut batch, &["grp", "k"], &UpsertOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn test_unknown_unique_field_is_rejected() {
    let db = setup(None);
    let table = table();
    let mut batch = vec![rec(1, "a")];
    let err = BulkSync::new(&db)
        .upsert(&table.all(), &mut batch, &["nope"], &UpsertOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::UnknownField { .. }));
}

/// Executor that records statements and replays canned result sets
struct Recording {
    capabilities: Capabilities,
    statements: RefCell<Vec<Statement>>,
    responses: RefCell<VecDeque<Vec<Row>>>,
}

impl Recording {
    fn postgres(responses: Vec<Vec<Row>>) -> Self {
        Self {
            capabilities: Capabilities::postgres(),
            statements: RefCell::new(Vec::new()),
            responses: RefCell::new(responses.into()),
        }
    }

    fn sql(&self) -> Vec<String> {
        self.statements
            .borrow()
            .iter()
            .map(|statement| statement.sql.clone())
            .collect()
    }
}

impl Executor for Recording {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        self.statements.borrow_mut().push(statement.clone());
        Ok(self.responses.borrow_mut().pop_front().unwrap_or_default())
    }

    fn execute(&self, statement: &Statement) -> Result<usize> {
        self.statements.borrow_mut().push(statement.clone());
        Ok(0)
    }

    fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        f()
    }
}

fn pg_row(id: i64, k: i64, v: &str, status: &str) -> Row {
    Row::new(
        vec![
            "id".to_string(),
            "k".to_string(),
            "v".to_string(),
            "status_".to_string(),
        ],
        vec![
            SqlValue::Integer(id),
            SqlValue::Integer(k),
            SqlValue::Text(v.into()),
            SqlValue::Text(status.into()),
        ],
    )
}

#[test]
fn test_postgres_upsert_reads_status_from_one_statement() {
    let executor = Recording::postgres(vec![vec![
        pg_row(7, 1, "a", "u"),
        pg_row(8, 2, "b", "c"),
    ]]);
    let table = table();
    let mut batch = vec![rec(2, "b"), rec(1, "a")];
    let result = BulkSync::new(&executor)
        .upsert(
            &table.all(),
            &mut batch,
            &["k"],
            &UpsertOptions::new().returning(Returning::Fields(vec![
                "id".into(),
                "k".into(),
                "v".into(),
            ])),
        )
        .unwrap();

    let sql = executor.sql();
    assert_eq!(sql.len(), 1);
    assert!(sql[0].contains("xmax = 0"));
    assert!(sql[0].contains("ON CONFLICT (\"k\") DO UPDATE"));
    assert_eq!(keys(result.updated()), vec![1]);
    assert_eq!(keys(result.created()), vec![2]);
}

#[test]
fn test_postgres_sync_joins_back_then_deletes_stale_rows() {
    let pk_row = |id: i64| Row::new(vec!["id".to_string()], vec![SqlValue::Integer(id)]);
    let executor = Recording::postgres(vec![
        vec![pg_row(7, 1, "a", "n"), pg_row(8, 2, "b", "c")],
        vec![pk_row(6), pk_row(7), pk_row(8)],
    ]);
    let table = table();
    let mut batch = vec![rec(1, "a"), rec(2, "b")];
    let result = BulkSync::new(&executor)
        .sync(
            &table.all(),
            &mut batch,
            &["k"],
            &UpsertOptions::new().returning(Returning::Fields(vec![
                "id".into(),
                "k".into(),
                "v".into(),
            ])),
        )
        .unwrap();

    let sql = executor.sql();
    assert_eq!(sql.len(), 3);
    assert!(sql[0].contains("DISTINCT ON"));
    assert!(sql[2].starts_with("DELETE FROM \"t\""));
    assert_eq!(keys(result.untouched()), vec![1]);
    assert_eq!(keys(result.created()), vec![2]);
    let deleted: Vec<i64> = result
        .deleted()
        .iter()
        .map(|row| row.try_get::<i64>("id").unwrap())
        .collect();
    assert_eq!(deleted, vec![6]);
}
