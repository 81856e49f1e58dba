//! Upsert and sync engine
//!
//! An upsert classifies the table's fields, stamps auto fields, encodes and
//! sorts the batch by unique key, then runs inside one savepoint:
//!
//! - on engines with a conflict-resolving insert, the statements rendered by
//!   [`ConflictStatement`] (a probe plus the insert on `SQLite`, a single
//!   statement on Postgres);
//! - elsewhere, the read-then-write fallback in `naive`.
//!
//! A sync additionally deletes every in-scope row the batch did not match.

mod naive;
mod prepare;
mod result;
mod statement;

#[cfg(test)]
mod tests;

pub use prepare::{encode_batch, fill_auto_fields, now, EncodedRow};
pub use result::{Counts, ExecutionPath, Partition, PartitionIter, Split, UpsertResult};
pub use statement::ConflictStatement;

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::{self, RowCodec};
use crate::db::{Executor, Row};
use crate::error::{Error, Result};
use crate::record::{Record, ResultRow, RowStatus};
use crate::schema::{classify, Classification, Field, Table};
use crate::scope::Scope;
use crate::value::SqlValue;

/// Which columns an upsert returns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Returning {
    /// No columns (the primary key is still returned when a sync or
    /// untouched reporting needs it)
    #[default]
    None,
    /// Every field of the table
    All,
    /// The named fields
    Fields(Vec<String>),
}

/// Options of an upsert call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Fields assigned on conflict; `None` means every non-key writable field
    pub update_fields: Option<Vec<String>>,
    /// Columns to return
    pub returning: Returning,
    /// Delete in-scope rows absent from the batch
    pub sync: bool,
    /// Skip updates that would not change any compared column
    pub ignore_duplicate_updates: bool,
    /// Also report matched rows that were left as is
    pub return_untouched: bool,
    /// Keep only the last record of each repeated unique key
    pub drop_duplicates: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            update_fields: None,
            returning: Returning::None,
            sync: false,
            ignore_duplicate_updates: true,
            return_untouched: false,
            drop_duplicates: false,
        }
    }
}

impl UpsertOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the update to `fields`
    #[must_use]
    pub fn update_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Never update existing rows
    #[must_use]
    pub fn no_update_fields(mut self) -> Self {
        self.update_fields = Some(Vec::new());
        self
    }

    /// Choose returned columns
    #[must_use]
    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = returning;
        self
    }

    /// Return every column
    #[must_use]
    pub fn returning_all(self) -> Self {
        self.returning(Returning::All)
    }

    /// Enable or disable sync deletion
    #[must_use]
    pub const fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Enable or disable the duplicate-update guard
    #[must_use]
    pub const fn ignore_duplicate_updates(mut self, ignore: bool) -> Self {
        self.ignore_duplicate_updates = ignore;
        self
    }

    /// Enable or disable untouched reporting
    #[must_use]
    pub const fn return_untouched(mut self, untouched: bool) -> Self {
        self.return_untouched = untouched;
        self
    }

    /// Enable or disable last-wins handling of repeated keys
    #[must_use]
    pub const fn drop_duplicates(mut self, drop: bool) -> Self {
        self.drop_duplicates = drop;
        self
    }

    fn reports_untouched(&self) -> bool {
        self.return_untouched || self.sync
    }
}

/// Everything one call needs after validation
struct Plan<'t> {
    table: &'t Table,
    classification: Classification<'t>,
    /// Fields exposed on result rows
    visible: Vec<&'t Field>,
    report_untouched: bool,
}

impl<'t> Plan<'t> {
    fn new<S: AsRef<str>>(
        table: &'t Table,
        unique_fields: &[S],
        options: &UpsertOptions,
    ) -> Result<Self> {
        let unique: Vec<&str> = unique_fields.iter().map(AsRef::as_ref).collect();
        let update: Option<Vec<&str>> = options
            .update_fields
            .as_ref()
            .map(|fields| fields.iter().map(String::as_str).collect());
        let classification = classify(table, &unique, update.as_deref())?;

        let mut visible = match &options.returning {
            Returning::None => Vec::new(),
            Returning::All => table.fields().iter().collect(),
            Returning::Fields(names) => table.resolve(names)?,
        };
        let report_untouched = options.reports_untouched();
        let pk = table.primary_key();
        if report_untouched && !visible.iter().any(|field| field.name == pk.name) {
            visible.insert(0, pk);
        }

        Ok(Self {
            table,
            classification,
            visible,
            report_untouched,
        })
    }

    fn visible_names(&self) -> Vec<String> {
        self.visible.iter().map(|field| field.name.clone()).collect()
    }

    /// Columns fetched from storage: the visible ones plus the primary key
    fn fetched(&self) -> Vec<&'t Field> {
        let pk = self.table.primary_key();
        let mut fetched = self.visible.clone();
        if !fetched.is_empty() && !fetched.iter().any(|field| field.name == pk.name) {
            fetched.push(pk);
        }
        fetched
    }
}

/// Run an upsert (or sync, per `options.sync`) against `executor`
pub(crate) fn run<E, R, S>(
    executor: &E,
    scope: &Scope<'_>,
    records: &mut [R],
    unique_fields: &[S],
    options: &UpsertOptions,
) -> Result<UpsertResult>
where
    E: Executor,
    R: Record,
    S: AsRef<str>,
{
    let table = scope.table();
    let capabilities = executor.capabilities();
    let plan = Plan::new(table, unique_fields, options)?;

    let path = if capabilities.conflict_upsert {
        if plan.report_untouched && !capabilities.untouched_join_back {
            return Err(Error::Unsupported(
                "reporting untouched rows (required by sync) needs an engine that can join \
                 the input back to the table"
                    .into(),
            ));
        }
        if plan.classification.unique.len() > 1 && !capabilities.composite_conflict_target {
            return Err(Error::Unsupported(
                "this engine cannot use several columns as a conflict target".into(),
            ));
        }
        ExecutionPath::Atomic
    } else {
        tracing::warn!(
            table = table.name(),
            "Engine lacks a conflict-resolving insert; using the read-then-write path"
        );
        ExecutionPath::Naive
    };

    fill_auto_fields(table, records, now())?;
    let codec = RowCodec::new(table, capabilities.dialect);
    let rows = encode_batch(
        &codec,
        records,
        &plan.classification.insert,
        &plan.classification.unique_positions(),
        options.drop_duplicates,
    )?;

    if rows.is_empty() && !options.sync {
        return Ok(UpsertResult::empty(path));
    }

    let (keyed, deleted) = executor.atomic(|| match path {
        ExecutionPath::Atomic => {
            let keyed = if rows.is_empty() {
                Vec::new()
            } else {
                atomic_upsert(executor, &plan, &rows, options)?
            };
            let deleted = if options.sync {
                let keep: BTreeSet<SqlValue> = keyed.iter().map(|(key, _)| key.clone()).collect();
                delete_stale(executor, scope, &keep)?
            } else {
                Vec::new()
            };
            Ok((keyed, deleted))
        }
        ExecutionPath::Naive => naive::upsert(executor, scope, &plan, &rows, options),
    })?;

    let result = UpsertResult::assemble(keyed, deleted, path);
    let counts = result.counts();
    tracing::info!(
        table = table.name(),
        path = %path,
        created = counts.created,
        updated = counts.updated,
        untouched = counts.untouched,
        deleted = counts.deleted,
        "{} complete",
        if options.sync { "Sync" } else { "Upsert" }
    );
    Ok(result)
}

fn atomic_upsert<E: Executor>(
    executor: &E,
    plan: &Plan<'_>,
    rows: &[EncodedRow],
    options: &UpsertOptions,
) -> Result<Vec<(SqlValue, ResultRow)>> {
    let capabilities = executor.capabilities();
    let table = plan.table;
    let pk = table.primary_key();
    let needs_rows = !plan.visible.is_empty();
    let native = capabilities.native_insert_signal;

    let builder = ConflictStatement::new(table, &plan.classification, capabilities.dialect)
        .ignore_duplicate_updates(options.ignore_duplicate_updates)
        .returning(plan.fetched())
        .with_status(needs_rows && native)
        .with_untouched(plan.report_untouched && native);

    let codec = RowCodec::new(table, capabilities.dialect);
    let mut keyed = Vec::new();
    for chunk in rows.chunks(capabilities.rows_per_statement(builder.width())) {
        if !needs_rows {
            executor.execute(&builder.build(chunk))?;
            continue;
        }

        if native {
            for row in executor.query(&builder.build(chunk))? {
                keyed.push((primary_key(&row, pk), codec.decode_row(&row, RowStatus::Created)?));
            }
            continue;
        }

        let mut existing: BTreeMap<SqlValue, Row> = executor
            .query(&builder.probe(chunk))?
            .into_iter()
            .map(|row| (primary_key(&row, pk), row))
            .collect();
        for row in executor.query(&builder.build(chunk))? {
            let key = primary_key(&row, pk);
            let status = if existing.remove(&key).is_some() {
                RowStatus::Updated
            } else {
                RowStatus::Created
            };
            keyed.push((key, codec.decode_row(&row, status)?));
        }
        if plan.report_untouched {
            for (key, row) in existing {
                keyed.push((key, codec.decode_row(&row, RowStatus::Untouched)?));
            }
        }
    }

    let visible = plan.visible_names();
    for (_, row) in &mut keyed {
        row.retain_fields(&visible);
    }
    Ok(keyed)
}

/// Delete in-scope rows whose primary key is not in `keep`
fn delete_stale<E: Executor>(
    executor: &E,
    scope: &Scope<'_>,
    keep: &BTreeSet<SqlValue>,
) -> Result<Vec<ResultRow>> {
    let table = scope.table();
    let pk = table.primary_key();
    let stale: Vec<SqlValue> = executor
        .query(&scope.select(executor.capabilities().dialect, &[pk])?)?
        .iter()
        .map(|row| primary_key(row, pk))
        .filter(|key| !keep.contains(key))
        .collect();
    delete_keys(executor, table, stale)
}

/// Delete `keys` and report them as deleted rows carrying only the primary key
fn delete_keys<E: Executor>(
    executor: &E,
    table: &Table,
    keys: Vec<SqlValue>,
) -> Result<Vec<ResultRow>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    executor.delete(table, &keys)?;
    let pk = table.primary_key();
    keys.into_iter()
        .map(|key| {
            let value = codec::decode(pk, key)?;
            Ok(ResultRow::new(
                RowStatus::Deleted,
                BTreeMap::from([(pk.name.clone(), value)]),
            ))
        })
        .collect()
}

fn primary_key(row: &Row, pk: &Field) -> SqlValue {
    row.get(&pk.column).cloned().unwrap_or(SqlValue::Null)
}
