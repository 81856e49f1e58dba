//! Bulk operations over one executor

use std::collections::BTreeMap;

use crate::bulk;
use crate::codec::{self, RowCodec};
use crate::db::{Executor, Row};
use crate::error::{Error, Result};
use crate::notify::{BulkEvent, BulkObserver, BulkOperation, Notifier, ObserverId};
use crate::record::{DynamicRecord, Record, RowStatus};
use crate::schema::{AutoPopulate, Field, Table};
use crate::scope::{Lookup, Scope};
use crate::upsert::{self, fill_auto_fields, now, ExecutionPath, UpsertOptions, UpsertResult};
use crate::value::{SqlValue, Value};

/// Bulk create, update, upsert and sync against an [`Executor`]
///
/// Every successful mutation is reported to the registered observers.
#[derive(Debug)]
pub struct BulkSync<'e, E: Executor> {
    executor: &'e E,
    notifier: Notifier,
}

impl<'e, E: Executor> BulkSync<'e, E> {
    /// Wrap an executor
    pub fn new(executor: &'e E) -> Self {
        Self {
            executor,
            notifier: Notifier::new(),
        }
    }

    /// The wrapped executor
    pub const fn executor(&self) -> &'e E {
        self.executor
    }

    /// Strategy upserts will use on this executor
    pub fn execution_path(&self) -> ExecutionPath {
        if self.executor.capabilities().conflict_upsert {
            ExecutionPath::Atomic
        } else {
            ExecutionPath::Naive
        }
    }

    /// Register an observer of completed operations
    pub fn observe<O>(&mut self, observer: O) -> ObserverId
    where
        O: BulkObserver + 'static,
    {
        self.notifier.register(Box::new(observer))
    }

    /// Remove an observer; returns whether it was registered
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.notifier.unregister(id)
    }

    fn notify(&self, table: &Table, operation: BulkOperation, rows: usize) {
        self.notifier.emit(&BulkEvent {
            table: table.name().to_string(),
            operation,
            rows,
        });
    }

    /// Insert `records`, stamping auto fields
    ///
    /// An identity primary key is written only when every record carries a
    /// value for it.
    pub fn bulk_create<R: Record>(&self, table: &Table, records: &mut [R]) -> Result<usize> {
        let capabilities = self.executor.capabilities();
        fill_auto_fields(table, records, now())?;

        let fields: Vec<&Field> = table
            .fields()
            .iter()
            .filter(|field| {
                !field.identity
                    || records
                        .iter()
                        .all(|record| record.get(&field.name).is_some_and(|v| !v.is_null()))
            })
            .collect();
        let codec = RowCodec::new(table, capabilities.dialect);
        let rows = records
            .iter()
            .enumerate()
            .map(|(index, record)| codec.encode(record, &fields, index))
            .collect::<Result<Vec<_>>>()?;

        let statements = bulk::insert_statements(table, &fields, &rows, capabilities);
        let inserted = self.executor.atomic(|| {
            statements
                .iter()
                .try_fold(0, |total, statement| Ok(total + self.executor.execute(statement)?))
        })?;

        tracing::debug!(table = table.name(), rows = inserted, "Bulk create complete");
        self.notify(table, BulkOperation::Create, inserted);
        Ok(inserted)
    }

    /// Write `fields` of already-stored `records`, matched by primary key
    ///
    /// Nothing runs and nothing is notified when `records` or `fields` is empty.
    pub fn bulk_update<R, S>(&self, table: &Table, records: &[R], fields: &[S]) -> Result<usize>
    where
        R: Record,
        S: AsRef<str>,
    {
        if records.is_empty() || fields.is_empty() {
            return Ok(0);
        }
        let fields = table.resolve(fields)?;
        let pk = table.primary_key();
        if let Some(field) = fields.iter().find(|field| field.primary_key) {
            return Err(Error::Validation(format!(
                "Cannot bulk update the primary key '{}'",
                field.name
            )));
        }

        let capabilities = self.executor.capabilities();
        let codec = RowCodec::new(table, capabilities.dialect);
        let mut columns = Vec::with_capacity(fields.len() + 1);
        columns.push(pk);
        columns.extend(fields.iter().copied());
        let rows = records
            .iter()
            .enumerate()
            .map(|(index, record)| codec.encode(record, &columns, index))
            .collect::<Result<Vec<_>>>()?;

        let statements = bulk::update_statements(table, &fields, &rows, capabilities);
        let updated = self.executor.atomic(|| {
            statements
                .iter()
                .try_fold(0, |total, statement| Ok(total + self.executor.execute(statement)?))
        })?;

        tracing::debug!(table = table.name(), rows = updated, "Bulk update complete");
        self.notify(table, BulkOperation::Update, updated);
        Ok(updated)
    }

    /// Insert or update `records` by `unique_fields`
    ///
    /// With `options.sync`, in-scope rows absent from the batch are deleted.
    pub fn upsert<R, S>(
        &self,
        scope: &Scope<'_>,
        records: &mut [R],
        unique_fields: &[S],
        options: &UpsertOptions,
    ) -> Result<UpsertResult>
    where
        R: Record,
        S: AsRef<str>,
    {
        let result = upsert::run(self.executor, scope, records, unique_fields, options)?;
        let operation = if options.sync {
            BulkOperation::Sync
        } else {
            BulkOperation::Upsert
        };
        self.notify(scope.table(), operation, result.len());
        Ok(result)
    }

    /// Make the rows of `scope` match `records` exactly
    pub fn sync<R, S>(
        &self,
        scope: &Scope<'_>,
        records: &mut [R],
        unique_fields: &[S],
        options: &UpsertOptions,
    ) -> Result<UpsertResult>
    where
        R: Record,
        S: AsRef<str>,
    {
        let options = options.clone().sync(true);
        self.upsert(scope, records, unique_fields, &options)
    }

    fn select_rows(&self, scope: &Scope<'_>) -> Result<Vec<Row>> {
        let fields: Vec<&Field> = scope.table().fields().iter().collect();
        let statement = scope.select(self.executor.capabilities().dialect, &fields)?;
        self.executor.query(&statement)
    }

    fn materialize<R: Record>(&self, table: &Table, row: &Row) -> Result<R> {
        let codec = RowCodec::new(table, self.executor.capabilities().dialect);
        codec.decode_row(row, RowStatus::Untouched)?.decode()
    }

    /// Every row of `scope`, ordered by primary key
    pub fn fetch<R: Record>(&self, scope: &Scope<'_>) -> Result<Vec<R>> {
        self.select_rows(scope)?
            .iter()
            .map(|row| self.materialize(scope.table(), row))
            .collect()
    }

    /// Rows of `scope` keyed by primary key
    pub fn id_dict<R: Record>(&self, scope: &Scope<'_>) -> Result<BTreeMap<SqlValue, R>> {
        let pk = scope.table().primary_key();
        self.select_rows(scope)?
            .iter()
            .map(|row| {
                let key = row.get(&pk.column).cloned().unwrap_or(SqlValue::Null);
                Ok((key, self.materialize(scope.table(), row)?))
            })
            .collect()
    }

    /// Look up the single row of `scope`
    pub fn lookup<R: Record>(&self, scope: &Scope<'_>) -> Result<Lookup<R>> {
        let mut rows = self.select_rows(scope)?;
        match rows.len() {
            0 => Ok(Lookup::Missing),
            1 => {
                let row = rows.remove(0);
                Ok(Lookup::One(self.materialize(scope.table(), &row)?))
            }
            n => Ok(Lookup::Multiple(n)),
        }
    }

    /// The single row of `scope`, `None` if there is none
    ///
    /// More than one match is an error.
    pub fn get_or_none<R: Record>(&self, scope: &Scope<'_>) -> Result<Option<R>> {
        match self.lookup(scope)? {
            Lookup::Missing => Ok(None),
            Lookup::One(record) => Ok(Some(record)),
            Lookup::Multiple(count) => Err(Error::MultipleRows {
                table: scope.table().name().to_string(),
                count,
            }),
        }
    }

    /// The single row of `scope`; zero or several matches are errors
    pub fn single<R: Record>(&self, scope: &Scope<'_>) -> Result<R> {
        self.get_or_none(scope)?
            .ok_or_else(|| Error::NotFound(scope.table().name().to_string()))
    }

    /// Assign `assignments` on every row of `scope`
    pub fn update(&self, scope: &Scope<'_>, assignments: &[(&str, Value)]) -> Result<usize> {
        let table = scope.table();
        let capabilities = self.executor.capabilities();
        let codec = RowCodec::new(table, capabilities.dialect);
        let encoded = assignments
            .iter()
            .map(|(name, value)| {
                let field = table.field(name)?;
                Ok((field, codec.encode_value(field, value.clone(), 0)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let statement = scope.update(capabilities.dialect, &encoded)?;
        let updated = self.executor.execute(&statement)?;
        self.notify(table, BulkOperation::ScopeUpdate, updated);
        Ok(updated)
    }

    /// Get-or-create the row matching `lookup`, then apply `updates`
    ///
    /// A new row is built from `lookup`, `defaults` and `updates` (updates
    /// win). An existing row is written only when some update value differs
    /// from the stored one. Returns the row and whether it was created.
    pub fn upsert_one<R: Record>(
        &self,
        table: &Table,
        lookup: &DynamicRecord,
        defaults: &DynamicRecord,
        updates: &DynamicRecord,
    ) -> Result<(R, bool)> {
        let capabilities = self.executor.capabilities();
        let codec = RowCodec::new(table, capabilities.dialect);
        let scope = lookup
            .values()
            .iter()
            .fold(table.all(), |scope, (name, value)| scope.eq(name.clone(), value.clone()));
        let stamp = now();

        let (record, wrote, created) = self.executor.atomic(|| {
            let mut rows = self.select_rows(&scope)?;
            if rows.len() > 1 {
                return Err(Error::MultipleRows {
                    table: table.name().to_string(),
                    count: rows.len(),
                });
            }

            let Some(stored) = rows.pop() else {
                let mut record = defaults.clone();
                for (name, value) in lookup.values().iter().chain(updates.values()) {
                    record.set(name, value.clone())?;
                }
                fill_auto_fields(table, std::slice::from_mut(&mut record), stamp)?;
                let fields: Vec<&Field> = table
                    .fields()
                    .iter()
                    .filter(|field| record.values().contains_key(&field.name))
                    .collect();
                let row = codec.encode(&record, &fields, 0)?;
                for statement in bulk::insert_statements(table, &fields, &[row], capabilities) {
                    self.executor.execute(&statement)?;
                }
                // Updates may have overridden lookup values
                let inserted = lookup.values().keys().fold(table.all(), |scope, name| {
                    scope.eq(name.clone(), record.get(name).unwrap_or(Value::Null))
                });
                return Ok((self.single::<R>(&inserted)?, true, true));
            };

            let pk = table.primary_key();
            let mut key = stored.get(&pk.column).cloned().unwrap_or(SqlValue::Null);
            let by_pk = table.all().eq(pk.name.clone(), codec::decode(pk, key.clone())?);

            let mut assignments = Vec::new();
            for (name, value) in updates.values() {
                let field = table.field(name)?;
                let encoded = codec.encode_value(field, value.clone(), 0)?;
                if stored.get(&field.column) != Some(&encoded) {
                    assignments.push((field, encoded));
                }
            }
            if assignments.is_empty() {
                return Ok((self.single::<R>(&by_pk)?, false, false));
            }
            for field in table.auto_fields() {
                if field.auto == AutoPopulate::OnWrite {
                    assignments.push((field, codec.encode_value(field, Value::Timestamp(stamp), 0)?));
                }
            }
            if let Some((_, new_key)) = assignments.iter().find(|(field, _)| field.name == pk.name)
            {
                key = new_key.clone();
            }

            self.executor
                .execute(&by_pk.update(capabilities.dialect, &assignments)?)?;
            let updated = table.all().eq(pk.name.clone(), codec::decode(pk, key)?);
            Ok((self.single::<R>(&updated)?, true, false))
        })?;

        if wrote {
            self.notify(table, BulkOperation::UpsertOne, 1);
        }
        Ok((record, created))
    }
}
