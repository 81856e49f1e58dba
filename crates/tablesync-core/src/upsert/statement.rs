//! Conflict-resolving insert statements
//!
//! One builder renders the insert-or-update for both dialects:
//!
//! - `SQLite`: `INSERT ... ON CONFLICT ... DO UPDATE ... RETURNING`, paired with
//!   a probe of the rows that already exist for the batch's keys.
//! - Postgres: the same insert reporting `xmax = 0` per returned row, or, when
//!   untouched rows are wanted, a single statement that unions the insert's
//!   output with the input relation joined back to the table.

use super::prepare::EncodedRow;
use crate::codec::STATUS_COLUMN;
use crate::dialect::Dialect;
use crate::schema::{Classification, Field, FieldKind, Table};
use crate::sql::{SqlWriter, Statement};
use crate::value::SqlValue;

const INPUT_RELATION: &str = "input_rows";
const ROW_ID: &str = "temp_id_";

/// Renders the statements of one upsert call
#[derive(Debug, Clone)]
pub struct ConflictStatement<'t> {
    table: &'t Table,
    dialect: Dialect,
    insert: Vec<&'t Field>,
    unique: Vec<&'t Field>,
    update: Vec<&'t Field>,
    guard: Vec<&'t Field>,
    returning: Vec<&'t Field>,
    status: bool,
    untouched: bool,
}

impl<'t> ConflictStatement<'t> {
    /// Builder for `classification` on `table`, guarding duplicate updates
    pub fn new(table: &'t Table, classification: &Classification<'t>, dialect: Dialect) -> Self {
        Self {
            table,
            dialect,
            insert: classification.insert.clone(),
            unique: classification.unique.clone(),
            update: classification.update.clone(),
            guard: classification.guard(),
            returning: Vec::new(),
            status: false,
            untouched: false,
        }
    }

    /// Keep (`true`) or drop the `WHERE` guard on the update
    #[must_use]
    pub fn ignore_duplicate_updates(mut self, ignore: bool) -> Self {
        if !ignore {
            self.guard.clear();
        }
        self
    }

    /// Columns returned for each written row
    #[must_use]
    pub fn returning(mut self, fields: Vec<&'t Field>) -> Self {
        self.returning = fields;
        self
    }

    /// Report `created`/`updated` per returned row from the engine's own signal
    #[must_use]
    pub const fn with_status(mut self, status: bool) -> Self {
        self.status = status;
        self
    }

    /// Also return matched rows that were not written, tagged untouched
    #[must_use]
    pub const fn with_untouched(mut self, untouched: bool) -> Self {
        self.untouched = untouched;
        self
    }

    /// Bound values per input row
    pub fn width(&self) -> usize {
        match (self.dialect, self.untouched) {
            (Dialect::Postgres, true) => self.insert.len() + 1,
            _ => self.insert.len(),
        }
    }

    /// Whether the statement returns rows
    pub fn returns_rows(&self) -> bool {
        !self.returning.is_empty() || self.status || self.untouched
    }

    /// Render the insert for `rows`
    pub fn build(&self, rows: &[EncodedRow]) -> Statement {
        let mut w = SqlWriter::new(self.dialect);
        if self.dialect == Dialect::Postgres && self.untouched {
            self.write_with_join_back(&mut w, rows);
        } else {
            self.write_insert_head(&mut w);
            w.push(" VALUES ");
            for (i, row) in rows.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.bind_row(row.values.iter().cloned(), None);
            }
            self.write_conflict_clause(&mut w);
            self.write_returning(&mut w);
        }
        w.finish()
    }

    /// Select the stored rows matching the keys of `rows`
    ///
    /// Runs inside the upsert's savepoint, immediately before [`Self::build`].
    pub fn probe(&self, rows: &[EncodedRow]) -> Statement {
        let positions: Vec<usize> = self
            .unique
            .iter()
            .filter_map(|unique| self.insert.iter().position(|f| f.name == unique.name))
            .collect();
        let kinds: Vec<&FieldKind> = self.unique.iter().map(|field| &field.kind).collect();

        let mut w = SqlWriter::new(self.dialect);
        w.push("WITH ")
            .push(INPUT_RELATION)
            .push("(")
            .ident_list(self.unique.iter().map(|field| field.column.as_str()))
            .push(") AS (VALUES ");
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            let casts = (i == 0).then_some(kinds.as_slice());
            w.bind_row(row.key(&positions), casts);
        }
        w.push(") SELECT ");
        self.write_columns(&mut w, Some("c"));
        w.push(" FROM ")
            .push(INPUT_RELATION)
            .push(" JOIN ")
            .ident(self.table.name())
            .push(" AS c ON ");
        self.write_key_join(&mut w);
        w.finish()
    }

    fn write_insert_head(&self, w: &mut SqlWriter) {
        w.push("INSERT INTO ")
            .ident(self.table.name())
            .push(" (")
            .ident_list(self.insert.iter().map(|field| field.column.as_str()))
            .push(")");
    }

    fn write_conflict_clause(&self, w: &mut SqlWriter) {
        w.push(" ON CONFLICT (")
            .ident_list(self.unique.iter().map(|field| field.column.as_str()))
            .push(")");
        if self.update.is_empty() {
            w.push(" DO NOTHING");
            return;
        }

        let excluded = self.dialect.excluded();
        w.push(" DO UPDATE SET ");
        for (i, field) in self.update.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(&field.column)
                .push(" = ")
                .qualified(excluded, &field.column);
        }

        if !self.guard.is_empty() {
            let table = self.dialect.quote(self.table.name());
            w.push(" WHERE ");
            for (i, field) in self.guard.iter().enumerate() {
                if i > 0 {
                    w.push(" OR ");
                }
                w.qualified(&table, &field.column)
                    .push(" ")
                    .push(self.dialect.distinct_operator())
                    .push(" ")
                    .qualified(excluded, &field.column);
            }
        }
    }

    fn write_returning(&self, w: &mut SqlWriter) {
        if !self.returning.is_empty() || self.status {
            w.push(" RETURNING ");
            self.write_columns(w, None);
            if self.status && self.dialect == Dialect::Postgres {
                if !self.returning.is_empty() {
                    w.push(", ");
                }
                w.push("CASE WHEN xmax = 0 THEN 'c' ELSE 'u' END AS ")
                    .ident(STATUS_COLUMN);
            }
        }
    }

    fn write_columns(&self, w: &mut SqlWriter, qualifier: Option<&str>) {
        for (i, field) in self.returning.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            match qualifier {
                Some(qualifier) => w.qualified(qualifier, &field.column),
                None => w.ident(&field.column),
            };
        }
    }

    fn write_key_join(&self, w: &mut SqlWriter) {
        for (i, field) in self.unique.iter().enumerate() {
            if i > 0 {
                w.push(" AND ");
            }
            w.qualified("c", &field.column)
                .push(" = ")
                .qualified(INPUT_RELATION, &field.column);
        }
    }

    fn write_with_join_back(&self, w: &mut SqlWriter, rows: &[EncodedRow]) {
        let kinds: Vec<&FieldKind> = std::iter::once(&FieldKind::Integer)
            .chain(self.insert.iter().map(|field| &field.kind))
            .collect();
        let insert_columns = || self.insert.iter().map(|field| field.column.as_str());

        w.push("WITH ")
            .push(INPUT_RELATION)
            .push("(")
            .ident_list(std::iter::once(ROW_ID).chain(insert_columns()))
            .push(") AS (VALUES ");
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            #[allow(clippy::cast_possible_wrap)]
            let row_id = SqlValue::Integer(row.index as i64);
            let casts = (i == 0).then_some(kinds.as_slice());
            w.bind_row(std::iter::once(row_id).chain(row.values.iter().cloned()), casts);
        }
        w.push("), ins AS (");
        self.write_insert_head(w);
        w.push(" SELECT ")
            .ident_list(insert_columns())
            .push(" FROM ")
            .push(INPUT_RELATION)
            .push(" ORDER BY ")
            .ident(ROW_ID);
        self.write_conflict_clause(w);
        self.write_returning(w);

        let pk = &self.table.primary_key().column;
        w.push(") SELECT DISTINCT ON (")
            .ident(pk)
            .push(") * FROM (SELECT ");
        self.write_columns(w, None);
        w.push(", ").ident(STATUS_COLUMN).push(" FROM ins UNION ALL SELECT ");
        self.write_columns(w, Some("c"));
        w.push(", 'n' AS ")
            .ident(STATUS_COLUMN)
            .push(" FROM ")
            .push(INPUT_RELATION)
            .push(" JOIN ")
            .ident(self.table.name())
            .push(" AS c ON ");
        self.write_key_join(w);
        w.push(") AS results ORDER BY ")
            .ident(pk)
            .push(", CASE WHEN ")
            .ident(STATUS_COLUMN)
            .push(" = 'n' THEN 1 ELSE 0 END");
    }
}
