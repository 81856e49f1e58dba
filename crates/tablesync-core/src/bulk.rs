//! Multi-row insert, update and delete statements
//!
//! Each builder splits its rows so that no statement binds more than
//! [`Capabilities::max_parameters`] values.

use crate::dialect::{Capabilities, Dialect};
use crate::schema::{Field, FieldKind, Table};
use crate::sql::{SqlWriter, Statement};
use crate::value::SqlValue;

/// `INSERT INTO t (fields...) VALUES (...), (...)`
///
/// Each row holds one value per field, in order.
pub fn insert_statements(
    table: &Table,
    fields: &[&Field],
    rows: &[Vec<SqlValue>],
    capabilities: &Capabilities,
) -> Vec<Statement> {
    let dialect = capabilities.dialect;
    if fields.is_empty() {
        return rows
            .iter()
            .map(|_| {
                let mut w = SqlWriter::new(dialect);
                w.push("INSERT INTO ")
                    .ident(table.name())
                    .push(" DEFAULT VALUES");
                w.finish()
            })
            .collect();
    }

    rows.chunks(capabilities.rows_per_statement(fields.len()))
        .map(|chunk| {
            let mut w = SqlWriter::new(dialect);
            w.push("INSERT INTO ")
                .ident(table.name())
                .push(" (")
                .ident_list(fields.iter().map(|field| field.column.as_str()))
                .push(") VALUES ");
            for (i, row) in chunk.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.bind_row(row.iter().cloned(), None);
            }
            w.finish()
        })
        .collect()
}

/// `UPDATE t SET ... FROM (VALUES ...) AS v WHERE t.pk = v.pk`
///
/// Each row holds the primary key followed by one value per field.
pub fn update_statements(
    table: &Table,
    fields: &[&Field],
    rows: &[Vec<SqlValue>],
    capabilities: &Capabilities,
) -> Vec<Statement> {
    if fields.is_empty() {
        return Vec::new();
    }
    let pk = table.primary_key();
    let width = fields.len() + 1;
    let kinds: Vec<&FieldKind> = std::iter::once(&pk.kind)
        .chain(fields.iter().map(|field| &field.kind))
        .collect();

    rows.chunks(capabilities.rows_per_statement(width))
        .map(|chunk| {
            let mut w = SqlWriter::new(capabilities.dialect);
            w.push("UPDATE ").ident(table.name()).push(" SET ");
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.ident(&field.column).push(" = ");
                values_column(&mut w, field, i + 2);
            }
            w.push(" FROM (VALUES ");
            for (i, row) in chunk.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                let casts = (i == 0).then_some(kinds.as_slice());
                w.bind_row(row.iter().cloned(), casts);
            }
            w.push(") AS v");
            if capabilities.dialect == Dialect::Postgres {
                w.push("(")
                    .ident_list(
                        std::iter::once(pk.column.as_str())
                            .chain(fields.iter().map(|field| field.column.as_str())),
                    )
                    .push(")");
            }
            w.push(" WHERE ")
                .qualified(&capabilities.dialect.quote(table.name()), &pk.column)
                .push(" = ");
            values_column(&mut w, pk, 1);
            w.finish()
        })
        .collect()
}

/// Column `position` (1-based) of the `v` values relation
fn values_column(w: &mut SqlWriter, field: &Field, position: usize) {
    match w.dialect() {
        // SQLite names VALUES columns column1, column2, ...
        Dialect::Sqlite => {
            w.push(&format!("v.column{position}"));
        }
        Dialect::Postgres => {
            w.qualified("v", &field.column);
        }
    }
}

/// `DELETE FROM t WHERE pk IN (...)`
pub fn delete_statements(
    table: &Table,
    keys: &[SqlValue],
    capabilities: &Capabilities,
) -> Vec<Statement> {
    let pk = table.primary_key();
    keys.chunks(capabilities.rows_per_statement(1))
        .map(|chunk| {
            let mut w = SqlWriter::new(capabilities.dialect);
            w.push("DELETE FROM ")
                .ident(table.name())
                .push(" WHERE ")
                .ident(&pk.column)
                .push(" IN (");
            for (i, key) in chunk.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.bind(key.clone());
            }
            w.push(")");
            w.finish()
        })
        .collect()
}
