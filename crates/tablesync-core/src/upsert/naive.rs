//! Read-then-write fallback for engines without a conflict-resolving insert

use std::collections::{BTreeMap, BTreeSet};

use super::{delete_keys, primary_key, EncodedRow, Plan, UpsertOptions};
use crate::bulk;
use crate::codec::RowCodec;
use crate::db::{Executor, Row};
use crate::dialect::Capabilities;
use crate::error::Result;
use crate::record::{ResultRow, RowStatus};
use crate::schema::Field;
use crate::scope::Scope;
use crate::sql::{SqlWriter, Statement};
use crate::value::SqlValue;

/// Rows written by the call, keyed by primary key, plus deleted rows
type Outcome = (Vec<(SqlValue, ResultRow)>, Vec<ResultRow>);

/// Match the batch against the in-scope rows in memory, then delete, update
/// and insert in that order
pub(super) fn upsert<E: Executor>(
    executor: &E,
    scope: &Scope<'_>,
    plan: &Plan<'_>,
    rows: &[EncodedRow],
    options: &UpsertOptions,
) -> Result<Outcome> {
    let table = plan.table;
    let capabilities = executor.capabilities();
    let pk = table.primary_key();
    let class = &plan.classification;
    let unique_positions = class.unique_positions();
    let position = |field: &Field| class.insert.iter().position(|f| f.name == field.name);
    let update_positions: Vec<usize> = class.update.iter().filter_map(|f| position(*f)).collect();
    let guard_positions: Vec<(usize, &Field)> = if options.ignore_duplicate_updates {
        class
            .guard()
            .into_iter()
            .filter_map(|field| position(field).map(|pos| (pos, field)))
            .collect()
    } else {
        Vec::new()
    };

    let all_fields: Vec<&Field> = table.fields().iter().collect();
    let existing = executor.query(&scope.select(capabilities.dialect, &all_fields)?)?;
    let mut by_key: BTreeMap<Vec<SqlValue>, &Row> = BTreeMap::new();
    for row in &existing {
        let key: Vec<SqlValue> = class
            .unique
            .iter()
            .map(|field| row.get(&field.column).cloned().unwrap_or(SqlValue::Null))
            .collect();
        if !key.iter().any(SqlValue::is_null) {
            by_key.insert(key, row);
        }
    }

    let mut matched: BTreeSet<Vec<SqlValue>> = BTreeSet::new();
    let mut inserts: Vec<&EncodedRow> = Vec::new();
    let mut updates: Vec<(&Row, &EncodedRow)> = Vec::new();
    let mut untouched: Vec<&Row> = Vec::new();
    for row in rows {
        let key = row.key(&unique_positions);
        let Some(stored) = by_key.get(&key).copied() else {
            inserts.push(row);
            continue;
        };
        matched.insert(key);

        let changed = !update_positions.is_empty()
            && (guard_positions.is_empty()
                || guard_positions
                    .iter()
                    .any(|(pos, field)| stored.get(&field.column) != Some(&row.values[*pos])));
        if changed {
            updates.push((stored, row));
        } else {
            untouched.push(stored);
        }
    }

    let deleted = if options.sync {
        let stale: Vec<SqlValue> = by_key
            .iter()
            .filter(|(key, _)| !matched.contains(*key))
            .map(|(_, row)| primary_key(row, pk))
            .chain(
                // Rows with a NULL in their key can never match
                existing
                    .iter()
                    .filter(|row| {
                        class
                            .unique
                            .iter()
                            .any(|field| row.get(&field.column).map_or(true, SqlValue::is_null))
                    })
                    .map(|row| primary_key(row, pk)),
            )
            .collect();
        delete_keys(executor, table, stale)?
    } else {
        Vec::new()
    };

    if !updates.is_empty() {
        let values: Vec<Vec<SqlValue>> = updates
            .iter()
            .map(|(stored, row)| {
                std::iter::once(primary_key(stored, pk))
                    .chain(update_positions.iter().map(|&pos| row.values[pos].clone()))
                    .collect()
            })
            .collect();
        for statement in bulk::update_statements(table, &class.update, &values, capabilities) {
            executor.execute(&statement)?;
        }
    }

    let mut created = Vec::new();
    if !inserts.is_empty() {
        let values: Vec<Vec<SqlValue>> = inserts.iter().map(|row| row.values.clone()).collect();
        for statement in bulk::insert_statements(table, &class.insert, &values, capabilities) {
            executor.execute(&statement)?;
        }
        if !plan.visible.is_empty() {
            let keys: Vec<Vec<SqlValue>> = inserts
                .iter()
                .map(|row| row.key(&unique_positions))
                .filter(|key| !key.iter().any(SqlValue::is_null))
                .collect();
            for statement in select_by_keys(plan, &keys, capabilities) {
                created.extend(executor.query(&statement)?);
            }
        }
    }

    let mut keyed = Vec::new();
    if !plan.visible.is_empty() {
        let codec = RowCodec::new(table, capabilities.dialect);
        for row in &created {
            keyed.push((primary_key(row, pk), codec.decode_row(row, RowStatus::Created)?));
        }
        for (stored, row) in &updates {
            let merged = merge_updates(stored, &class.update, &update_positions, row);
            keyed.push((primary_key(stored, pk), codec.decode_row(&merged, RowStatus::Updated)?));
        }
        if plan.report_untouched {
            for stored in &untouched {
                keyed.push((
                    primary_key(stored, pk),
                    codec.decode_row(stored, RowStatus::Untouched)?,
                ));
            }
        }
        let visible = plan.visible_names();
        for (_, row) in &mut keyed {
            row.retain_fields(&visible);
        }
    }

    Ok((keyed, deleted))
}

/// The stored row as it reads after the update
fn merge_updates(stored: &Row, update: &[&Field], positions: &[usize], row: &EncodedRow) -> Row {
    let values = stored
        .iter()
        .map(|(column, value)| {
            update
                .iter()
                .zip(positions)
                .find(|(field, _)| field.column == column)
                .map_or_else(|| value.clone(), |(_, &pos)| row.values[pos].clone())
        })
        .collect();
    Row::new(stored.columns().to_vec(), values)
}

/// `SELECT ... WHERE (k1 = ? AND k2 = ?) OR (...)` for freshly inserted keys
fn select_by_keys(
    plan: &Plan<'_>,
    keys: &[Vec<SqlValue>],
    capabilities: &Capabilities,
) -> Vec<Statement> {
    let unique = &plan.classification.unique;
    let fetched = plan.fetched();
    keys.chunks(capabilities.rows_per_statement(unique.len()))
        .map(|chunk| {
            let mut w = SqlWriter::new(capabilities.dialect);
            w.push("SELECT ")
                .ident_list(fetched.iter().map(|field| field.column.as_str()))
                .push(" FROM ")
                .ident(plan.table.name())
                .push(" WHERE ");
            for (i, key) in chunk.iter().enumerate() {
                if i > 0 {
                    w.push(" OR ");
                }
                w.push("(");
                for (j, (field, value)) in unique.iter().zip(key).enumerate() {
                    if j > 0 {
                        w.push(" AND ");
                    }
                    w.ident(&field.column).push(" = ").bind(value.clone());
                }
                w.push(")");
            }
            w.finish()
        })
        .collect()
}
