//! Field classification for upserts

use super::{AutoPopulate, Field, Table};
use crate::error::{Error, Result};

/// Per-call partition of a table's fields
#[derive(Debug, Clone)]
pub struct Classification<'t> {
    /// Columns written by the insert
    pub insert: Vec<&'t Field>,
    /// Columns forming the match key / conflict target
    pub unique: Vec<&'t Field>,
    /// Columns assigned on conflict
    pub update: Vec<&'t Field>,
}

impl<'t> Classification<'t> {
    /// Columns compared by the duplicate-update guard
    ///
    /// Auto-on-write timestamps differ on every call, so comparing them would
    /// defeat the guard. Empty means "no guard".
    pub fn guard(&self) -> Vec<&'t Field> {
        self.update
            .iter()
            .copied()
            .filter(|field| field.auto != AutoPopulate::OnWrite)
            .collect()
    }

    /// Position of each unique column inside `insert`
    pub fn unique_positions(&self) -> Vec<usize> {
        self.unique
            .iter()
            .filter_map(|unique| {
                self.insert
                    .iter()
                    .position(|field| field.name == unique.name)
            })
            .collect()
    }
}

/// Partition `table`'s fields for one upsert call
///
/// `update_fields == None` means every writable non-key field; an explicit
/// list (even an empty one) is used as given. Unique, auto-on-create and
/// identity fields are never updated.
pub fn classify<'t, S: AsRef<str>>(
    table: &'t Table,
    unique_fields: &[S],
    update_fields: Option<&[S]>,
) -> Result<Classification<'t>> {
    if unique_fields.is_empty() {
        return Err(Error::Validation(
            "unique_fields must name at least one field".into(),
        ));
    }

    let unique = table.resolve(unique_fields)?;
    let is_unique = |field: &Field| unique.iter().any(|u| u.name == field.name);

    let insert = table
        .fields()
        .iter()
        .filter(|field| !field.identity || is_unique(field))
        .collect();

    let candidates = match update_fields {
        Some(names) => table.resolve(names)?,
        None => table
            .fields()
            .iter()
            .filter(|field| !field.primary_key)
            .collect(),
    };
    let update = candidates
        .into_iter()
        .filter(|field| {
            !is_unique(field) && field.auto != AutoPopulate::OnCreate && !field.identity
        })
        .collect();

    Ok(Classification {
        insert,
        unique,
        update,
    })
}
