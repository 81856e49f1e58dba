//! Partitioned upsert results

use std::fmt;
use std::ops::Deref;

use serde::Serialize;

use crate::error::Result;
use crate::record::{Record, ResultRow, RowStatus};
use crate::value::SqlValue;

/// Which strategy executed an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPath {
    /// Conflict-resolving insert inside one savepoint
    Atomic,
    /// Read, then batch delete/update/insert
    Naive,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic => f.write_str("atomic"),
            Self::Naive => f.write_str("naive"),
        }
    }
}

/// Rows per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// Inserted rows
    pub created: usize,
    /// Changed rows
    pub updated: usize,
    /// Matched but unchanged rows
    pub untouched: usize,
    /// Rows removed by a sync
    pub deleted: usize,
}

/// Owned per-status rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Split {
    /// Inserted rows
    pub created: Vec<ResultRow>,
    /// Changed rows
    pub updated: Vec<ResultRow>,
    /// Matched but unchanged rows
    pub untouched: Vec<ResultRow>,
    /// Rows removed by a sync
    pub deleted: Vec<ResultRow>,
}

/// Outcome of an upsert or sync
///
/// Rows are ordered by primary key, with deleted rows last. Derefs to the
/// row slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertResult {
    rows: Vec<ResultRow>,
    path: ExecutionPath,
}

impl UpsertResult {
    /// Empty result
    pub const fn empty(path: ExecutionPath) -> Self {
        Self {
            rows: Vec::new(),
            path,
        }
    }

    /// Assemble from written rows keyed by primary key, plus deleted rows
    ///
    /// A key reported both as written and as untouched keeps the written row.
    pub(crate) fn assemble(
        mut keyed: Vec<(SqlValue, ResultRow)>,
        deleted: Vec<ResultRow>,
        path: ExecutionPath,
    ) -> Self {
        keyed.sort_by(|(a, left), (b, right)| a.cmp(b).then(left.status().cmp(&right.status())));
        keyed.dedup_by(|(later, _), (earlier, _)| !later.is_null() && later == earlier);

        let mut rows: Vec<ResultRow> = keyed.into_iter().map(|(_, row)| row).collect();
        rows.extend(deleted);
        Self { rows, path }
    }

    /// Strategy that produced this result
    pub const fn path(&self) -> ExecutionPath {
        self.path
    }

    /// Rows inserted by the call
    pub fn created(&self) -> Partition<'_> {
        self.partition(RowStatus::Created)
    }

    /// Existing rows that changed
    pub fn updated(&self) -> Partition<'_> {
        self.partition(RowStatus::Updated)
    }

    /// Existing rows matched and left as is
    pub fn untouched(&self) -> Partition<'_> {
        self.partition(RowStatus::Untouched)
    }

    /// Rows deleted by a sync
    pub fn deleted(&self) -> Partition<'_> {
        self.partition(RowStatus::Deleted)
    }

    /// View of the rows with `status`
    pub fn partition(&self, status: RowStatus) -> Partition<'_> {
        Partition {
            rows: &self.rows,
            status,
        }
    }

    /// Number of rows per status
    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for row in &self.rows {
            match row.status() {
                RowStatus::Created => counts.created += 1,
                RowStatus::Updated => counts.updated += 1,
                RowStatus::Untouched => counts.untouched += 1,
                RowStatus::Deleted => counts.deleted += 1,
            }
        }
        counts
    }

    /// Move the rows into per-status vectors
    pub fn split(self) -> Split {
        let mut split = Split::default();
        for row in self.rows {
            match row.status() {
                RowStatus::Created => split.created.push(row),
                RowStatus::Updated => split.updated.push(row),
                RowStatus::Untouched => split.untouched.push(row),
                RowStatus::Deleted => split.deleted.push(row),
            }
        }
        split
    }

    /// Take the rows
    pub fn into_rows(self) -> Vec<ResultRow> {
        self.rows
    }
}

impl Deref for UpsertResult {
    type Target = [ResultRow];

    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}

/// Lazy view of one status over a result's rows
///
/// Copying or iterating a view never disturbs another.
#[derive(Debug, Clone, Copy)]
pub struct Partition<'a> {
    rows: &'a [ResultRow],
    status: RowStatus,
}

impl<'a> Partition<'a> {
    /// Status this view selects
    pub const fn status(&self) -> RowStatus {
        self.status
    }

    /// Iterate matching rows
    pub fn iter(&self) -> PartitionIter<'a> {
        PartitionIter {
            rows: self.rows.iter(),
            status: self.status,
        }
    }

    /// Number of matching rows
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// No matching rows
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Materialize every matching row as `R`
    pub fn decode<R: Record>(&self) -> Result<Vec<R>> {
        self.iter().map(|row| row.decode::<R>()).collect()
    }
}

impl<'a> IntoIterator for Partition<'a> {
    type Item = &'a ResultRow;
    type IntoIter = PartitionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &Partition<'a> {
    type Item = &'a ResultRow;
    type IntoIter = PartitionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator behind [`Partition`]
#[derive(Debug, Clone)]
pub struct PartitionIter<'a> {
    rows: std::slice::Iter<'a, ResultRow>,
    status: RowStatus,
}

impl<'a> Iterator for PartitionIter<'a> {
    type Item = &'a ResultRow;

    fn next(&mut self) -> Option<Self::Item> {
        let status = self.status;
        self.rows.find(|row| row.status() == status)
    }
}
