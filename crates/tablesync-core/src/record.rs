//! Records and result rows

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// Field-level access to an application record
///
/// Implementations are the per-type accessor table: a `match` on the field
/// name for typed structs, a map lookup for [`DynamicRecord`].
pub trait Record: Sized {
    /// Current value of `field`, `None` if the record has no such field
    fn get(&self, field: &str) -> Option<Value>;

    /// Overwrite `field`
    fn set(&mut self, field: &str, value: Value) -> Result<()>;

    /// Materialize a record from a returned row
    fn from_row(row: &ResultRow) -> Result<Self>;
}

/// A map-backed record for tables only known at runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DynamicRecord(BTreeMap<String, Value>);

impl DynamicRecord {
    /// Empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Build from a JSON object
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(Self(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from_json(value)))
                    .collect(),
            )),
            other => Err(Error::Validation(format!(
                "expected a JSON object per record, got {other}"
            ))),
        }
    }

    /// Borrow the underlying map
    pub const fn values(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

impl Record for DynamicRecord {
    fn get(&self, field: &str) -> Option<Value> {
        // Absent keys read as NULL so sparse JSON input still encodes.
        Some(self.0.get(field).cloned().unwrap_or(Value::Null))
    }

    fn set(&mut self, field: &str, value: Value) -> Result<()> {
        self.0.insert(field.to_string(), value);
        Ok(())
    }

    fn from_row(row: &ResultRow) -> Result<Self> {
        Ok(Self(row.values().clone()))
    }
}

/// Outcome of reconciling one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    /// Inserted by this call
    Created,
    /// Existing row whose update columns changed
    Updated,
    /// Existing row matched by key and left as is
    Untouched,
    /// Existing in-scope row removed by a sync
    Deleted,
}

impl RowStatus {
    /// One-letter code used in SQL (`status_` column)
    pub const fn code(self) -> &'static str {
        match self {
            Self::Created => "c",
            Self::Updated => "u",
            Self::Untouched => "n",
            Self::Deleted => "d",
        }
    }

    /// Parse a `status_` code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Self::Created),
            "u" => Some(Self::Updated),
            "n" => Some(Self::Untouched),
            "d" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Untouched => "untouched",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A row returned by an upsert, keyed by field name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    status: RowStatus,
    #[serde(flatten)]
    values: BTreeMap<String, Value>,
}

impl ResultRow {
    /// Build a row
    pub const fn new(status: RowStatus, values: BTreeMap<String, Value>) -> Self {
        Self { status, values }
    }

    /// Reconciliation outcome
    pub const fn status(&self) -> RowStatus {
        self.status
    }

    /// Value of `field`, if it was returned
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Typed value of `field`
    pub fn try_get<T: FromValue>(&self, field: &str) -> Result<T> {
        self.values
            .get(field)
            .cloned()
            .ok_or_else(|| Error::Decoding {
                column: field.to_string(),
                reason: "column was not returned".to_string(),
            })?
            .into_typed(field)
    }

    /// All returned values
    pub const fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Materialize a typed record
    pub fn decode<R: Record>(&self) -> Result<R> {
        R::from_row(self)
    }

    pub(crate) fn retain_fields(&mut self, keep: &[String]) {
        self.values.retain(|name, _| keep.iter().any(|k| k == name));
    }
}
