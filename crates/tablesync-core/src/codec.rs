//! Row codec: record values to storage scalars and back

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::db::Row;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::record::{Record, ResultRow, RowStatus};
use crate::schema::{Field, FieldKind, Table};
use crate::value::{SqlValue, Value};

/// Column name carrying the per-row status code in returned rows
pub const STATUS_COLUMN: &str = "status_";

/// Encodes records of one table for one dialect
#[derive(Debug, Clone, Copy)]
pub struct RowCodec<'t> {
    table: &'t Table,
    dialect: Dialect,
}

impl<'t> RowCodec<'t> {
    /// Codec for `table`
    pub const fn new(table: &'t Table, dialect: Dialect) -> Self {
        Self { table, dialect }
    }

    /// Encode `fields` of `record` (at position `index` in its batch), in order
    pub fn encode<R: Record>(
        &self,
        record: &R,
        fields: &[&Field],
        index: usize,
    ) -> Result<Vec<SqlValue>> {
        fields
            .iter()
            .map(|field| {
                let value = record.get(&field.name).ok_or_else(|| {
                    self.encoding_error(field, index, "record has no such field".into())
                })?;
                self.encode_value(field, value, index)
            })
            .collect()
    }

    /// Encode one value for `field`
    pub fn encode_value(&self, field: &Field, value: Value, index: usize) -> Result<SqlValue> {
        encode(field, value, self.dialect)
            .map_err(|reason| self.encoding_error(field, index, reason))
    }

    fn encoding_error(&self, field: &Field, index: usize, reason: String) -> Error {
        Error::Encoding {
            table: self.table.name().to_string(),
            column: field.column.clone(),
            record: index,
            reason,
        }
    }

    /// Turn a storage row into a [`ResultRow`]
    ///
    /// Columns are mapped back to field names; a `status_` column, when
    /// present, overrides `default_status`. Unknown columns are ignored.
    pub fn decode_row(&self, row: &Row, default_status: RowStatus) -> Result<ResultRow> {
        let mut status = default_status;
        let mut values = BTreeMap::new();
        for (column, value) in row.iter() {
            if column == STATUS_COLUMN {
                if let SqlValue::Text(code) = value {
                    status = RowStatus::from_code(code).ok_or_else(|| Error::Decoding {
                        column: column.to_string(),
                        reason: format!("unknown status code '{code}'"),
                    })?;
                }
                continue;
            }
            if let Some(field) = self.table.field_by_column(column) {
                values.insert(field.name.clone(), decode(field, value.clone())?);
            }
        }
        Ok(ResultRow::new(status, values))
    }
}

fn encode(field: &Field, value: Value, dialect: Dialect) -> std::result::Result<SqlValue, String> {
    if value.is_null() {
        return if field.nullable || field.identity {
            Ok(SqlValue::Null)
        } else {
            Err("NULL is not allowed".into())
        };
    }

    let found = value.type_name();
    let mismatch = || format!("cannot store {found} in a {:?} column", field.kind);

    match (&field.kind, value) {
        (FieldKind::Integer, Value::Integer(i)) => Ok(SqlValue::Integer(i)),
        (FieldKind::Integer, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(b))),
        (FieldKind::Real, Value::Real(f)) => Ok(SqlValue::Real(f)),
        #[allow(clippy::cast_precision_loss)]
        (FieldKind::Real, Value::Integer(i)) => Ok(SqlValue::Real(i as f64)),
        (FieldKind::Text, Value::Text(s)) => {
            if let Some(max) = field.max_length {
                let len = s.chars().count();
                if len > max {
                    return Err(format!("text of length {len} exceeds max_length {max}"));
                }
            }
            Ok(SqlValue::Text(s))
        }
        (FieldKind::Text, Value::Uuid(id)) => Ok(SqlValue::Text(id.hyphenated().to_string())),
        (FieldKind::Boolean, Value::Bool(b)) => Ok(encode_bool(b, dialect)),
        (FieldKind::Boolean, Value::Integer(i @ (0 | 1))) => Ok(encode_bool(i == 1, dialect)),
        (FieldKind::Timestamp, Value::Timestamp(ts)) => Ok(encode_timestamp(ts, dialect)),
        (FieldKind::Timestamp, Value::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|ts| encode_timestamp(ts.with_timezone(&Utc), dialect))
            .map_err(|err| format!("invalid RFC 3339 timestamp '{s}': {err}")),
        (FieldKind::Timestamp, Value::Integer(ms)) => DateTime::from_timestamp_millis(ms)
            .map(|ts| encode_timestamp(ts, dialect))
            .ok_or_else(|| format!("timestamp {ms}ms is out of range")),
        (FieldKind::Json, value) => serde_json::to_string(&to_json(value))
            .map(SqlValue::Text)
            .map_err(|err| err.to_string()),
        (FieldKind::Uuid, Value::Uuid(id)) => Ok(SqlValue::Text(id.hyphenated().to_string())),
        (FieldKind::Uuid, Value::Text(s)) => Uuid::parse_str(&s)
            .map(|id| SqlValue::Text(id.hyphenated().to_string()))
            .map_err(|err| format!("invalid UUID '{s}': {err}")),
        (FieldKind::Blob, Value::Blob(bytes)) => Ok(SqlValue::Blob(bytes)),
        (FieldKind::Numeric, Value::Integer(i)) => Ok(SqlValue::Integer(i)),
        (FieldKind::Numeric, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(b))),
        (FieldKind::Numeric, Value::Real(f)) => Ok(numeric_real(f)),
        (FieldKind::Numeric, Value::Text(s)) => Ok(numeric_text(s)),
        (FieldKind::Any, Value::Integer(i)) => Ok(SqlValue::Integer(i)),
        (FieldKind::Any, Value::Real(f)) => Ok(SqlValue::Real(f)),
        (FieldKind::Any, Value::Text(s)) => Ok(SqlValue::Text(s)),
        (FieldKind::Any, Value::Blob(bytes)) => Ok(SqlValue::Blob(bytes)),
        (FieldKind::Any, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(b))),
        (FieldKind::Any, Value::Timestamp(ts)) => Ok(encode_timestamp(ts, dialect)),
        (FieldKind::Any, Value::Uuid(id)) => Ok(SqlValue::Text(id.hyphenated().to_string())),
        (FieldKind::Any, json @ Value::Json(_)) => serde_json::to_string(&to_json(json))
            .map(SqlValue::Text)
            .map_err(|err| err.to_string()),
        (FieldKind::Enum(variants), Value::Text(s)) => {
            if variants.iter().any(|variant| *variant == s) {
                Ok(SqlValue::Text(s))
            } else {
                Err(format!(
                    "'{s}' is not one of [{}]",
                    variants.join(", ")
                ))
            }
        }
        _ => Err(mismatch()),
    }
}

/// Integral floats become integers, as numeric columns store them
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn numeric_real(f: f64) -> SqlValue {
    // 2^63, the first float above i64::MAX
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    if f.fract() == 0.0 && (-BOUND..BOUND).contains(&f) {
        SqlValue::Integer(f as i64)
    } else {
        SqlValue::Real(f)
    }
}

/// Well-formed numbers in text become numbers; anything else stays text
fn numeric_text(s: String) -> SqlValue {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return SqlValue::Integer(i);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => numeric_real(f),
        _ => SqlValue::Text(s),
    }
}

fn encode_bool(b: bool, dialect: Dialect) -> SqlValue {
    match dialect {
        Dialect::Sqlite => SqlValue::Integer(i64::from(b)),
        Dialect::Postgres => SqlValue::Text(b.to_string()),
    }
}

fn encode_timestamp(ts: DateTime<Utc>, dialect: Dialect) -> SqlValue {
    match dialect {
        Dialect::Sqlite => SqlValue::Integer(ts.timestamp_millis()),
        Dialect::Postgres => SqlValue::Text(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
}

fn to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => b.into(),
        Value::Integer(i) => i.into(),
        Value::Real(f) => f.into(),
        Value::Text(s) => s.into(),
        Value::Blob(bytes) => bytes.into(),
        Value::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, true).into(),
        Value::Json(json) => json,
        Value::Uuid(id) => id.hyphenated().to_string().into(),
    }
}

/// Decode a storage scalar into the in-memory value for `field`
pub fn decode(field: &Field, value: SqlValue) -> Result<Value> {
    let found = format!("{value:?}");
    let fail = |reason: String| Error::Decoding {
        column: field.column.clone(),
        reason,
    };

    let decoded = match (&field.kind, value) {
        (_, SqlValue::Null) => Some(Value::Null),
        (FieldKind::Integer, SqlValue::Integer(i)) => Some(Value::Integer(i)),
        (FieldKind::Real, SqlValue::Real(f)) => Some(Value::Real(f)),
        #[allow(clippy::cast_precision_loss)]
        (FieldKind::Real, SqlValue::Integer(i)) => Some(Value::Real(i as f64)),
        (FieldKind::Text | FieldKind::Enum(_), SqlValue::Text(s)) => Some(Value::Text(s)),
        (FieldKind::Boolean, SqlValue::Integer(i)) => Some(Value::Bool(i != 0)),
        (FieldKind::Boolean, SqlValue::Text(s)) => match s.as_str() {
            "true" | "t" => Some(Value::Bool(true)),
            "false" | "f" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldKind::Timestamp, SqlValue::Integer(ms)) => {
            DateTime::from_timestamp_millis(ms).map(Value::Timestamp)
        }
        (FieldKind::Timestamp, SqlValue::Text(s)) => parse_timestamp(&s).map(Value::Timestamp),
        (FieldKind::Json, SqlValue::Text(s)) => Some(Value::Json(
            serde_json::from_str(&s).map_err(|err| fail(err.to_string()))?,
        )),
        (FieldKind::Json, SqlValue::Integer(i)) => Some(Value::Json(i.into())),
        (FieldKind::Json, SqlValue::Real(f)) => Some(Value::Json(f.into())),
        (FieldKind::Uuid, SqlValue::Text(s)) => Uuid::parse_str(&s).ok().map(Value::Uuid),
        (FieldKind::Uuid, SqlValue::Blob(bytes)) => {
            Uuid::from_slice(&bytes).ok().map(Value::Uuid)
        }
        (FieldKind::Blob, SqlValue::Blob(bytes)) => Some(Value::Blob(bytes)),
        (FieldKind::Blob, SqlValue::Text(s)) => Some(Value::Blob(s.into_bytes())),
        (FieldKind::Numeric | FieldKind::Any, SqlValue::Integer(i)) => Some(Value::Integer(i)),
        (FieldKind::Numeric | FieldKind::Any, SqlValue::Real(f)) => Some(Value::Real(f)),
        (FieldKind::Numeric | FieldKind::Any, SqlValue::Text(s)) => Some(Value::Text(s)),
        (FieldKind::Any, SqlValue::Blob(bytes)) => Some(Value::Blob(bytes)),
        _ => None,
    };

    decoded.ok_or_else(|| fail(format!("unexpected {found} for a {:?} column", field.kind)))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
