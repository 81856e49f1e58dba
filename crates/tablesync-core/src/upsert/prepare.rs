//! Batch preparation: auto fields, encoding, key ordering and duplicates

use chrono::{DateTime, Utc};

use crate::codec::RowCodec;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::schema::{Field, Table};
use crate::value::{SqlValue, Value};

/// Current time truncated to milliseconds
///
/// Stored timestamps carry millisecond precision, so truncating up front keeps
/// in-memory records equal to what a later read returns.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Set every auto-populated field of every record to `now`
pub fn fill_auto_fields<R: Record>(
    table: &Table,
    records: &mut [R],
    now: DateTime<Utc>,
) -> Result<()> {
    let auto: Vec<&Field> = table.auto_fields().collect();
    if auto.is_empty() {
        return Ok(());
    }
    for record in records.iter_mut() {
        for field in &auto {
            record.set(&field.name, Value::Timestamp(now))?;
        }
    }
    Ok(())
}

/// One encoded input record
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRow {
    /// Position of the record in the caller's batch
    pub index: usize,
    /// One value per insert field
    pub values: Vec<SqlValue>,
}

impl EncodedRow {
    /// Unique-key tuple, given the key's positions inside `values`
    pub fn key(&self, positions: &[usize]) -> Vec<SqlValue> {
        positions
            .iter()
            .map(|&pos| self.values[pos].clone())
            .collect()
    }
}

/// Encode `records` over `fields`, sorted by unique key
///
/// Rows whose key contains NULL never collide (NULLs are distinct under a
/// uniqueness constraint). Otherwise a repeated key keeps the last record
/// when `drop_duplicates` is set and is an error when it is not.
pub fn encode_batch<R: Record>(
    codec: &RowCodec<'_>,
    records: &[R],
    fields: &[&Field],
    unique_positions: &[usize],
    drop_duplicates: bool,
) -> Result<Vec<EncodedRow>> {
    let mut rows = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            Ok(EncodedRow {
                index,
                values: codec.encode(record, fields, index)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    // Stable: equal keys keep their input order
    rows.sort_by_cached_key(|row| row.key(unique_positions));

    let mut out: Vec<EncodedRow> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = row.key(unique_positions);
        let collides = !key.iter().any(SqlValue::is_null)
            && out
                .last()
                .is_some_and(|prev| prev.key(unique_positions) == key);
        if !collides {
            out.push(row);
            continue;
        }
        if !drop_duplicates {
            let shown: Vec<String> = key.iter().map(ToString::to_string).collect();
            return Err(Error::Validation(format!(
                "Duplicate unique key ({}) at records #{} and #{}",
                shown.join(", "),
                out.last().map_or(0, |prev| prev.index),
                row.index
            )));
        }
        if let Some(last) = out.last_mut() {
            *last = row;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::record::DynamicRecord;

    fn table() -> Table {
        Table::new(
            "t",
            vec![
                Field::integer("id").primary_key().identity(),
                Field::integer("k"),
                Field::text("v").nullable(),
                Field::timestamp("created_at").auto_now_add(),
                Field::timestamp("updated_at").auto_now(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_now_has_millisecond_precision() {
        let ts = now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_fill_auto_fields_uses_one_timestamp() {
        let table = table();
        let mut records = vec![
            DynamicRecord::new().with("k", 1),
            DynamicRecord::new().with("k", 2),
        ];
        let ts = now();
        fill_auto_fields(&table, &mut records, ts).unwrap();
        for record in &records {
            assert_eq!(record.get("created_at"), Some(Value::Timestamp(ts)));
            assert_eq!(record.get("updated_at"), Some(Value::Timestamp(ts)));
        }
    }

    fn encode(records: &[DynamicRecord], drop_duplicates: bool) -> Result<Vec<EncodedRow>> {
        let table = table();
        let codec = RowCodec::new(&table, Dialect::Sqlite);
        let fields = vec![table.field("k").unwrap(), table.field("v").unwrap()];
        encode_batch(&codec, records, &fields, &[0], drop_duplicates)
    }

    #[test]
    fn test_batch_sorted_by_key() {
        let rows = encode(
            &[
                DynamicRecord::new().with("k", 3).with("v", "c"),
                DynamicRecord::new().with("k", 1).with("v", "a"),
                DynamicRecord::new().with("k", 2).with("v", "b"),
            ],
            false,
        )
        .unwrap();
        let indexes: Vec<usize> = rows.iter().map(|row| row.index).collect();
        assert_eq!(indexes, vec![1, 2, 0]);
    }

    #[test]
    fn test_duplicate_keys() {
        let records = [
            DynamicRecord::new().with("k", 1).with("v", "first"),
            DynamicRecord::new().with("k", 2).with("v", "other"),
            DynamicRecord::new().with("k", 1).with("v", "last"),
        ];
        let err = encode(&records, false).unwrap_err();
        assert!(err.to_string().contains("Duplicate unique key (1)"));

        let rows = encode(&records, true).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 2);
        assert_eq!(rows[0].values[1], SqlValue::Text("last".into()));
    }
}
