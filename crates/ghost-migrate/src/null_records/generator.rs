//! Placeholder values per column type.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::schema::{ColumnType, Value};

/// A value of the given type for a placeholder row. UUIDs are random so
/// placeholder identities never collide; everything else is the type's zero.
pub fn generate_value(column_type: ColumnType) -> Value {
    match column_type {
        ColumnType::Uuid => Value::Uuid(Uuid::new_v4()),
        ColumnType::Char(_) | ColumnType::Varchar(_) | ColumnType::Text => Value::Text(String::new()),
        ColumnType::SmallInt => Value::I16(0),
        ColumnType::Integer => Value::I32(0),
        ColumnType::BigInt | ColumnType::Oid => Value::I64(0),
        ColumnType::Float => Value::F64(0.0),
        ColumnType::Boolean => Value::Bool(false),
        ColumnType::Date => Value::Date(NaiveDate::default()),
        ColumnType::Timestamp { .. } => Value::Timestamp(DateTime::<Utc>::default()),
    }
}

/// A sequence value, typed like the column it fills.
pub fn sequence_value(column_type: ColumnType, value: i64) -> Value {
    match column_type {
        ColumnType::SmallInt => i16::try_from(value).map(Value::I16).unwrap_or(Value::I64(value)),
        ColumnType::Integer => i32::try_from(value).map(Value::I32).unwrap_or(Value::I64(value)),
        _ => Value::I64(value),
    }
}
