//! Column types and their SQL notation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MigrateError, Result};

/// A column's data type.
///
/// Serialized as its SQL notation (`varchar(255)`, `bigint`, ...), so
/// schema and changeset files can spell types the way DDL does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Oid,
    Uuid,
    Char(u32),
    Varchar(u32),
    Text,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Boolean,
    Date,
    Timestamp { with_time_zone: bool },
}

impl ColumnType {
    /// Whether literal values of this type are quoted in SQL.
    pub fn requires_quotes(&self) -> bool {
        !matches!(
            self,
            ColumnType::Oid
                | ColumnType::SmallInt
                | ColumnType::Integer
                | ColumnType::BigInt
                | ColumnType::Float
                | ColumnType::Boolean
        )
    }

    /// Whether the type is an integer type usable with a sequence.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt | ColumnType::Oid
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Oid => write!(f, "oid"),
            ColumnType::Uuid => write!(f, "uuid"),
            ColumnType::Char(len) => write!(f, "char({})", len),
            ColumnType::Varchar(len) => write!(f, "varchar({})", len),
            ColumnType::Text => write!(f, "text"),
            ColumnType::SmallInt => write!(f, "smallint"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::BigInt => write!(f, "bigint"),
            ColumnType::Float => write!(f, "double precision"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Timestamp {
                with_time_zone: true,
            } => write!(f, "timestamp with time zone"),
            ColumnType::Timestamp {
                with_time_zone: false,
            } => write!(f, "timestamp"),
        }
    }
}

fn parse_length(notation: &str, args: &str) -> Result<u32> {
    args.trim().parse::<u32>().map_err(|_| {
        MigrateError::Config(format!("Invalid length in column type '{}'", notation))
    })
}

impl FromStr for ColumnType {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        let notation = s.trim().to_lowercase();

        if let Some(open) = notation.find('(') {
            let close = notation.rfind(')').ok_or_else(|| {
                MigrateError::Config(format!("Unterminated column type '{}'", s))
            })?;
            let base = notation[..open].trim();
            let length = parse_length(s, &notation[open + 1..close])?;
            return match base {
                "varchar" | "character varying" => Ok(ColumnType::Varchar(length)),
                "char" | "character" => Ok(ColumnType::Char(length)),
                _ => Err(MigrateError::Config(format!("Unsupported column type: {}", s))),
            };
        }

        match notation.as_str() {
            "oid" => Ok(ColumnType::Oid),
            "uuid" => Ok(ColumnType::Uuid),
            "text" => Ok(ColumnType::Text),
            "smallint" | "int2" => Ok(ColumnType::SmallInt),
            "integer" | "int" | "int4" => Ok(ColumnType::Integer),
            "bigint" | "int8" => Ok(ColumnType::BigInt),
            "double precision" | "float" | "float8" => Ok(ColumnType::Float),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "timestamp" | "timestamp without time zone" => Ok(ColumnType::Timestamp {
                with_time_zone: false,
            }),
            "timestamptz" | "timestamp with time zone" => Ok(ColumnType::Timestamp {
                with_time_zone: true,
            }),
            _ => Err(MigrateError::Config(format!("Unsupported column type: {}", s))),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = MigrateError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}
