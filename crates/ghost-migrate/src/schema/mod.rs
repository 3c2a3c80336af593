//! Schema model: an in-memory arena describing one physical schema snapshot.
//!
//! Tables are keyed by physical id. Foreign keys live in a side index of
//! edge records, so "who references this table" is a lookup rather than a
//! back-pointer.

mod catalog;
mod column;
mod column_type;
mod definition;
mod foreign_key;
pub mod identifier;
mod table;
mod value;

pub use catalog::{index_name, Catalog, Function, Sequence, SequenceOwner, View};
pub use column::{Column, ColumnDefinition, Hint};
pub use column_type::ColumnType;
pub use definition::{
    ForeignKeyDefinition, IndexDefinition, SchemaDefinition, TableDefinition, ViewDefinition,
};
pub use foreign_key::{Action, ForeignKey, ForeignKeyId};
pub use table::{Index, Table};
pub use value::{Identity, Row, Value};
