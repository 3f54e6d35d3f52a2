//! Core types: index specifications, index values, reserved document fields.

use serde::{Deserialize, Serialize};

/// Row identifier assigned by the store to every soup entry.
pub type EntryId = i64;

/// Reserved document field holding the entry's row id.
pub const SOUP_ENTRY_ID: &str = "_soupEntryId";

/// Reserved document field holding the epoch-millisecond time of the last write.
pub const SOUP_LAST_MODIFIED_DATE: &str = "_soupLastModifiedDate";

/// Pseudo-path naming the whole serialized document.
pub const SOUP_PATH: &str = "_soup";

/// Paths that map to fixed columns and cannot be declared as indexes.
pub const RESERVED_PATHS: [&str; 3] = [SOUP_PATH, SOUP_ENTRY_ID, SOUP_LAST_MODIFIED_DATE];

/// Row id handed out for the first row of a table.
pub const FIRST_ENTRY_ID: EntryId = 1;

/// The declared type of an indexed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    String,
    Integer,
    Floating,
}

impl IndexType {
    /// SQLite column type used for this index kind.
    pub fn column_type(self) -> &'static str {
        match self {
            IndexType::String => "TEXT",
            IndexType::Integer => "INTEGER",
            IndexType::Floating => "REAL",
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            IndexType::String => "string",
            IndexType::Integer => "integer",
            IndexType::Floating => "floating",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(IndexType::String),
            "integer" => Some(IndexType::Integer),
            "floating" => Some(IndexType::Floating),
            _ => None,
        }
    }
}

/// A declared, typed projection of a document path into a soup column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Dot-separated document path (e.g. `"address.city"`).
    pub path: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
}

impl IndexSpec {
    pub fn new(path: impl Into<String>, index_type: IndexType) -> Self {
        Self {
            path: path.into(),
            index_type,
        }
    }
}

/// An index spec bound to the physical column that stores it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexColumn {
    pub spec: IndexSpec,
    pub column_name: String,
}

/// A value projected from a document into a typed index column.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    String(String),
    Integer(i64),
    Floating(f64),
}

impl rusqlite::ToSql for IndexValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            IndexValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            IndexValue::Integer(n) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*n)),
            IndexValue::Floating(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
        })
    }
}
