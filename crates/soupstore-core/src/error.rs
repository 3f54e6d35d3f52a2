//! Error types for all SoupStore operations.

use std::io;
use thiserror::Error;

/// Top-level error type for SoupStore operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

/// Coarse classification of an [`Error`], for callers that report or branch
/// on the failure category rather than the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidSpecification,
    Conflict,
    Serialization,
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Storage(_) => ErrorKind::Storage,
            Error::Schema(e) => match e {
                SchemaError::SoupNotFound(_) | SchemaError::EntryNotFound { .. } => {
                    ErrorKind::NotFound
                }
                SchemaError::SoupSchemaConflict { .. }
                | SchemaError::DuplicateExternalId { .. } => ErrorKind::Conflict,
                SchemaError::InvalidSoupName
                | SchemaError::InvalidIndexPath(_)
                | SchemaError::DuplicateIndexPath(_) => ErrorKind::InvalidSpecification,
            },
            Error::Query(_) => ErrorKind::InvalidSpecification,
            Error::Cursor(_) => ErrorKind::NotFound,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(StorageError::Sqlite(e))
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupted catalog: {0}")]
    CorruptedCatalog(String),

    #[error("store is still shared by other handles")]
    InUse,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("soup not found: {0}")]
    SoupNotFound(String),

    #[error("soup '{soup}' already exists with a different index layout")]
    SoupSchemaConflict { soup: String },

    #[error("soup name must not be empty")]
    InvalidSoupName,

    #[error("invalid index path: '{0}'")]
    InvalidIndexPath(String),

    #[error("index path declared more than once: {0}")]
    DuplicateIndexPath(String),

    #[error("entry {id} not found in soup '{soup}'")]
    EntryNotFound { soup: String, id: i64 },

    #[error("more than one entry in soup '{soup}' where '{path}' equals {value}")]
    DuplicateExternalId {
        soup: String,
        path: String,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("soup '{soup}' does not have an index on path '{path}'")]
    NoIndexForPath { soup: String, path: String },

    #[error("smart queries have no column predicate")]
    SmartPredicate,

    #[error("page size must be positive")]
    InvalidPageSize,

    #[error("invalid query specification: {0}")]
    InvalidSpec(String),

    #[error("invalid smart sql: {0}")]
    InvalidSmartSql(String),

    #[error("external id path '{0}' has no value in the document")]
    MissingExternalId(String),
}

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor not found: {0}")]
    NotFound(u64),
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("document must be a JSON object")]
    NotAnObject,

    #[error("failed to serialize document: {0}")]
    Encode(serde_json::Error),

    #[error("failed to parse stored document: {0}")]
    Decode(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
