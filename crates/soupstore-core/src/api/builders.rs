use serde_json::Value;

use crate::error::Error;
use crate::types::{IndexSpec, IndexType};

use super::database::SoupStore;

// ---------------------------------------------------------------------------
// SoupBuilder
// ---------------------------------------------------------------------------

/// Builder for registering a soup with its index layout.
pub struct SoupBuilder<'a> {
    store: &'a SoupStore,
    name: String,
    indexes: Vec<IndexSpec>,
}

impl<'a> SoupBuilder<'a> {
    pub(crate) fn new(store: &'a SoupStore, name: String) -> Self {
        Self {
            store,
            name,
            indexes: Vec::new(),
        }
    }

    /// Declare an index on a document path. Order of declaration is kept.
    pub fn index(mut self, path: &str, index_type: IndexType) -> Self {
        self.indexes.push(IndexSpec::new(path, index_type));
        self
    }

    /// Execute the registration.
    pub fn execute(self) -> Result<(), Error> {
        let name = self.name;
        let indexes = self.indexes;
        self.store
            .session(|session| session.register_soup(&name, &indexes))
    }
}

// ---------------------------------------------------------------------------
// UpsertBuilder
// ---------------------------------------------------------------------------

/// Builder for inserting or updating a single document.
pub struct UpsertBuilder<'a> {
    store: &'a SoupStore,
    soup: String,
    document: Value,
    external_id_path: Option<String>,
    strict: bool,
}

impl<'a> UpsertBuilder<'a> {
    pub(crate) fn new(store: &'a SoupStore, soup: String, document: Value) -> Self {
        Self {
            store,
            soup,
            document,
            external_id_path: None,
            strict: false,
        }
    }

    /// Match existing entries on the indexed value at `path`.
    pub fn external_id_path(mut self, path: &str) -> Self {
        self.external_id_path = Some(path.to_string());
        self
    }

    /// Fail instead of inserting when the document has no value at the
    /// external id path.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Execute the upsert, returning the stored document.
    pub fn execute(self) -> Result<Value, Error> {
        let Self {
            store,
            soup,
            document,
            external_id_path,
            strict,
        } = self;
        store.session(|session| {
            session.upsert(&soup, document, external_id_path.as_deref(), strict)
        })
    }
}
