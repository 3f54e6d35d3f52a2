use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::{self, SoupCatalog};
use crate::config::StoreConfig;
use crate::error::{Error, StorageError};
use crate::types::{EntryId, IndexSpec};

use super::builders::{SoupBuilder, UpsertBuilder};
use super::cursor::{CursorPage, CursorRegistry};
use super::query_spec::QuerySpec;
use super::session::Session;

struct StoreState {
    conn: Connection,
    catalog: SoupCatalog,
    cursors: CursorRegistry,
}

struct StoreInner {
    /// Serializes every operation on the store (single-writer model).
    state: Mutex<StoreState>,
    path: Option<PathBuf>,
}

/// The main soup store handle.
///
/// `SoupStore` is cheaply clonable (`Arc`-based) and `Send + Sync`. Every
/// call takes the store lock for its whole duration, so calls observe a total
/// order. Single calls run in SQLite autocommit mode; use
/// [`transact`](Self::transact) to group several operations atomically.
#[derive(Clone)]
pub struct SoupStore {
    inner: Arc<StoreInner>,
}

impl SoupStore {
    /// Create a new store file at the given path. Fails if the file exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if path.exists() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ))
            .into());
        }
        Self::open_with_config(StoreConfig::with_path(path))
    }

    /// Open an existing store file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ))
            .into());
        }
        Self::open_with_config(StoreConfig::with_path(path))
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::open_with_config(StoreConfig::default())
    }

    /// Open (or create) a store as described by `config`.
    pub fn open_with_config(config: StoreConfig) -> Result<Self, Error> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };

        conn.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
        if let Some(timeout) = config.busy_timeout_duration() {
            conn.busy_timeout(timeout)?;
        }
        if config.path.is_some() {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = {};",
                config.journal_mode.pragma_value()
            ))?;
        }
        conn.execute_batch(&format!(
            "PRAGMA synchronous = {};",
            config.sync_mode.pragma_value()
        ))?;
        catalog::ops::init_catalog(&conn)?;

        let location = match &config.path {
            Some(path) => path.display().to_string(),
            None => ":memory:".to_string(),
        };
        info!(path = %location, "opened soup store");

        Ok(Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    conn,
                    catalog: SoupCatalog::new(),
                    cursors: CursorRegistry::new(config.cursor_capacity),
                }),
                path: config.path,
            }),
        })
    }

    /// The backing file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Run `f` with exclusive access to the store, without opening a transaction.
    pub fn session<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Session<'_>) -> Result<R, Error>,
    {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let mut session = Session::new(&state.conn, &mut state.catalog, &mut state.cursors);
        f(&mut session)
    }

    /// Run `f` inside one SQLite transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back otherwise. The closure must use
    /// the session it is given; calling back into this `SoupStore` from inside
    /// it deadlocks.
    pub fn transact<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Session<'_>) -> Result<R, Error>,
    {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let tx = state.conn.unchecked_transaction()?;

        let result = {
            let mut session = Session::new(&tx, &mut state.catalog, &mut state.cursors);
            f(&mut session)
        };

        match result {
            Ok(val) => match tx.commit() {
                Ok(()) => Ok(val),
                Err(e) => {
                    // A failed commit rolls back, so drop anything cached by the closure.
                    state.catalog.reset_all(&state.conn);
                    debug!(error = %e, "transaction commit failed");
                    Err(e.into())
                }
            },
            Err(e) => {
                tx.rollback()?;
                // The catalog may cache soups created or dropped by the
                // rolled-back work; it reloads on the next miss.
                state.catalog.reset_all(&state.conn);
                debug!(error = %e, "transaction rolled back");
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Soup management
    // -----------------------------------------------------------------------

    /// Register a soup. Returns a builder for declaring its indexes.
    pub fn create_soup(&self, name: &str) -> SoupBuilder<'_> {
        SoupBuilder::new(self, name.to_string())
    }

    /// Register a soup with an explicit index layout.
    pub fn register_soup(&self, name: &str, indexes: &[IndexSpec]) -> Result<(), Error> {
        self.session(|s| s.register_soup(name, indexes))
    }

    /// Drop a soup. No-op if it does not exist.
    pub fn drop_soup(&self, name: &str) -> Result<(), Error> {
        self.session(|s| s.drop_soup(name))
    }

    pub fn has_soup(&self, name: &str) -> Result<bool, Error> {
        self.session(|s| s.has_soup(name))
    }

    /// List all soup names.
    pub fn list_soups(&self) -> Result<Vec<String>, Error> {
        self.session(|s| s.list_soups())
    }

    /// Describe a soup's index layout.
    pub fn index_specs(&self, name: &str) -> Result<Vec<IndexSpec>, Error> {
        self.session(|s| s.index_specs(name))
    }

    /// Remove every entry from a soup.
    pub fn clear_soup(&self, name: &str) -> Result<(), Error> {
        self.session(|s| s.clear_soup(name))
    }

    // -----------------------------------------------------------------------
    // Entries
    // -----------------------------------------------------------------------

    /// Insert or update a document. Returns a builder for the external id options.
    pub fn upsert(&self, soup: &str, document: Value) -> UpsertBuilder<'_> {
        UpsertBuilder::new(self, soup.to_string(), document)
    }

    /// Upsert a batch of documents atomically.
    pub fn upsert_many(
        &self,
        soup: &str,
        documents: Vec<Value>,
        external_id_path: Option<&str>,
    ) -> Result<Vec<Value>, Error> {
        self.transact(|s| {
            documents
                .into_iter()
                .map(|doc| s.upsert(soup, doc, external_id_path, false))
                .collect()
        })
    }

    /// Fetch documents by entry id.
    pub fn retrieve(&self, soup: &str, ids: &[EntryId]) -> Result<Vec<Value>, Error> {
        self.session(|s| s.retrieve(soup, ids))
    }

    /// Delete documents by entry id. Unknown ids are ignored.
    pub fn delete(&self, soup: &str, ids: &[EntryId]) -> Result<(), Error> {
        self.session(|s| s.delete(soup, ids))
    }

    // -----------------------------------------------------------------------
    // Queries and cursors
    // -----------------------------------------------------------------------

    /// Count the entries a query matches.
    pub fn count_query(&self, soup: &str, spec: &QuerySpec) -> Result<u64, Error> {
        self.session(|s| s.count_query(soup, spec))
    }

    /// Fetch one page of a query.
    pub fn query(&self, soup: &str, spec: &QuerySpec, page_index: u64) -> Result<Vec<Value>, Error> {
        self.session(|s| s.query(soup, spec, page_index))
    }

    /// Open a cursor over a query and return its first page.
    pub fn open_cursor(&self, soup: &str, spec: QuerySpec) -> Result<CursorPage, Error> {
        self.session(|s| s.open_cursor(soup, spec))
    }

    /// Move a cursor to `index` (clamped) and return that page.
    pub fn move_cursor_to_page(&self, cursor_id: u64, index: i64) -> Result<CursorPage, Error> {
        self.session(|s| s.move_cursor_to_page(cursor_id, index))
    }

    /// Close a cursor. Returns whether it was open.
    pub fn close_cursor(&self, cursor_id: u64) -> bool {
        self.inner.state.lock().cursors.close(cursor_id)
    }

    /// Number of currently registered cursors.
    pub fn open_cursor_count(&self) -> usize {
        self.inner.state.lock().cursors.len()
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Release every cached resource, close the database, and delete its
    /// file. Irreversible.
    ///
    /// Fails with [`StorageError::InUse`] while other clones of this handle
    /// are alive.
    pub fn destroy(self) -> Result<(), Error> {
        let inner = Arc::try_unwrap(self.inner).map_err(|_| StorageError::InUse)?;
        let mut state = inner.state.into_inner();
        state.catalog.reset_all(&state.conn);
        state.cursors.clear();
        state
            .conn
            .close()
            .map_err(|(_, e)| StorageError::Sqlite(e))?;

        if let Some(path) = &inner.path {
            let mut targets = vec![path.clone()];
            for suffix in ["-wal", "-shm", "-journal"] {
                let mut sibling = path.clone().into_os_string();
                sibling.push(suffix);
                targets.push(PathBuf::from(sibling));
            }
            for target in targets {
                match std::fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::Io(e).into()),
                }
            }
            info!(path = %path.display(), "destroyed soup store");
        }
        Ok(())
    }
}
