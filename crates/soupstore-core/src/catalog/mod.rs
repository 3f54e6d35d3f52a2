//! Soup catalog: soup-to-table mapping, index layouts, and per-table statement handles.
//!
//! The persisted catalog lives in the `soup_names` and `soup_index_map`
//! tables (see [`ops`]). [`SoupCatalog`] is the in-memory cache in front of
//! it, owned by one open store. A miss here means "load and populate", never
//! a failure.

pub mod ops;

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, ToSql, params_from_iter};

use crate::error::Error;
use crate::types::{EntryId, FIRST_ENTRY_ID, IndexColumn, IndexValue};

/// Hands out row ids for one soup table from SQLite's durable
/// `sqlite_sequence` counter.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    sql: String,
}

impl IdAllocator {
    fn new(table: &str) -> Self {
        Self {
            sql: format!("SELECT seq FROM sqlite_sequence WHERE name = '{table}'"),
        }
    }

    /// Next unused id for the table, or [`FIRST_ENTRY_ID`] if the table has
    /// never held a row.
    ///
    /// The counter only advances once a row is inserted with the returned id,
    /// so callers must insert before asking again.
    pub fn next_id(&self, conn: &Connection) -> Result<EntryId, Error> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        let last: Option<i64> = stmt.query_row([], |row| row.get(0)).optional()?;
        Ok(last.map_or(FIRST_ENTRY_ID, |seq| seq + 1))
    }
}

/// Prepared INSERT for one soup table, covering the fixed columns and every
/// index column in declaration order.
#[derive(Debug, Clone)]
pub struct InsertHelper {
    sql: String,
    index_count: usize,
}

impl InsertHelper {
    fn new(table: &str, columns: &[IndexColumn]) -> Self {
        let mut names = vec!["id", "soup", "created", "lastModified"];
        names.extend(columns.iter().map(|c| c.column_name.as_str()));
        let placeholders = (1..=names.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            sql: format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders})",
                names.join(", ")
            ),
            index_count: columns.len(),
        }
    }

    pub fn insert(
        &self,
        conn: &Connection,
        id: EntryId,
        soup: &str,
        now: i64,
        values: &[Option<IndexValue>],
    ) -> Result<(), Error> {
        debug_assert_eq!(values.len(), self.index_count);
        let mut args: Vec<&dyn ToSql> = vec![&id, &soup, &now, &now];
        args.extend(values.iter().map(|v| v as &dyn ToSql));
        let mut stmt = conn.prepare_cached(&self.sql)?;
        stmt.execute(params_from_iter(args))?;
        Ok(())
    }
}

/// In-memory catalog cache for one open store.
#[derive(Debug, Default)]
pub struct SoupCatalog {
    tables: HashMap<String, String>,
    index_specs: HashMap<String, Vec<IndexColumn>>,
    id_allocators: HashMap<String, IdAllocator>,
    insert_helpers: HashMap<String, InsertHelper>,
}

impl SoupCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_mapping(&mut self, soup: &str, table: &str) {
        self.tables.insert(soup.to_string(), table.to_string());
    }

    pub fn lookup_table(&self, soup: &str) -> Option<&str> {
        self.tables.get(soup).map(String::as_str)
    }

    /// Cache a soup's index layout. The slice is copied.
    pub fn cache_index_specs(&mut self, soup: &str, specs: &[IndexColumn]) {
        self.index_specs.insert(soup.to_string(), specs.to_vec());
    }

    pub fn lookup_index_specs(&self, soup: &str) -> Option<&[IndexColumn]> {
        self.index_specs.get(soup).map(Vec::as_slice)
    }

    /// Allocate the next row id for `table`, creating its allocator on first use.
    pub fn next_id(&mut self, conn: &Connection, table: &str) -> Result<EntryId, Error> {
        self.id_allocators
            .entry(table.to_string())
            .or_insert_with(|| IdAllocator::new(table))
            .next_id(conn)
    }

    /// Insert helper for `table`, built from `columns` on first use.
    pub fn insert_helper(&mut self, table: &str, columns: &[IndexColumn]) -> &InsertHelper {
        self.insert_helpers
            .entry(table.to_string())
            .or_insert_with(|| InsertHelper::new(table, columns))
    }

    /// Drop every cache entry tied to `soup` and its table.
    ///
    /// Cached statements are released on the connection first so a dropped
    /// and recreated table never runs against a stale prepared statement.
    pub fn evict(&mut self, conn: &Connection, soup: &str) {
        conn.flush_prepared_statement_cache();
        self.index_specs.remove(soup);
        if let Some(table) = self.tables.remove(soup) {
            self.id_allocators.remove(&table);
            self.insert_helpers.remove(&table);
        }
    }

    /// Release every cached statement and clear all caches.
    pub fn reset_all(&mut self, conn: &Connection) {
        conn.flush_prepared_statement_cache();
        self.tables.clear();
        self.index_specs.clear();
        self.id_allocators.clear();
        self.insert_helpers.clear();
    }

    pub(crate) fn has_table_handles(&self, table: &str) -> bool {
        self.id_allocators.contains_key(table) || self.insert_helpers.contains_key(table)
    }
}
