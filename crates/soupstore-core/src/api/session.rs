//! Soup operations against a locked store.
//!
//! A [`Session`] borrows the connection, the catalog cache, and the cursor
//! registry of one store for the duration of a single façade call or a
//! caller-scoped transaction. Every store operation is implemented here.

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ToSql, params_from_iter};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{self, SoupCatalog};
use crate::error::{Error, QueryError, SchemaError, SerializationError};
use crate::types::{
    EntryId, IndexColumn, IndexSpec, IndexType, SOUP_ENTRY_ID, SOUP_LAST_MODIFIED_DATE,
};

use super::cursor::{CursorPage, CursorRegistry};
use super::projection::{bind_value, from_sql_value, project, resolve_attr};
use super::query_spec::QuerySpec;
use super::smart_sql::{SoupResolver, convert_smart_sql};

/// Maximum number of ids bound into a single `IN (...)` list.
const MAX_IDS_PER_STATEMENT: usize = 500;

/// Column of the serialized document in every soup table.
const SOUP_COLUMN: &str = "soup";

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn decode_document(raw: &str) -> Result<Value, Error> {
    serde_json::from_str(raw).map_err(|e| SerializationError::Decode(e).into())
}

/// Run `f` inside a savepoint, rolling it back if `f` fails.
///
/// Works both inside and outside a caller-scoped transaction.
fn with_savepoint<T>(conn: &Connection, f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    conn.execute_batch("SAVEPOINT soupstore_ddl")?;
    match f() {
        Ok(val) => {
            conn.execute_batch("RELEASE soupstore_ddl")?;
            Ok(val)
        }
        Err(e) => {
            if let Err(rollback_err) =
                conn.execute_batch("ROLLBACK TO soupstore_ddl; RELEASE soupstore_ddl")
            {
                warn!(error = %rollback_err, "failed to roll back savepoint");
            }
            Err(e)
        }
    }
}

/// Exclusive access to one store's connection, catalog, and cursors.
pub struct Session<'a> {
    conn: &'a Connection,
    catalog: &'a mut SoupCatalog,
    cursors: &'a mut CursorRegistry,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        catalog: &'a mut SoupCatalog,
        cursors: &'a mut CursorRegistry,
    ) -> Self {
        Self {
            conn,
            catalog,
            cursors,
        }
    }

    // -----------------------------------------------------------------------
    // Catalog resolution
    // -----------------------------------------------------------------------

    /// Backing table of `soup`, consulting the persisted catalog on a cache miss.
    fn table(&mut self, soup: &str) -> Result<Option<String>, Error> {
        if let Some(table) = self.catalog.lookup_table(soup) {
            return Ok(Some(table.to_string()));
        }
        let table = catalog::ops::lookup_table(self.conn, soup)?;
        if let Some(table) = &table {
            self.catalog.register_mapping(soup, table);
        }
        Ok(table)
    }

    fn require_table(&mut self, soup: &str) -> Result<String, Error> {
        self.table(soup)?
            .ok_or_else(|| SchemaError::SoupNotFound(soup.to_string()).into())
    }

    /// Index columns of an existing soup, loading them on a cache miss.
    fn index_columns(&mut self, soup: &str) -> Result<Vec<IndexColumn>, Error> {
        if let Some(columns) = self.catalog.lookup_index_specs(soup) {
            return Ok(columns.to_vec());
        }
        let columns = catalog::ops::load_index_columns(self.conn, soup)?;
        self.catalog.cache_index_specs(soup, &columns);
        Ok(columns)
    }

    /// Physical column and value kind for `path` in `soup`. Reserved paths
    /// map to the fixed integer columns; any other path must be declared as
    /// an index.
    fn column_for_path(&mut self, soup: &str, path: &str) -> Result<(String, IndexType), Error> {
        match path {
            SOUP_ENTRY_ID => return Ok(("id".to_string(), IndexType::Integer)),
            SOUP_LAST_MODIFIED_DATE => {
                return Ok(("lastModified".to_string(), IndexType::Integer));
            }
            _ => {}
        }
        self.index_columns(soup)?
            .into_iter()
            .find(|c| c.spec.path == path)
            .map(|c| (c.column_name, c.spec.index_type))
            .ok_or_else(|| {
                QueryError::NoIndexForPath {
                    soup: soup.to_string(),
                    path: path.to_string(),
                }
                .into()
            })
    }

    // -----------------------------------------------------------------------
    // Soup lifecycle
    // -----------------------------------------------------------------------

    /// Create a soup with the given index layout.
    ///
    /// Registering an existing soup with the same layout does nothing; a
    /// different layout is a [`SchemaError::SoupSchemaConflict`].
    pub fn register_soup(&mut self, soup: &str, specs: &[IndexSpec]) -> Result<(), Error> {
        if soup.is_empty() {
            return Err(SchemaError::InvalidSoupName.into());
        }
        catalog::ops::validate_index_specs(specs)?;

        if self.table(soup)?.is_some() {
            let existing = self.index_columns(soup)?;
            if existing.iter().map(|c| &c.spec).eq(specs.iter()) {
                debug!(soup = %soup, "soup already registered with identical indexes");
                return Ok(());
            }
            return Err(SchemaError::SoupSchemaConflict {
                soup: soup.to_string(),
            }
            .into());
        }

        let conn = self.conn;
        let (table, columns) =
            with_savepoint(conn, || catalog::ops::create_soup(conn, soup, specs))?;
        self.catalog.register_mapping(soup, &table);
        self.catalog.cache_index_specs(soup, &columns);
        info!(soup = %soup, table = %table, indexes = columns.len(), "registered soup");
        Ok(())
    }

    /// Drop a soup and everything in it. Dropping an unknown soup is a no-op.
    pub fn drop_soup(&mut self, soup: &str) -> Result<(), Error> {
        let Some(table) = self.table(soup)? else {
            debug!(soup = %soup, "drop of unknown soup ignored");
            return Ok(());
        };
        let conn = self.conn;
        with_savepoint(conn, || catalog::ops::drop_soup(conn, soup, &table))?;
        self.catalog.evict(conn, soup);
        info!(soup = %soup, table = %table, "dropped soup");
        Ok(())
    }

    pub fn has_soup(&mut self, soup: &str) -> Result<bool, Error> {
        Ok(self.table(soup)?.is_some())
    }

    pub fn list_soups(&mut self) -> Result<Vec<String>, Error> {
        catalog::ops::list_soups(self.conn)
    }

    /// The index layout a soup was registered with.
    pub fn index_specs(&mut self, soup: &str) -> Result<Vec<IndexSpec>, Error> {
        self.require_table(soup)?;
        Ok(self
            .index_columns(soup)?
            .into_iter()
            .map(|c| c.spec)
            .collect())
    }

    /// Delete every entry of a soup, keeping the soup and its indexes.
    pub fn clear_soup(&mut self, soup: &str) -> Result<(), Error> {
        let table = self.require_table(soup)?;
        let removed = self.conn.execute(&format!("DELETE FROM {table}"), [])?;
        debug!(soup = %soup, removed, "cleared soup");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entries
    // -----------------------------------------------------------------------

    /// Insert or update a document, returning it with its reserved fields set.
    ///
    /// With `external_id_path`, an existing entry whose value at that path
    /// matches the document's is updated in place. `strict` turns a missing
    /// value at the path into an error instead of an insert.
    pub fn upsert(
        &mut self,
        soup: &str,
        mut document: Value,
        external_id_path: Option<&str>,
        strict: bool,
    ) -> Result<Value, Error> {
        let table = self.require_table(soup)?;
        let columns = self.index_columns(soup)?;
        if !document.is_object() {
            return Err(SerializationError::NotAnObject.into());
        }

        let existing = match external_id_path {
            Some(path) => self.lookup_entry_id(soup, &table, &columns, &document, path, strict)?,
            None => None,
        };

        let values: Vec<_> = columns.iter().map(|c| project(&document, &c.spec)).collect();
        let now = now_millis();
        let conn = self.conn;
        let id = match existing {
            Some(id) => id,
            None => self.catalog.next_id(conn, &table)?,
        };

        if let Some(obj) = document.as_object_mut() {
            obj.insert(SOUP_ENTRY_ID.to_string(), Value::from(id));
            obj.insert(SOUP_LAST_MODIFIED_DATE.to_string(), Value::from(now));
        }
        let serialized = serde_json::to_string(&document).map_err(SerializationError::Encode)?;

        match existing {
            Some(id) => {
                let mut sql = format!("UPDATE {table} SET soup = ?, lastModified = ?");
                for column in &columns {
                    sql.push_str(&format!(", {} = ?", column.column_name));
                }
                sql.push_str(" WHERE id = ?");

                let mut args: Vec<&dyn ToSql> = vec![&serialized, &now];
                args.extend(values.iter().map(|v| v as &dyn ToSql));
                args.push(&id);
                let changed = conn.prepare_cached(&sql)?.execute(params_from_iter(args))?;
                if changed == 0 {
                    return Err(SchemaError::EntryNotFound {
                        soup: soup.to_string(),
                        id,
                    }
                    .into());
                }
                debug!(soup = %soup, id, "updated entry");
            }
            None => {
                self.catalog
                    .insert_helper(&table, &columns)
                    .insert(conn, id, &serialized, now, &values)?;
                debug!(soup = %soup, id, "inserted entry");
            }
        }

        Ok(document)
    }

    /// Find the entry an upsert should update, if any.
    fn lookup_entry_id(
        &mut self,
        soup: &str,
        table: &str,
        columns: &[IndexColumn],
        document: &Value,
        path: &str,
        strict: bool,
    ) -> Result<Option<EntryId>, Error> {
        let missing = || -> Result<Option<EntryId>, Error> {
            if strict {
                Err(QueryError::MissingExternalId(path.to_string()).into())
            } else {
                Ok(None)
            }
        };

        if path == SOUP_ENTRY_ID {
            return match document.get(SOUP_ENTRY_ID) {
                None | Some(Value::Null) => missing(),
                Some(v) => v.as_i64().map(Some).ok_or_else(|| {
                    QueryError::InvalidSpec(format!("{SOUP_ENTRY_ID} must be an integer")).into()
                }),
            };
        }

        let column = columns
            .iter()
            .find(|c| c.spec.path == path)
            .ok_or_else(|| QueryError::NoIndexForPath {
                soup: soup.to_string(),
                path: path.to_string(),
            })?;
        let Some(key) = project(document, &column.spec) else {
            return missing();
        };

        let sql = format!(
            "SELECT id FROM {table} WHERE {} = ? LIMIT 2",
            column.column_name
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let ids = stmt
            .query_map([&key], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        match ids.as_slice() {
            [] => Ok(None),
            [id] => Ok(Some(*id)),
            _ => Err(SchemaError::DuplicateExternalId {
                soup: soup.to_string(),
                path: path.to_string(),
                value: resolve_attr(document, path).to_string(),
            }
            .into()),
        }
    }

    /// Fetch documents by id. Unknown ids are skipped; order follows the table.
    pub fn retrieve(&mut self, soup: &str, ids: &[EntryId]) -> Result<Vec<Value>, Error> {
        let table = self.require_table(soup)?;
        let mut documents = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let sql = format!(
                "SELECT soup FROM {table} WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk), |row| row.get::<_, String>(0))?;
            for raw in rows {
                documents.push(decode_document(&raw?)?);
            }
        }
        Ok(documents)
    }

    /// Delete entries by id. Unknown ids are ignored.
    pub fn delete(&mut self, soup: &str, ids: &[EntryId]) -> Result<(), Error> {
        let table = self.require_table(soup)?;
        let mut removed = 0;
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let sql = format!(
                "DELETE FROM {table} WHERE id IN ({})",
                placeholders(chunk.len())
            );
            removed += self.conn.execute(&sql, params_from_iter(chunk))?;
        }
        debug!(soup = %soup, requested = ids.len(), removed, "deleted entries");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Number of rows `spec` matches. `soup` is ignored for smart queries.
    pub fn count_query(&mut self, soup: &str, spec: &QuerySpec) -> Result<u64, Error> {
        spec.validate()?;
        let (sql, args) = match spec {
            QuerySpec::Smart { smart_sql, .. } => {
                let sql = convert_smart_sql(smart_sql, self)?;
                (format!("SELECT count(*) FROM ({sql})"), Vec::new())
            }
            _ => {
                let (table, where_clause, args, _) = self.soup_query_parts(soup, spec)?;
                (format!("SELECT count(*) FROM {table}{where_clause}"), args)
            }
        };
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(args), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// One page of results for `spec`.
    ///
    /// Soup queries return the stored documents. Smart queries return one
    /// JSON array per row; a column named `soup` is decoded back into its
    /// document.
    pub fn query(
        &mut self,
        soup: &str,
        spec: &QuerySpec,
        page_index: u64,
    ) -> Result<Vec<Value>, Error> {
        spec.validate()?;
        let limit = i64::from(spec.page_size());
        let offset = i64::try_from(page_index)
            .unwrap_or(i64::MAX)
            .saturating_mul(limit);

        if let QuerySpec::Smart { smart_sql, .. } = spec {
            let sql = convert_smart_sql(smart_sql, self)?;
            return self.smart_rows(&format!("SELECT * FROM ({sql}) LIMIT ? OFFSET ?"), limit, offset);
        }

        let (table, where_clause, mut args, order_by) = self.soup_query_parts(soup, spec)?;
        let sql = format!(
            "SELECT soup FROM {table}{where_clause} ORDER BY {order_by}, id ASC LIMIT ? OFFSET ?"
        );
        args.push(SqlValue::Integer(limit));
        args.push(SqlValue::Integer(offset));

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| row.get::<_, String>(0))?;
        let mut documents = Vec::new();
        for raw in rows {
            documents.push(decode_document(&raw?)?);
        }
        Ok(documents)
    }

    /// Table, WHERE clause (with leading space, or empty), bind args, and
    /// ORDER BY term for a soup-scoped query.
    fn soup_query_parts(
        &mut self,
        soup: &str,
        spec: &QuerySpec,
    ) -> Result<(String, String, Vec<SqlValue>, String), Error> {
        let table = self.require_table(soup)?;
        let path = spec.index_path().ok_or(QueryError::SmartPredicate)?;
        let (column, index_type) = self.column_for_path(soup, path)?;

        let (where_clause, args) = match spec.predicate(&column)? {
            Some(predicate) => (
                format!(" WHERE {}", predicate.sql),
                predicate
                    .args
                    .iter()
                    .map(|arg| bind_value(arg, index_type))
                    .collect(),
            ),
            None => (String::new(), Vec::new()),
        };
        let order_by = spec.order_by(&column).ok_or(QueryError::SmartPredicate)?;
        Ok((table, where_clause, args, order_by))
    }

    fn smart_rows(&mut self, sql: &str, limit: i64, offset: i64) -> Result<Vec<Value>, Error> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([limit, offset])?;

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                let value = match row.get::<_, SqlValue>(i)? {
                    SqlValue::Text(raw) if name == SOUP_COLUMN => decode_document(&raw)?,
                    other => from_sql_value(other),
                };
                values.push(value);
            }
            results.push(Value::Array(values));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Cursors
    // -----------------------------------------------------------------------

    /// Count the matches, register a cursor, and return its first page.
    pub fn open_cursor(&mut self, soup: &str, spec: QuerySpec) -> Result<CursorPage, Error> {
        let total_rows = self.count_query(soup, &spec)?;
        let cursor = self.cursors.open(soup, spec, total_rows);
        let page = match cursor.materialize(self) {
            Ok(page) => page,
            Err(e) => {
                self.cursors.close(cursor.cursor_id());
                return Err(e);
            }
        };
        debug!(
            cursor_id = cursor.cursor_id(),
            soup = %soup,
            total_pages = cursor.total_pages(),
            "opened cursor"
        );
        Ok(page)
    }

    /// Move a cursor (clamped) and return the page it now points at.
    pub fn move_cursor_to_page(&mut self, cursor_id: u64, index: i64) -> Result<CursorPage, Error> {
        let cursor = self.cursors.get_mut(cursor_id)?;
        cursor.move_to_page(index);
        let cursor = cursor.clone();
        cursor.materialize(self)
    }

    /// Close a cursor. Returns whether it was open.
    pub fn close_cursor(&mut self, cursor_id: u64) -> bool {
        let closed = self.cursors.close(cursor_id);
        debug!(cursor_id, closed, "closed cursor");
        closed
    }
}

impl SoupResolver for Session<'_> {
    fn table_for(&mut self, soup: &str) -> Result<String, Error> {
        self.require_table(soup)
    }

    fn column_for(&mut self, soup: &str, path: &str) -> Result<String, Error> {
        self.column_for_path(soup, path).map(|(column, _)| column)
    }
}
