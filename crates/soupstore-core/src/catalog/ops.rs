//! Catalog operations: create, drop, look up, and list soups.
//!
//! The persisted catalog is two SQLite tables. `soup_names` assigns every
//! soup an integer id, which names its backing table (`TABLE_<id>`).
//! `soup_index_map` records each declared index path with its column name
//! and type. Soup names are only ever bound as parameters; table and column
//! names are derived from integers, so any soup name is safe.

use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, SchemaError, StorageError};
use crate::types::{IndexColumn, IndexSpec, IndexType, RESERVED_PATHS};

/// Create the catalog tables if they do not exist yet.
pub fn init_catalog(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS soup_names (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             soupName TEXT NOT NULL UNIQUE
         );
         CREATE TABLE IF NOT EXISTS soup_index_map (
             soupName TEXT NOT NULL,
             position INTEGER NOT NULL,
             path TEXT NOT NULL,
             columnName TEXT NOT NULL,
             columnType TEXT NOT NULL,
             PRIMARY KEY (soupName, path)
         );",
    )?;
    Ok(())
}

/// Backing table name for the soup registered with `soup_id`.
pub fn soup_table_name(soup_id: i64) -> String {
    format!("TABLE_{soup_id}")
}

/// Column name for the `position`-th declared index of `table`.
pub fn index_column_name(table: &str, position: usize) -> String {
    format!("{table}_{position}")
}

/// Reject index layouts that cannot be mapped to columns.
pub fn validate_index_specs(specs: &[IndexSpec]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for spec in specs {
        let bad_segment = spec.path.split('.').any(|seg| seg.is_empty());
        if bad_segment || RESERVED_PATHS.contains(&spec.path.as_str()) {
            return Err(SchemaError::InvalidIndexPath(spec.path.clone()).into());
        }
        if !seen.insert(spec.path.as_str()) {
            return Err(SchemaError::DuplicateIndexPath(spec.path.clone()).into());
        }
    }
    Ok(())
}

/// Create the backing table, its SQL indexes, and the catalog rows for a soup.
///
/// The caller is responsible for checking that the soup does not exist and
/// for wrapping the call in a savepoint so a failure leaves no partial state.
///
/// Returns the table name and the index columns in declaration order.
pub fn create_soup(
    conn: &Connection,
    soup: &str,
    specs: &[IndexSpec],
) -> Result<(String, Vec<IndexColumn>), Error> {
    conn.execute("INSERT INTO soup_names (soupName) VALUES (?1)", params![soup])?;
    let table = soup_table_name(conn.last_insert_rowid());

    let columns: Vec<IndexColumn> = specs
        .iter()
        .enumerate()
        .map(|(i, spec)| IndexColumn {
            spec: spec.clone(),
            column_name: index_column_name(&table, i),
        })
        .collect();

    let mut ddl = format!(
        "CREATE TABLE {table} (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             soup TEXT,
             created INTEGER,
             lastModified INTEGER"
    );
    for column in &columns {
        ddl.push_str(&format!(
            ",\n             {} {}",
            column.column_name,
            column.spec.index_type.column_type()
        ));
    }
    ddl.push_str("\n         );\n");
    ddl.push_str(&format!(
        "CREATE INDEX {table}_created_idx ON {table} (created);\n\
         CREATE INDEX {table}_lastModified_idx ON {table} (lastModified);\n"
    ));
    for column in &columns {
        ddl.push_str(&format!(
            "CREATE INDEX {name}_idx ON {table} ({name});\n",
            name = column.column_name
        ));
    }
    conn.execute_batch(&ddl)?;

    let mut stmt = conn.prepare(
        "INSERT INTO soup_index_map (soupName, position, path, columnName, columnType)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (i, column) in columns.iter().enumerate() {
        stmt.execute(params![
            soup,
            i as i64,
            column.spec.path,
            column.column_name,
            column.spec.index_type.as_str(),
        ])?;
    }

    Ok((table, columns))
}

/// Drop a soup's backing table and delete its catalog rows.
pub fn drop_soup(conn: &Connection, soup: &str, table: &str) -> Result<(), Error> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
    conn.execute("DELETE FROM soup_index_map WHERE soupName = ?1", params![soup])?;
    conn.execute("DELETE FROM soup_names WHERE soupName = ?1", params![soup])?;
    Ok(())
}

/// Look up the backing table of a soup in the persisted catalog.
pub fn lookup_table(conn: &Connection, soup: &str) -> Result<Option<String>, Error> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM soup_names WHERE soupName = ?1",
            params![soup],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(soup_table_name))
}

/// Load a soup's index columns in declaration order.
pub fn load_index_columns(conn: &Connection, soup: &str) -> Result<Vec<IndexColumn>, Error> {
    let mut stmt = conn.prepare(
        "SELECT path, columnName, columnType FROM soup_index_map
         WHERE soupName = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![soup], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut columns = Vec::new();
    for row in rows {
        let (path, column_name, column_type) = row?;
        let index_type = IndexType::parse(&column_type).ok_or_else(|| {
            StorageError::CorruptedCatalog(format!(
                "unknown index type '{column_type}' for path '{path}'"
            ))
        })?;
        columns.push(IndexColumn {
            spec: IndexSpec { path, index_type },
            column_name,
        });
    }
    Ok(columns)
}

/// List all soup names in sorted order.
pub fn list_soups(conn: &Connection) -> Result<Vec<String>, Error> {
    let mut stmt = conn.prepare("SELECT soupName FROM soup_names ORDER BY soupName")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_catalog(&conn).unwrap();
        conn
    }

    fn specs() -> Vec<IndexSpec> {
        vec![
            IndexSpec::new("title", IndexType::String),
            IndexSpec::new("meta.rank", IndexType::Integer),
            IndexSpec::new("score", IndexType::Floating),
        ]
    }

    #[test]
    fn test_init_is_idempotent() {
        let conn = setup();
        init_catalog(&conn).unwrap();
        assert!(list_soups(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_create_and_lookup_soup() {
        let conn = setup();
        let (table, columns) = create_soup(&conn, "notes", &specs()).unwrap();
        assert_eq!(table, "TABLE_1");
        assert_eq!(columns[0].column_name, "TABLE_1_0");
        assert_eq!(columns[2].column_name, "TABLE_1_2");

        assert_eq!(
            lookup_table(&conn, "notes").unwrap(),
            Some("TABLE_1".into())
        );
        let loaded = load_index_columns(&conn, "notes").unwrap();
        assert_eq!(loaded, columns);
    }

    #[test]
    fn test_lookup_missing_soup() {
        let conn = setup();
        assert_eq!(lookup_table(&conn, "nope").unwrap(), None);
        assert!(load_index_columns(&conn, "nope").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_soup_name_rejected_by_catalog() {
        let conn = setup();
        create_soup(&conn, "notes", &specs()).unwrap();
        assert!(create_soup(&conn, "notes", &specs()).is_err());
    }

    #[test]
    fn test_soup_names_needing_escaping() {
        let conn = setup();
        let name = "robert'); DROP TABLE soup_names;--";
        let (table, _) = create_soup(&conn, name, &specs()).unwrap();
        assert_eq!(lookup_table(&conn, name).unwrap(), Some(table));
        assert_eq!(list_soups(&conn).unwrap(), vec![name.to_string()]);
    }

    #[test]
    fn test_drop_soup_removes_table_and_rows() {
        let conn = setup();
        let (table, _) = create_soup(&conn, "notes", &specs()).unwrap();
        drop_soup(&conn, "notes", &table).unwrap();

        assert_eq!(lookup_table(&conn, "notes").unwrap(), None);
        assert!(load_index_columns(&conn, "notes").unwrap().is_empty());
        let exists: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exists, 0);
    }

    #[test]
    fn test_recreated_soup_gets_fresh_table() {
        let conn = setup();
        let (first, _) = create_soup(&conn, "notes", &specs()).unwrap();
        drop_soup(&conn, "notes", &first).unwrap();
        let (second, _) = create_soup(&conn, "notes", &specs()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_list_soups_sorted() {
        let conn = setup();
        create_soup(&conn, "zeta", &[]).unwrap();
        create_soup(&conn, "alpha", &[]).unwrap();
        assert_eq!(list_soups(&conn).unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_validate_index_specs() {
        assert!(validate_index_specs(&specs()).is_ok());

        let dup = vec![
            IndexSpec::new("a", IndexType::String),
            IndexSpec::new("a", IndexType::Integer),
        ];
        assert!(matches!(
            validate_index_specs(&dup),
            Err(Error::Schema(SchemaError::DuplicateIndexPath(_)))
        ));

        for bad in ["", "a..b", ".a", "_soup", "_soupEntryId", "_soupLastModifiedDate"] {
            let specs = vec![IndexSpec::new(bad, IndexType::String)];
            assert!(matches!(
                validate_index_specs(&specs),
                Err(Error::Schema(SchemaError::InvalidIndexPath(_)))
            ));
        }

        let underscored = vec![
            IndexSpec::new("_owner", IndexType::String),
            IndexSpec::new("meta._rev", IndexType::Integer),
            IndexSpec::new("_soupish", IndexType::String),
        ];
        assert!(validate_index_specs(&underscored).is_ok());
    }
}
