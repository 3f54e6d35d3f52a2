//! Smart SQL: raw SELECT statements written against soup names and paths.
//!
//! References inside braces are rewritten to physical names before the
//! statement reaches SQLite:
//!
//! | reference                      | rewritten to          |
//! |--------------------------------|-----------------------|
//! | `{soup}`                       | `TABLE_n`             |
//! | `{soup:_soup}`                 | `TABLE_n.soup`        |
//! | `{soup:_soupEntryId}`          | `TABLE_n.id`          |
//! | `{soup:_soupLastModifiedDate}` | `TABLE_n.lastModified`|
//! | `{soup:path}`                  | `TABLE_n_i`           |
//!
//! Braces inside single-quoted string literals are left alone.

use crate::error::{Error, QueryError};
use crate::types::{SOUP_ENTRY_ID, SOUP_LAST_MODIFIED_DATE, SOUP_PATH};

/// Resolves soup references to physical names.
pub trait SoupResolver {
    /// Backing table of `soup`.
    fn table_for(&mut self, soup: &str) -> Result<String, Error>;

    /// Column holding the index on `path` in `soup`.
    fn column_for(&mut self, soup: &str, path: &str) -> Result<String, Error>;
}

/// Rewrite every `{soup}` / `{soup:path}` reference in `sql`.
///
/// Only SELECT statements are accepted.
pub fn convert_smart_sql(sql: &str, resolver: &mut impl SoupResolver) -> Result<String, Error> {
    let trimmed = sql.trim_start();
    let is_select = trimmed
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"));
    if !is_select {
        return Err(
            QueryError::InvalidSmartSql("only SELECT statements are supported".to_string()).into(),
        );
    }

    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.char_indices();

    while let Some((start, c)) = chars.next() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '{' if !in_literal => {
                let close = sql[start..].find('}').ok_or_else(|| {
                    QueryError::InvalidSmartSql(format!("unterminated reference at offset {start}"))
                })?;
                let reference = &sql[start + 1..start + close];
                out.push_str(&resolve_reference(reference, resolver)?);
                // Skip past the closing brace.
                for _ in 0..reference.chars().count() + 1 {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

fn resolve_reference(reference: &str, resolver: &mut impl SoupResolver) -> Result<String, Error> {
    let (soup, path) = match reference.split_once(':') {
        Some((soup, path)) => (soup.trim(), Some(path.trim())),
        None => (reference.trim(), None),
    };
    if soup.is_empty() || path.is_some_and(str::is_empty) {
        return Err(QueryError::InvalidSmartSql(format!("malformed reference {{{reference}}}")).into());
    }

    let table = resolver.table_for(soup)?;
    let Some(path) = path else {
        return Ok(table);
    };
    match path {
        SOUP_PATH => Ok(format!("{table}.soup")),
        SOUP_ENTRY_ID => Ok(format!("{table}.id")),
        SOUP_LAST_MODIFIED_DATE => Ok(format!("{table}.lastModified")),
        _ => resolver.column_for(soup, path),
    }
}
