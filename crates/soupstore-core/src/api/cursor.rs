//! Page cursors: re-executable, paginated views over a soup query.
//!
//! A cursor never holds a live result set. It remembers the soup, the query,
//! and a page index, and re-runs the query every time a page is
//! materialized, so each page reflects the store as it is at that moment.
//!
//! Open cursors live in a bounded [`CursorRegistry`]. Once the registry is
//! full, opening another cursor evicts the least recently used one; any later
//! access to the evicted id fails with [`CursorError::NotFound`].

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{CursorError, Error};

use super::query_spec::QuerySpec;
use super::session::Session;

/// Number of pages for `total_rows` rows at `page_size` rows per page.
///
/// Always `total_rows / page_size + 1`, so an exact multiple yields one
/// trailing empty page (10 rows at page size 10 is 2 pages).
pub fn total_pages_for(total_rows: u64, page_size: u32) -> u64 {
    total_rows / u64::from(page_size.max(1)) + 1
}

/// One cursor over a soup query.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCursor {
    cursor_id: u64,
    soup_name: String,
    query_spec: QuerySpec,
    total_pages: u64,
    current_page_index: u64,
}

impl PageCursor {
    pub(crate) fn new(
        cursor_id: u64,
        soup_name: String,
        query_spec: QuerySpec,
        total_rows: u64,
    ) -> Self {
        let total_pages = total_pages_for(total_rows, query_spec.page_size());
        Self {
            cursor_id,
            soup_name,
            query_spec,
            total_pages,
            current_page_index: 0,
        }
    }

    pub fn cursor_id(&self) -> u64 {
        self.cursor_id
    }

    pub fn soup_name(&self) -> &str {
        &self.soup_name
    }

    pub fn query_spec(&self) -> &QuerySpec {
        &self.query_spec
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    pub fn current_page_index(&self) -> u64 {
        self.current_page_index
    }

    /// Move to `index`, clamped into `[0, total_pages - 1]`.
    pub fn move_to_page(&mut self, index: i64) {
        let last = self.total_pages.saturating_sub(1);
        self.current_page_index = u64::try_from(index).map_or(0, |i| i.min(last));
    }

    /// Run the query for the current page.
    pub fn materialize(&self, session: &mut Session<'_>) -> Result<CursorPage, Error> {
        let entries = session.query(&self.soup_name, &self.query_spec, self.current_page_index)?;
        Ok(CursorPage {
            cursor_id: self.cursor_id,
            current_page_index: self.current_page_index,
            page_size: self.query_spec.page_size(),
            total_pages: self.total_pages,
            entries,
        })
    }
}

/// A materialized page plus the cursor metadata needed to navigate further.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage {
    pub cursor_id: u64,
    pub current_page_index: u64,
    pub page_size: u32,
    pub total_pages: u64,
    #[serde(rename = "currentPageOrderedEntries")]
    pub entries: Vec<Value>,
}

/// Bounded LRU table of open cursors, keyed by cursor id.
#[derive(Debug)]
pub struct CursorRegistry {
    cursors: LruCache<u64, PageCursor>,
    next_id: u64,
}

impl CursorRegistry {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cursors: LruCache::new(capacity),
            next_id: 1,
        }
    }

    /// Register a new cursor and return a copy of it.
    pub fn open(&mut self, soup_name: &str, query_spec: QuerySpec, total_rows: u64) -> PageCursor {
        let cursor_id = self.next_id;
        self.next_id += 1;

        let cursor = PageCursor::new(cursor_id, soup_name.to_string(), query_spec, total_rows);
        if let Some((evicted, _)) = self.cursors.push(cursor_id, cursor.clone()) {
            debug!(cursor_id = evicted, "evicted least recently used cursor");
        }
        cursor
    }

    /// Look up a cursor, marking it most recently used.
    pub fn get_mut(&mut self, cursor_id: u64) -> Result<&mut PageCursor, CursorError> {
        self.cursors
            .get_mut(&cursor_id)
            .ok_or(CursorError::NotFound(cursor_id))
    }

    /// Remove a cursor. Returns whether it was open.
    pub fn close(&mut self, cursor_id: u64) -> bool {
        self.cursors.pop(&cursor_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }
}
