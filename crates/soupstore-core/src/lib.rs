//! # SoupStore
//!
//! An embedded, indexed JSON document store backed by SQLite.
//!
//! Documents live in named *soups*. Each soup declares a fixed list of
//! indexed paths at registration time; those paths are projected into typed
//! columns so that exact, range, and `LIKE` queries run against SQL indexes.
//! Raw "smart SQL" queries can reach across soups using `{soup:path}`
//! references. Results are paged, either directly or through re-executable
//! page cursors.
//!
//! ## Quick Start
//!
//! ```no_run
//! use soupstore_core::api::{Order, QuerySpec, SoupStore};
//! use soupstore_core::types::IndexType;
//! use serde_json::json;
//!
//! let store = SoupStore::create("soups.db").unwrap();
//!
//! store
//!     .create_soup("notes")
//!     .index("title", IndexType::String)
//!     .execute()
//!     .unwrap();
//!
//! let stored = store
//!     .upsert("notes", json!({"title": "groceries", "body": "eggs"}))
//!     .execute()
//!     .unwrap();
//! assert_eq!(stored["_soupEntryId"], 1);
//!
//! let page = store
//!     .open_cursor("notes", QuerySpec::all("title", Order::Ascending, 20))
//!     .unwrap();
//! assert_eq!(page.entries.len(), 1);
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod types;
