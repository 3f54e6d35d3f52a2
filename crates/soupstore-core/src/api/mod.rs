//! Public API: store handle, builders, sessions, query specs, and page cursors.

pub mod builders;
pub mod cursor;
pub mod database;
pub mod projection;
pub mod query_spec;
pub mod session;
pub mod smart_sql;

pub use builders::{SoupBuilder, UpsertBuilder};
pub use cursor::{CursorPage, CursorRegistry, PageCursor};
pub use database::SoupStore;
pub use query_spec::{Order, Predicate, QuerySpec, QuerySpecPayload, QueryType};
pub use session::Session;
