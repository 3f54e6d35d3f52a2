//! Query specifications: what to match, how to order, and how to page.
//!
//! A [`QuerySpec`] is an immutable value. Soup-scoped variants name an
//! indexed path and turn into a column predicate once the store has resolved
//! that path to a physical column. The [`QuerySpec::Smart`] variant carries
//! raw SQL instead and has no predicate at all.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryError;

/// Sort direction on the queried column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        }
    }
}

/// A WHERE-clause fragment with its positional bind arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub args: Vec<Value>,
}

/// One query over a soup, or a raw smart-SQL query.
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySpec {
    /// Rows whose indexed value equals `match_key`.
    Exact {
        path: String,
        match_key: Value,
        page_size: u32,
    },
    /// Rows whose indexed value lies in `[begin_key, end_key]`. Either bound
    /// may be absent; with neither, every row matches.
    Range {
        path: String,
        begin_key: Option<Value>,
        end_key: Option<Value>,
        order: Order,
        page_size: u32,
    },
    /// Rows whose indexed value matches an SQL `LIKE` pattern.
    Like {
        path: String,
        like_key: String,
        order: Order,
        page_size: u32,
    },
    /// Raw SQL with `{soup}` / `{soup:path}` references.
    Smart { smart_sql: String, page_size: u32 },
}

impl QuerySpec {
    pub fn exact(path: impl Into<String>, match_key: impl Into<Value>, page_size: u32) -> Self {
        QuerySpec::Exact {
            path: path.into(),
            match_key: match_key.into(),
            page_size,
        }
    }

    pub fn range(
        path: impl Into<String>,
        begin_key: Option<Value>,
        end_key: Option<Value>,
        order: Order,
        page_size: u32,
    ) -> Self {
        QuerySpec::Range {
            path: path.into(),
            begin_key,
            end_key,
            order,
            page_size,
        }
    }

    /// Every row of the soup, ordered by `path`.
    pub fn all(path: impl Into<String>, order: Order, page_size: u32) -> Self {
        Self::range(path, None, None, order, page_size)
    }

    pub fn like(
        path: impl Into<String>,
        like_key: impl Into<String>,
        order: Order,
        page_size: u32,
    ) -> Self {
        QuerySpec::Like {
            path: path.into(),
            like_key: like_key.into(),
            order,
            page_size,
        }
    }

    pub fn smart(smart_sql: impl Into<String>, page_size: u32) -> Self {
        QuerySpec::Smart {
            smart_sql: smart_sql.into(),
            page_size,
        }
    }

    pub fn page_size(&self) -> u32 {
        match self {
            QuerySpec::Exact { page_size, .. }
            | QuerySpec::Range { page_size, .. }
            | QuerySpec::Like { page_size, .. }
            | QuerySpec::Smart { page_size, .. } => *page_size,
        }
    }

    /// The indexed path this query filters and orders on. `None` for smart queries.
    pub fn index_path(&self) -> Option<&str> {
        match self {
            QuerySpec::Exact { path, .. }
            | QuerySpec::Range { path, .. }
            | QuerySpec::Like { path, .. } => Some(path),
            QuerySpec::Smart { .. } => None,
        }
    }

    pub fn is_smart(&self) -> bool {
        matches!(self, QuerySpec::Smart { .. })
    }

    /// Check the invariants a constructor cannot enforce on its own.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.page_size() == 0 {
            return Err(QueryError::InvalidPageSize);
        }
        match self {
            QuerySpec::Smart { smart_sql, .. } if smart_sql.trim().is_empty() => {
                Err(QueryError::InvalidSpec("smartSql is empty".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// WHERE fragment for this query against `column`.
    ///
    /// `Ok(None)` means "no filter". Smart queries have no column and fail
    /// with [`QueryError::SmartPredicate`]; run their SQL directly instead.
    pub fn predicate(&self, column: &str) -> Result<Option<Predicate>, QueryError> {
        let predicate = match self {
            QuerySpec::Exact { match_key, .. } => Predicate {
                sql: format!("{column} = ?"),
                args: vec![match_key.clone()],
            },
            QuerySpec::Like { like_key, .. } => Predicate {
                sql: format!("{column} LIKE ?"),
                args: vec![Value::String(like_key.clone())],
            },
            QuerySpec::Range {
                begin_key, end_key, ..
            } => match (begin_key, end_key) {
                (None, None) => return Ok(None),
                (None, Some(end)) => Predicate {
                    sql: format!("{column} <= ?"),
                    args: vec![end.clone()],
                },
                (Some(begin), None) => Predicate {
                    sql: format!("{column} >= ?"),
                    args: vec![begin.clone()],
                },
                (Some(begin), Some(end)) => Predicate {
                    sql: format!("{column} >= ? AND {column} <= ?"),
                    args: vec![begin.clone(), end.clone()],
                },
            },
            QuerySpec::Smart { .. } => return Err(QueryError::SmartPredicate),
        };
        Ok(Some(predicate))
    }

    /// ORDER BY term for `column`. Exact queries always sort ascending since
    /// every match shares the same value. `None` for smart queries.
    pub fn order_by(&self, column: &str) -> Option<String> {
        let order = match self {
            QuerySpec::Exact { .. } => Order::Ascending,
            QuerySpec::Range { order, .. } | QuerySpec::Like { order, .. } => *order,
            QuerySpec::Smart { .. } => return None,
        };
        Some(format!("{column} {}", order.sql()))
    }
}

/// Wire name of a query variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Exact,
    Range,
    Like,
    Smart,
}

/// Flat, caller-facing form of a query specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpecPayload {
    pub query_type: QueryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    pub page_size: u32,
}

fn reject(field: &str, query_type: QueryType) -> QueryError {
    QueryError::InvalidSpec(format!("{field} is not allowed on a {query_type:?} query"))
}

fn require<T>(value: Option<T>, field: &str, query_type: QueryType) -> Result<T, QueryError> {
    value.ok_or_else(|| QueryError::InvalidSpec(format!("{query_type:?} query requires {field}")))
}

impl TryFrom<QuerySpecPayload> for QuerySpec {
    type Error = QueryError;

    fn try_from(p: QuerySpecPayload) -> Result<Self, Self::Error> {
        let t = p.query_type;
        let spec = match t {
            QueryType::Exact => {
                if p.begin_key.is_some() || p.end_key.is_some() {
                    return Err(reject("beginKey/endKey", t));
                }
                if p.like_key.is_some() {
                    return Err(reject("likeKey", t));
                }
                if p.smart_sql.is_some() {
                    return Err(reject("smartSql", t));
                }
                QuerySpec::Exact {
                    path: require(p.index_path, "indexPath", t)?,
                    match_key: require(p.match_key, "matchKey", t)?,
                    page_size: p.page_size,
                }
            }
            QueryType::Range => {
                if p.match_key.is_some() {
                    return Err(reject("matchKey", t));
                }
                if p.like_key.is_some() {
                    return Err(reject("likeKey", t));
                }
                if p.smart_sql.is_some() {
                    return Err(reject("smartSql", t));
                }
                QuerySpec::Range {
                    path: require(p.index_path, "indexPath", t)?,
                    begin_key: p.begin_key,
                    end_key: p.end_key,
                    order: p.order.unwrap_or_default(),
                    page_size: p.page_size,
                }
            }
            QueryType::Like => {
                if p.match_key.is_some() {
                    return Err(reject("matchKey", t));
                }
                if p.begin_key.is_some() || p.end_key.is_some() {
                    return Err(reject("beginKey/endKey", t));
                }
                if p.smart_sql.is_some() {
                    return Err(reject("smartSql", t));
                }
                QuerySpec::Like {
                    path: require(p.index_path, "indexPath", t)?,
                    like_key: require(p.like_key, "likeKey", t)?,
                    order: p.order.unwrap_or_default(),
                    page_size: p.page_size,
                }
            }
            QueryType::Smart => {
                if p.index_path.is_some() {
                    return Err(reject("indexPath", t));
                }
                if p.match_key.is_some() || p.like_key.is_some() {
                    return Err(reject("matchKey/likeKey", t));
                }
                if p.begin_key.is_some() || p.end_key.is_some() {
                    return Err(reject("beginKey/endKey", t));
                }
                QuerySpec::Smart {
                    smart_sql: require(p.smart_sql, "smartSql", t)?,
                    page_size: p.page_size,
                }
            }
        };
        spec.validate()?;
        Ok(spec)
    }
}
