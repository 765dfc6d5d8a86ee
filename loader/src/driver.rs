//! Collaborator interfaces: pool provider, pooled database, raw connection.
//!
//! The loader only ever calls the operations declared here and never looks
//! inside a pool. Implementations map their native failures onto
//! [`DbError`](crate::error::DbError) leaves (`Vendor`, `BadConnection`,
//! `Io`, ...) so classification works.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dm_async_utils::Context;

use crate::config::DbConfig;
use crate::error::Result;

/// A positional statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Fully materialised result set of a read query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Rows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Value]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }
}

/// One live connection checked out of a pool.
///
/// Methods take `&self`; a `BaseConn` is still used by a single owner at a
/// time through [`DbConn`](crate::conn::DbConn).
#[async_trait]
pub trait BaseConn: Send + Sync {
    async fn query_sql(&self, ctx: &Context, query: &str, args: &[Value]) -> Result<Rows>;

    /// Run `queries` as one transaction. `args[i]` binds `queries[i]`; a
    /// missing entry means the statement takes no arguments. Returns the
    /// total affected row count.
    async fn execute_sql(&self, ctx: &Context, queries: &[String], args: &[Vec<Value>])
    -> Result<u64>;

    /// Return the connection to its pool.
    async fn close(&self) -> Result<()>;
}

/// A pooled database handle.
#[async_trait]
pub trait BaseDb: Send + Sync {
    async fn get_base_conn(&self, ctx: &Context) -> Result<Box<dyn BaseConn>>;

    async fn close(&self) -> Result<()>;
}

/// Opens pools for a target database.
#[async_trait]
pub trait DbProvider: Send + Sync {
    async fn apply(&self, cfg: &DbConfig) -> Result<Arc<dyn BaseDb>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn values_from_primitives() {
        assert_eq!(Value::from(7_i32), Value::Int(7));
        assert_eq!(Value::from("a"), Value::Text("a".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3_u64)), Value::UInt(3));
    }

    #[test]
    fn display_is_compact() {
        let rendered: Vec<String> = [Value::Null, Value::Text("x".into()), Value::Bytes(vec![0; 4])]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(rendered, vec!["NULL", "\"x\"", "<4 bytes>"]);
    }

    #[test]
    fn rows_accessors() {
        let rows = Rows::new(
            vec!["id".into()],
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.columns(), ["id".to_string()]);
        assert_eq!(rows.iter().next(), Some(&[Value::Int(1)][..]));
    }
}
