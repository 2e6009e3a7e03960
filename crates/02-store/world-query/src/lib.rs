//! Prepared-statement access to a world database.
//!
//! [`WorldQuery`] wraps a batch of SQL statements that are stepped one at a
//! time, with typed parameter binding and column access. [`MemoryVfs`]
//! registers an SQLite VFS whose files live in process memory so a world can
//! run without touching disk.

mod error;
mod query;
mod splitter;
mod value;
mod vfs;

pub use error::{QueryError, QueryResult};
pub use query::WorldQuery;
pub use splitter::split_statements;
pub use value::{ColumnKey, FromColumn, IntoParam};
pub use vfs::{MemoryFile, MemoryVfs};

pub use rusqlite::types::Value;
pub use rusqlite::Connection;

/// Quotes `name` as an SQL string literal, doubling embedded quotes.
pub fn quote_literal(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}
