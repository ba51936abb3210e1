//! Upsert labeled in-memory tables into SQL databases.
//!
//! `oxide-upsert` takes a [`Frame`] (named key levels plus named columns)
//! and writes it to a table with the database's native upsert:
//! - The frame's key becomes the table's primary key
//! - Rows whose key already exists are either updated or left alone
//! - Missing schemas, tables and columns can be created on the fly
//! - Statements are split into chunks that stay under each database's
//!   parameter limit
//!
//! PostgreSQL, MySQL/MariaDB and SQLite are recognized; any other database
//! reachable through `sqlx::Any` gets generic SQL.
//!
//! # Architecture
//!
//! - **Schema** - Builds the table model from the frame (`SqlType`, `TableSchema`)
//! - **Reconcile** - Brings the live table in line with the model (DDL)
//! - **Query** - Compiles one multi-row `INSERT ... ON CONFLICT` per chunk
//! - **Executor** - Runs chunks in order, collected or as a stream
//! - **Transaction** - Owns a transaction for a pool, stays out of the way for a connection
//! - **Dialect** - Database-specific SQL facts
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_upsert::prelude::*;
//! use sqlx::any::AnyPoolOptions;
//!
//! oxide_upsert::install_drivers();
//! let pool = AnyPoolOptions::new().connect("sqlite::memory:").await?;
//!
//! let frame = Frame::new(
//!     vec![Column::new("profileid", [0_i64, 1, 2])],
//!     vec![Column::new("name", ["Foo", "Bar", "Baz"])],
//! )?;
//! upsert(&pool, &frame, "example", IfRowExists::Update, &UpsertOptions::new()).await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Upsert JSON records keyed by "id"
//! oxide-upsert --database sqlite:db.sqlite3 --table people --index id people.json
//!
//! # Print the CREATE TABLE statement without touching the database
//! oxide-upsert --table people --index id --print-ddl people.json
//! ```

pub mod chunk;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod frame;
pub mod helpers;
pub mod introspect;
pub mod logging;
pub mod operations;
pub mod query;
pub mod reconcile;
pub mod schema;
pub mod transaction;
pub mod upsert;
pub mod value;

pub use error::{Result, UpsertError};
pub use executor::{ChunkResult, UpsertStream};
pub use frame::{Column, Frame, Value};
pub use sqlx::any::install_default_drivers as install_drivers;
pub use upsert::{upsert, upsert_stream, IfRowExists, UpsertOptions};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::chunk::adjust_batch_size;
    pub use crate::dialect::DbType;
    pub use crate::error::{Result, UpsertError};
    pub use crate::executor::{ChunkResult, UpsertExecutor, UpsertStream};
    pub use crate::frame::{Closed, Column, Frame, Interval, Value};
    pub use crate::helpers::{fix_bad_column_names, BadCharReplacements};
    pub use crate::schema::{ColumnSchema, SqlType, TableSchema};
    pub use crate::transaction::Connectable;
    pub use crate::upsert::{upsert, upsert_stream, IfRowExists, UpsertOptions};
}
