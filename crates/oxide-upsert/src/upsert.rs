//! Public entry points.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::executor::{UpsertExecutor, UpsertStream};
use crate::frame::Frame;
use crate::schema::SqlType;
use crate::transaction::Connectable;

pub use crate::query::IfRowExists;

/// Options of an upsert call.
///
/// ```rust
/// use oxide_upsert::prelude::*;
///
/// let options = UpsertOptions::new()
///     .add_new_columns(true)
///     .batch_size(500)
///     .type_override("payload", SqlType::Json);
/// assert!(options.create_table);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOptions {
    /// Target schema. `None` uses the connection's default.
    pub schema: Option<String>,
    /// Create the schema if missing. Ignored when `schema` is `None`.
    pub create_schema: bool,
    /// Create the table if missing.
    pub create_table: bool,
    /// Add frame columns missing from the live table.
    pub add_new_columns: bool,
    /// Change the type of live columns that hold no values yet.
    pub adapt_empty_column_types: bool,
    /// Rows per statement. `None` sends the whole frame at once, within
    /// the dialect's parameter ceiling.
    pub batch_size: Option<usize>,
    /// Column types that replace the inferred ones.
    pub type_overrides: BTreeMap<String, SqlType>,
    /// Treat "already exists" errors from a concurrent creator as success.
    pub handle_concurrent_creation: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            schema: None,
            create_schema: false,
            create_table: true,
            add_new_columns: false,
            adapt_empty_column_types: false,
            batch_size: None,
            type_overrides: BTreeMap::new(),
            handle_concurrent_creation: true,
        }
    }
}

impl UpsertOptions {
    /// Creates options with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target schema.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Sets whether a missing schema is created.
    #[must_use]
    pub const fn create_schema(mut self, enabled: bool) -> Self {
        self.create_schema = enabled;
        self
    }

    /// Sets whether a missing table is created. When off, a missing
    /// table makes the upsert fail.
    #[must_use]
    pub const fn create_table(mut self, enabled: bool) -> Self {
        self.create_table = enabled;
        self
    }

    /// Sets whether frame columns missing from the table are added.
    #[must_use]
    pub const fn add_new_columns(mut self, enabled: bool) -> Self {
        self.add_new_columns = enabled;
        self
    }

    /// Sets whether empty live columns take the frame's type.
    #[must_use]
    pub const fn adapt_empty_column_types(mut self, enabled: bool) -> Self {
        self.adapt_empty_column_types = enabled;
        self
    }

    /// Sets the number of rows per statement. Zero is rejected when the
    /// upsert runs.
    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Forces the SQL type of one column.
    #[must_use]
    pub fn type_override(mut self, column: impl Into<String>, sql_type: SqlType) -> Self {
        self.type_overrides.insert(column.into(), sql_type);
        self
    }

    /// Sets whether losing a race to create the schema or table is
    /// tolerated.
    #[must_use]
    pub const fn handle_concurrent_creation(mut self, enabled: bool) -> Self {
        self.handle_concurrent_creation = enabled;
        self
    }
}

/// Upserts `frame` into `table_name`.
///
/// With a pool, the whole call runs in one transaction that is committed on
/// success and rolled back on any error. With a connection, nothing is
/// committed or rolled back: the caller keeps transaction control.
///
/// # Errors
///
/// Validation errors are returned before the database is touched. Database
/// errors are returned as [`UpsertError::Database`](crate::UpsertError::Database).
pub async fn upsert<'c>(
    connectable: impl Into<Connectable<'c>>,
    frame: &Frame,
    table_name: &str,
    if_row_exists: IfRowExists,
    options: &UpsertOptions,
) -> Result<()> {
    UpsertExecutor::new(frame, table_name, if_row_exists, options)
        .execute(connectable.into())
        .await
}

/// Like [`upsert`], but returns a stream that executes one chunk each time
/// it is polled and yields its [`ChunkResult`](crate::ChunkResult).
///
/// Schema changes happen before the stream is returned.
///
/// # Errors
///
/// Validation errors and errors from the schema changes are returned
/// directly; errors of individual chunks are yielded by the stream.
pub async fn upsert_stream<'c>(
    connectable: impl Into<Connectable<'c>>,
    frame: &Frame,
    table_name: &str,
    if_row_exists: IfRowExists,
    options: &UpsertOptions,
) -> Result<UpsertStream<'c>> {
    UpsertExecutor::new(frame, table_name, if_row_exists, options)
        .execute_stream(connectable.into())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = UpsertOptions::default();
        assert_eq!(options.schema, None);
        assert!(!options.create_schema);
        assert!(options.create_table);
        assert!(!options.add_new_columns);
        assert!(!options.adapt_empty_column_types);
        assert_eq!(options.batch_size, None);
        assert!(options.type_overrides.is_empty());
        assert!(options.handle_concurrent_creation);
    }

    #[test]
    fn test_builder() {
        let options = UpsertOptions::new()
            .schema("tests")
            .create_schema(true)
            .create_table(false)
            .batch_size(10)
            .type_override("profileid", SqlType::Varchar(Some(5)));
        assert_eq!(options.schema.as_deref(), Some("tests"));
        assert!(options.create_schema);
        assert!(!options.create_table);
        assert_eq!(options.batch_size, Some(10));
        assert_eq!(
            options.type_overrides.get("profileid"),
            Some(&SqlType::Varchar(Some(5)))
        );
    }
}
