//! Error types for upsert operations.

/// Errors that can occur while preparing or executing an upsert.
///
/// Every variant except [`UpsertError::Database`] is raised before the
/// offending statement reaches the database.
#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    /// A level of the frame's key has no name.
    #[error("All index levels must be named! Unnamed levels at positions: {positions:?}")]
    UnnamedIndexLevels {
        /// Positions of the unnamed key levels.
        positions: Vec<usize>,
    },

    /// The frame's key is not unique.
    #[error(
        "The index must be unique since it is used as primary key.\n\
         Check duplicates using this code (assuming frame is the Frame you want to upsert):\n\
         >>> frame.duplicated_index()\n\
         Duplicated rows: {rows:?}"
    )]
    DuplicateValuesInIndex {
        /// Positions of every row whose key occurs more than once.
        rows: Vec<usize>,
    },

    /// A name appears more than once across key levels and columns.
    #[error("Found duplicates across index and columns: {labels:?}")]
    DuplicateLabels {
        /// The labels occurring more than once.
        labels: Vec<String>,
    },

    /// Column names that the Postgres wire escaping cannot handle.
    #[error(
        "Postgres drivers do not support column names with '%', '(' or ')'. \
         You need to fix these names (see `fix_bad_column_names`): {names:?}"
    )]
    BadColumnNames {
        /// Offending names.
        names: Vec<String>,
    },

    /// A key level is missing from the live table and cannot be added after the fact.
    #[error(
        "Cannot add any column that is part of the index! Missing in table {table}: {columns:?}\n\
         You'll have to update your table primary key or change your frame index"
    )]
    MissingIndexLevelInSql {
        /// Table name.
        table: String,
        /// Key levels missing from the live table.
        columns: Vec<String>,
    },

    /// Schema operations requested against a database without schemas.
    #[error("Cannot create schemas for {dialect} (only PostgreSQL-like databases have this feature)")]
    HasNoSchemaSystem {
        /// Name of the dialect.
        dialect: &'static str,
    },

    /// The table is wider than the parameter limit even for a single row.
    #[error(
        "The frame has more columns+index levels ({values_per_row}) than the maximum number \
         of allowed parameters for {dialect} ({maximum}); we could not even upsert row by row"
    )]
    TooManyColumnsForUpsert {
        /// Name of the dialect.
        dialect: &'static str,
        /// Parameter ceiling of the dialect.
        maximum: usize,
        /// Number of bound values per row.
        values_per_row: usize,
    },

    /// The database cannot change the type of an existing column.
    #[error("{dialect} does not support column data type alteration (column {column} of table {table})")]
    UnsupportedTypeAlteration {
        /// Name of the dialect.
        dialect: &'static str,
        /// Table name.
        table: String,
        /// Column that would have been altered.
        column: String,
    },

    /// Column introspection found no columns for the table.
    #[error("Table {0} not found (no columns could be read from the database)")]
    TableNotFound(String),

    /// An argument was out of its allowed range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error raised by the driver or the database.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl UpsertError {
    /// Returns the underlying driver error, if any.
    #[must_use]
    pub fn as_database_error(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Database(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for upsert operations.
pub type Result<T> = std::result::Result<T, UpsertError>;
