//! Upsert statement compiler.
//!
//! Compiles one batch of normalized rows into a single multi-row
//! `INSERT` with the dialect's conflict clause:
//!
//! | Dialect | update | ignore |
//! |---|---|---|
//! | Postgres | `ON CONFLICT (key) DO UPDATE SET c = EXCLUDED.c` | `ON CONFLICT (key) DO NOTHING` |
//! | MySQL | `ON DUPLICATE KEY UPDATE c = VALUES(c)` | `INSERT IGNORE INTO` |
//! | SQLite, other | `ON CONFLICT (key) DO UPDATE SET c = excluded.c` | `ON CONFLICT (key) DO NOTHING` |
//!
//! A table made only of key columns has nothing to update, so "update"
//! compiles to the "ignore" form for it.

use std::fmt;
use std::str::FromStr;

use sqlx::AnyConnection;
use tracing::debug;

use crate::dialect::DbType;
use crate::error::{Result, UpsertError};
use crate::introspect::LiveColumn;
use crate::schema::TableSchema;
use crate::value::{bind_value, SqlValue};

/// What to do with a row whose key already exists in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfRowExists {
    /// Keep the stored row.
    Ignore,
    /// Overwrite every non-key column with the incoming values.
    Update,
}

impl IfRowExists {
    /// Mode name as accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Update => "update",
        }
    }
}

impl FromStr for IfRowExists {
    type Err = UpsertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ignore" => Ok(Self::Ignore),
            "update" => Ok(Self::Update),
            other => Err(UpsertError::InvalidArgument(format!(
                "if_row_exists must be \"ignore\" or \"update\", got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for IfRowExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiles and runs upsert statements for one table.
#[derive(Debug, Clone)]
pub struct UpsertQuery {
    db_type: DbType,
    table: TableSchema,
    /// Type each placeholder is cast to, aligned with `table.columns`.
    casts: Vec<String>,
}

impl UpsertQuery {
    /// Creates a compiler for `table` in the given dialect.
    ///
    /// Placeholders are cast to the model's types until
    /// [`with_live_columns`](Self::with_live_columns) says otherwise.
    #[must_use]
    pub fn new(db_type: DbType, table: TableSchema) -> Self {
        let casts = table
            .columns
            .iter()
            .map(|c| db_type.type_name(&c.sql_type))
            .collect();
        Self {
            db_type,
            table,
            casts,
        }
    }

    /// Casts placeholders to the types of the live table.
    ///
    /// A frame column that is all NULL, or holds text for a temporal
    /// column, infers a type that differs from what the table declares.
    /// Columns missing from `live` keep the model's type.
    #[must_use]
    pub fn with_live_columns(mut self, live: &[LiveColumn]) -> Self {
        for (cast, column) in self.casts.iter_mut().zip(&self.table.columns) {
            if let Some(found) = live.iter().find(|l| l.name == column.name) {
                cast.clone_from(&found.type_name);
            }
        }
        self
    }

    /// Returns the table model.
    #[must_use]
    pub fn table(&self) -> &TableSchema {
        &self.table
    }

    /// Number of values every row must carry.
    #[must_use]
    pub fn values_per_row(&self) -> usize {
        self.table.columns.len()
    }

    /// Builds the statement and returns SQL with parameters.
    ///
    /// Rows must be aligned with the table's columns (key columns first).
    #[must_use]
    pub fn build(&self, rows: Vec<Vec<SqlValue>>, if_row_exists: IfRowExists) -> (String, Vec<SqlValue>) {
        let db = self.db_type;
        let update_columns: Vec<String> = match if_row_exists {
            IfRowExists::Update => self
                .table
                .non_key_columns()
                .map(|c| db.quote_identifier(&c.name))
                .collect(),
            IfRowExists::Ignore => Vec::new(),
        };

        let mut sql = String::from("INSERT ");
        if db == DbType::Mysql && update_columns.is_empty() {
            sql.push_str("IGNORE ");
        }
        sql.push_str("INTO ");
        sql.push_str(&self.table.qualified_name(db));

        let columns: Vec<String> = self
            .table
            .columns
            .iter()
            .map(|c| db.quote_identifier(&c.name))
            .collect();
        sql.push_str(" (");
        sql.push_str(&columns.join(", "));
        sql.push_str(") VALUES ");

        let mut params = Vec::with_capacity(rows.len() * columns.len());
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            debug_assert_eq!(row.len(), self.table.columns.len());
            let mut placeholders = Vec::with_capacity(row.len());
            for (value, cast) in row.into_iter().zip(&self.casts) {
                params.push(value);
                placeholders.push(db.placeholder(params.len(), cast));
            }
            tuples.push(format!("({})", placeholders.join(", ")));
        }
        sql.push_str(&tuples.join(", "));

        match db {
            DbType::Mysql => {
                if !update_columns.is_empty() {
                    let updates: Vec<String> = update_columns
                        .iter()
                        .map(|col| format!("{col} = VALUES({col})"))
                        .collect();
                    sql.push_str(" ON DUPLICATE KEY UPDATE ");
                    sql.push_str(&updates.join(", "));
                }
            }
            DbType::Postgres | DbType::Sqlite | DbType::Other => {
                let key: Vec<String> = self
                    .table
                    .primary_key
                    .iter()
                    .map(|c| db.quote_identifier(c))
                    .collect();
                sql.push_str(" ON CONFLICT (");
                sql.push_str(&key.join(", "));
                sql.push(')');

                if update_columns.is_empty() {
                    sql.push_str(" DO NOTHING");
                } else {
                    let excluded = if db == DbType::Postgres {
                        "EXCLUDED"
                    } else {
                        "excluded"
                    };
                    let updates: Vec<String> = update_columns
                        .iter()
                        .map(|col| format!("{col} = {excluded}.{col}"))
                        .collect();
                    sql.push_str(" DO UPDATE SET ");
                    sql.push_str(&updates.join(", "));
                }
            }
        }

        (sql, params)
    }

    /// Compiles and executes one batch, returning the number of affected rows.
    pub async fn execute(
        &self,
        conn: &mut AnyConnection,
        rows: Vec<Vec<SqlValue>>,
        if_row_exists: IfRowExists,
    ) -> Result<u64> {
        let row_count = rows.len();
        let (sql, params) = self.build(rows, if_row_exists);
        debug!(
            table = %self.table.name,
            rows = row_count,
            parameters = params.len(),
            mode = %if_row_exists,
            "Executing upsert statement"
        );

        let mut query = sqlx::query(&sql);
        for value in params {
            query = bind_value(query, value);
        }
        let result = query.execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }
}
