//! Schema reconciliation.
//!
//! Brings the live database in line with a [`TableSchema`] before rows are
//! written: creates the schema and table when asked to, adds columns the
//! frame has and the table lacks, and changes the type of columns that hold
//! no data yet. Nothing here drops or rewrites existing data.

use sqlx::error::ErrorKind;
use sqlx::{AnyConnection, Connection};
use tracing::{debug, info, warn};

use crate::dialect::DbType;
use crate::error::{Result, UpsertError};
use crate::frame::Frame;
use crate::introspect::{self, LiveColumn};
use crate::operations::DdlOperation;
use crate::schema::{types_match, TableSchema};

/// SQLSTATE codes of "object already exists" errors (Postgres, MySQL).
const DUPLICATE_OBJECT_CODES: [&str; 4] = ["42P06", "42P07", "23505", "42S01"];

#[derive(Debug, Clone, Copy)]
enum DbObject {
    Schema,
    Table,
}

/// Reconciles one live table with the model built from a frame.
#[derive(Debug, Clone, Copy)]
pub struct SchemaReconciler<'a> {
    db_type: DbType,
    table: &'a TableSchema,
    frame: &'a Frame,
    handle_concurrent_creation: bool,
}

impl<'a> SchemaReconciler<'a> {
    /// Creates a reconciler. Concurrent creation races are tolerated by default.
    #[must_use]
    pub fn new(db_type: DbType, table: &'a TableSchema, frame: &'a Frame) -> Self {
        Self {
            db_type,
            table,
            frame,
            handle_concurrent_creation: true,
        }
    }

    /// Sets whether losing a race to create the schema or table is an error.
    #[must_use]
    pub fn handle_concurrent_creation(mut self, enabled: bool) -> Self {
        self.handle_concurrent_creation = enabled;
        self
    }

    /// Returns the table model.
    #[must_use]
    pub fn table(&self) -> &'a TableSchema {
        self.table
    }

    /// Checks whether the table's schema exists.
    pub async fn schema_exists(&self, conn: &mut AnyConnection) -> Result<bool> {
        let schema = self.require_schema()?;
        introspect::schema_exists(conn, self.db_type, schema).await
    }

    /// Checks whether the table exists.
    pub async fn table_exists(&self, conn: &mut AnyConnection) -> Result<bool> {
        introspect::table_exists(
            conn,
            self.db_type,
            self.table.schema.as_deref(),
            &self.table.name,
        )
        .await
    }

    /// Creates the table's schema unless it already exists.
    pub async fn create_schema_if_not_exists(&self, conn: &mut AnyConnection) -> Result<()> {
        let schema = self.require_schema()?;
        if self.schema_exists(conn).await? {
            return Ok(());
        }
        self.create_object(conn, DdlOperation::create_schema(schema), DbObject::Schema)
            .await
    }

    /// Creates the table unless it already exists.
    pub async fn create_table_if_not_exists(&self, conn: &mut AnyConnection) -> Result<()> {
        if self.table_exists(conn).await? {
            return Ok(());
        }
        self.create_object(conn, DdlOperation::create_table(self.table), DbObject::Table)
            .await
    }

    /// Reads the live columns of the table.
    ///
    /// Fails with [`UpsertError::TableNotFound`] when no column can be read,
    /// which is how SQLite reports a missing table.
    pub async fn get_db_columns(&self, conn: &mut AnyConnection) -> Result<Vec<LiveColumn>> {
        let columns = introspect::get_columns(
            conn,
            self.db_type,
            self.table.schema.as_deref(),
            &self.table.name,
        )
        .await?;
        if columns.is_empty() {
            return Err(UpsertError::TableNotFound(self.display_name()));
        }
        Ok(columns)
    }

    /// Names of the live columns that hold no value other than NULL.
    pub async fn get_empty_columns(&self, conn: &mut AnyConnection) -> Result<Vec<String>> {
        let mut empty = Vec::new();
        for column in self.get_db_columns(conn).await? {
            if self.column_is_empty(conn, &column.name).await? {
                empty.push(column.name);
            }
        }
        Ok(empty)
    }

    /// Adds the columns of the model that the live table lacks.
    ///
    /// Key levels cannot be added after the fact: if one is missing the call
    /// fails with [`UpsertError::MissingIndexLevelInSql`] before any change.
    /// Returns the names of the added columns.
    pub async fn add_new_columns(&self, conn: &mut AnyConnection) -> Result<Vec<String>> {
        let live = self.get_db_columns(conn).await?;
        let missing: Vec<_> = self
            .table
            .columns
            .iter()
            .filter(|c| !live.iter().any(|l| l.name == c.name))
            .collect();

        let missing_keys: Vec<String> = missing
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        if !missing_keys.is_empty() {
            return Err(UpsertError::MissingIndexLevelInSql {
                table: self.display_name(),
                columns: missing_keys,
            });
        }

        let mut added = Vec::with_capacity(missing.len());
        for column in missing {
            let op = DdlOperation::add_column(self.table, column.clone());
            self.execute_ddl(conn, &op).await?;
            info!(
                table = %self.table.name,
                schema = ?self.table.schema,
                column = %column.name,
                sql_type = %self.db_type.type_name(&column.sql_type),
                "Added column"
            );
            added.push(column.name.clone());
        }
        Ok(added)
    }

    /// Changes the type of empty live columns whose type differs from the model.
    ///
    /// Only data columns for which the frame holds at least one value are
    /// considered. Types are compared on their base name, and a live JSON
    /// column accepts text. Returns the names of the altered columns.
    pub async fn adapt_dtype_of_empty_db_columns(
        &self,
        conn: &mut AnyConnection,
    ) -> Result<Vec<String>> {
        let live = self.get_db_columns(conn).await?;
        let mut altered = Vec::new();

        for column in &live {
            if self.frame.is_index_level(&column.name) {
                continue;
            }
            let (Some(frame_column), Some(target)) = (
                self.frame.get(&column.name),
                self.table.get_column(&column.name),
            ) else {
                continue;
            };
            if types_match(&column.sql_type, &target.sql_type, self.db_type)
                || !frame_column.has_values()
                || !self.column_is_empty(conn, &column.name).await?
            {
                continue;
            }

            if !self.db_type.supports_alter_column_type() {
                return Err(UpsertError::UnsupportedTypeAlteration {
                    dialect: self.db_type.name(),
                    table: self.display_name(),
                    column: column.name.clone(),
                });
            }

            let op = DdlOperation::alter_column_type(
                self.table,
                column.name.clone(),
                target.sql_type.clone(),
            );
            self.execute_ddl(conn, &op).await?;
            info!(
                table = %self.table.name,
                schema = ?self.table.schema,
                column = %column.name,
                from = %column.type_name,
                to = %self.db_type.type_name(&target.sql_type),
                "Changed type of column"
            );
            altered.push(column.name.clone());
        }
        Ok(altered)
    }

    async fn column_is_empty(&self, conn: &mut AnyConnection, column: &str) -> Result<bool> {
        introspect::column_is_empty(
            conn,
            self.db_type,
            self.table.schema.as_deref(),
            &self.table.name,
            column,
        )
        .await
    }

    async fn object_exists(&self, conn: &mut AnyConnection, object: DbObject) -> Result<bool> {
        match object {
            DbObject::Schema => self.schema_exists(conn).await,
            DbObject::Table => self.table_exists(conn).await,
        }
    }

    /// Runs a CREATE statement, absorbing a lost creation race if enabled.
    async fn create_object(
        &self,
        conn: &mut AnyConnection,
        operation: DdlOperation,
        object: DbObject,
    ) -> Result<()> {
        let sql = self.db_type.generate_sql(&operation);
        self.create_with_sql(conn, &sql, &operation.description(), object)
            .await
    }

    /// Runs `sql`, which creates `object`.
    ///
    /// Where DDL is transactional the statement runs in a nested transaction
    /// (a savepoint when the connection is already in one), so a failed
    /// CREATE leaves the surrounding transaction usable for the existence
    /// re-check. MySQL commits around DDL and drops savepoints, so there the
    /// statement runs directly.
    async fn create_with_sql(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        description: &str,
        object: DbObject,
    ) -> Result<()> {
        if !self.handle_concurrent_creation {
            return self.execute_sql(conn, sql, description).await;
        }

        let outcome = if self.db_type.has_transactional_ddl() {
            self.execute_in_savepoint(conn, sql, description).await
        } else {
            self.execute_sql(conn, sql, description).await
        };
        match outcome {
            Err(UpsertError::Database(err)) if is_duplicate_object(&err) => {
                if self.object_exists(conn, object).await? {
                    warn!(
                        operation = %description,
                        error = %err,
                        "Object was created concurrently, ignoring creation error"
                    );
                    Ok(())
                } else {
                    Err(UpsertError::Database(err))
                }
            }
            other => other,
        }
    }

    async fn execute_in_savepoint(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        description: &str,
    ) -> Result<()> {
        let mut nested = conn.begin().await?;
        match self.execute_sql(&mut nested, sql, description).await {
            Ok(()) => {
                nested.commit().await?;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = nested.rollback().await {
                    warn!(error = %rollback_err, "Rollback of failed DDL failed");
                }
                Err(err)
            }
        }
    }

    async fn execute_ddl(&self, conn: &mut AnyConnection, operation: &DdlOperation) -> Result<()> {
        let sql = self.db_type.generate_sql(operation);
        self.execute_sql(conn, &sql, &operation.description()).await
    }

    async fn execute_sql(&self, conn: &mut AnyConnection, sql: &str, description: &str) -> Result<()> {
        debug!(sql = %sql, operation = %description, "Executing DDL");
        sqlx::query(sql).execute(&mut *conn).await?;
        Ok(())
    }

    fn require_schema(&self) -> Result<&'a str> {
        if !self.db_type.supports_schemas() {
            return Err(UpsertError::HasNoSchemaSystem {
                dialect: self.db_type.name(),
            });
        }
        self.table.schema.as_deref().ok_or_else(|| {
            UpsertError::InvalidArgument(format!(
                "cannot use the schema of table {} because none was given",
                self.table.name
            ))
        })
    }

    fn display_name(&self) -> String {
        match &self.table.schema {
            Some(schema) => format!("{schema}.{}", self.table.name),
            None => self.table.name.clone(),
        }
    }
}

/// Returns whether a driver error says the object being created already exists.
#[must_use]
pub fn is_duplicate_object(err: &sqlx::Error) -> bool {
    let Some(db_err) = err.as_database_error() else {
        return false;
    };
    if let Some(code) = db_err.code() {
        if DUPLICATE_OBJECT_CODES.iter().any(|c| *c == code) {
            return true;
        }
    }
    matches!(db_err.kind(), ErrorKind::UniqueViolation)
        || db_err.message().to_ascii_lowercase().contains("already exists")
}
