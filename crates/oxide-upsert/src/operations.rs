//! DDL operations issued while reconciling a table with a frame.
//!
//! Only additive or narrow changes exist here: creating a schema or table,
//! adding a column, and changing the type of a column that holds no data.

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnSchema, SqlType, TableSchema};

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DdlOperation {
    /// Create a schema (namespace).
    CreateSchema {
        /// Schema name.
        name: String,
    },

    /// Create a table if it does not exist.
    CreateTable {
        /// Schema the table lives in.
        schema: Option<String>,
        /// Table name.
        name: String,
        /// Column definitions.
        columns: Vec<ColumnSchema>,
        /// Primary key column(s).
        primary_key: Vec<String>,
    },

    /// Add a nullable column to a table.
    AddColumn {
        /// Schema the table lives in.
        schema: Option<String>,
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSchema,
    },

    /// Change the type of an existing column.
    AlterColumnType {
        /// Schema the table lives in.
        schema: Option<String>,
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New data type.
        sql_type: SqlType,
    },
}

impl DdlOperation {
    /// Creates a CreateSchema operation.
    #[must_use]
    pub fn create_schema(name: impl Into<String>) -> Self {
        Self::CreateSchema { name: name.into() }
    }

    /// Creates a CreateTable operation from a table model.
    #[must_use]
    pub fn create_table(table: &TableSchema) -> Self {
        Self::CreateTable {
            schema: table.schema.clone(),
            name: table.name.clone(),
            columns: table.columns.clone(),
            primary_key: table.primary_key.clone(),
        }
    }

    /// Creates an AddColumn operation.
    #[must_use]
    pub fn add_column(table: &TableSchema, column: ColumnSchema) -> Self {
        Self::AddColumn {
            schema: table.schema.clone(),
            table: table.name.clone(),
            column,
        }
    }

    /// Creates an AlterColumnType operation.
    #[must_use]
    pub fn alter_column_type(
        table: &TableSchema,
        column: impl Into<String>,
        sql_type: SqlType,
    ) -> Self {
        Self::AlterColumnType {
            schema: table.schema.clone(),
            table: table.name.clone(),
            column: column.into(),
            sql_type,
        }
    }

    /// Returns a human-readable description of this operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateSchema { name } => format!("Create schema '{name}'"),
            Self::CreateTable { name, .. } => format!("Create table '{name}'"),
            Self::AddColumn { table, column, .. } => {
                format!("Add column '{}' to table '{table}'", column.name)
            }
            Self::AlterColumnType { table, column, .. } => {
                format!("Alter type of column '{column}' in table '{table}'")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_copy_table_location() {
        let table = TableSchema::new("users")
            .with_schema("crm")
            .column(ColumnSchema::new("id", SqlType::BigInt).primary_key());

        match DdlOperation::create_table(&table) {
            DdlOperation::CreateTable {
                schema,
                name,
                primary_key,
                ..
            } => {
                assert_eq!(schema.as_deref(), Some("crm"));
                assert_eq!(name, "users");
                assert_eq!(primary_key, vec!["id"]);
            }
            other => panic!("unexpected operation {other:?}"),
        }

        let op = DdlOperation::alter_column_type(&table, "age", SqlType::Integer);
        assert_eq!(op.description(), "Alter type of column 'age' in table 'users'");
    }
}
