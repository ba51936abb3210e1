//! Database dialect detection and per-dialect SQL facts.
//!
//! Dialects form a closed set. Everything that differs between backends
//! (identifier quoting, placeholders, type names, parameter ceilings and
//! DDL syntax) is a `match` on [`DbType`], so adding a backend is checked
//! exhaustively by the compiler.

use std::fmt;

use sqlx::{AnyConnection, AnyPool};

use crate::operations::DdlOperation;
use crate::schema::{ColumnSchema, SqlType};

/// SQLite parameter ceiling for builds from 3.32.0 onwards.
pub const SQLITE_MAX_PARAMETERS: usize = 32766;
/// SQLite parameter ceiling for builds older than 3.32.0.
pub const SQLITE_LEGACY_MAX_PARAMETERS: usize = 999;
/// Postgres wire protocol parameter ceiling.
pub const POSTGRES_MAX_PARAMETERS: usize = 65535;
/// MySQL prepared statement parameter ceiling.
pub const MYSQL_MAX_PARAMETERS: usize = 65535;

/// Family of SQL dialect spoken by a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    /// PostgreSQL and compatible databases.
    Postgres,
    /// MySQL and MariaDB.
    Mysql,
    /// SQLite.
    Sqlite,
    /// Anything else. Assumed to understand standard SQL and schemas.
    Other,
}

impl DbType {
    /// Classifies a dialect or driver description (backend name, URL scheme...).
    #[must_use]
    pub fn from_description(description: &str) -> Self {
        let description = description.to_ascii_lowercase();
        if description.contains("postgres") || description.contains("psycopg") {
            Self::Postgres
        } else if description.contains("mysql") || description.contains("mariadb") {
            Self::Mysql
        } else if description.contains("sqlite") {
            Self::Sqlite
        } else {
            Self::Other
        }
    }

    /// Dialect of an open connection.
    #[must_use]
    pub fn of_connection(conn: &AnyConnection) -> Self {
        Self::from_description(conn.backend_name())
    }

    /// Dialect of the connections a pool hands out.
    #[must_use]
    pub fn of_pool(pool: &AnyPool) -> Self {
        Self::from_description(pool.connect_options().database_url.scheme())
    }

    /// Human readable name, used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Other => "other",
        }
    }

    /// Returns whether the dialect has schemas (SQL namespaces).
    #[must_use]
    pub const fn supports_schemas(self) -> bool {
        matches!(self, Self::Postgres | Self::Other)
    }

    /// Returns whether the dialect can change the type of an existing column.
    #[must_use]
    pub const fn supports_alter_column_type(self) -> bool {
        !matches!(self, Self::Sqlite)
    }

    /// Returns whether DDL can run inside a transaction without committing it.
    ///
    /// MySQL commits implicitly before and after every DDL statement, which
    /// also discards any savepoint.
    #[must_use]
    pub const fn has_transactional_ddl(self) -> bool {
        !matches!(self, Self::Mysql)
    }

    /// Schema used when the caller does not give one.
    #[must_use]
    pub const fn default_schema(self) -> Option<&'static str> {
        match self {
            Self::Postgres => Some("public"),
            _ => None,
        }
    }

    /// Maximum number of bound parameters in one statement, if any.
    ///
    /// `sqlite_version` is only consulted for SQLite; an unknown version is
    /// treated as a modern build.
    #[must_use]
    pub const fn max_parameters(self, sqlite_version: Option<(u32, u32, u32)>) -> Option<usize> {
        match self {
            Self::Sqlite => match sqlite_version {
                Some((major, minor, _)) if major < 3 || (major == 3 && minor < 32) => {
                    Some(SQLITE_LEGACY_MAX_PARAMETERS)
                }
                _ => Some(SQLITE_MAX_PARAMETERS),
            },
            Self::Postgres => Some(POSTGRES_MAX_PARAMETERS),
            Self::Mysql => Some(MYSQL_MAX_PARAMETERS),
            Self::Other => None,
        }
    }

    /// Quotes an identifier, doubling embedded quote characters.
    #[must_use]
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Self::Mysql => format!("`{}`", name.replace('`', "``")),
            _ => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Quoted, optionally schema-qualified table name.
    #[must_use]
    pub fn qualified_name(self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    /// Placeholder for the parameter at `position` (1-based).
    ///
    /// Postgres placeholders carry a cast to `cast_type`: the `Any` driver
    /// sends dates, timestamps, JSON and NULLs as text, which Postgres will
    /// not assign to typed columns implicitly. Other dialects ignore it.
    #[must_use]
    pub fn placeholder(self, position: usize, cast_type: &str) -> String {
        match self {
            Self::Postgres => format!("${position}::{cast_type}"),
            _ => "?".to_string(),
        }
    }

    /// Placeholder for an untyped parameter, used by catalog queries.
    #[must_use]
    pub fn bare_placeholder(self, position: usize) -> String {
        match self {
            Self::Postgres => format!("${position}"),
            _ => "?".to_string(),
        }
    }

    /// Returns the SQL type name for the given type.
    #[must_use]
    pub fn type_name(self, sql_type: &SqlType) -> String {
        match self {
            Self::Postgres => sql_type.postgres_name(),
            Self::Mysql => sql_type.mysql_name(),
            Self::Sqlite => sql_type.sqlite_name(),
            Self::Other => sql_type.generic_name(),
        }
    }

    /// Generates column definition SQL.
    ///
    /// Primary keys are always declared as a table constraint, so they are
    /// not marked inline here.
    #[must_use]
    pub fn column_definition(self, column: &ColumnSchema) -> String {
        let mut def = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.type_name(&column.sql_type)
        );
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    /// Generates SQL for a DDL operation.
    #[must_use]
    pub fn generate_sql(self, operation: &DdlOperation) -> String {
        match operation {
            DdlOperation::CreateSchema { name } => {
                format!("CREATE SCHEMA {}", self.quote_identifier(name))
            }

            DdlOperation::CreateTable {
                schema,
                name,
                columns,
                primary_key,
            } => {
                let mut sql = String::from("CREATE TABLE IF NOT EXISTS ");
                sql.push_str(&self.qualified_name(schema.as_deref(), name));
                sql.push_str(" (\n  ");

                let mut defs: Vec<String> =
                    columns.iter().map(|c| self.column_definition(c)).collect();
                if !primary_key.is_empty() {
                    let quoted: Vec<String> = primary_key
                        .iter()
                        .map(|c| self.quote_identifier(c))
                        .collect();
                    defs.push(format!("PRIMARY KEY ({})", quoted.join(", ")));
                }
                sql.push_str(&defs.join(",\n  "));
                sql.push_str("\n)");
                sql
            }

            DdlOperation::AddColumn {
                schema,
                table,
                column,
            } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.qualified_name(schema.as_deref(), table),
                self.column_definition(column)
            ),

            DdlOperation::AlterColumnType {
                schema,
                table,
                column,
                sql_type,
            } => {
                let table = self.qualified_name(schema.as_deref(), table);
                let column = self.quote_identifier(column);
                let type_name = self.type_name(sql_type);
                match self {
                    // Postgres refuses the change without an explicit conversion.
                    Self::Postgres => format!(
                        "ALTER TABLE {table} ALTER COLUMN {column} TYPE {type_name} \
                         USING {column}::{type_name}"
                    ),
                    Self::Mysql => format!("ALTER TABLE {table} MODIFY {column} {type_name}"),
                    Self::Sqlite => format!(
                        "-- ALTER COLUMN not supported in SQLite: {table}.{column} {type_name}"
                    ),
                    Self::Other => {
                        format!("ALTER TABLE {table} ALTER COLUMN {column} TYPE {type_name}")
                    }
                }
            }
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_detection() {
        assert_eq!(DbType::from_description("PostgreSQL"), DbType::Postgres);
        assert_eq!(DbType::from_description("postgresql+psycopg"), DbType::Postgres);
        assert_eq!(DbType::from_description("MySQL"), DbType::Mysql);
        assert_eq!(DbType::from_description("mariadb"), DbType::Mysql);
        assert_eq!(DbType::from_description("SQLite"), DbType::Sqlite);
        assert_eq!(DbType::from_description("mssql"), DbType::Other);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(DbType::Postgres.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(DbType::Mysql.quote_identifier("a`b"), "`a``b`");
        assert_eq!(
            DbType::Postgres.qualified_name(Some("public"), "users"),
            "\"public\".\"users\""
        );
        assert_eq!(DbType::Sqlite.qualified_name(None, "users"), "\"users\"");
    }

    #[test]
    fn test_transactional_ddl() {
        assert!(DbType::Postgres.has_transactional_ddl());
        assert!(DbType::Sqlite.has_transactional_ddl());
        assert!(!DbType::Mysql.has_transactional_ddl());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(DbType::Postgres.placeholder(3, "BIGINT"), "$3::BIGINT");
        assert_eq!(
            DbType::Postgres.placeholder(1, "character varying(10)"),
            "$1::character varying(10)"
        );
        assert_eq!(DbType::Mysql.placeholder(3, "BIGINT"), "?");
        assert_eq!(DbType::Sqlite.placeholder(3, "TEXT"), "?");
        assert_eq!(DbType::Sqlite.bare_placeholder(1), "?");
    }

    #[test]
    fn test_parameter_ceilings() {
        assert_eq!(
            DbType::Sqlite.max_parameters(Some((3, 31, 1))),
            Some(SQLITE_LEGACY_MAX_PARAMETERS)
        );
        assert_eq!(
            DbType::Sqlite.max_parameters(Some((3, 45, 0))),
            Some(SQLITE_MAX_PARAMETERS)
        );
        assert_eq!(DbType::Postgres.max_parameters(None), Some(65535));
        assert_eq!(DbType::Other.max_parameters(None), None);
    }

    #[test]
    fn test_create_table_sql() {
        let op = DdlOperation::CreateTable {
            schema: Some("s".to_string()),
            name: "t".to_string(),
            columns: vec![
                ColumnSchema::new("id", SqlType::BigInt).primary_key(),
                ColumnSchema::new("name", SqlType::Text),
            ],
            primary_key: vec!["id".to_string()],
        };
        assert_eq!(
            DbType::Postgres.generate_sql(&op),
            "CREATE TABLE IF NOT EXISTS \"s\".\"t\" (\n  \"id\" BIGINT NOT NULL,\n  \
             \"name\" TEXT,\n  PRIMARY KEY (\"id\")\n)"
        );
    }

    #[test]
    fn test_alter_column_type_sql() {
        let op = DdlOperation::AlterColumnType {
            schema: Some("public".to_string()),
            table: "t".to_string(),
            column: "x".to_string(),
            sql_type: SqlType::BigInt,
        };
        assert_eq!(
            DbType::Postgres.generate_sql(&op),
            "ALTER TABLE \"public\".\"t\" ALTER COLUMN \"x\" TYPE BIGINT USING \"x\"::BIGINT"
        );

        let op = DdlOperation::AlterColumnType {
            schema: None,
            table: "t".to_string(),
            column: "x".to_string(),
            sql_type: SqlType::BigInt,
        };
        assert_eq!(
            DbType::Mysql.generate_sql(&op),
            "ALTER TABLE `t` MODIFY `x` BIGINT"
        );
    }

    #[test]
    fn test_add_column_sql() {
        let op = DdlOperation::AddColumn {
            schema: None,
            table: "t".to_string(),
            column: ColumnSchema::new("note", SqlType::Text),
        };
        assert_eq!(
            DbType::Sqlite.generate_sql(&op),
            "ALTER TABLE \"t\" ADD COLUMN \"note\" TEXT"
        );
    }
}
