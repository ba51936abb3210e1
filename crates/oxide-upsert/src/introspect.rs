//! Live catalog queries.
//!
//! Each query is spelled per dialect. Catalog identifiers are cast to text
//! (`::text` on Postgres, `CAST(.. AS CHAR)` on MySQL) because the `Any`
//! driver only decodes plain scalar types, and existence checks select a
//! constant so nothing has to be decoded at all.

use sqlx::AnyConnection;
use tracing::debug;

use crate::dialect::DbType;
use crate::error::{Result, UpsertError};
use crate::schema::SqlType;

/// A column of a live table.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveColumn {
    /// Column name.
    pub name: String,
    /// Type name as reported by the database.
    pub type_name: String,
    /// Parsed type.
    pub sql_type: SqlType,
}

/// Checks whether a schema exists. Only meaningful for dialects with schemas.
pub async fn schema_exists(conn: &mut AnyConnection, db_type: DbType, schema: &str) -> Result<bool> {
    if !db_type.supports_schemas() {
        return Err(UpsertError::HasNoSchemaSystem {
            dialect: db_type.name(),
        });
    }
    let sql = format!(
        "SELECT 1 FROM information_schema.schemata WHERE schema_name = {}",
        db_type.bare_placeholder(1)
    );
    debug!(sql = %sql, "Checking schema existence");
    let row = sqlx::query(&sql)
        .bind(schema.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Checks whether a table exists.
///
/// For unrecognized dialects a table counts as missing when no column can
/// be read for it, since some drivers report zero columns instead of failing.
pub async fn table_exists(
    conn: &mut AnyConnection,
    db_type: DbType,
    schema: Option<&str>,
    table: &str,
) -> Result<bool> {
    let sql = match db_type {
        DbType::Sqlite => {
            let master = match schema {
                Some(s) => format!("{}.sqlite_master", db_type.quote_identifier(s)),
                None => "sqlite_master".to_string(),
            };
            format!("SELECT 1 FROM {master} WHERE type = 'table' AND name = ?")
        }
        DbType::Postgres => "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = COALESCE($1::text, current_schema()::text) \
             AND table_name = $2"
            .to_string(),
        DbType::Mysql => "SELECT 1 FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?"
            .to_string(),
        DbType::Other => {
            let columns = get_columns(conn, db_type, schema, table).await?;
            return Ok(!columns.is_empty());
        }
    };
    debug!(sql = %sql, "Checking table existence");

    let mut query = sqlx::query(&sql);
    if db_type != DbType::Sqlite {
        query = query.bind(schema.map(str::to_string));
    }
    let row = query
        .bind(table.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Reads the columns of a table, in table order. Empty if the table is missing.
///
/// On Postgres the type name is the full `format_type` spelling (with
/// modifiers, and schema-qualified for types outside the search path), so
/// it can be used as a cast target as is.
pub async fn get_columns(
    conn: &mut AnyConnection,
    db_type: DbType,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<LiveColumn>> {
    let sql = match (db_type, schema) {
        (DbType::Sqlite, None) => "SELECT name, type FROM pragma_table_info(?)".to_string(),
        (DbType::Sqlite, Some(_)) => "SELECT name, type FROM pragma_table_info(?, ?)".to_string(),
        (DbType::Postgres, _) => "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod) \
             FROM pg_catalog.pg_attribute a \
             JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relname = $1 \
             AND n.nspname = COALESCE($2::text, current_schema()::text) \
             AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum"
            .to_string(),
        (DbType::Mysql, _) => "SELECT CAST(COLUMN_NAME AS CHAR(255)), CAST(COLUMN_TYPE AS CHAR(255)) \
             FROM information_schema.COLUMNS \
             WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE()) \
             ORDER BY ORDINAL_POSITION"
            .to_string(),
        (DbType::Other, None) => "SELECT column_name, data_type \
             FROM information_schema.columns WHERE table_name = ? \
             ORDER BY ordinal_position"
            .to_string(),
        (DbType::Other, Some(_)) => "SELECT column_name, data_type \
             FROM information_schema.columns WHERE table_name = ? AND table_schema = ? \
             ORDER BY ordinal_position"
            .to_string(),
    };
    debug!(sql = %sql, "Reading table columns");

    let mut query = sqlx::query_as::<_, (String, String)>(&sql).bind(table.to_string());
    match db_type {
        DbType::Postgres | DbType::Mysql => query = query.bind(schema.map(str::to_string)),
        DbType::Sqlite | DbType::Other => {
            if let Some(schema) = schema {
                query = query.bind(schema.to_string());
            }
        }
    }
    let rows = query.fetch_all(&mut *conn).await?;

    Ok(rows
        .into_iter()
        .map(|(name, type_name)| LiveColumn {
            sql_type: SqlType::from_db_name(&type_name),
            name,
            type_name,
        })
        .collect())
}

/// Returns true if the column holds no value other than NULL.
pub async fn column_is_empty(
    conn: &mut AnyConnection,
    db_type: DbType,
    schema: Option<&str>,
    table: &str,
    column: &str,
) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} IS NOT NULL LIMIT 1",
        db_type.qualified_name(schema, table),
        db_type.quote_identifier(column)
    );
    debug!(sql = %sql, "Checking whether column is empty");
    let row = sqlx::query(&sql).fetch_optional(&mut *conn).await?;
    Ok(row.is_none())
}

/// Version of the SQLite library behind the connection, if it can be parsed.
pub async fn sqlite_version(conn: &mut AnyConnection) -> Result<Option<(u32, u32, u32)>> {
    let version: String = sqlx::query_scalar("SELECT sqlite_version()")
        .fetch_one(&mut *conn)
        .await?;
    Ok(parse_version(&version))
}

fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.trim().split('.').map(str::parse::<u32>);
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let patch = parts.next().and_then(std::result::Result::ok).unwrap_or(0);
    Some((major, minor, patch))
}
