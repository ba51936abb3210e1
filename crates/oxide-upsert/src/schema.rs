//! Table models built from frames.
//!
//! [`TableSchema::from_frame`] turns a [`Frame`] into the definition of the
//! SQL table it should be stored in: one column per key level and data column,
//! SQL types inferred from the cells (or overridden by the caller), and a
//! primary key made of the key levels. The same model is compared against
//! the live table when reconciling.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dialect::DbType;
use crate::error::{Result, UpsertError};
use crate::frame::{Column, Frame, Value};
use crate::operations::DdlOperation;

/// Characters some Postgres drivers cannot escape in identifiers.
pub const BAD_NAME_CHARS: [char; 3] = ['%', '(', ')'];

/// Matches length/precision modifiers such as `(50)` or `(10, 2)`.
static RE_TYPE_MODIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\(\s*\d+\s*(?:,\s*\d+\s*)?\)").expect("Invalid type modifier regex")
});

/// SQL data types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// Integer (32-bit).
    Integer,
    /// Big integer (64-bit).
    BigInt,
    /// Small integer (16-bit).
    SmallInt,
    /// Unbounded text.
    Text,
    /// Variable-length character string, with an optional max length.
    Varchar(Option<usize>),
    /// Fixed-length character string, with an optional length.
    Char(Option<usize>),
    /// Boolean.
    Boolean,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Timestamp without time zone.
    Timestamp,
    /// Timestamp with time zone.
    TimestampTz,
    /// Floating point (single precision).
    Real,
    /// Floating point (double precision).
    Double,
    /// Decimal with precision and scale.
    Decimal(u8, u8),
    /// Decimal without declared precision.
    Numeric,
    /// Binary large object.
    Blob,
    /// JSON data.
    Json,
    /// UUID.
    Uuid,
    /// Any other type, spelled as the database spells it.
    Custom(String),
}

impl SqlType {
    /// Returns the SQL type name for PostgreSQL.
    #[must_use]
    pub fn postgres_name(&self) -> String {
        match self {
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::SmallInt => "SMALLINT".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Varchar(Some(len)) => format!("VARCHAR({len})"),
            Self::Varchar(None) => "VARCHAR".to_string(),
            Self::Char(Some(len)) => format!("CHAR({len})"),
            Self::Char(None) => "CHAR".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Time => "TIME".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
            Self::TimestampTz => "TIMESTAMP WITH TIME ZONE".to_string(),
            Self::Real => "REAL".to_string(),
            Self::Double => "DOUBLE PRECISION".to_string(),
            Self::Decimal(p, s) => format!("NUMERIC({p}, {s})"),
            Self::Numeric => "NUMERIC".to_string(),
            Self::Blob => "BYTEA".to_string(),
            Self::Json => "JSON".to_string(),
            Self::Uuid => "UUID".to_string(),
            Self::Custom(name) => name.clone(),
        }
    }

    /// Returns the SQL type name for MySQL.
    #[must_use]
    pub fn mysql_name(&self) -> String {
        match self {
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::SmallInt => "SMALLINT".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Varchar(len) => format!("VARCHAR({})", len.unwrap_or(255)),
            Self::Char(len) => format!("CHAR({})", len.unwrap_or(1)),
            Self::Boolean => "BOOL".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Time => "TIME".to_string(),
            // DATETIME has no offset; aware values are shifted to UTC before binding.
            Self::Timestamp | Self::TimestampTz => "DATETIME".to_string(),
            Self::Real => "FLOAT".to_string(),
            Self::Double => "DOUBLE".to_string(),
            Self::Decimal(p, s) => format!("DECIMAL({p}, {s})"),
            Self::Numeric => "DECIMAL".to_string(),
            Self::Blob => "BLOB".to_string(),
            Self::Json => "JSON".to_string(),
            Self::Uuid => "CHAR(36)".to_string(),
            Self::Custom(name) => name.clone(),
        }
    }

    /// Returns the SQL type name for SQLite.
    #[must_use]
    pub fn sqlite_name(&self) -> String {
        match self {
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::SmallInt => "SMALLINT".to_string(),
            Self::Text | Self::Uuid => "TEXT".to_string(),
            Self::Varchar(Some(len)) => format!("VARCHAR({len})"),
            Self::Varchar(None) => "VARCHAR".to_string(),
            Self::Char(Some(len)) => format!("CHAR({len})"),
            Self::Char(None) => "CHAR".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Time => "TIME".to_string(),
            Self::Timestamp | Self::TimestampTz => "DATETIME".to_string(),
            Self::Real => "REAL".to_string(),
            Self::Double => "FLOAT".to_string(),
            Self::Decimal(p, s) => format!("NUMERIC({p}, {s})"),
            Self::Numeric => "NUMERIC".to_string(),
            Self::Blob => "BLOB".to_string(),
            Self::Json => "JSON".to_string(),
            Self::Custom(name) => name.clone(),
        }
    }

    /// Returns the SQL type name for unrecognized databases (standard SQL).
    #[must_use]
    pub fn generic_name(&self) -> String {
        match self {
            Self::Timestamp => "TIMESTAMP".to_string(),
            Self::Blob => "BLOB".to_string(),
            other => other.postgres_name(),
        }
    }

    /// Parses a type name as reported by a database catalog.
    ///
    /// Unknown names are kept verbatim (upper-cased) as [`SqlType::Custom`].
    #[must_use]
    pub fn from_db_name(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        let (base, args) = match upper.find('(') {
            Some(open) => {
                let close = upper[open..].find(')').map_or(upper.len(), |c| open + c);
                let rest = upper.get(close + 1..).unwrap_or_default().trim();
                // `timestamp(3) with time zone`
                let base = if rest.starts_with("WITH") {
                    format!("{} {rest}", upper[..open].trim())
                } else {
                    upper[..open].trim().to_string()
                };
                (base, upper[open + 1..close].trim())
            }
            None => (upper.clone(), ""),
        };
        let length = args.parse::<usize>().ok();

        match base.as_str() {
            "SMALLINT" | "INT2" | "SMALLSERIAL" => Self::SmallInt,
            "TINYINT" if args == "1" => Self::Boolean,
            "TINYINT" => Self::SmallInt,
            "INTEGER" | "INT" | "INT4" | "MEDIUMINT" | "SERIAL" => Self::Integer,
            "BIGINT" | "INT8" | "BIGSERIAL" => Self::BigInt,
            "BOOLEAN" | "BOOL" => Self::Boolean,
            "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "CLOB" => Self::Text,
            "VARCHAR" | "CHARACTER VARYING" | "NVARCHAR" => Self::Varchar(length),
            "CHAR" | "CHARACTER" | "BPCHAR" | "NCHAR" => Self::Char(length),
            "DATE" => Self::Date,
            "TIME" | "TIME WITHOUT TIME ZONE" => Self::Time,
            "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" | "DATETIME" => Self::Timestamp,
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => Self::TimestampTz,
            "REAL" | "FLOAT4" => Self::Real,
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" | "FLOAT" => Self::Double,
            "NUMERIC" | "DECIMAL" => match args.split_once(',') {
                Some((p, s)) => match (p.trim().parse(), s.trim().parse()) {
                    (Ok(p), Ok(s)) => Self::Decimal(p, s),
                    _ => Self::Numeric,
                },
                None => Self::Numeric,
            },
            "BLOB" | "BYTEA" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY"
            | "VARBINARY" => Self::Blob,
            "JSON" | "JSONB" => Self::Json,
            "UUID" => Self::Uuid,
            _ => Self::Custom(upper.clone()),
        }
    }

    /// Type name for `db_type` without length or precision modifiers.
    #[must_use]
    pub fn base_name(&self, db_type: DbType) -> String {
        RE_TYPE_MODIFIER
            .replace_all(&db_type.type_name(self), "")
            .trim()
            .to_string()
    }
}

impl FromStr for SqlType {
    type Err = UpsertError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(UpsertError::InvalidArgument(
                "SQL type name cannot be empty".to_string(),
            ));
        }
        Ok(Self::from_db_name(s))
    }
}

/// Returns whether a live column type and an incoming type are the same.
///
/// Types are compared on their base name for the dialect, so `VARCHAR(50)`
/// equals `VARCHAR`. A live JSON column accepts incoming text since some
/// databases degrade JSON to text.
#[must_use]
pub fn types_match(live: &SqlType, incoming: &SqlType, db_type: DbType) -> bool {
    let live = live.base_name(db_type);
    let incoming = incoming.base_name(db_type);
    live == incoming || (live == "JSON" && incoming == "TEXT")
}

/// Where a column's SQL type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TypeOrigin {
    /// Inferred from the cell values.
    #[default]
    Inferred,
    /// Every present value is a list or a mapping.
    Json,
    /// Given by the caller.
    Override,
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// SQL data type.
    pub sql_type: SqlType,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Whether this column is part of the primary key.
    pub primary_key: bool,
    /// Whether this column auto-increments.
    pub auto_increment: bool,
    /// How the type was chosen.
    pub origin: TypeOrigin,
}

impl ColumnSchema {
    /// Creates a new column schema.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            origin: TypeOrigin::Inferred,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the column as part of the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false; // Primary keys are always NOT NULL
        self.auto_increment = false;
        self
    }

    /// Records where the type came from.
    #[must_use]
    pub fn origin(mut self, origin: TypeOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Complete schema definition for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Schema (namespace) of the table.
    pub schema: Option<String>,
    /// Column definitions, key levels first.
    pub columns: Vec<ColumnSchema>,
    /// Primary key column(s).
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Creates a new table schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Sets the schema (namespace).
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        if column.primary_key && !self.primary_key.contains(&column.name) {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    /// Builds the model of the table a frame should be stored in.
    ///
    /// Validates the frame first (see [`validate_frame`]). On Postgres the
    /// schema defaults to `public`. Entries of `overrides` take precedence
    /// over inferred types, including for key levels.
    pub fn from_frame(
        frame: &Frame,
        table_name: &str,
        schema: Option<&str>,
        db_type: DbType,
        overrides: &BTreeMap<String, SqlType>,
    ) -> Result<Self> {
        validate_frame(frame, db_type)?;

        let mut table = Self::new(table_name);
        table.schema = schema
            .or_else(|| db_type.default_schema())
            .map(str::to_string);

        for (position, level) in frame.index().iter().enumerate() {
            let name = level.name().ok_or_else(|| UpsertError::UnnamedIndexLevels {
                positions: vec![position],
            })?;
            let (sql_type, origin) = column_type(name, level, overrides);
            table = table.column(ColumnSchema::new(name, sql_type).origin(origin).primary_key());
        }
        for column in frame.columns() {
            let Some(name) = column.name() else { continue };
            let (sql_type, origin) = column_type(name, column, overrides);
            table = table.column(ColumnSchema::new(name, sql_type).origin(origin));
        }
        Ok(table)
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns that are not part of the primary key.
    pub fn non_key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| !c.primary_key)
    }

    /// Names of the columns stored as JSON because of their content.
    #[must_use]
    pub fn json_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.origin == TypeOrigin::Json)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Quoted, schema-qualified name for `db_type`.
    #[must_use]
    pub fn qualified_name(&self, db_type: DbType) -> String {
        db_type.qualified_name(self.schema.as_deref(), &self.name)
    }

    /// The `CREATE TABLE` statement for this model.
    #[must_use]
    pub fn create_table_sql(&self, db_type: DbType) -> String {
        db_type.generate_sql(&DdlOperation::create_table(self))
    }
}

/// Checks the invariants a frame must satisfy to be upserted.
///
/// Runs before any database access: every key level is named, key values are
/// unique, no label is used twice and, on Postgres, no label contains `%`,
/// `(` or `)`.
pub fn validate_frame(frame: &Frame, db_type: DbType) -> Result<()> {
    let unnamed: Vec<usize> = frame
        .index_names()
        .iter()
        .enumerate()
        .filter(|(_, name)| name.is_none())
        .map(|(i, _)| i)
        .collect();
    if !unnamed.is_empty() {
        return Err(UpsertError::UnnamedIndexLevels { positions: unnamed });
    }

    let duplicated = frame.duplicated_index();
    if !duplicated.is_empty() {
        return Err(UpsertError::DuplicateValuesInIndex { rows: duplicated });
    }

    let labels = frame.duplicated_labels();
    if !labels.is_empty() {
        return Err(UpsertError::DuplicateLabels { labels });
    }

    if db_type == DbType::Postgres {
        let names: Vec<String> = frame
            .labels()
            .filter(|name| name.contains(BAD_NAME_CHARS))
            .map(str::to_string)
            .collect();
        if !names.is_empty() {
            return Err(UpsertError::BadColumnNames { names });
        }
    }
    Ok(())
}

fn column_type(
    name: &str,
    column: &Column,
    overrides: &BTreeMap<String, SqlType>,
) -> (SqlType, TypeOrigin) {
    if let Some(sql_type) = overrides.get(name) {
        (sql_type.clone(), TypeOrigin::Override)
    } else if column.is_json() {
        (SqlType::Json, TypeOrigin::Json)
    } else {
        (infer_sql_type(column), TypeOrigin::Inferred)
    }
}

/// Infers the SQL type of a column from its present (non-missing) values.
///
/// Integers mixed with floats widen to `Double`; any other mix, and columns
/// with no present value at all, fall back to `Text`.
#[must_use]
pub fn infer_sql_type(column: &Column) -> SqlType {
    let present: Vec<&Value> = column.values().iter().filter(|v| !v.is_missing()).collect();
    let all = |f: fn(&Value) -> bool| !present.is_empty() && present.iter().all(|v| f(v));

    if all(|v| matches!(v, Value::Bool(_))) {
        SqlType::Boolean
    } else if all(|v| matches!(v, Value::Int(_))) {
        SqlType::BigInt
    } else if all(|v| matches!(v, Value::Int(_) | Value::Float(_))) {
        SqlType::Double
    } else if all(|v| matches!(v, Value::Timestamp(_))) {
        SqlType::Timestamp
    } else if all(|v| matches!(v, Value::TimestampTz(_))) {
        SqlType::TimestampTz
    } else if all(|v| matches!(v, Value::Date(_))) {
        SqlType::Date
    } else if all(|v| matches!(v, Value::Bytes(_))) {
        SqlType::Blob
    } else if all(Value::is_list_like) {
        SqlType::Json
    } else {
        SqlType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn frame() -> Frame {
        Frame::new(
            vec![Column::new("profileid", [1_i64, 2])],
            vec![
                Column::new("email", ["a@x.org", "b@x.org"]),
                Column::new("score", [Value::Int(1), Value::Float(2.5)]),
                Column::new("likes", [json!(["a"]), json!({"b": 1})]),
                Column::new("empty", [Value::Null, Value::Float(f64::NAN)]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_column_schema_builder() {
        let col = ColumnSchema::new("id", SqlType::BigInt).primary_key();

        assert_eq!(col.name, "id");
        assert!(col.primary_key);
        assert!(!col.auto_increment);
        assert!(!col.nullable); // Primary keys are NOT NULL
    }

    #[test]
    fn test_from_frame() {
        let table = TableSchema::from_frame(
            &frame(),
            "users",
            None,
            DbType::Postgres,
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(table.schema.as_deref(), Some("public"));
        assert_eq!(table.primary_key, vec!["profileid"]);
        let types: Vec<&SqlType> = table.columns.iter().map(|c| &c.sql_type).collect();
        assert_eq!(
            types,
            vec![
                &SqlType::BigInt,
                &SqlType::Text,
                &SqlType::Double,
                &SqlType::Json,
                &SqlType::Text
            ]
        );
        assert_eq!(table.json_columns(), vec!["likes"]);
        assert_eq!(table.non_key_columns().count(), 4);
    }

    #[test]
    fn test_schema_left_unset_outside_postgres() {
        let table =
            TableSchema::from_frame(&frame(), "users", None, DbType::Sqlite, &BTreeMap::new())
                .unwrap();
        assert_eq!(table.schema, None);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = BTreeMap::from([
            ("profileid".to_string(), SqlType::Varchar(Some(50))),
            ("likes".to_string(), SqlType::Text),
        ]);
        let table =
            TableSchema::from_frame(&frame(), "users", None, DbType::Mysql, &overrides).unwrap();

        let key = table.get_column("profileid").unwrap();
        assert_eq!(key.sql_type, SqlType::Varchar(Some(50)));
        assert_eq!(key.origin, TypeOrigin::Override);
        assert!(key.primary_key);
        assert!(table.json_columns().is_empty());
    }

    #[test]
    fn test_infer_sql_type() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(
            infer_sql_type(&Column::new("x", [true, false])),
            SqlType::Boolean
        );
        assert_eq!(
            infer_sql_type(&Column::new("x", [Value::Date(date), Value::Null])),
            SqlType::Date
        );
        assert_eq!(
            infer_sql_type(&Column::new("x", [Value::Int(1), Value::Text("a".into())])),
            SqlType::Text
        );
    }

    #[test]
    fn test_validation_order_and_errors() {
        let unnamed = Frame::new(vec![Column::unnamed([1_i64])], vec![]).unwrap();
        assert!(matches!(
            validate_frame(&unnamed, DbType::Sqlite),
            Err(UpsertError::UnnamedIndexLevels { positions }) if positions == vec![0]
        ));

        let dup_keys = Frame::new(vec![Column::new("id", [1_i64, 1])], vec![]).unwrap();
        let err = validate_frame(&dup_keys, DbType::Sqlite).unwrap_err();
        assert!(err.to_string().contains("duplicated_index()"));

        let bad = Frame::new(
            vec![Column::new("id", [1_i64])],
            vec![Column::new("total (%)", [1_i64])],
        )
        .unwrap();
        assert!(validate_frame(&bad, DbType::Sqlite).is_ok());
        assert!(matches!(
            validate_frame(&bad, DbType::Postgres),
            Err(UpsertError::BadColumnNames { names }) if names == vec!["total (%)".to_string()]
        ));
    }

    #[test]
    fn test_parse_db_names() {
        assert_eq!(
            SqlType::from_db_name("character varying"),
            SqlType::Varchar(None)
        );
        assert_eq!(SqlType::from_db_name("varchar(50)"), SqlType::Varchar(Some(50)));
        assert_eq!(SqlType::from_db_name("tinyint(1)"), SqlType::Boolean);
        assert_eq!(
            SqlType::from_db_name("timestamp without time zone"),
            SqlType::Timestamp
        );
        assert_eq!(
            SqlType::from_db_name("timestamp(3) with time zone"),
            SqlType::TimestampTz
        );
        assert_eq!(
            SqlType::from_db_name("character varying(10)"),
            SqlType::Varchar(Some(10))
        );
        assert_eq!(SqlType::from_db_name("bigint(20) unsigned"), SqlType::BigInt);
        assert_eq!(SqlType::from_db_name("decimal(10,2)"), SqlType::Decimal(10, 2));
        assert_eq!(
            SqlType::from_db_name("geometry"),
            SqlType::Custom("GEOMETRY".to_string())
        );
        assert!("  ".parse::<SqlType>().is_err());
    }

    #[test]
    fn test_types_match_ignores_modifiers() {
        assert!(types_match(
            &SqlType::Varchar(Some(50)),
            &SqlType::Varchar(None),
            DbType::Postgres
        ));
        assert!(types_match(
            &SqlType::from_db_name("jsonb"),
            &SqlType::Text,
            DbType::Postgres
        ));
        assert!(!types_match(&SqlType::Text, &SqlType::BigInt, DbType::Sqlite));
        assert!(types_match(
            &SqlType::from_db_name("datetime"),
            &SqlType::TimestampTz,
            DbType::Mysql
        ));
    }
}
