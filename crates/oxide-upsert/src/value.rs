//! SQL values and row normalization.
//!
//! Frame cells are richer than what the `Any` driver can bind, so every cell
//! is converted to a [`SqlValue`] before a statement is compiled. Values are
//! always sent as parameters, never inlined into SQL text.

use sqlx::any::{Any, AnyArguments};
use sqlx::query::Query;
use tracing::warn;

use crate::dialect::DbType;
use crate::frame::{Frame, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMP_TZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// A value that can be bound as a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns true for NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Converts one cell into a bindable value for the given dialect.
///
/// Missing markers (`Null`, `NaN`) become NULL, temporal values become text
/// in a format every supported backend parses, intervals and structured
/// values are serialized to text. MySQL `DATETIME` has no offset, so
/// offset-aware timestamps are shifted to UTC for it.
#[must_use]
pub fn normalize(value: &Value, db_type: DbType) -> SqlValue {
    if value.is_missing() {
        return SqlValue::Null;
    }
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Int(i) => SqlValue::Int(*i),
        Value::Float(f) => SqlValue::Float(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Date(d) => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
        Value::Timestamp(ts) => SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
        Value::TimestampTz(ts) => match db_type {
            DbType::Mysql => SqlValue::Text(ts.naive_utc().format(TIMESTAMP_FORMAT).to_string()),
            _ => SqlValue::Text(ts.format(TIMESTAMP_TZ_FORMAT).to_string()),
        },
        Value::Interval(interval) => SqlValue::Text(interval.to_string()),
        Value::Json(json) => SqlValue::Text(json.to_string()),
    }
}

/// Normalizes every row of the frame, key levels first.
#[must_use]
pub fn normalize_rows(frame: &Frame, db_type: DbType) -> Vec<Vec<SqlValue>> {
    let has_intervals = frame
        .index()
        .iter()
        .chain(frame.columns())
        .any(|c| c.values().iter().any(|v| matches!(v, Value::Interval(_))));
    if has_intervals {
        warn!("Found interval values, they will be cast to text");
    }

    (0..frame.len())
        .map(|i| frame.row(i).map(|v| normalize(v, db_type)).collect())
        .collect()
}

/// Binds one value to an `Any` query.
pub(crate) fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: SqlValue,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    }
}
