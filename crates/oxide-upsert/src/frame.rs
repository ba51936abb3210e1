//! In-memory labeled tables.
//!
//! A [`Frame`] is an ordered set of named columns plus a named, possibly
//! composite, key (the "index"). The key becomes the primary key of the SQL
//! table, so every key level has to be named and key values have to be unique
//! before anything is sent to the database.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, UpsertError};

/// Which ends of an [`Interval`] are closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Closed {
    /// `(left, right]`
    #[default]
    Right,
    /// `[left, right)`
    Left,
    /// `[left, right]`
    Both,
    /// `(left, right)`
    Neither,
}

/// A numeric interval cell. Stored as text in SQL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    /// Left bound.
    pub left: f64,
    /// Right bound.
    pub right: f64,
    /// Closed side(s).
    pub closed: Closed,
}

impl Interval {
    /// Creates a right-closed interval `(left, right]`.
    #[must_use]
    pub fn new(left: f64, right: f64) -> Self {
        Self {
            left,
            right,
            closed: Closed::Right,
        }
    }

    /// Sets the closed side(s).
    #[must_use]
    pub fn closed(mut self, closed: Closed) -> Self {
        self.closed = closed;
        self
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = match self.closed {
            Closed::Right => ('(', ']'),
            Closed::Left => ('[', ')'),
            Closed::Both => ('[', ']'),
            Closed::Neither => ('(', ')'),
        };
        write!(f, "{open}{}, {}{close}", self.left, self.right)
    }
}

/// A single cell of a [`Frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double precision float. `NaN` counts as missing.
    Float(f64),
    /// Text.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Timestamp without time zone.
    Timestamp(NaiveDateTime),
    /// Timestamp with a UTC offset.
    TimestampTz(DateTime<FixedOffset>),
    /// Numeric interval.
    Interval(Interval),
    /// Structured value (list or mapping).
    Json(JsonValue),
}

impl Value {
    /// Returns whether the cell is a missing-value marker.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null | Self::Json(JsonValue::Null) => true,
            Self::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Returns whether the cell holds a list or a mapping.
    #[must_use]
    pub fn is_list_like(&self) -> bool {
        matches!(self, Self::Json(JsonValue::Array(_) | JsonValue::Object(_)))
    }

    /// Hashable representation used for key uniqueness checks.
    fn key_repr(&self) -> String {
        match self {
            Self::Float(f) => format!("Float({:?})", f.to_bits()),
            other => format!("{other:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Self::TimestampTz(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::TimestampTz(v.fixed_offset())
    }
}

impl From<Interval> for Value {
    fn from(v: Interval) -> Self {
        Self::Interval(v)
    }
}

impl From<JsonValue> for Value {
    /// Scalars become native cells; arrays and objects stay structured.
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            JsonValue::String(s) => Self::Text(s),
            structured => Self::Json(structured),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A named sequence of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: Option<String>,
    values: Vec<Value>,
}

impl Column {
    /// Creates a named column.
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            name: Some(name.into()),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a column without a name. Only valid as a key level, and
    /// rejected when upserting.
    pub fn unnamed<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            name: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Cells of the column.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the column has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns true if at least one cell is not missing.
    #[must_use]
    pub fn has_values(&self) -> bool {
        self.values.iter().any(|v| !v.is_missing())
    }

    /// Returns true if the column has values and every non-missing one is a
    /// list or a mapping.
    #[must_use]
    pub fn is_json(&self) -> bool {
        let mut present = self.values.iter().filter(|v| !v.is_missing()).peekable();
        present.peek().is_some() && present.all(Value::is_list_like)
    }

    fn renamed(&self, name: Option<String>) -> Self {
        Self {
            name,
            values: self.values.clone(),
        }
    }
}

/// A labeled table: key levels plus columns, all of the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    index: Vec<Column>,
    columns: Vec<Column>,
    len: usize,
}

impl Frame {
    /// Creates a frame from key levels and columns.
    ///
    /// Key levels may be unnamed here (upserting such a frame fails later);
    /// data columns must be named.
    pub fn new(index: Vec<Column>, columns: Vec<Column>) -> Result<Self> {
        let Some(first) = index.first() else {
            return Err(UpsertError::InvalidArgument(
                "a frame needs at least one index level".to_string(),
            ));
        };
        let len = first.len();

        if let Some(col) = index.iter().chain(&columns).find(|c| c.len() != len) {
            return Err(UpsertError::InvalidArgument(format!(
                "all index levels and columns must have {len} values, {:?} has {}",
                col.name().unwrap_or("<unnamed>"),
                col.len()
            )));
        }
        if columns.iter().any(|c| c.name.is_none()) {
            return Err(UpsertError::InvalidArgument(
                "frame columns must be named".to_string(),
            ));
        }

        Ok(Self {
            index,
            columns,
            len,
        })
    }

    /// Builds a frame from JSON objects, using `index` as key levels.
    ///
    /// Columns appear in first-seen order; keys absent from a record become
    /// missing values.
    pub fn from_records(records: &[Map<String, JsonValue>], index: &[&str]) -> Result<Self> {
        let mut names: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = index.iter().copied().collect();
        for record in records {
            for key in record.keys() {
                if seen.insert(key.as_str()) {
                    names.push(key.as_str());
                }
            }
        }

        let build = |name: &str| {
            Column::new(
                name,
                records
                    .iter()
                    .map(|r| r.get(name).cloned().map_or(Value::Null, Value::from)),
            )
        };

        Self::new(
            index.iter().map(|&n| build(n)).collect(),
            names.into_iter().map(build).collect(),
        )
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the frame has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Key levels, in order.
    #[must_use]
    pub fn index(&self) -> &[Column] {
        &self.index
    }

    /// Data columns, in order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Names of the key levels (`None` for unnamed levels).
    #[must_use]
    pub fn index_names(&self) -> Vec<Option<&str>> {
        self.index.iter().map(Column::name).collect()
    }

    /// Names of the data columns.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().filter_map(Column::name).collect()
    }

    /// Every named label: key levels first, then columns.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.index
            .iter()
            .chain(&self.columns)
            .filter_map(Column::name)
    }

    /// Number of values per row (key levels plus columns).
    #[must_use]
    pub fn width(&self) -> usize {
        self.index.len() + self.columns.len()
    }

    /// Looks up a key level or column by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.index
            .iter()
            .chain(&self.columns)
            .find(|c| c.name() == Some(name))
    }

    /// Returns true if `name` is a key level.
    #[must_use]
    pub fn is_index_level(&self, name: &str) -> bool {
        self.index.iter().any(|c| c.name() == Some(name))
    }

    /// Cells of row `i`, key levels first.
    pub fn row(&self, i: usize) -> impl Iterator<Item = &Value> {
        self.index
            .iter()
            .chain(&self.columns)
            .map(move |c| &c.values[i])
    }

    /// Positions of every row whose key occurs more than once.
    #[must_use]
    pub fn duplicated_index(&self) -> Vec<usize> {
        let keys: Vec<String> = (0..self.len)
            .map(|i| {
                self.index
                    .iter()
                    .map(|c| c.values[i].key_repr())
                    .collect::<Vec<_>>()
                    .join("\u{1f}")
            })
            .collect();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for key in &keys {
            *counts.entry(key.as_str()).or_default() += 1;
        }
        keys.iter()
            .enumerate()
            .filter(|(_, k)| counts[k.as_str()] > 1)
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns true if no key occurs twice.
    #[must_use]
    pub fn has_unique_index(&self) -> bool {
        self.duplicated_index().is_empty()
    }

    /// Labels occurring more than once across key levels and columns.
    #[must_use]
    pub fn duplicated_labels(&self) -> Vec<String> {
        let labels: Vec<&str> = self.labels().collect();
        let mut dups: Vec<String> = Vec::new();
        for label in &labels {
            if labels.iter().filter(|l| *l == label).count() > 1
                && !dups.iter().any(|d| d == label)
            {
                dups.push((*label).to_string());
            }
        }
        dups
    }

    /// Returns a copy with every label passed through `rename`.
    #[must_use]
    pub fn rename_labels(&self, rename: impl Fn(&str) -> String) -> Self {
        let apply = |c: &Column| c.renamed(c.name().map(&rename));
        Self {
            index: self.index.iter().map(apply).collect(),
            columns: self.columns.iter().map(apply).collect(),
            len: self.len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Frame {
        Frame::new(
            vec![Column::new("id", [0_i64, 1, 2])],
            vec![
                Column::new("name", ["Foo", "Bar", "Baz"]),
                Column::new("tags", [json!(["a"]), JsonValue::Null, json!({"k": 1})]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_frame_shape() {
        let frame = people();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.index_names(), vec![Some("id")]);
        assert_eq!(frame.column_names(), vec!["name", "tags"]);
        let row: Vec<&Value> = frame.row(1).collect();
        assert_eq!(row[0], &Value::Int(1));
        assert_eq!(row[1], &Value::Text("Bar".to_string()));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let result = Frame::new(
            vec![Column::new("id", [0_i64, 1])],
            vec![Column::new("name", ["only one"])],
        );
        assert!(matches!(result, Err(UpsertError::InvalidArgument(_))));
    }

    #[test]
    fn test_missing_values() {
        assert!(Value::Null.is_missing());
        assert!(Value::Float(f64::NAN).is_missing());
        assert!(!Value::Float(1.5).is_missing());
        assert!(!Value::Text(String::new()).is_missing());
    }

    #[test]
    fn test_json_detection_ignores_missing() {
        let frame = people();
        assert!(frame.get("tags").unwrap().is_json());
        assert!(!frame.get("name").unwrap().is_json());

        let all_null = Column::new("x", [Value::Null, Value::Null]);
        assert!(!all_null.is_json());

        let mixed = Column::new("x", [Value::Json(json!([1])), Value::Int(1)]);
        assert!(!mixed.is_json());
    }

    #[test]
    fn test_duplicated_index_keeps_all_occurrences() {
        let frame = Frame::new(
            vec![
                Column::new("a", [1_i64, 1, 2, 1]),
                Column::new("b", ["x", "y", "x", "x"]),
            ],
            vec![],
        )
        .unwrap();
        assert_eq!(frame.duplicated_index(), vec![0, 3]);
        assert!(!frame.has_unique_index());
    }

    #[test]
    fn test_duplicated_labels() {
        let frame = Frame::new(
            vec![Column::new("id", [1_i64])],
            vec![Column::new("id", [2_i64]), Column::new("x", [3_i64])],
        )
        .unwrap();
        assert_eq!(frame.duplicated_labels(), vec!["id".to_string()]);
    }

    #[test]
    fn test_from_records() {
        let records: Vec<Map<String, JsonValue>> = vec![
            json!({"id": 1, "name": "Foo", "score": 1.5}),
            json!({"id": 2, "tags": ["a", "b"]}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

        let frame = Frame::from_records(&records, &["id"]).unwrap();
        assert_eq!(frame.column_names(), vec!["name", "score", "tags"]);
        assert_eq!(frame.get("name").unwrap().values()[1], Value::Null);
        assert_eq!(frame.get("score").unwrap().values()[0], Value::Float(1.5));
        assert!(frame.get("tags").unwrap().is_json());
    }

    #[test]
    fn test_interval_display() {
        assert_eq!(Interval::new(0.0, 5.0).to_string(), "(0, 5]");
        assert_eq!(
            Interval::new(1.5, 2.0).closed(Closed::Both).to_string(),
            "[1.5, 2]"
        );
    }
}
