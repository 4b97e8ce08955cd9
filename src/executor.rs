//! Query executor collaborator contract.
//!
//! The engine hands [`InstanceQuery`] values to a caller-supplied
//! [`QueryExecutor`] and consumes the resulting row stream. The executor owns
//! the row-limit policy: when a query produces more rows than the configured
//! limit it terminates the stream with
//! [`HierarchyError::RowsLimitExceeded`](crate::error::HierarchyError::RowsLimitExceeded).

use std::fmt;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::HierarchyResult;

/// A query producing one hierarchy level's instance rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceQuery {
    /// Common table expressions prepended to the query, complete
    /// `name(cols) AS (...)` bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctes: Option<Vec<String>>,
    pub sql: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<QueryBinding>,
}

impl InstanceQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        InstanceQuery {
            ctes: None,
            sql: sql.into(),
            bindings: Vec::new(),
        }
    }

    pub fn with_bindings(mut self, bindings: Vec<QueryBinding>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_ctes(mut self, ctes: Vec<String>) -> Self {
        self.ctes = Some(ctes);
        self
    }
}

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum QueryBinding {
    Id(String),
    IdSet(Vec<String>),
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
}

/// Shape of the rows the executor returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowFormat {
    /// Rows keyed by selected column names. The built-in row reader
    /// requires this format.
    #[default]
    Names,
    /// Rows as positional arrays.
    Indexes,
}

/// Row count cap for one hierarchy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RowsLimit {
    #[default]
    Unbounded,
    Limited(u64),
}

impl fmt::Display for RowsLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowsLimit::Unbounded => write!(f, "unbounded"),
            RowsLimit::Limited(count) => write!(f, "{count}"),
        }
    }
}

/// Reader configuration handed to the executor alongside a query.
#[derive(Debug, Clone, Default)]
pub struct QueryReaderConfig {
    pub row_format: RowFormat,
    pub limit: RowsLimit,
}

impl QueryReaderConfig {
    pub fn limited(limit: RowsLimit) -> Self {
        QueryReaderConfig {
            row_format: RowFormat::Names,
            limit,
        }
    }
}

/// A single result row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub serde_json::Map<String, serde_json::Value>);

impl Row {
    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.0.get(column).filter(|value| !value.is_null())
    }

    /// String value of a column, if present and non-null.
    pub fn string(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(serde_json::Value::as_str)
    }

    /// Boolean value of a column. Accepts booleans and numbers (non-zero =
    /// true), the two shapes relational drivers produce for flag columns.
    pub fn flag(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            serde_json::Value::Bool(value) => Some(*value),
            serde_json::Value::Number(value) => Some(value.as_f64() != Some(0.0)),
            _ => None,
        }
    }

    /// JSON value of a column: either an inline object/array or a string
    /// containing serialized JSON.
    pub fn json(&self, column: &str) -> Option<serde_json::Value> {
        match self.get(column)? {
            serde_json::Value::String(raw) => serde_json::from_str(raw).ok(),
            value => Some(value.clone()),
        }
    }
}

impl<const N: usize> From<[(&str, serde_json::Value); N]> for Row {
    fn from(entries: [(&str, serde_json::Value); N]) -> Self {
        Row(entries
            .into_iter()
            .map(|(column, value)| (column.to_string(), value))
            .collect())
    }
}

/// Stream of rows produced by the executor for one query.
pub type RowStream = BoxStream<'static, HierarchyResult<Row>>;

/// Executes instance queries against the relational source.
pub trait QueryExecutor: Send + Sync {
    /// Create a cold row stream for the query. The stream must not touch the
    /// data source before it is first polled.
    fn create_query_reader(&self, query: InstanceQuery, config: QueryReaderConfig) -> RowStream;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_flag_accepts_numbers_and_bools() {
        let row = Row::from([("A", json!(1)), ("B", json!(false)), ("C", json!(0))]);
        assert_eq!(row.flag("A"), Some(true));
        assert_eq!(row.flag("B"), Some(false));
        assert_eq!(row.flag("C"), Some(false));
        assert_eq!(row.flag("missing"), None);
    }

    #[test]
    fn test_row_json_accepts_serialized_and_inline() {
        let row = Row::from([
            ("Inline", json!({"a": 1})),
            ("Serialized", json!(r#"{"a":1}"#)),
        ]);
        assert_eq!(row.json("Inline"), Some(json!({"a": 1})));
        assert_eq!(row.json("Serialized"), Some(json!({"a": 1})));
    }

    #[test]
    fn test_null_columns_read_as_absent() {
        let row = Row::from([("A", json!(null))]);
        assert_eq!(row.get("A"), None);
        assert_eq!(row.string("A"), None);
    }
}
