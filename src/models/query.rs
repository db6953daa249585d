//! Query-related data models.
//!
//! This module defines parameter values, the option bag accepted by access
//! points, and the outcome record of mutations.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Default page size when pagination is requested without one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// One result row, column name to value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Named parameters for a query template.
pub type Params = BTreeMap<String, QueryParam>;

/// A parameter value for `[[name:type]]` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// Expands to one marker per element.
    List(Vec<QueryParam>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
        }
    }

    /// Parse a CLI-style `value` into the narrowest parameter type.
    pub fn parse_loose(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("null") {
            Self::Null
        } else if let Ok(i) = raw.parse::<i64>() {
            Self::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            Self::Float(f)
        } else {
            Self::String(raw.to_string())
        }
    }
}

impl From<JsonValue> for QueryParam {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            other => Self::String(other.to_string()),
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl<T: Into<QueryParam>> From<Vec<T>> for QueryParam {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// How an access point executes a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Reader with the out-of-band total count.
    Reader,
    /// Reader without the count query.
    #[default]
    BigData,
    /// Mutation returning a [`QueryInfo`].
    NonInfo,
}

impl std::str::FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reader" => Ok(Self::Reader),
            "bigdata" => Ok(Self::BigData),
            "noninfo" => Ok(Self::NonInfo),
            other => Err(format!("unknown query type '{other}'")),
        }
    }
}

/// Option bag accepted by `DataAccessPoint::query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOptions {
    /// 1-based page; 0 disables pagination.
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub pagesize: u32,
    #[serde(default)]
    pub params: Option<Params>,
    #[serde(default, rename = "type")]
    pub query_type: QueryType,
    #[serde(default)]
    pub returning: Option<String>,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page: 0,
            pagesize: DEFAULT_PAGE_SIZE,
            params: None,
            query_type: QueryType::default(),
            returning: None,
        }
    }
}

impl QueryOptions {
    /// Options for a reader that also fetches the total row count.
    pub fn reader() -> Self {
        Self::default().with_type(QueryType::Reader)
    }

    /// Options for a mutation.
    pub fn non_info() -> Self {
        Self::default().with_type(QueryType::NonInfo)
    }

    /// Set the execution type.
    pub fn with_type(mut self, query_type: QueryType) -> Self {
        self.query_type = query_type;
        self
    }

    /// Set the pagination window.
    pub fn with_page(mut self, page: u32, pagesize: u32) -> Self {
        self.page = page;
        self.pagesize = pagesize;
        self
    }

    /// Add a named parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.params
            .get_or_insert_with(Params::new)
            .insert(name.into(), value.into());
        self
    }

    /// Replace the parameter map.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Request a `RETURNING` column for mutations.
    pub fn with_returning(mut self, field: impl Into<String>) -> Self {
        self.returning = Some(field.into());
        self
    }
}

/// Kind of statement a query text represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
    Truncate,
    Ddl,
    Transaction,
    Other,
}

impl StatementType {
    /// Whether the statement produces a result set.
    pub fn returns_rows(&self) -> bool {
        matches!(self, Self::Select)
    }
}

impl std::fmt::Display for StatementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Upsert => "upsert",
            Self::Truncate => "truncate",
            Self::Ddl => "ddl",
            Self::Transaction => "transaction",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Outcome of a mutation.
///
/// A failed mutation always has a non-empty `error` and `affected == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInfo {
    #[serde(rename = "type")]
    pub statement_type: StatementType,
    #[serde(rename = "insertid")]
    pub insert_id: Option<i64>,
    pub affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub returned: Vec<JsonValue>,
}

impl QueryInfo {
    /// Create a successful outcome.
    pub fn success(
        statement_type: StatementType,
        query: impl Into<String>,
        affected: u64,
        insert_id: Option<i64>,
    ) -> Self {
        Self {
            statement_type,
            insert_id,
            affected,
            error: None,
            query: query.into(),
            returned: Vec::new(),
        }
    }

    /// Create a failed outcome carrying the error text.
    pub fn failed(
        statement_type: StatementType,
        query: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            statement_type,
            insert_id: None,
            affected: 0,
            error: Some(error),
            query: query.into(),
            returned: Vec::new(),
        }
    }

    /// Attach values collected from a `RETURNING` clause.
    pub fn with_returned(mut self, returned: Vec<JsonValue>) -> Self {
        self.returned = returned;
        self
    }

    /// Whether the mutation succeeded.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(QueryParam::from(vec![1i64, 2]).type_name(), "list");
    }

    #[test]
    fn test_query_param_from_json() {
        assert_eq!(QueryParam::from(json!(5)), QueryParam::Int(5));
        assert_eq!(QueryParam::from(json!(1.5)), QueryParam::Float(1.5));
        assert_eq!(
            QueryParam::from(json!([1, "a"])),
            QueryParam::List(vec![QueryParam::Int(1), QueryParam::String("a".into())])
        );
    }

    #[test]
    fn test_query_param_parse_loose() {
        assert_eq!(QueryParam::parse_loose("12"), QueryParam::Int(12));
        assert_eq!(QueryParam::parse_loose("1.25"), QueryParam::Float(1.25));
        assert_eq!(QueryParam::parse_loose("NULL"), QueryParam::Null);
        assert_eq!(
            QueryParam::parse_loose("abc"),
            QueryParam::String("abc".into())
        );
    }

    #[test]
    fn test_query_options_defaults() {
        let opts = QueryOptions::default();
        assert_eq!(opts.page, 0);
        assert_eq!(opts.pagesize, DEFAULT_PAGE_SIZE);
        assert_eq!(opts.query_type, QueryType::BigData);

        let parsed: QueryOptions = serde_json::from_value(json!({"type": "noninfo"})).unwrap();
        assert_eq!(parsed.query_type, QueryType::NonInfo);
        assert_eq!(parsed.pagesize, 10);
    }

    #[test]
    fn test_query_info_failed_has_zero_affected() {
        let info = QueryInfo::failed(StatementType::Insert, "insert into t", "boom");
        assert!(!info.is_ok());
        assert_eq!(info.affected, 0);
        assert_eq!(info.error.as_deref(), Some("boom"));

        let blank = QueryInfo::failed(StatementType::Other, "", "");
        assert!(!blank.error.unwrap().is_empty());
    }
}
