//! Filter vocabulary shared by the document stores.
//!
//! A filter set is a JSON object `{field: [type, operator, ...values]}` with
//! type ∈ {string, numeric, date, bool} and operator ∈ {=, !=, <, <=, >, >=,
//! between, in, like}. The operator may be omitted: strings then default to
//! a case-insensitive substring match, other types to equality.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    String,
    Numeric,
    Date,
    Bool,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Numeric => "numeric",
            Self::Date => "date",
            Self::Bool => "bool",
        }
    }
}

impl FromStr for FilterKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(Self::String),
            "numeric" | "number" | "int" | "integer" | "float" => Ok(Self::Numeric),
            "date" | "datetime" => Ok(Self::Date),
            "bool" | "boolean" => Ok(Self::Bool),
            other => Err(DbError::invalid_input(format!("unknown filter type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    In,
    Like,
}

impl FilterOp {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" => Some(Self::Eq),
            "!=" | "<>" | "ne" => Some(Self::Ne),
            "<" | "lt" => Some(Self::Lt),
            "<=" | "lte" => Some(Self::Le),
            ">" | "gt" => Some(Self::Gt),
            ">=" | "gte" => Some(Self::Ge),
            "between" => Some(Self::Between),
            "in" => Some(Self::In),
            "like" => Some(Self::Like),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Between => "between",
            Self::In => "in",
            Self::Like => "like",
        }
    }
}

/// A typed filter value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    Float(f64),
    Date(DateTime<Utc>),
    Bool(bool),
}

impl FilterValue {
    fn coerce(field: &str, kind: FilterKind, value: &JsonValue) -> DbResult<Self> {
        let invalid = || {
            DbError::invalid_input(format!(
                "filter on '{}': {} is not a valid {:?} value",
                field, value, kind
            ))
        };
        match kind {
            FilterKind::String => Ok(Self::Text(match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })),
            FilterKind::Numeric => match value {
                JsonValue::Number(n) => match n.as_i64() {
                    Some(i) => Ok(Self::Int(i)),
                    None => n.as_f64().map(Self::Float).ok_or_else(invalid),
                },
                JsonValue::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .map(Self::Int)
                        .or_else(|_| s.parse::<f64>().map(Self::Float))
                        .map_err(|_| invalid())
                }
                _ => Err(invalid()),
            },
            FilterKind::Date => match value {
                JsonValue::String(s) => parse_date(s).map(Self::Date).ok_or_else(invalid),
                JsonValue::Number(n) => n
                    .as_i64()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .map(Self::Date)
                    .ok_or_else(invalid),
                _ => Err(invalid()),
            },
            FilterKind::Bool => match value {
                JsonValue::Bool(b) => Ok(Self::Bool(*b)),
                JsonValue::Number(n) => Ok(Self::Bool(n.as_i64() != Some(0))),
                JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" => Ok(Self::Bool(true)),
                    "0" | "false" | "no" => Ok(Self::Bool(false)),
                    _ => Err(invalid()),
                },
                _ => Err(invalid()),
            },
        }
    }

    /// Plain JSON form, dates as RFC 3339.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Int(i) => JsonValue::from(*i),
            Self::Float(f) => JsonValue::from(*f),
            Self::Date(d) => JsonValue::String(d.to_rfc3339()),
            Self::Bool(b) => JsonValue::Bool(*b),
        }
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// One field condition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub kind: FilterKind,
    pub op: FilterOp,
    pub values: Vec<FilterValue>,
}

impl FieldFilter {
    /// Parse `[type, operator, ...values]`.
    pub fn from_json(field: &str, spec: &JsonValue) -> DbResult<Self> {
        let items = spec.as_array().ok_or_else(|| {
            DbError::invalid_input(format!("filter on '{}' must be [type, operator, ...values]", field))
        })?;
        let kind: FilterKind = items
            .first()
            .and_then(JsonValue::as_str)
            .ok_or_else(|| DbError::invalid_input(format!("filter on '{}' has no type", field)))?
            .parse()?;

        let (op, raw_values) = match items.get(1).and_then(JsonValue::as_str).and_then(FilterOp::parse) {
            Some(op) => (op, &items[2..]),
            None if kind == FilterKind::String => (FilterOp::Like, &items[1..]),
            None => (FilterOp::Eq, &items[1..]),
        };

        // A single array argument holds the value list.
        let flattened: Vec<&JsonValue> = match raw_values {
            [JsonValue::Array(list)] => list.iter().collect(),
            other => other.iter().collect(),
        };
        let values = flattened
            .into_iter()
            .map(|v| FilterValue::coerce(field, kind, v))
            .collect::<DbResult<Vec<_>>>()?;

        let expected_ok = match op {
            FilterOp::Between => values.len() == 2,
            _ => !values.is_empty(),
        };
        if !expected_ok {
            return Err(DbError::invalid_input(format!(
                "filter on '{}': {:?} got {} value(s)",
                field,
                op,
                values.len()
            )));
        }
        if matches!(op, FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge) && values.len() > 1 {
            return Err(DbError::invalid_input(format!(
                "filter on '{}': {:?} takes one value",
                field, op
            )));
        }

        Ok(Self {
            field: field.to_string(),
            kind,
            op,
            values,
        })
    }

    /// `=` and `!=` over several values act as set membership.
    pub fn is_multi(&self) -> bool {
        self.values.len() > 1
    }
}

/// All conditions of one query, combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    pub filters: Vec<FieldFilter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{field: [type, operator, ...values]}`; `null` means no filter.
    pub fn from_json(spec: &JsonValue) -> DbResult<Self> {
        match spec {
            JsonValue::Null => Ok(Self::default()),
            JsonValue::Object(map) => Ok(Self {
                filters: map
                    .iter()
                    .map(|(field, spec)| FieldFilter::from_json(field, spec))
                    .collect::<DbResult<Vec<_>>>()?,
            }),
            _ => Err(DbError::invalid_input("filter must be an object")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Canonical JSON form, with the operator always spelled out.
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .filters
            .iter()
            .map(|f| {
                let mut items = vec![
                    JsonValue::from(f.kind.as_str()),
                    JsonValue::from(f.op.as_str()),
                ];
                items.extend(f.values.iter().map(FilterValue::to_json));
                (f.field.clone(), JsonValue::Array(items))
            })
            .collect();
        JsonValue::Object(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Selection parameters for a document query.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub filter: FilterSet,
    pub sort: Vec<(String, SortOrder)>,
    /// Projection; empty returns every field.
    pub fields: Vec<String>,
    /// 1-based page; 0 reads everything.
    pub page: u32,
    pub pagesize: u32,
}

impl Default for DocumentQuery {
    fn default() -> Self {
        Self {
            filter: FilterSet::default(),
            sort: Vec::new(),
            fields: Vec::new(),
            page: 0,
            pagesize: crate::models::DEFAULT_PAGE_SIZE,
        }
    }
}

impl DocumentQuery {
    pub fn new(filter: FilterSet) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: u32, pagesize: u32) -> Self {
        self.page = page;
        self.pagesize = pagesize;
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// `(skip, limit)` of the page window, if paginated.
    pub fn window(&self) -> Option<(u64, u64)> {
        (self.page > 0).then(|| crate::db::builder::window(self.page, self.pagesize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_operators() {
        let set = FilterSet::from_json(&json!({
            "name": ["string", "hello"],
            "age": ["numeric", "between", 18, "65"],
            "tags": ["string", "in", ["a", "b"]],
            "active": ["bool", "=", "true"],
            "since": ["date", ">=", "2024-01-02"],
        }))
        .unwrap();
        assert_eq!(set.filters.len(), 5);

        let name = &set.filters[0];
        assert_eq!(name.op, FilterOp::Like);
        assert_eq!(name.values, vec![FilterValue::Text("hello".into())]);

        let age = &set.filters[1];
        assert_eq!(age.op, FilterOp::Between);
        assert_eq!(age.values, vec![FilterValue::Int(18), FilterValue::Int(65)]);

        let tags = &set.filters[2];
        assert_eq!(tags.op, FilterOp::In);
        assert!(tags.is_multi());

        assert_eq!(set.filters[3].values, vec![FilterValue::Bool(true)]);
        match &set.filters[4].values[0] {
            FilterValue::Date(d) => assert_eq!(d.to_rfc3339(), "2024-01-02T00:00:00+00:00"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_default_operator_for_non_strings() {
        let f = FieldFilter::from_json("n", &json!(["numeric", 5])).unwrap();
        assert_eq!(f.op, FilterOp::Eq);
    }

    #[test]
    fn test_invalid_filters() {
        assert!(FieldFilter::from_json("n", &json!("x")).is_err());
        assert!(FieldFilter::from_json("n", &json!(["weird", "=", 1])).is_err());
        assert!(FieldFilter::from_json("n", &json!(["numeric", "=", "abc"])).is_err());
        assert!(FieldFilter::from_json("n", &json!(["numeric", "between", 1])).is_err());
        assert!(FieldFilter::from_json("n", &json!(["numeric", "<", 1, 2])).is_err());
        assert!(FieldFilter::from_json("n", &json!(["string", "="])).is_err());
        assert!(FilterSet::from_json(&json!([1])).is_err());
        assert!(FilterSet::from_json(&JsonValue::Null).unwrap().is_empty());
    }

    #[test]
    fn test_to_json_spells_out_operator() {
        let set = FilterSet::from_json(&json!({"name": ["string", "bob"]})).unwrap();
        assert_eq!(set.to_json(), json!({"name": ["string", "like", "bob"]}));
    }

    #[test]
    fn test_window() {
        assert_eq!(DocumentQuery::default().window(), None);
        assert_eq!(
            DocumentQuery::default().with_page(3, 20).window(),
            Some((40, 20))
        );
    }
}
