//! Placeholder binding for query templates.
//!
//! Templates carry `[[name]]` or `[[name:type]]` placeholders. Binding turns
//! each one into a driver bind marker (with a typed value) or an inline
//! literal, depending on the dialect's [`BindStyle`]. List parameters expand
//! to one marker per element.

use crate::db::builder::QueryBuilder;
use crate::error::{DbError, DbResult};
use crate::models::{Params, QueryParam};
use regex::Regex;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};
use std::sync::LazyLock;

/// `[[name]]` or `[[name:type]]`.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([A-Za-z_][A-Za-z0-9_.]*)(?::([A-Za-z]+))?\]\]")
        .expect("placeholder pattern is valid")
});

/// Whether a text contains at least one placeholder.
pub fn has_placeholders(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

/// Declared type of a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Integer,
    Double,
    String,
    Blob,
}

impl ParamType {
    /// Parse a type tag; the single letters i/d/s/b are accepted as well.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "integer" | "int" | "i" => Some(Self::Integer),
            "double" | "float" | "d" => Some(Self::Double),
            "string" | "s" => Some(Self::String),
            "blob" | "b" => Some(Self::Blob),
            _ => None,
        }
    }

    /// Bind type letter.
    pub fn letter(&self) -> char {
        match self {
            Self::Integer => 'i',
            Self::Double => 'd',
            Self::String => 's',
            Self::Blob => 'b',
        }
    }
}

/// How a dialect renders a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStyle {
    /// `?` markers (MySQL, SQLite).
    Positional,
    /// `@P1`, `@P2`, ... markers (MsSql).
    Numbered,
    /// Escaped literals written into the text (PostgreSQL).
    Inline,
}

/// A value coerced to its declared placeholder type.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Null,
    Int(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// A template with every placeholder resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    /// Text sent to the engine.
    pub sql: String,
    /// Values for the bind markers, in order.
    pub values: Vec<BoundValue>,
    /// Text with every marker replaced by its literal, for logs and errors.
    pub rendered: String,
}

impl BoundQuery {
    /// A query without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            rendered: sql.clone(),
            sql,
            values: Vec::new(),
        }
    }

    /// Whether the query carries bind values.
    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }
}

/// Coerce a parameter to a declared type.
pub fn coerce(name: &str, param: &QueryParam, ty: ParamType) -> DbResult<BoundValue> {
    let mismatch = || {
        DbError::query(
            format!(
                "parameter '{}' of type {} cannot be bound as {:?}",
                name,
                param.type_name(),
                ty
            ),
            None,
        )
    };

    if param.is_null() {
        return Ok(BoundValue::Null);
    }

    match ty {
        ParamType::Integer => match param {
            QueryParam::Int(v) => Ok(BoundValue::Int(*v)),
            QueryParam::Bool(v) => Ok(BoundValue::Int(i64::from(*v))),
            QueryParam::Float(v) if v.is_finite() => Ok(BoundValue::Int(v.trunc() as i64)),
            QueryParam::String(s) => s
                .trim()
                .parse::<i64>()
                .map(BoundValue::Int)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamType::Double => match param {
            QueryParam::Int(v) => Ok(BoundValue::Double(*v as f64)),
            QueryParam::Float(v) => Ok(BoundValue::Double(*v)),
            QueryParam::Bool(v) => Ok(BoundValue::Double(if *v { 1.0 } else { 0.0 })),
            QueryParam::String(s) => s
                .trim()
                .parse::<f64>()
                .map(BoundValue::Double)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamType::String => match param {
            QueryParam::String(s) => Ok(BoundValue::Text(s.clone())),
            QueryParam::Int(v) => Ok(BoundValue::Text(v.to_string())),
            QueryParam::Float(v) => Ok(BoundValue::Text(v.to_string())),
            QueryParam::Bool(v) => Ok(BoundValue::Text(if *v { "1" } else { "0" }.to_string())),
            QueryParam::Bytes(b) => Ok(BoundValue::Text(String::from_utf8_lossy(b).into_owned())),
            _ => Err(mismatch()),
        },
        ParamType::Blob => match param {
            QueryParam::Bytes(b) => Ok(BoundValue::Blob(b.clone())),
            QueryParam::String(s) => Ok(BoundValue::Blob(s.as_bytes().to_vec())),
            _ => Err(mismatch()),
        },
    }
}

/// Resolve every placeholder in `template`.
///
/// Fails with "no params" when placeholders exist but no map was given, or
/// when a non-empty map was given for a template without placeholders.
pub fn bind(
    template: &str,
    params: Option<&Params>,
    builder: &dyn QueryBuilder,
) -> DbResult<BoundQuery> {
    let has_markers = has_placeholders(template);

    let params = match (has_markers, params) {
        (false, Some(p)) if !p.is_empty() => {
            return Err(DbError::query("no params", None).with_query(template));
        }
        (false, _) => return Ok(BoundQuery::raw(template)),
        (true, None) => {
            return Err(DbError::query("no params", None).with_query(template));
        }
        (true, Some(p)) => p,
    };

    let style = builder.bind_style();
    let mut sql = String::with_capacity(template.len());
    let mut rendered = String::with_capacity(template.len());
    let mut values = Vec::new();
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let ty = match caps.get(2) {
            Some(tag) => ParamType::parse(tag.as_str()).ok_or_else(|| {
                DbError::query(
                    format!("unknown parameter type '{}' for '{}'", tag.as_str(), name),
                    None,
                )
                .with_query(template)
            })?,
            None => ParamType::String,
        };

        let param = params.get(name).ok_or_else(|| {
            DbError::query(format!("missing parameter '{}'", name), None).with_query(template)
        })?;

        let items: Vec<&QueryParam> = match param {
            QueryParam::List(items) if items.is_empty() => {
                return Err(DbError::query(
                    format!("parameter '{}' is an empty list", name),
                    None,
                )
                .with_query(template));
            }
            QueryParam::List(items) => items.iter().collect(),
            single => vec![single],
        };

        sql.push_str(&template[last..whole.start]);
        rendered.push_str(&template[last..whole.start]);

        for (i, item) in items.into_iter().enumerate() {
            let value = coerce(name, item, ty).map_err(|e| e.with_query(template))?;
            if i > 0 {
                sql.push_str(", ");
                rendered.push_str(", ");
            }
            let literal = builder.bound_literal(&value);
            match style {
                BindStyle::Inline => sql.push_str(&literal),
                BindStyle::Positional => sql.push('?'),
                BindStyle::Numbered => sql.push_str(&format!("@P{}", values.len() + 1)),
            }
            rendered.push_str(&literal);
            if style != BindStyle::Inline {
                values.push(value);
            }
        }

        last = whole.end;
    }

    sql.push_str(&template[last..]);
    rendered.push_str(&template[last..]);

    Ok(BoundQuery {
        sql,
        values,
        rendered,
    })
}

// =============================================================================
// Driver Binding
// =============================================================================

/// Bind a value to a MySQL query.
pub(crate) fn bind_mysql_value<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &'q BoundValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        BoundValue::Null => query.bind(None::<String>),
        BoundValue::Int(v) => query.bind(*v),
        BoundValue::Double(v) => query.bind(*v),
        BoundValue::Text(v) => query.bind(v.as_str()),
        BoundValue::Blob(v) => query.bind(v.as_slice()),
    }
}

/// Bind a value to a PostgreSQL query. Only reached for statements built
/// outside the placeholder path, since PostgreSQL templates are inlined.
pub(crate) fn bind_pg_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &'q BoundValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        BoundValue::Null => query.bind(None::<String>),
        BoundValue::Int(v) => query.bind(*v),
        BoundValue::Double(v) => query.bind(*v),
        BoundValue::Text(v) => query.bind(v.as_str()),
        BoundValue::Blob(v) => query.bind(v.as_slice()),
    }
}

/// Bind a value to a SQLite query.
pub(crate) fn bind_sqlite_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q BoundValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        BoundValue::Null => query.bind(None::<String>),
        BoundValue::Int(v) => query.bind(*v),
        BoundValue::Double(v) => query.bind(*v),
        BoundValue::Text(v) => query.bind(v.as_str()),
        BoundValue::Blob(v) => query.bind(v.as_slice()),
    }
}

/// Bind a value to an MsSql query.
pub(crate) fn bind_mssql_value(query: &mut tiberius::Query<'_>, value: &BoundValue) {
    match value {
        BoundValue::Null => query.bind(Option::<String>::None),
        BoundValue::Int(v) => query.bind(*v),
        BoundValue::Double(v) => query.bind(*v),
        BoundValue::Text(v) => query.bind(v.clone()),
        BoundValue::Blob(v) => query.bind(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::builder::{MsSqlBuilder, MySqlBuilder, PgSqlBuilder};

    fn params(pairs: &[(&str, QueryParam)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_integer_placeholder_binds_value() {
        let p = params(&[("x", QueryParam::Int(5))]);
        let bound = bind("select * from t where id=[[x:integer]]", Some(&p), &MySqlBuilder).unwrap();
        assert_eq!(bound.sql, "select * from t where id=?");
        assert_eq!(bound.values, vec![BoundValue::Int(5)]);
        assert_eq!(bound.rendered, "select * from t where id=5");
    }

    #[test]
    fn test_string_coerced_to_integer() {
        let p = params(&[("x", QueryParam::String("5".into()))]);
        let bound = bind("id=[[x:i]]", Some(&p), &MySqlBuilder).unwrap();
        assert_eq!(bound.values, vec![BoundValue::Int(5)]);
    }

    #[test]
    fn test_list_expands_in_order() {
        let p = params(&[("x", QueryParam::from(vec![1i64, 2, 3]))]);
        let bound = bind("id in ([[x:integer]])", Some(&p), &MySqlBuilder).unwrap();
        assert_eq!(bound.sql, "id in (?, ?, ?)");
        assert_eq!(
            bound.values,
            vec![BoundValue::Int(1), BoundValue::Int(2), BoundValue::Int(3)]
        );

        let bound = bind("id in ([[x:integer]])", Some(&p), &MsSqlBuilder).unwrap();
        assert_eq!(bound.sql, "id in (@P1, @P2, @P3)");
    }

    #[test]
    fn test_inline_style_writes_literals() {
        let p = params(&[
            ("name", QueryParam::String("O'Brien".into())),
            ("n", QueryParam::Int(7)),
        ]);
        let bound = bind(
            "select * from t where name=[[name]] and n=[[n:integer]]",
            Some(&p),
            &PgSqlBuilder,
        )
        .unwrap();
        assert_eq!(bound.sql, "select * from t where name='O''Brien' and n=7");
        assert!(bound.values.is_empty());
    }

    #[test]
    fn test_null_binds_null() {
        let p = params(&[("x", QueryParam::Null)]);
        let bound = bind("v=[[x:integer]]", Some(&p), &MySqlBuilder).unwrap();
        assert_eq!(bound.values, vec![BoundValue::Null]);
        assert_eq!(bound.rendered, "v=NULL");
    }

    #[test]
    fn test_no_params_errors() {
        let err = bind("id=[[x]]", None, &MySqlBuilder).unwrap_err();
        assert!(err.is_query_error());
        assert!(err.to_string().contains("no params"));

        let p = params(&[("x", QueryParam::Int(1))]);
        let err = bind("select 1", Some(&p), &MySqlBuilder).unwrap_err();
        assert!(err.to_string().contains("no params"));

        // An empty map for a template without placeholders is fine
        assert!(bind("select 1", Some(&Params::new()), &MySqlBuilder).is_ok());
    }

    #[test]
    fn test_missing_and_bad_params() {
        let p = params(&[("y", QueryParam::Int(1))]);
        let err = bind("id=[[x]]", Some(&p), &MySqlBuilder).unwrap_err();
        assert!(err.to_string().contains("missing parameter 'x'"));
        assert_eq!(err.query_text(), Some("id=[[x]]"));

        let p = params(&[("x", QueryParam::Int(1))]);
        let err = bind("id=[[x:money]]", Some(&p), &MySqlBuilder).unwrap_err();
        assert!(err.to_string().contains("unknown parameter type"));

        let p = params(&[("x", QueryParam::String("abc".into()))]);
        assert!(bind("id=[[x:integer]]", Some(&p), &MySqlBuilder).is_err());
    }

    #[test]
    fn test_randomized_list_expansion() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let len = rng.gen_range(1..20);
            let items: Vec<i64> = (0..len).map(|_| rng.gen_range(-1000..1000)).collect();
            let p = params(&[("ids", QueryParam::from(items.clone()))]);
            let bound = bind("x in ([[ids:integer]])", Some(&p), &MySqlBuilder).unwrap();
            assert_eq!(bound.sql.matches('?').count(), len);
            let got: Vec<i64> = bound
                .values
                .iter()
                .map(|v| match v {
                    BoundValue::Int(i) => *i,
                    other => panic!("unexpected {:?}", other),
                })
                .collect();
            assert_eq!(got, items);
        }
    }

    #[test]
    fn test_param_type_letters() {
        assert_eq!(ParamType::parse("i"), Some(ParamType::Integer));
        assert_eq!(ParamType::parse("d"), Some(ParamType::Double));
        assert_eq!(ParamType::parse("s"), Some(ParamType::String));
        assert_eq!(ParamType::parse("b"), Some(ParamType::Blob));
        assert_eq!(ParamType::Blob.letter(), 'b');
        assert_eq!(ParamType::parse("x"), None);
    }
}
