//! DDL builders, one per relational dialect.
//!
//! Like the query builders these are pure: they render `CREATE TABLE`,
//! column and index statements, and decide whether a declared field or index
//! matches what the engine reports. Executing the statements is the
//! migrator's job.

mod mssql;
mod mysql;
mod postgres;
mod sqlite;

pub use mssql::MsSqlSchema;
pub use mysql::MySqlSchema;
pub use postgres::PgSqlSchema;
pub use sqlite::SqliteSchema;

use crate::db::types::escape_identifier;
use crate::models::{ColumnDefinition, DriverKind, IndexInfo};
use crate::storage::field::{FieldDef, IndexDef, IndexType};
use regex::Regex;
use std::sync::LazyLock;

/// Columns every storage table carries, as suffixes of `{storage}_`.
pub const BASELINE_COLUMNS: [&str; 3] = ["id", "datecreated", "datemodified"];

/// Real column name of a storage field.
pub fn column_name(storage: &str, field: &str) -> String {
    format!("{}_{}", storage, field)
}

/// Real name of a storage index.
pub fn index_name(storage: &str, index: &str) -> String {
    format!("{}_{}", storage, index)
}

/// Whether a declared field name collides with a baseline column.
pub fn is_baseline(field: &str) -> bool {
    BASELINE_COLUMNS
        .iter()
        .any(|b| b.eq_ignore_ascii_case(field))
}

/// Dialect-specific DDL rendering and schema comparison.
pub trait SchemaBuilder: Send + Sync {
    /// Driver this builder renders for.
    fn driver(&self) -> DriverKind;

    /// Quote an identifier.
    fn quote(&self, name: &str) -> String {
        escape_identifier(name, self.driver())
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    /// Whether a column can be altered in place.
    fn supports_modify_column(&self) -> bool {
        true
    }

    /// Whether the engine reports the index method reliably.
    fn honors_index_method(&self) -> bool {
        false
    }

    /// Whether default differences can be fixed with a column alter.
    fn compares_default(&self) -> bool {
        true
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Statement creating the table with its baseline columns.
    fn create_table(&self, table: &str) -> String;

    /// Engine type for a declared field.
    fn column_type(&self, def: &FieldDef) -> String;

    /// Boolean default literal.
    fn bool_default(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    /// Engine expression generating a UUID.
    fn uuid_expression(&self) -> &'static str;

    /// Render a function default such as `CURRENT_TIMESTAMP` or `(UUID())`.
    fn expression_default(&self, expression: &str) -> String {
        expression.to_string()
    }

    /// Render a JSON default literal.
    fn json_default(&self, text: &str) -> String {
        quote_literal(text)
    }

    /// `DEFAULT` literal for a field, if it has one.
    fn default_literal(&self, def: &FieldDef) -> Option<String> {
        let value = def.default.as_deref()?;
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("null") {
            return Some("NULL".to_string());
        }
        if is_uuid_default(trimmed) {
            return Some(self.expression_default(self.uuid_expression()));
        }
        if is_expression(trimmed) {
            return Some(self.expression_default(trimmed));
        }
        Some(match type_family(&def.type_name) {
            TypeFamily::Boolean => match truthy(trimmed) {
                Some(b) => self.bool_default(b).to_string(),
                None => quote_literal(value),
            },
            TypeFamily::Integer | TypeFamily::Numeric if trimmed.parse::<f64>().is_ok() => {
                trimmed.to_string()
            }
            TypeFamily::Json => self.json_default(&strip_quotes(trimmed)),
            _ => quote_literal(&strip_quotes(value)),
        })
    }

    /// Generated column clause following the type.
    fn generated_clause(&self, expression: &str) -> String {
        format!("GENERATED ALWAYS AS ({}) STORED", expression)
    }

    /// Full column definition: name, type, nullability and default.
    fn column_definition(&self, column: &str, def: &FieldDef) -> String {
        let mut parts = vec![self.quote(column), self.column_type(def)];
        if def.is_virtual {
            parts.push(self.generated_clause(def.expression.as_deref().unwrap_or_default()));
            return parts.join(" ");
        }
        parts.push(if def.required { "NOT NULL" } else { "NULL" }.to_string());
        if let Some(default) = self.default_literal(def) {
            parts.push(format!("DEFAULT {}", default));
        }
        parts.join(" ")
    }

    /// Session statement to run before a column change and the statement
    /// restoring it afterwards, when the declaration needs one.
    fn column_session(&self, _def: &FieldDef) -> Option<(String, String)> {
        None
    }

    /// Statements adding a column.
    fn add_column(&self, table: &str, column: &str, def: &FieldDef) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_definition(column, def)
        )]
    }

    /// Statements bringing a column to its declaration; `None` when the
    /// dialect cannot alter it in place.
    fn modify_column(&self, table: &str, column: &str, def: &FieldDef) -> Option<Vec<String>>;

    /// Statement creating an index; `None` when the dialect cannot build it.
    fn add_index(&self, table: &str, name: &str, columns: &[String], def: &IndexDef)
    -> Option<String>;

    /// Statement dropping an index.
    fn drop_index(&self, table: &str, name: &str) -> String;

    // =========================================================================
    // Comparison
    // =========================================================================

    /// Canonical type text; both sides of a comparison go through it.
    fn canonical_type(&self, type_text: &str) -> String {
        canonical_type(type_text)
    }

    /// Whether the live column already matches the declaration.
    fn column_matches(&self, def: &FieldDef, live: &ColumnDefinition) -> bool {
        if def.is_virtual != is_generated(live) {
            return false;
        }
        if def.is_virtual {
            return match (&def.expression, &live.generation_expression) {
                (Some(declared), Some(actual)) => {
                    canonical_expression(declared) == canonical_expression(actual)
                }
                _ => true,
            };
        }
        if !types_match(
            &self.canonical_type(&self.column_type(def)),
            &self.canonical_type(&live.data_type),
        ) {
            return false;
        }
        if def.required == live.nullable {
            return false;
        }
        if !self.compares_default() {
            return true;
        }
        let boolean = type_family(&def.type_name) == TypeFamily::Boolean;
        canonical_default(self.default_literal(def).as_deref(), boolean)
            == canonical_default(live.default_value.as_deref(), boolean)
    }

    /// Whether the engine reports a fulltext index.
    fn live_is_fulltext(&self, live: &IndexInfo) -> bool {
        live.is_fulltext()
    }

    /// Whether the live index already matches the declaration.
    fn index_matches(&self, columns: &[String], def: &IndexDef, live: &IndexInfo) -> bool {
        let same_columns = columns.len() == live.columns.len()
            && columns
                .iter()
                .zip(&live.columns)
                .all(|(a, b)| a.eq_ignore_ascii_case(b));
        if !same_columns {
            return false;
        }
        if (def.index_type == IndexType::Unique) != live.is_unique {
            return false;
        }
        if (def.index_type == IndexType::Fulltext) != self.live_is_fulltext(live) {
            return false;
        }
        match (def.method, &live.index_algorithm) {
            (Some(method), Some(actual)) if self.honors_index_method() => {
                method.as_str().eq_ignore_ascii_case(actual)
            }
            _ => true,
        }
    }
}

/// Schema builder for a relational driver.
pub fn for_driver(driver: DriverKind) -> Option<Box<dyn SchemaBuilder>> {
    match driver {
        DriverKind::MySql => Some(Box::new(MySqlSchema)),
        DriverKind::PgSql => Some(Box::new(PgSqlSchema)),
        DriverKind::Sqlite => Some(Box::new(SqliteSchema)),
        DriverKind::MsSql => Some(Box::new(MsSqlSchema)),
        DriverKind::MongoDb | DriverKind::Solr => None,
    }
}

// =============================================================================
// Shared normalisation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeFamily {
    Boolean,
    Integer,
    Numeric,
    Text,
    Json,
    Temporal,
    Binary,
    Enum,
}

pub(crate) fn type_family(type_name: &str) -> TypeFamily {
    match type_name.trim().to_lowercase().as_str() {
        "bool" | "boolean" | "bit" => TypeFamily::Boolean,
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "serial"
        | "bigserial" => TypeFamily::Integer,
        "decimal" | "numeric" | "float" | "double" | "real" | "money" => TypeFamily::Numeric,
        "json" | "jsonb" => TypeFamily::Json,
        "date" | "datetime" | "timestamp" | "time" | "year" | "datetime2" => TypeFamily::Temporal,
        "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" | "bytea" => {
            TypeFamily::Binary
        }
        "enum" | "set" => TypeFamily::Enum,
        _ => TypeFamily::Text,
    }
}

static INTEGER_WIDTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(tinyint|smallint|mediumint|int|integer|bigint)\s*\(\s*\d+\s*\)")
        .expect("valid integer width regex")
});

static CAST_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"::[a-z][a-z0-9_ ]*(\[\])?$").expect("valid cast regex")
});

static CHARSET_INTRODUCER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_[a-z0-9]+'").expect("valid introducer regex"));

/// Lowercase, collapse whitespace, drop integer display widths and give a
/// bare `varchar` its default length.
pub(crate) fn canonical_type(type_text: &str) -> String {
    let text = type_text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace(", ", ",");
    let text = INTEGER_WIDTH.replace(&text, "$1").into_owned();
    match text.as_str() {
        "varchar" => "varchar(255)".to_string(),
        "nvarchar" => "nvarchar(255)".to_string(),
        "integer" => "int".to_string(),
        "integer unsigned" => "int unsigned".to_string(),
        _ => text,
    }
}

/// Types match when canonical texts agree, or when the engine omits the
/// parameters of the same base type.
pub(crate) fn types_match(declared: &str, live: &str) -> bool {
    if declared == live {
        return true;
    }
    let base = |t: &str| t.split('(').next().unwrap_or_default().trim().to_string();
    !live.contains('(') && base(declared) == base(live) && !base(live).ends_with("char")
}

/// Whether a column is computed by the engine.
fn is_generated(live: &ColumnDefinition) -> bool {
    live.is_generated()
        || live
            .extra
            .as_deref()
            .is_some_and(|e| e.to_ascii_uppercase().contains("GENERATED") && !e.contains("DEFAULT"))
}

/// Expressions compare without whitespace, quoting or parentheses.
pub(crate) fn canonical_expression(expression: &str) -> String {
    expression
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '`' | '"' | '[' | ']' | '(' | ')'))
        .collect::<String>()
        .to_lowercase()
}

/// Canonical default for comparison: outer parentheses, casts, charset
/// introducers and quotes removed; booleans as `TRUE`/`FALSE`; numbers by
/// value; everything else lowercased.
pub(crate) fn canonical_default(value: Option<&str>, boolean: bool) -> Option<String> {
    let mut text = value?.trim().to_string();
    loop {
        let stripped = text
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .map(|t| t.trim().to_string());
        match stripped {
            Some(inner) if balanced(&inner) => text = inner,
            _ => break,
        }
    }
    text = CAST_SUFFIX
        .replace(&text.to_lowercase(), "")
        .into_owned()
        .replace("\\'", "'");
    if let Some(m) = CHARSET_INTRODUCER.find(&text) {
        text = text[m.end() - 1..].to_string();
    }
    if let Some(rest) = text.strip_prefix("n'") {
        text = format!("'{}", rest);
    }
    let text = strip_quotes(&text);
    if text.eq_ignore_ascii_case("null") {
        return None;
    }
    if boolean {
        if let Some(b) = truthy(&text) {
            return Some(if b { "TRUE" } else { "FALSE" }.to_string());
        }
    }
    if let Ok(n) = text.parse::<f64>() {
        return Some(n.to_string());
    }
    Some(text.to_lowercase())
}

fn balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Remove one level of single quotes, unescaping doubled quotes.
pub(crate) fn strip_quotes(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => trimmed.to_string(),
    }
}

pub(crate) fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

pub(crate) fn truthy(text: &str) -> Option<bool> {
    match strip_quotes(text).to_ascii_lowercase().as_str() {
        "1" | "true" | "b'1'" | "yes" | "on" => Some(true),
        "0" | "false" | "b'0'" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn is_uuid_default(text: &str) -> bool {
    let lower = text.trim().to_ascii_lowercase();
    let lower = lower
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(&lower);
    matches!(lower, "uuid()" | "newid()" | "gen_random_uuid()")
}

/// Function calls and timestamp keywords render unquoted.
pub(crate) fn is_expression(text: &str) -> bool {
    let upper = text.to_ascii_uppercase();
    matches!(
        upper.as_str(),
        "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME" | "LOCALTIMESTAMP"
    ) || (text.ends_with(')')
        && text
            .split('(')
            .next()
            .is_some_and(|name| !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')))
        || (text.starts_with('(') && text.ends_with(')'))
}

/// Length of a declared type, or `fallback` for bare string types.
pub(crate) fn length_or(def: &FieldDef, fallback: &str) -> String {
    def.length
        .clone()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

pub(crate) fn quoted_list(builder: &(impl SchemaBuilder + ?Sized), columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| builder.quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}
