//! SQL text builders, one per relational dialect.
//!
//! Builders are pure: they render DML, pagination windows, count wrappers and
//! value literals, and never touch a connection. Values that already contain
//! `[[...]]` placeholders pass through unquoted so a built statement can still
//! be bound by a `Command`.

mod mssql;
mod mysql;
mod postgres;
mod sqlite;

pub use mssql::MsSqlBuilder;
pub use mysql::MySqlBuilder;
pub use postgres::PgSqlBuilder;
pub use sqlite::SqliteBuilder;

use crate::db::params::{BindStyle, BoundValue, has_placeholders};
use crate::db::types::escape_identifier;
use crate::error::{DbError, DbResult};
use crate::models::{DriverKind, Row};
use serde_json::Value as JsonValue;

/// Dialect-specific statement rendering.
pub trait QueryBuilder: Send + Sync {
    /// Driver this builder renders for.
    fn driver(&self) -> DriverKind;

    /// How placeholders are turned into SQL.
    fn bind_style(&self) -> BindStyle;

    // =========================================================================
    // Literals
    // =========================================================================

    /// Quote an identifier.
    fn quote_identifier(&self, name: &str) -> String {
        escape_identifier(name, self.driver())
    }

    /// Quote a possibly schema-qualified table name.
    fn quote_table(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Escape and single-quote a string.
    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Boolean literal.
    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    /// Binary literal.
    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex(bytes))
    }

    /// Render a JSON value as an SQL literal.
    fn literal(&self, value: &JsonValue) -> String {
        match value {
            JsonValue::Null => "NULL".to_string(),
            JsonValue::Bool(b) => self.bool_literal(*b).to_string(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::String(s) if has_placeholders(s) => s.clone(),
            JsonValue::String(s) => self.quote_string(s),
            other => self.quote_string(&other.to_string()),
        }
    }

    /// Render a bound parameter value as an SQL literal.
    fn bound_literal(&self, value: &BoundValue) -> String {
        match value {
            BoundValue::Null => "NULL".to_string(),
            BoundValue::Int(v) => v.to_string(),
            BoundValue::Double(v) if v.is_finite() => v.to_string(),
            BoundValue::Double(_) => "NULL".to_string(),
            BoundValue::Text(s) => self.quote_string(s),
            BoundValue::Blob(b) => self.blob_literal(b),
        }
    }

    // =========================================================================
    // DML
    // =========================================================================

    /// `INSERT INTO table (cols) VALUES (...)`.
    fn create_insert(&self, table: &str, data: &Row) -> DbResult<String> {
        let (columns, values) = self.columns_and_values(table, data)?;
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_table(table),
            columns.join(", "),
            values.join(", ")
        ))
    }

    /// Insert that updates the non-key columns when a key conflicts.
    fn create_insert_or_update(
        &self,
        table: &str,
        data: &Row,
        key_fields: &[String],
    ) -> DbResult<String>;

    /// Multi-row insert; every row must have the columns of the first.
    fn create_batch_insert(&self, table: &str, rows: &[Row]) -> DbResult<String> {
        let first = rows
            .first()
            .ok_or_else(|| DbError::invalid_input(format!("no rows to insert into {}", table)))?;
        let names: Vec<&String> = first.keys().collect();
        if names.is_empty() {
            return Err(DbError::invalid_input(format!(
                "no columns to insert into {}",
                table
            )));
        }

        let mut tuples = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let values = names
                .iter()
                .map(|name| {
                    row.get(name.as_str()).map(|v| self.literal(v)).ok_or_else(|| {
                        DbError::invalid_input(format!("row {} has no column '{}'", i, name))
                    })
                })
                .collect::<DbResult<Vec<_>>>()?;
            tuples.push(format!("({})", values.join(", ")));
        }

        let columns: Vec<String> = names.iter().map(|n| self.quote_identifier(n)).collect();
        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.quote_table(table),
            columns.join(", "),
            tuples.join(", ")
        ))
    }

    /// `UPDATE table SET ... [WHERE condition]`.
    fn create_update(&self, table: &str, data: &Row, condition: &str) -> DbResult<String> {
        let (columns, values) = self.columns_and_values(table, data)?;
        let sets: Vec<String> = columns
            .iter()
            .zip(values.iter())
            .map(|(c, v)| format!("{} = {}", c, v))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.quote_table(table), sets.join(", "));
        if !condition.trim().is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(condition.trim());
        }
        Ok(sql)
    }

    /// `DELETE FROM table WHERE condition`; an empty condition truncates.
    fn create_delete(&self, table: &str, condition: &str) -> String {
        if condition.trim().is_empty() {
            format!("TRUNCATE TABLE {}", self.quote_table(table))
        } else {
            format!(
                "DELETE FROM {} WHERE {}",
                self.quote_table(table),
                condition.trim()
            )
        }
    }

    /// List tables, optionally filtered by a LIKE pattern.
    fn create_show_tables(&self, like: Option<&str>) -> String;

    /// List the columns of a table.
    fn create_show_field(&self, table: &str) -> String;

    // =========================================================================
    // Reader helpers
    // =========================================================================

    /// Append the pagination window for a 1-based page.
    fn paginate(&self, query: &str, page: u32, pagesize: u32) -> String {
        let (offset, limit) = window(page, pagesize);
        format!("{} LIMIT {}, {}", trim_statement(query), offset, limit)
    }

    /// Wrap a query so it returns its total row count in column `affected`.
    fn count_query(&self, query: &str) -> String {
        format!(
            "SELECT COUNT(*) AS affected FROM ({}) tbl",
            trim_statement(query)
        )
    }

    /// Clause appended to a mutation to return a column, if supported.
    fn returning_clause(&self, _field: &str) -> Option<String> {
        None
    }

    /// Quoted column names and literals for a data map.
    fn columns_and_values(&self, table: &str, data: &Row) -> DbResult<(Vec<String>, Vec<String>)> {
        if data.is_empty() {
            return Err(DbError::invalid_input(format!(
                "no columns given for {}",
                table
            )));
        }
        Ok(data
            .iter()
            .map(|(k, v)| (self.quote_identifier(k), self.literal(v)))
            .unzip())
    }
}

/// `(offset, limit)` for a 1-based page.
pub fn window(page: u32, pagesize: u32) -> (u64, u64) {
    let page = u64::from(page.max(1));
    let pagesize = u64::from(pagesize);
    ((page - 1) * pagesize, pagesize)
}

/// Strip whitespace and trailing semicolons.
pub fn trim_statement(query: &str) -> &str {
    query.trim().trim_end_matches(';').trim_end()
}

/// Lowercase hex encoding.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Builder for a relational driver.
pub fn for_driver(driver: DriverKind) -> Option<Box<dyn QueryBuilder>> {
    match driver {
        DriverKind::MySql => Some(Box::new(MySqlBuilder)),
        DriverKind::PgSql => Some(Box::new(PgSqlBuilder)),
        DriverKind::MsSql => Some(Box::new(MsSqlBuilder)),
        DriverKind::Sqlite => Some(Box::new(SqliteBuilder)),
        DriverKind::MongoDb | DriverKind::Solr => None,
    }
}

/// `ON CONFLICT (...) DO UPDATE` shared by PostgreSQL and SQLite.
pub(crate) fn on_conflict_upsert(
    builder: &dyn QueryBuilder,
    table: &str,
    data: &Row,
    key_fields: &[String],
) -> DbResult<String> {
    if key_fields.is_empty() {
        return Err(DbError::invalid_input(format!(
            "upsert into {} needs at least one key field",
            table
        )));
    }
    let insert = builder.create_insert(table, data)?;
    let keys: Vec<String> = key_fields
        .iter()
        .map(|k| builder.quote_identifier(k))
        .collect();
    let updates: Vec<String> = data
        .keys()
        .filter(|k| !key_fields.contains(k))
        .map(|k| {
            let col = builder.quote_identifier(k);
            format!("{} = EXCLUDED.{}", col, col)
        })
        .collect();

    if updates.is_empty() {
        Ok(format!("{} ON CONFLICT ({}) DO NOTHING", insert, keys.join(", ")))
    } else {
        Ok(format!(
            "{} ON CONFLICT ({}) DO UPDATE SET {}",
            insert,
            keys.join(", "),
            updates.join(", ")
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_delete_with_empty_condition_truncates() {
        let builders: [&dyn QueryBuilder; 3] = [&MySqlBuilder, &PgSqlBuilder, &MsSqlBuilder];
        for builder in builders {
            let sql = builder.create_delete("test", "");
            assert!(sql.starts_with("TRUNCATE TABLE"), "{}", sql);
            let sql = builder.create_delete("test", "id=1");
            assert!(sql.starts_with("DELETE FROM"), "{}", sql);
            assert!(sql.ends_with("WHERE id=1"), "{}", sql);
        }
    }

    #[test]
    fn test_literals() {
        let b = MySqlBuilder;
        assert_eq!(b.literal(&json!(null)), "NULL");
        assert_eq!(b.literal(&json!(true)), "1");
        assert_eq!(PgSqlBuilder.literal(&json!(false)), "FALSE");
        assert_eq!(b.literal(&json!(1.5)), "1.5");
        assert_eq!(PgSqlBuilder.literal(&json!("it's")), "'it''s'");
        assert_eq!(b.literal(&json!("[[id:integer]]")), "[[id:integer]]");
        assert_eq!(b.literal(&json!({"a": 1})), "'{\"a\":1}'");
    }

    #[test]
    fn test_insert_keeps_placeholders() {
        let sql = MySqlBuilder
            .create_insert("test", &row(json!({"text": "[[t]]", "dbl": 1.1})))
            .unwrap();
        assert_eq!(sql, "INSERT INTO `test` (`text`, `dbl`) VALUES ([[t]], 1.1)");
    }

    #[test]
    fn test_insert_without_columns_is_rejected() {
        let err = MySqlBuilder.create_insert("test", &Row::new()).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(MySqlBuilder.create_batch_insert("test", &[]).is_err());
    }

    #[test]
    fn test_batch_insert() {
        let rows = vec![row(json!({"a": 1, "b": "x"})), row(json!({"a": 2, "b": "y"}))];
        let sql = SqliteBuilder.create_batch_insert("t", &rows).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"a\", \"b\") VALUES (1, 'x'), (2, 'y')"
        );

        let ragged = vec![row(json!({"a": 1, "b": "x"})), row(json!({"a": 2}))];
        assert!(SqliteBuilder.create_batch_insert("t", &ragged).is_err());
    }

    #[test]
    fn test_update() {
        let sql = PgSqlBuilder
            .create_update("t", &row(json!({"a": 1})), "id = 3")
            .unwrap();
        assert_eq!(sql, "UPDATE \"t\" SET \"a\" = 1 WHERE id = 3");
    }

    #[test]
    fn test_window_and_count() {
        assert_eq!(window(2, 10), (10, 10));
        assert_eq!(window(0, 10), (0, 10));
        assert_eq!(
            MySqlBuilder.paginate("select * from t;", 2, 10),
            "select * from t LIMIT 10, 10"
        );
        assert_eq!(
            MySqlBuilder.count_query("select * from t"),
            "SELECT COUNT(*) AS affected FROM (select * from t) tbl"
        );
    }

    #[test]
    fn test_for_driver() {
        assert!(for_driver(DriverKind::MySql).is_some());
        assert!(for_driver(DriverKind::MongoDb).is_none());
        assert_eq!(
            for_driver(DriverKind::Sqlite).map(|b| b.driver()),
            Some(DriverKind::Sqlite)
        );
    }
}
