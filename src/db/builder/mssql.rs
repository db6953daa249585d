//! MsSql (SQL Server) dialect.

use super::{QueryBuilder, hex, trim_statement, window};
use crate::db::params::BindStyle;
use crate::error::{DbError, DbResult};
use crate::models::{DriverKind, Row};

#[derive(Debug, Clone, Copy, Default)]
pub struct MsSqlBuilder;

impl QueryBuilder for MsSqlBuilder {
    fn driver(&self) -> DriverKind {
        DriverKind::MsSql
    }

    fn bind_style(&self) -> BindStyle {
        BindStyle::Numbered
    }

    fn quote_string(&self, value: &str) -> String {
        format!("N'{}'", value.replace('\'', "''"))
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("0x{}", hex(bytes))
    }

    fn create_insert_or_update(
        &self,
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
        let (columns, values) = self.columns_and_values(table, data)?;

        let source: Vec<String> = columns
            .iter()
            .zip(values.iter())
            .map(|(c, v)| format!("{} AS {}", v, c))
            .collect();
        let on: Vec<String> = key_fields
            .iter()
            .map(|k| {
                let col = self.quote_identifier(k);
                format!("target.{} = source.{}", col, col)
            })
            .collect();
        let updates: Vec<String> = data
            .keys()
            .filter(|k| !key_fields.contains(k))
            .map(|k| {
                let col = self.quote_identifier(k);
                format!("target.{} = source.{}", col, col)
            })
            .collect();
        let inserted: Vec<String> = columns.iter().map(|c| format!("source.{}", c)).collect();

        let mut sql = format!(
            "MERGE INTO {} AS target USING (SELECT {}) AS source ON ({})",
            self.quote_table(table),
            source.join(", "),
            on.join(" AND ")
        );
        if !updates.is_empty() {
            sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", updates.join(", ")));
        }
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
            columns.join(", "),
            inserted.join(", ")
        ));
        Ok(sql)
    }

    fn create_show_tables(&self, like: Option<&str>) -> String {
        let mut sql = "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                       WHERE TABLE_TYPE = 'BASE TABLE'"
            .to_string();
        if let Some(pattern) = like {
            sql.push_str(&format!(" AND TABLE_NAME LIKE {}", self.quote_string(pattern)));
        }
        sql.push_str(" ORDER BY TABLE_NAME");
        sql
    }

    fn create_show_field(&self, table: &str) -> String {
        format!(
            "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT \
             FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = {} \
             ORDER BY ORDINAL_POSITION",
            self.quote_string(table)
        )
    }

    /// Derived tables cannot carry a trailing ORDER BY.
    fn count_query(&self, query: &str) -> String {
        let query = trim_statement(query);
        let inner = match query.to_ascii_lowercase().rfind("order by") {
            Some(pos) if !query[pos..].contains(')') => query[..pos].trim_end(),
            _ => query,
        };
        format!("SELECT COUNT(*) AS affected FROM ({}) tbl", inner)
    }

    /// OFFSET/FETCH needs an ORDER BY; a constant one is added when missing.
    fn paginate(&self, query: &str, page: u32, pagesize: u32) -> String {
        let (offset, limit) = window(page, pagesize);
        let query = trim_statement(query);
        let order = if query.to_ascii_lowercase().contains("order by") {
            ""
        } else {
            " ORDER BY (SELECT NULL)"
        };
        format!(
            "{}{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            query, order, offset, limit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::builder::tests::row;
    use serde_json::json;

    #[test]
    fn test_merge_upsert() {
        let sql = MsSqlBuilder
            .create_insert_or_update(
                "users",
                &row(json!({"email": "a@b.c", "name": "A"})),
                &["email".to_string()],
            )
            .unwrap();
        assert!(sql.starts_with("MERGE INTO [users] AS target"));
        assert!(sql.contains("ON (target.[email] = source.[email])"));
        assert!(sql.contains("UPDATE SET target.[name] = source.[name]"));
        assert!(!sql.contains("SET target.[email]"));
        assert!(sql.ends_with("VALUES (source.[email], source.[name]);"));
    }

    #[test]
    fn test_paginate_adds_order() {
        assert_eq!(
            MsSqlBuilder.paginate("SELECT * FROM t", 2, 10),
            "SELECT * FROM t ORDER BY (SELECT NULL) OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(
            MsSqlBuilder.paginate("SELECT * FROM t ORDER BY id", 1, 5),
            "SELECT * FROM t ORDER BY id OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
        );
    }

    #[test]
    fn test_count_query_drops_order() {
        assert_eq!(
            MsSqlBuilder.count_query("SELECT * FROM t ORDER BY id"),
            "SELECT COUNT(*) AS affected FROM (SELECT * FROM t) tbl"
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(MsSqlBuilder.quote_string("x'y"), "N'x''y'");
        assert_eq!(MsSqlBuilder.blob_literal(&[1, 255]), "0x01ff");
    }
}
