//! PostgreSQL dialect.
//!
//! Parameters are written into the statement as escaped literals instead of
//! bound, and generated identifiers come back through `RETURNING`.

use super::{QueryBuilder, hex, on_conflict_upsert, trim_statement, window};
use crate::db::params::BindStyle;
use crate::error::DbResult;
use crate::models::{DriverKind, Row};

#[derive(Debug, Clone, Copy, Default)]
pub struct PgSqlBuilder;

impl QueryBuilder for PgSqlBuilder {
    fn driver(&self) -> DriverKind {
        DriverKind::PgSql
    }

    fn bind_style(&self) -> BindStyle {
        BindStyle::Inline
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn blob_literal(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'::bytea", hex(bytes))
    }

    fn create_insert_or_update(
        &self,
        table: &str,
        data: &Row,
        key_fields: &[String],
    ) -> DbResult<String> {
        on_conflict_upsert(self, table, data, key_fields)
    }

    fn create_show_tables(&self, like: Option<&str>) -> String {
        let mut sql = "SELECT table_name FROM information_schema.tables \
                       WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'"
            .to_string();
        if let Some(pattern) = like {
            sql.push_str(&format!(" AND table_name LIKE {}", self.quote_string(pattern)));
        }
        sql.push_str(" ORDER BY table_name");
        sql
    }

    fn create_show_field(&self, table: &str) -> String {
        format!(
            "SELECT column_name, data_type, is_nullable, column_default \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = {} \
             ORDER BY ordinal_position",
            self.quote_string(table)
        )
    }

    fn paginate(&self, query: &str, page: u32, pagesize: u32) -> String {
        let (offset, limit) = window(page, pagesize);
        format!("{} LIMIT {} OFFSET {}", trim_statement(query), limit, offset)
    }

    fn returning_clause(&self, field: &str) -> Option<String> {
        Some(format!(" RETURNING {}", self.quote_identifier(field)))
    }
}
