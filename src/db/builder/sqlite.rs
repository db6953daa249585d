//! SQLite dialect.

use super::{QueryBuilder, on_conflict_upsert};
use crate::db::params::BindStyle;
use crate::error::DbResult;
use crate::models::{DriverKind, Row};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBuilder;

impl QueryBuilder for SqliteBuilder {
    fn driver(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn bind_style(&self) -> BindStyle {
        BindStyle::Positional
    }

    fn create_insert_or_update(
        &self,
        table: &str,
        data: &Row,
        key_fields: &[String],
    ) -> DbResult<String> {
        on_conflict_upsert(self, table, data, key_fields)
    }

    /// SQLite has no TRUNCATE; an unqualified DELETE uses the truncate optimization.
    fn create_delete(&self, table: &str, condition: &str) -> String {
        if condition.trim().is_empty() {
            format!("DELETE FROM {}", self.quote_table(table))
        } else {
            format!(
                "DELETE FROM {} WHERE {}",
                self.quote_table(table),
                condition.trim()
            )
        }
    }

    fn create_show_tables(&self, like: Option<&str>) -> String {
        let mut sql = "SELECT name AS table_name FROM sqlite_master \
                       WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
            .to_string();
        if let Some(pattern) = like {
            sql.push_str(&format!(" AND name LIKE {}", self.quote_string(pattern)));
        }
        sql.push_str(" ORDER BY name");
        sql
    }

    fn create_show_field(&self, table: &str) -> String {
        format!("PRAGMA table_info({})", self.quote_identifier(table))
    }

    fn returning_clause(&self, field: &str) -> Option<String> {
        Some(format!(" RETURNING {}", self.quote_identifier(field)))
    }
}
