//! MySQL / MariaDB dialect.

use super::QueryBuilder;
use crate::db::params::BindStyle;
use crate::error::DbResult;
use crate::models::{DriverKind, Row};

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlBuilder;

impl QueryBuilder for MySqlBuilder {
    fn driver(&self) -> DriverKind {
        DriverKind::MySql
    }

    fn bind_style(&self) -> BindStyle {
        BindStyle::Positional
    }

    fn quote_string(&self, value: &str) -> String {
        // Backslash is an escape character unless NO_BACKSLASH_ESCAPES is set
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    }

    /// MySQL resolves conflicts against any unique key, so `key_fields` only
    /// excludes columns from the update list.
    fn create_insert_or_update(
        &self,
        table: &str,
        data: &Row,
        key_fields: &[String],
    ) -> DbResult<String> {
        let insert = self.create_insert(table, data)?;
        let mut updates: Vec<String> = data
            .keys()
            .filter(|k| !key_fields.contains(k))
            .map(|k| {
                let col = self.quote_identifier(k);
                format!("{} = VALUES({})", col, col)
            })
            .collect();
        if updates.is_empty() {
            // No-op assignment keeps the statement valid
            if let Some(first) = data.keys().next() {
                let col = self.quote_identifier(first);
                updates.push(format!("{} = {}", col, col));
            }
        }
        Ok(format!(
            "{} ON DUPLICATE KEY UPDATE {}",
            insert,
            updates.join(", ")
        ))
    }

    fn create_show_tables(&self, like: Option<&str>) -> String {
        match like {
            Some(pattern) => format!("SHOW TABLES LIKE {}", self.quote_string(pattern)),
            None => "SHOW TABLES".to_string(),
        }
    }

    fn create_show_field(&self, table: &str) -> String {
        format!("SHOW FULL COLUMNS FROM {}", self.quote_table(table))
    }
}
