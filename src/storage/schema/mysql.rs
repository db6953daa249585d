//! MySQL DDL.

use super::{SchemaBuilder, TypeFamily, length_or, quoted_list, type_family};
use crate::models::DriverKind;
use crate::storage::field::{FieldDef, IndexDef, IndexType};

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlSchema;

impl SchemaBuilder for MySqlSchema {
    fn driver(&self) -> DriverKind {
        DriverKind::MySql
    }

    fn create_table(&self, table: &str) -> String {
        let col = |suffix: &str| self.quote(&format!("{}_{}", table, suffix));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             {} BIGINT UNSIGNED NOT NULL AUTO_INCREMENT, \
             {} DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, \
             {} DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP, \
             PRIMARY KEY ({})\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            self.quote(table),
            col("id"),
            col("datecreated"),
            col("datemodified"),
            col("id"),
        )
    }

    fn column_type(&self, def: &FieldDef) -> String {
        let base = match def.type_name.as_str() {
            "bool" | "boolean" => "tinyint(1)".to_string(),
            "varchar" => format!("varchar({})", length_or(def, "255")),
            _ => def.full_type(),
        };
        if def.unsigned && matches!(type_family(&def.type_name), TypeFamily::Integer | TypeFamily::Numeric) {
            format!("{} unsigned", base)
        } else {
            base
        }
    }

    fn uuid_expression(&self) -> &'static str {
        "UUID()"
    }

    /// Expression defaults other than the timestamp keywords need parentheses.
    fn expression_default(&self, expression: &str) -> String {
        if expression.starts_with('(') || expression.to_ascii_uppercase().starts_with("CURRENT_") {
            expression.to_string()
        } else {
            format!("({})", expression)
        }
    }

    fn json_default(&self, text: &str) -> String {
        format!("({})", super::quote_literal(text))
    }

    /// UUID defaults are non-deterministic; keep them out of the binlog.
    fn column_session(&self, def: &FieldDef) -> Option<(String, String)> {
        self.default_literal(def)
            .filter(|d| d.eq_ignore_ascii_case("(UUID())"))
            .map(|_| {
                (
                    "SET SQL_LOG_BIN = 0".to_string(),
                    "SET SQL_LOG_BIN = 1".to_string(),
                )
            })
    }

    fn add_column(&self, table: &str, column: &str, def: &FieldDef) -> Vec<String> {
        let statement = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_definition(column, def)
        );
        vec![statement]
    }

    fn modify_column(&self, table: &str, column: &str, def: &FieldDef) -> Option<Vec<String>> {
        let statement = format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.quote(table),
            self.column_definition(column, def)
        );
        Some(vec![statement])
    }

    fn add_index(
        &self,
        table: &str,
        name: &str,
        columns: &[String],
        def: &IndexDef,
    ) -> Option<String> {
        let kind = match def.index_type {
            IndexType::Normal => "",
            IndexType::Unique => "UNIQUE ",
            IndexType::Fulltext => "FULLTEXT ",
        };
        let mut sql = format!(
            "ALTER TABLE {} ADD {}INDEX {} ({})",
            self.quote(table),
            kind,
            self.quote(name),
            quoted_list(self, columns)
        );
        if let Some(method) = def.method.filter(|_| def.index_type != IndexType::Fulltext) {
            sql.push_str(&format!(" USING {}", method.as_str()));
        }
        Some(sql)
    }

    fn drop_index(&self, table: &str, name: &str) -> String {
        format!("ALTER TABLE {} DROP INDEX {}", self.quote(table), self.quote(name))
    }
}
