//! SQLite DDL.
//!
//! SQLite keeps declared type names verbatim, cannot alter a column in place
//! and has no fulltext index outside of virtual tables; those steps are
//! reported as skipped by the migrator.

use super::{SchemaBuilder, TypeFamily, quoted_list, type_family};
use crate::models::DriverKind;
use crate::storage::field::{FieldDef, IndexDef, IndexType};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteSchema;

impl SchemaBuilder for SqliteSchema {
    fn driver(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn supports_modify_column(&self) -> bool {
        false
    }

    /// Added NOT NULL columns carry a filler default.
    fn compares_default(&self) -> bool {
        false
    }

    fn create_table(&self, table: &str) -> String {
        let col = |suffix: &str| self.quote(&format!("{}_{}", table, suffix));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             {} INTEGER PRIMARY KEY AUTOINCREMENT, \
             {} DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, \
             {} DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP)",
            self.quote(table),
            col("id"),
            col("datecreated"),
            col("datemodified"),
        )
    }

    fn column_type(&self, def: &FieldDef) -> String {
        match def.type_name.as_str() {
            "bool" | "boolean" => "boolean".to_string(),
            "enum" | "set" => "text".to_string(),
            _ => def.full_type(),
        }
    }

    fn uuid_expression(&self) -> &'static str {
        "(lower(hex(randomblob(16))))"
    }

    /// Only virtual generated columns can be added to an existing table.
    fn generated_clause(&self, expression: &str) -> String {
        format!("GENERATED ALWAYS AS ({}) VIRTUAL", expression)
    }

    /// A NOT NULL column added to an existing table needs a default.
    fn add_column(&self, table: &str, column: &str, def: &FieldDef) -> Vec<String> {
        let mut definition = self.column_definition(column, def);
        if def.required && !def.is_virtual && self.default_literal(def).is_none() {
            let zero = match type_family(&def.type_name) {
                TypeFamily::Boolean | TypeFamily::Integer | TypeFamily::Numeric => "0",
                _ => "''",
            };
            definition.push_str(&format!(" DEFAULT {}", zero));
        }
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            definition
        )]
    }

    fn modify_column(&self, _table: &str, _column: &str, _def: &FieldDef) -> Option<Vec<String>> {
        None
    }

    fn add_index(
        &self,
        table: &str,
        name: &str,
        columns: &[String],
        def: &IndexDef,
    ) -> Option<String> {
        let unique = match def.index_type {
            IndexType::Fulltext => return None,
            IndexType::Unique => "UNIQUE ",
            IndexType::Normal => "",
        };
        Some(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            unique,
            self.quote(name),
            self.quote(table),
            quoted_list(self, columns)
        ))
    }

    fn drop_index(&self, _table: &str, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDefinition;

    #[test]
    fn test_create_table_baseline() {
        assert_eq!(
            SqliteSchema.create_table("notes"),
            "CREATE TABLE IF NOT EXISTS \"notes\" (\"notes_id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"notes_datecreated\" DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, \
             \"notes_datemodified\" DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP)"
        );
    }

    #[test]
    fn test_add_required_column_gets_default() {
        let def = FieldDef::new("varchar").with_length("20").required();
        assert_eq!(
            SqliteSchema.add_column("t", "t_code", &def),
            vec!["ALTER TABLE \"t\" ADD COLUMN \"t_code\" varchar(20) NOT NULL DEFAULT ''".to_string()]
        );
        let count = FieldDef::new("int").required();
        assert!(SqliteSchema.add_column("t", "t_n", &count)[0].ends_with("NOT NULL DEFAULT 0"));
    }

    #[test]
    fn test_unsupported_steps() {
        assert!(SqliteSchema.modify_column("t", "t_a", &FieldDef::new("int")).is_none());
        let ft = IndexDef::new(vec!["a".into()]).with_type(IndexType::Fulltext);
        assert!(SqliteSchema.add_index("t", "t_ft", &["t_a".into()], &ft).is_none());
    }

    #[test]
    fn test_column_matches_pragma_output() {
        let def = FieldDef::new("varchar").with_length("20").with_default("x");
        let live = ColumnDefinition::new("t_c", "varchar(20)", true).with_default("'x'");
        assert!(SqliteSchema.column_matches(&def, &live));

        let virt = FieldDef::new("text").generated("t_a || t_b");
        let live = ColumnDefinition::new("t_v", "text", true).with_extra("GENERATED");
        assert!(SqliteSchema.column_matches(&virt, &live));
        let plain = ColumnDefinition::new("t_v", "text", true);
        assert!(!SqliteSchema.column_matches(&virt, &plain));
    }
}
