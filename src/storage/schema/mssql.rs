//! MsSql DDL.

use super::{SchemaBuilder, length_or, quoted_list};
use crate::models::DriverKind;
use crate::storage::field::{FieldDef, IndexDef, IndexType};

#[derive(Debug, Clone, Copy, Default)]
pub struct MsSqlSchema;

impl SchemaBuilder for MsSqlSchema {
    fn driver(&self) -> DriverKind {
        DriverKind::MsSql
    }

    /// Defaults are named constraints; `ALTER COLUMN` cannot change them.
    fn compares_default(&self) -> bool {
        false
    }

    fn create_table(&self, table: &str) -> String {
        let col = |suffix: &str| self.quote(&format!("{}_{}", table, suffix));
        format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {} (\
             {} BIGINT IDENTITY(1,1) NOT NULL, \
             {} DATETIME2 NOT NULL DEFAULT SYSDATETIME(), \
             {} DATETIME2 NOT NULL DEFAULT SYSDATETIME(), \
             CONSTRAINT {} PRIMARY KEY ({}))",
            table.replace('\'', "''"),
            self.quote(table),
            col("id"),
            col("datecreated"),
            col("datemodified"),
            self.quote(&format!("PK_{}", table)),
            col("id"),
        )
    }

    fn column_type(&self, def: &FieldDef) -> String {
        match def.type_name.as_str() {
            "bool" | "boolean" => "bit".to_string(),
            "mediumint" | "integer" => "int".to_string(),
            "double" => "float".to_string(),
            "float" => "real".to_string(),
            "datetime" | "timestamp" => "datetime2".to_string(),
            "varchar" | "nvarchar" => format!("nvarchar({})", length_or(def, "255")),
            "char" | "nchar" => format!("nchar({})", length_or(def, "1")),
            "text" | "tinytext" | "mediumtext" | "longtext" | "json" => {
                "nvarchar(max)".to_string()
            }
            "blob" | "tinyblob" | "mediumblob" | "longblob" => "varbinary(max)".to_string(),
            "enum" | "set" => "nvarchar(255)".to_string(),
            _ => def.full_type(),
        }
    }

    fn uuid_expression(&self) -> &'static str {
        "NEWID()"
    }

    /// Computed columns have no declared type.
    fn column_definition(&self, column: &str, def: &FieldDef) -> String {
        if def.is_virtual {
            return format!(
                "{} AS ({}) PERSISTED",
                self.quote(column),
                def.expression.as_deref().unwrap_or_default()
            );
        }
        let mut parts = vec![
            self.quote(column),
            self.column_type(def),
            if def.required { "NOT NULL" } else { "NULL" }.to_string(),
        ];
        if let Some(default) = self.default_literal(def) {
            parts.push(format!("DEFAULT {}", default));
        }
        parts.join(" ")
    }

    fn add_column(&self, table: &str, column: &str, def: &FieldDef) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD {}",
            self.quote(table),
            self.column_definition(column, def)
        )]
    }

    fn modify_column(&self, table: &str, column: &str, def: &FieldDef) -> Option<Vec<String>> {
        if def.is_virtual {
            return None;
        }
        Some(vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} {} {}",
            self.quote(table),
            self.quote(column),
            self.column_type(def),
            if def.required { "NOT NULL" } else { "NULL" }
        )])
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
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            self.quote(name),
            self.quote(table),
            quoted_list(self, columns)
        ))
    }

    fn drop_index(&self, table: &str, name: &str) -> String {
        format!("DROP INDEX {} ON {}", self.quote(name), self.quote(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDefinition;

    #[test]
    fn test_create_table_baseline() {
        let sql = MsSqlSchema.create_table("users");
        assert!(sql.starts_with("IF OBJECT_ID(N'users', N'U') IS NULL CREATE TABLE [users]"));
        assert!(sql.contains("[users_id] BIGINT IDENTITY(1,1) NOT NULL"));
        assert!(sql.contains("CONSTRAINT [PK_users] PRIMARY KEY ([users_id])"));
    }

    #[test]
    fn test_columns() {
        let def = FieldDef::new("varchar").with_length("40").required();
        assert_eq!(
            MsSqlSchema.add_column("t", "t_name", &def),
            vec!["ALTER TABLE [t] ADD [t_name] nvarchar(40) NOT NULL".to_string()]
        );
        assert_eq!(
            MsSqlSchema.modify_column("t", "t_name", &def).unwrap(),
            vec!["ALTER TABLE [t] ALTER COLUMN [t_name] nvarchar(40) NOT NULL".to_string()]
        );
        let virt = FieldDef::new("int").generated("t_a + t_b");
        assert_eq!(
            MsSqlSchema.column_definition("t_sum", &virt),
            "[t_sum] AS (t_a + t_b) PERSISTED"
        );
        assert!(MsSqlSchema.modify_column("t", "t_sum", &virt).is_none());
    }

    #[test]
    fn test_column_matches_information_schema() {
        let body = FieldDef::new("text");
        let live = ColumnDefinition::new("t_body", "nvarchar(max)", true);
        assert!(MsSqlSchema.column_matches(&body, &live));

        let flag = FieldDef::new("bool").required().with_default("1");
        let live = ColumnDefinition::new("t_flag", "bit", false).with_default("((0))");
        assert!(MsSqlSchema.column_matches(&flag, &live));
    }

    #[test]
    fn test_fulltext_is_skipped() {
        let ft = IndexDef::new(vec!["a".into()]).with_type(IndexType::Fulltext);
        assert!(MsSqlSchema.add_index("t", "t_ft", &["t_a".into()], &ft).is_none());
        assert_eq!(MsSqlSchema.drop_index("t", "t_ix"), "DROP INDEX [t_ix] ON [t]");
    }
}
