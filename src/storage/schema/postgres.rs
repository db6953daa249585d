//! PostgreSQL DDL.

use super::{SchemaBuilder, canonical_type, length_or, quoted_list};
use crate::models::{DriverKind, IndexInfo};
use crate::storage::field::{FieldDef, IndexDef, IndexType};

#[derive(Debug, Clone, Copy, Default)]
pub struct PgSqlSchema;

impl SchemaBuilder for PgSqlSchema {
    fn driver(&self) -> DriverKind {
        DriverKind::PgSql
    }

    fn honors_index_method(&self) -> bool {
        true
    }

    fn create_table(&self, table: &str) -> String {
        let col = |suffix: &str| self.quote(&format!("{}_{}", table, suffix));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             {} BIGSERIAL NOT NULL, \
             {} TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
             {} TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
             PRIMARY KEY ({}))",
            self.quote(table),
            col("id"),
            col("datecreated"),
            col("datemodified"),
            col("id"),
        )
    }

    fn column_type(&self, def: &FieldDef) -> String {
        let with_length = |name: &str| match &def.length {
            Some(len) if !len.is_empty() => format!("{}({})", name, len),
            _ => name.to_string(),
        };
        match def.type_name.as_str() {
            "bool" | "boolean" => "boolean".to_string(),
            "tinyint" | "smallint" => "smallint".to_string(),
            "mediumint" | "int" | "integer" => "integer".to_string(),
            "bigint" => "bigint".to_string(),
            "float" | "real" => "real".to_string(),
            "double" => "double precision".to_string(),
            "decimal" | "numeric" => with_length("numeric"),
            "datetime" | "timestamp" => "timestamp".to_string(),
            "tinytext" | "mediumtext" | "longtext" | "text" => "text".to_string(),
            "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
                "bytea".to_string()
            }
            "enum" | "set" => "varchar(255)".to_string(),
            "varchar" => format!("varchar({})", length_or(def, "255")),
            _ => def.full_type(),
        }
    }

    fn bool_default(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn uuid_expression(&self) -> &'static str {
        "gen_random_uuid()"
    }

    fn modify_column(&self, table: &str, column: &str, def: &FieldDef) -> Option<Vec<String>> {
        let col = self.quote(column);
        let actions = if def.is_virtual {
            vec![format!(
                "ALTER COLUMN {} SET EXPRESSION AS ({})",
                col,
                def.expression.as_deref().unwrap_or_default()
            )]
        } else {
            let ty = self.column_type(def);
            vec![
                format!("ALTER COLUMN {} TYPE {} USING {}::{}", col, ty, col, ty),
                match self.default_literal(def) {
                    Some(default) => format!("ALTER COLUMN {} SET DEFAULT {}", col, default),
                    None => format!("ALTER COLUMN {} DROP DEFAULT", col),
                },
                format!(
                    "ALTER COLUMN {} {} NOT NULL",
                    col,
                    if def.required { "SET" } else { "DROP" }
                ),
            ]
        };
        Some(vec![format!(
            "ALTER TABLE {} {}",
            self.quote(table),
            actions.join(", ")
        )])
    }

    fn add_index(
        &self,
        table: &str,
        name: &str,
        columns: &[String],
        def: &IndexDef,
    ) -> Option<String> {
        if def.index_type == IndexType::Fulltext {
            let document = columns
                .iter()
                .map(|c| format!("coalesce({}::text, '')", self.quote(c)))
                .collect::<Vec<_>>()
                .join(" || ' ' || ");
            return Some(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING gin (to_tsvector('simple', {}))",
                self.quote(name),
                self.quote(table),
                document
            ));
        }
        let unique = if def.index_type == IndexType::Unique { "UNIQUE " } else { "" };
        let method = def.method.map(|m| m.as_str()).unwrap_or("BTREE");
        Some(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} USING {} ({})",
            unique,
            self.quote(name),
            self.quote(table),
            method.to_lowercase(),
            quoted_list(self, columns)
        ))
    }

    fn drop_index(&self, _table: &str, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote(name))
    }

    /// `format_type` spells types out in full; fold them to the short names.
    fn canonical_type(&self, type_text: &str) -> String {
        let lower = type_text.trim().to_lowercase();
        let folded = lower
            .replace("character varying", "varchar")
            .replace("timestamp without time zone", "timestamp")
            .replace("time without time zone", "time");
        let folded = match folded.strip_prefix("character") {
            Some(rest) => format!("char{}", rest),
            None => folded,
        };
        let folded = match folded.as_str() {
            "int4" | "int" => "integer".to_string(),
            "int8" => "bigint".to_string(),
            "int2" => "smallint".to_string(),
            "bool" => "boolean".to_string(),
            "float8" => "double precision".to_string(),
            "float4" => "real".to_string(),
            _ => folded,
        };
        canonical_type(&folded)
    }

    fn live_is_fulltext(&self, live: &IndexInfo) -> bool {
        live.index_algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("GIN"))
    }

    /// Fulltext indexes are built on an expression, so only the method is compared.
    fn index_matches(&self, columns: &[String], def: &IndexDef, live: &IndexInfo) -> bool {
        if def.index_type == IndexType::Fulltext {
            return self.live_is_fulltext(live);
        }
        let same_columns = columns.len() == live.columns.len()
            && columns
                .iter()
                .zip(&live.columns)
                .all(|(a, b)| a.eq_ignore_ascii_case(b));
        let method = def.method.map(|m| m.as_str()).unwrap_or("BTREE");
        same_columns
            && (def.index_type == IndexType::Unique) == live.is_unique
            && live
                .index_algorithm
                .as_deref()
                .is_none_or(|a| a.eq_ignore_ascii_case(method))
    }
}
