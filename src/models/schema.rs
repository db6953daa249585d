//! Schema-related data models.
//!
//! Live table metadata as reported by a connection. The migration engine
//! compares these against declared storages.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexInfo>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    /// Add a column definition.
    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        if column.is_primary_key {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: IndexInfo) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Look up an index by name (case-insensitive).
    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Full type (e.g., `varchar(30)`, `bigint unsigned`)
    pub data_type: String,
    pub nullable: bool,
    /// Raw default expression as reported by the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    /// MySQL only (e.g., `auto_increment`, `STORED GENERATED`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default_value: None,
            is_primary_key: false,
            extra: None,
            generation_expression: None,
            comment: None,
        }
    }

    /// Set whether this is a primary key column.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }

    /// Set the default expression.
    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    /// Set the extra attributes (MySQL only).
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    /// Set the generation expression of a virtual column.
    pub fn with_generation_expression(mut self, expr: impl Into<String>) -> Self {
        let expr = expr.into();
        if !expr.is_empty() {
            self.generation_expression = Some(expr);
        }
        self
    }

    /// Set the column comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Whether the column is computed by the engine.
    pub fn is_generated(&self) -> bool {
        self.generation_expression.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    /// BTREE, HASH, FULLTEXT, GIN, GIST, etc.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_algorithm: Option<String>,
}

impl IndexInfo {
    /// Create a new index info.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            is_unique: false,
            is_primary: false,
            index_algorithm: None,
        }
    }

    /// Set whether this is a unique index.
    pub fn with_unique(mut self, is_unique: bool) -> Self {
        self.is_unique = is_unique;
        self
    }

    /// Set whether this is the primary key index.
    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        if is_primary {
            self.is_unique = true;
        }
        self
    }

    /// Set the index algorithm (BTREE, HASH, FULLTEXT, GIN, etc.).
    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        let algorithm = algorithm.into();
        if !algorithm.is_empty() {
            self.index_algorithm = Some(algorithm.to_uppercase());
        }
        self
    }

    /// Whether the engine reports a fulltext index.
    pub fn is_fulltext(&self) -> bool {
        self.index_algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("FULLTEXT"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_schema_lookup() {
        let schema = TableSchema::new("users")
            .with_column(ColumnDefinition::new("users_id", "bigint", false).with_primary_key(true))
            .with_column(ColumnDefinition::new("users_name", "varchar(255)", true))
            .with_index(IndexInfo::new("users_idx_name", vec!["users_name".into()]));

        assert_eq!(schema.primary_key, vec!["users_id".to_string()]);
        assert!(schema.column("USERS_NAME").is_some());
        assert!(schema.column("users_email").is_none());
        assert!(schema.index("users_idx_name").is_some());
    }

    #[test]
    fn test_index_info_flags() {
        let idx = IndexInfo::new("PRIMARY", vec!["id".into()]).with_primary(true);
        assert!(idx.is_unique);

        let ft = IndexInfo::new("ft", vec!["body".into()]).with_algorithm("fulltext");
        assert!(ft.is_fulltext());
        assert_eq!(ft.index_algorithm.as_deref(), Some("FULLTEXT"));
    }

    #[test]
    fn test_generated_column() {
        let col = ColumnDefinition::new("t_full", "varchar(255)", true)
            .with_generation_expression("concat(a, b)");
        assert!(col.is_generated());
        let plain = ColumnDefinition::new("t_a", "int", true).with_generation_expression("");
        assert!(!plain.is_generated());
    }
}
