//! Result column metadata.

use serde::{Deserialize, Serialize};

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataField {
    pub name: String,
    pub original_name: String,
    pub table: String,
    pub original_table: String,
    /// Engine type name, lowercased (e.g. `varchar`, `int8`).
    #[serde(rename = "type")]
    pub type_name: String,
    pub length: Option<u32>,
    pub decimals: Option<u32>,
    pub flags: Vec<String>,
    /// Identifier quoted for the producing dialect.
    pub escaped: String,
}

impl DataField {
    /// Create field metadata with the name used for every name slot.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            original_name: name.clone(),
            escaped: name.clone(),
            name,
            table: String::new(),
            original_table: String::new(),
            type_name: type_name.into().to_lowercase(),
            length: None,
            decimals: None,
            flags: Vec::new(),
        }
    }

    /// Set the source table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        self.original_table = table.clone();
        self.table = table;
        self
    }

    /// Set the quoted identifier.
    pub fn with_escaped(mut self, escaped: impl Into<String>) -> Self {
        self.escaped = escaped.into();
        self
    }

    /// Set the declared length.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Add a flag such as `not_null` or `binary`.
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_field_builder() {
        let field = DataField::new("id", "INT8")
            .with_table("users")
            .with_escaped("`id`")
            .with_flag("not_null");
        assert_eq!(field.original_name, "id");
        assert_eq!(field.type_name, "int8");
        assert_eq!(field.original_table, "users");
        assert_eq!(field.escaped, "`id`");
        assert_eq!(field.flags, vec!["not_null".to_string()]);
    }
}
