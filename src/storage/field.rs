//! Declared fields and indices.
//!
//! A field is declared either in full or as a shorthand string
//! `"type[(length)], class, component, description"`. Declarations may
//! `inherit` from an entry of the global type table, with the field's own
//! values winning. Both passes are pure: parsing produces a [`RawFieldDef`],
//! resolution merges the inheritance chain into a [`FieldDef`].

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

/// A field declaration as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldDecl {
    Shorthand(String),
    Full(RawFieldDef),
}

/// Field attributes before inheritance is resolved; every value is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFieldDef {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<LengthSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, rename = "virtual", skip_serializing_if = "Option::is_none")]
    pub is_virtual: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, alias = "description", skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<String>,
}

/// Length written as a number (`255`) or text (`"10,2"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LengthSpec {
    Number(u64),
    Text(String),
}

impl LengthSpec {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }
}

/// Default written as any scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultSpec {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl DefaultSpec {
    fn into_string(self) -> String {
        match self {
            Self::Bool(true) => "TRUE".to_string(),
            Self::Bool(false) => "FALSE".to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Text(s) => s,
        }
    }
}

/// A fully resolved field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Lowercased base type name without length (`varchar`, `int`, `json`).
    #[serde(rename = "type")]
    pub type_name: String,
    pub length: Option<String>,
    pub default: Option<String>,
    pub required: bool,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    pub expression: Option<String>,
    pub desc: Option<String>,
    pub class: Option<String>,
    pub component: Option<String>,
    pub unsigned: bool,
}

impl FieldDef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into().trim().to_lowercase(),
            ..Self::default()
        }
    }

    pub fn with_length(mut self, length: impl Into<String>) -> Self {
        self.length = Some(length.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Make the field a stored generated column.
    pub fn generated(mut self, expression: impl Into<String>) -> Self {
        self.is_virtual = true;
        self.expression = Some(expression.into());
        self
    }

    /// Declared type with its length, e.g. `varchar(255)`.
    pub fn full_type(&self) -> String {
        match &self.length {
            Some(len) if !len.is_empty() => format!("{}({})", self.type_name, len),
            _ => self.type_name.clone(),
        }
    }
}

/// Kind of index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexType {
    #[default]
    Normal,
    Unique,
    Fulltext,
}

impl FromStr for IndexType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NORMAL" | "INDEX" => Ok(Self::Normal),
            "UNIQUE" => Ok(Self::Unique),
            "FULLTEXT" => Ok(Self::Fulltext),
            other => Err(DbError::configuration(format!("unknown index type '{}'", other))),
        }
    }
}

/// Index access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexMethod {
    Btree,
    Hash,
}

impl IndexMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Btree => "BTREE",
            Self::Hash => "HASH",
        }
    }
}

/// A declared index over declared field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub fields: Vec<String>,
    #[serde(default, rename = "type")]
    pub index_type: IndexType,
    #[serde(default)]
    pub method: Option<IndexMethod>,
}

impl IndexDef {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            index_type: IndexType::Normal,
            method: None,
        }
    }

    pub fn with_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    pub fn with_method(mut self, method: IndexMethod) -> Self {
        self.method = Some(method);
        self
    }
}

// =============================================================================
// Pass 1: shorthand parsing
// =============================================================================

/// Split on commas that are not inside parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts
}

/// Split `varchar(255)` into `("varchar", Some("255"))`.
fn split_type(text: &str) -> (String, Option<String>) {
    let text = text.trim();
    match (text.find('('), text.rfind(')')) {
        (Some(open), Some(close)) if close > open => (
            text[..open].trim().to_lowercase(),
            Some(text[open + 1..close].trim().to_string()),
        ),
        _ => (text.to_lowercase(), None),
    }
}

/// Parse `"varchar(255), string, Text, Description"`.
///
/// When the type names an entry of `global_types`, the field inherits it.
pub fn parse_shorthand(text: &str, global_types: &BTreeMap<String, FieldDecl>) -> RawFieldDef {
    let parts = split_top_level(text);
    let non_empty = |i: usize| {
        parts
            .get(i)
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
    };

    let mut raw = RawFieldDef {
        class: non_empty(1),
        component: non_empty(2),
        desc: non_empty(3),
        ..RawFieldDef::default()
    };

    let (type_name, length) = split_type(parts.first().copied().unwrap_or_default());
    let (type_name, unsigned) = match type_name.strip_suffix(" unsigned") {
        Some(base) => (base.trim().to_string(), Some(true)),
        None => (type_name, None),
    };
    raw.unsigned = unsigned;
    if global_types.contains_key(&type_name) {
        raw.inherit = Some(type_name);
        raw.length = length.map(LengthSpec::Text);
    } else if !type_name.is_empty() {
        raw.type_name = Some(type_name);
        raw.length = length.map(LengthSpec::Text);
    }
    raw
}

// =============================================================================
// Pass 2: inheritance
// =============================================================================

/// Overlay `over` onto `base`; values present in `over` win.
fn merge(base: RawFieldDef, over: RawFieldDef) -> RawFieldDef {
    RawFieldDef {
        type_name: over.type_name.or(base.type_name),
        length: over.length.or(base.length),
        default: over.default.or(base.default),
        required: over.required.or(base.required),
        is_virtual: over.is_virtual.or(base.is_virtual),
        expression: over.expression.or(base.expression),
        desc: over.desc.or(base.desc),
        class: over.class.or(base.class),
        component: over.component.or(base.component),
        unsigned: over.unsigned.or(base.unsigned),
        inherit: None,
    }
}

fn to_raw(decl: &FieldDecl, global_types: &BTreeMap<String, FieldDecl>) -> RawFieldDef {
    match decl {
        FieldDecl::Shorthand(text) => parse_shorthand(text, global_types),
        FieldDecl::Full(raw) => raw.clone(),
    }
}

/// Follow `inherit` links, merging from the root down.
fn flatten(
    raw: RawFieldDef,
    global_types: &BTreeMap<String, FieldDecl>,
    seen: &mut HashSet<String>,
) -> DbResult<RawFieldDef> {
    let Some(parent) = raw.inherit.clone() else {
        return Ok(raw);
    };
    if !seen.insert(parent.clone()) {
        return Err(DbError::configuration(format!(
            "inheritance cycle through global type '{}'",
            parent
        )));
    }
    let base_decl = global_types.get(&parent).ok_or_else(|| {
        DbError::configuration(format!("unknown global type '{}' in inherit", parent))
    })?;
    let base = flatten(to_raw(base_decl, global_types), global_types, seen)?;
    Ok(merge(base, raw))
}

/// Resolve a declaration into a complete field.
pub fn resolve_field(
    name: &str,
    decl: &FieldDecl,
    global_types: &BTreeMap<String, FieldDecl>,
) -> DbResult<FieldDef> {
    let raw = flatten(to_raw(decl, global_types), global_types, &mut HashSet::new())?;
    let type_name = raw
        .type_name
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| DbError::configuration(format!("field '{}' has no type", name)))?;

    // A type written with its length in full form, e.g. type: "varchar(64)"
    let (type_name, inline_length) = split_type(&type_name);
    let is_virtual = raw.is_virtual.unwrap_or(false);
    if is_virtual && raw.expression.as_deref().is_none_or(|e| e.trim().is_empty()) {
        return Err(DbError::configuration(format!(
            "virtual field '{}' needs an expression",
            name
        )));
    }

    Ok(FieldDef {
        type_name,
        length: raw.length.map(LengthSpec::into_string).or(inline_length),
        default: raw.default.map(DefaultSpec::into_string),
        required: raw.required.unwrap_or(false),
        is_virtual,
        expression: raw.expression,
        desc: raw.desc,
        class: raw.class,
        component: raw.component,
        unsigned: raw.unsigned.unwrap_or(false),
    })
}
