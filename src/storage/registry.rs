//! Declared storages, merged from the base configuration and module overlays.

use crate::error::{DbError, DbResult};
use crate::storage::field::{FieldDecl, FieldDef, IndexDef, resolve_field};
use crate::storage::schema::{column_name, index_name, is_baseline};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use tracing::debug;

/// The `storages` section: an optional global type table plus storages by name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoragesConfig {
    #[serde(default, rename = "__global_types")]
    pub global_types: BTreeMap<String, FieldDecl>,
    #[serde(flatten)]
    pub storages: JsonMap<String, JsonValue>,
}

/// One entry of the `modules` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub storages: StoragesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StorageConfig {
    #[serde(default, rename = "access-point", alias = "access_point")]
    access_point: Option<String>,
    #[serde(default, alias = "description")]
    desc: Option<String>,
    #[serde(default)]
    fields: JsonMap<String, JsonValue>,
    #[serde(default, alias = "indexes")]
    indices: JsonMap<String, JsonValue>,
}

/// A storage before field resolution; overlays merge at this level.
#[derive(Debug, Clone)]
struct RawStorage {
    access_point: Option<String>,
    desc: Option<String>,
    module: Option<String>,
    fields: Vec<(String, FieldDecl)>,
    indices: Vec<(String, IndexDef)>,
}

/// Replace an entry in place or append it.
fn upsert<T>(entries: &mut Vec<(String, T)>, name: String, value: T) {
    match entries.iter_mut().find(|(n, _)| *n == name) {
        Some(slot) => slot.1 = value,
        None => entries.push((name, value)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageField {
    pub name: String,
    pub def: FieldDef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageIndex {
    pub name: String,
    pub def: IndexDef,
}

/// A declared table (or collection) and its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Storage {
    pub name: String,
    pub access_point: String,
    pub desc: Option<String>,
    /// Module that declared the storage; `None` for the base configuration.
    pub module: Option<String>,
    pub fields: Vec<StorageField>,
    pub indices: Vec<StorageIndex>,
}

impl Storage {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.def)
    }

    /// Real column name of a field.
    pub fn column_name(&self, field: &str) -> String {
        column_name(&self.name, field)
    }

    /// Real name of an index.
    pub fn index_name(&self, index: &str) -> String {
        index_name(&self.name, index)
    }

    /// Real column names an index covers.
    pub fn index_columns(&self, index: &IndexDef) -> Vec<String> {
        index.fields.iter().map(|f| self.column_name(f)).collect()
    }
}

/// All declared storages in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Storages {
    storages: Vec<Storage>,
}

impl Storages {
    /// Merge module overlays onto the base section and resolve every field.
    pub fn from_config(
        base: &StoragesConfig,
        modules: &BTreeMap<String, ModuleConfig>,
    ) -> DbResult<Self> {
        let mut global_types = base.global_types.clone();
        let mut raw: Vec<(String, RawStorage)> = Vec::new();
        collect(&mut raw, &base.storages, None)?;

        for (module, config) in modules {
            global_types.extend(config.storages.global_types.clone());
            collect(&mut raw, &config.storages.storages, Some(module))?;
        }

        let storages = raw
            .into_iter()
            .map(|(name, storage)| resolve(name, storage, &global_types))
            .collect::<DbResult<Vec<_>>>()?;
        debug!(count = storages.len(), "Storages resolved");
        Ok(Self { storages })
    }

    pub fn get(&self, name: &str) -> Option<&Storage> {
        self.storages.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Storage> {
        self.storages.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.storages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    /// Storages by name; an empty list selects all of them.
    pub fn select(&self, names: &[String]) -> DbResult<Vec<&Storage>> {
        if names.is_empty() {
            return Ok(self.storages.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| DbError::configuration(format!("unknown storage '{}'", name)))
            })
            .collect()
    }
}

fn collect(
    raw: &mut Vec<(String, RawStorage)>,
    section: &JsonMap<String, JsonValue>,
    module: Option<&String>,
) -> DbResult<()> {
    for (name, value) in section {
        let config: StorageConfig = serde_json::from_value(value.clone()).map_err(|e| {
            DbError::configuration(format!("storage '{}': {}", name, e))
        })?;

        let mut fields = Vec::with_capacity(config.fields.len());
        for (field, decl) in config.fields {
            let decl: FieldDecl = serde_json::from_value(decl).map_err(|e| {
                DbError::configuration(format!("storage '{}' field '{}': {}", name, field, e))
            })?;
            fields.push((field, decl));
        }
        let mut indices = Vec::with_capacity(config.indices.len());
        for (index, def) in config.indices {
            let def: IndexDef = serde_json::from_value(def).map_err(|e| {
                DbError::configuration(format!("storage '{}' index '{}': {}", name, index, e))
            })?;
            indices.push((index, def));
        }

        match raw.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => {
                debug!(storage = %name, module = ?module, "Extending storage");
                if config.access_point.is_some() {
                    existing.access_point = config.access_point;
                }
                if config.desc.is_some() {
                    existing.desc = config.desc;
                }
                for (field, decl) in fields {
                    upsert(&mut existing.fields, field, decl);
                }
                for (index, def) in indices {
                    upsert(&mut existing.indices, index, def);
                }
            }
            None => raw.push((
                name.clone(),
                RawStorage {
                    access_point: config.access_point,
                    desc: config.desc,
                    module: module.cloned(),
                    fields,
                    indices,
                },
            )),
        }
    }
    Ok(())
}

fn resolve(
    name: String,
    raw: RawStorage,
    global_types: &BTreeMap<String, FieldDecl>,
) -> DbResult<Storage> {
    let access_point = raw
        .access_point
        .filter(|ap| !ap.is_empty())
        .ok_or_else(|| DbError::configuration(format!("storage '{}' has no access-point", name)))?;

    let mut fields = Vec::with_capacity(raw.fields.len());
    for (field, decl) in &raw.fields {
        if is_baseline(field) {
            return Err(DbError::configuration(format!(
                "storage '{}' field '{}' collides with a baseline column",
                name, field
            )));
        }
        let def = resolve_field(field, decl, global_types)
            .map_err(|e| DbError::configuration(format!("storage '{}': {}", name, e.message())))?;
        fields.push(StorageField {
            name: field.clone(),
            def,
        });
    }

    for (index, def) in &raw.indices {
        if def.fields.is_empty() {
            return Err(DbError::configuration(format!(
                "storage '{}' index '{}' has no fields",
                name, index
            )));
        }
        if let Some(unknown) = def
            .fields
            .iter()
            .find(|f| !is_baseline(f) && !raw.fields.iter().any(|(n, _)| n == *f))
        {
            return Err(DbError::configuration(format!(
                "storage '{}' index '{}' names unknown field '{}'",
                name, index, unknown
            )));
        }
    }

    Ok(Storage {
        name,
        access_point,
        desc: raw.desc,
        module: raw.module,
        fields,
        indices: raw
            .indices
            .into_iter()
            .map(|(name, def)| StorageIndex { name, def })
            .collect(),
    })
}
