//! Declarative storages and their migration.
//!
//! - `field`: field and index declarations, shorthand parsing, inheritance
//! - `registry`: storages merged from the base configuration and modules
//! - `schema`: DDL rendering and live-schema comparison per dialect
//! - `migration`: the migrator and its reports

pub mod field;
pub mod migration;
pub mod registry;
pub mod schema;

pub use field::{FieldDecl, FieldDef, IndexDef, IndexMethod, IndexType, RawFieldDef};
pub use migration::{MigrateOptions, MigrationReport, MigrationStep, Migrator, StepKind, StepStatus};
pub use registry::{ModuleConfig, Storage, StorageField, StorageIndex, Storages, StoragesConfig};
pub use schema::SchemaBuilder;
