//! Colibri data access library.
//!
//! One facade over relational engines (MySQL, PostgreSQL, MsSql, SQLite) and
//! document stores (MongoDB, Solr): named access points with `[[name:type]]`
//! query templates, pagination and upsert, plus declarative storages migrated
//! against the live schema.

pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod models;
pub mod nosql;
pub mod storage;

pub use config::{Config, FileConfig};
pub use db::{DataAccessPoint, DataAccessPoints, DriverRegistry};
pub use error::{DbError, DbResult};
