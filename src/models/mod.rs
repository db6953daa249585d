//! Data models for the data access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod field;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionInfo, DriverKind};
pub use field::DataField;
pub use query::{
    DEFAULT_PAGE_SIZE, Params, QueryInfo, QueryOptions, QueryParam, QueryType, Row, StatementType,
};
pub use schema::{ColumnDefinition, IndexInfo, TableSchema};
