//! Relational data access.
//!
//! - `connection` and `drivers`: one live engine handle per access point
//! - `params`: `[[name:type]]` placeholder binding
//! - `builder`: pure DML rendering per dialect
//! - `command` and `reader`: query execution and forward-only results
//! - `access_point` and `registry`: named facades and their cache

pub mod access_point;
pub mod builder;
pub mod command;
pub mod connection;
pub mod drivers;
#[macro_use]
pub mod macros;
pub mod params;
pub mod reader;
pub mod registry;
pub mod schema;
pub mod statement;
pub mod types;

pub use access_point::{DataAccessPoint, QueryOutcome};
pub use builder::QueryBuilder;
pub use command::Command;
pub use connection::{Connection, ConnectionState, Execution};
pub use reader::{DataReader, ResultSet};
pub use registry::{AccessPoint, DataAccessPoints, DriverEntry, DriverRegistry};
