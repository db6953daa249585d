//! Relational connection drivers.
//!
//! - `mysql`, `postgres`, `sqlite`: one sqlx connection each
//! - `mssql`: tiberius over a tokio `TcpStream`
//!
//! The modules are intentionally parallel so dialect differences stand out.

mod mssql;
mod mysql;
mod postgres;
mod sqlite;

pub use mssql::MsSqlDriver;
pub use mysql::MySqlDriver;
pub use postgres::PgSqlDriver;
pub use sqlite::SqliteDriver;
