//! Statement execution macros shared by the sqlx drivers.
//!
//! MySQL, PostgreSQL and SQLite take the same two paths: a bound query when
//! the statement carries values, and the raw text protocol otherwise (some
//! statements such as `CREATE PROCEDURE` or `PRAGMA` do not support prepared
//! execution). The macros expand in place so each driver keeps its own
//! concrete row and argument types.

/// Fetch every row of a [`BoundQuery`](crate::db::params::BoundQuery).
///
/// ```ignore
/// let rows = sqlx_fetch_all!(conn, query, bind_mysql_value)?;
/// ```
macro_rules! sqlx_fetch_all {
    ($conn:expr, $query:expr, $bind:path) => {{
        use sqlx::Executor as _;
        if $query.has_values() {
            let mut bound = sqlx::query($query.sql.as_str());
            for value in &$query.values {
                bound = $bind(bound, value);
            }
            bound.fetch_all(&mut *$conn).await
        } else {
            (&mut *$conn).fetch_all($query.sql.as_str()).await
        }
    }};
}

/// Execute a [`BoundQuery`](crate::db::params::BoundQuery) for its side effects.
macro_rules! sqlx_execute {
    ($conn:expr, $query:expr, $bind:path) => {{
        use sqlx::Executor as _;
        if $query.has_values() {
            let mut bound = sqlx::query($query.sql.as_str());
            for value in &$query.values {
                bound = $bind(bound, value);
            }
            bound.execute(&mut *$conn).await
        } else {
            (&mut *$conn).execute($query.sql.as_str()).await
        }
    }};
}

pub(crate) use sqlx_execute;
pub(crate) use sqlx_fetch_all;
