//! SQLite connection over a single sqlx connection.
//!
//! The database name is the file path; `:memory:` opens a private in-memory
//! database. Missing files are created.

use crate::db::connection::{
    Connection, ConnectionState, Execution, connect_timeout, not_open, open_failure,
    track_failure, with_connect_timeout,
};
use crate::db::macros::{sqlx_execute, sqlx_fetch_all};
use crate::db::params::{BoundQuery, bind_sqlite_value};
use crate::db::reader::ResultSet;
use crate::db::schema;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, TableSchema};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection as _, SqliteConnection};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteDriver {
    info: ConnectionInfo,
    conn: Option<SqliteConnection>,
    state: ConnectionState,
}

impl SqliteDriver {
    pub fn new(info: ConnectionInfo) -> Self {
        Self {
            info,
            conn: None,
            state: ConnectionState::Closed,
        }
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = if self.info.database.is_empty() || self.info.database == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| open_failure(&self.info, DbError::from(e)))?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.info.database)
                .create_if_missing(true)
        };
        let foreign_keys = self.info.option("foreign_keys") != Some("false");
        Ok(options
            .foreign_keys(foreign_keys)
            .busy_timeout(connect_timeout(&self.info)))
    }
}

#[async_trait]
impl Connection for SqliteDriver {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn open(&mut self) -> DbResult<()> {
        if self.state == ConnectionState::Open {
            return Ok(());
        }
        let options = self.connect_options()?;
        let info = &self.info;
        let conn = with_connect_timeout(info, async {
            options
                .connect()
                .await
                .map_err(|e| open_failure(info, DbError::from(e)))
        })
        .await?;

        info!(endpoint = %self.info.endpoint(), "SQLite connection opened");
        self.conn = Some(conn);
        self.state = ConnectionState::Open;
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "SQLite close failed");
            }
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    async fn ping(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) if self.state == ConnectionState::Open => conn.ping().await.is_ok(),
            _ => false,
        }
    }

    async fn fetch(&mut self, query: &BoundQuery) -> DbResult<ResultSet> {
        let conn = match self.conn.as_mut() {
            Some(conn) if self.state == ConnectionState::Open => conn,
            _ => return Err(not_open(&self.info)),
        };
        let rows = sqlx_fetch_all!(conn, query, bind_sqlite_value)
            .map_err(|e| track_failure(&mut self.state, DbError::from(e), query))?;

        let fields = rows.first().map(|r| r.data_fields()).unwrap_or_default();
        Ok(ResultSet::new(
            fields,
            rows.iter().map(|r| r.to_json_map()).collect(),
        ))
    }

    async fn execute(&mut self, query: &BoundQuery) -> DbResult<Execution> {
        let conn = match self.conn.as_mut() {
            Some(conn) if self.state == ConnectionState::Open => conn,
            _ => return Err(not_open(&self.info)),
        };
        let result = sqlx_execute!(conn, query, bind_sqlite_value)
            .map_err(|e| track_failure(&mut self.state, DbError::from(e), query))?;

        let last_id = result.last_insert_rowid();
        Ok(Execution {
            affected: result.rows_affected(),
            last_insert_id: (last_id > 0).then_some(last_id),
        })
    }

    async fn describe_table(&mut self, table: &str) -> DbResult<Option<TableSchema>> {
        let conn = match self.conn.as_mut() {
            Some(conn) if self.state == ConnectionState::Open => conn,
            _ => return Err(not_open(&self.info)),
        };
        schema::sqlite::describe_table(conn, table)
            .await
            .map_err(|e| track_failure(&mut self.state, e, &BoundQuery::raw(table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DriverKind;

    fn memory() -> SqliteDriver {
        SqliteDriver::new(ConnectionInfo::new(DriverKind::Sqlite, "", ":memory:"))
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut conn = memory();
        assert!(!conn.is_open());
        assert!(!conn.ping().await);

        conn.open().await.unwrap();
        assert!(conn.is_open());
        assert!(conn.ping().await);

        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.fetch(&BoundQuery::raw("SELECT 1")).await.is_err());

        conn.reopen().await.unwrap();
        assert!(conn.ping().await);
    }

    #[tokio::test]
    async fn test_execute_and_fetch() {
        let mut conn = memory();
        conn.open().await.unwrap();
        conn.execute(&BoundQuery::raw(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
        ))
        .await
        .unwrap();

        let done = conn
            .execute(&BoundQuery::raw("INSERT INTO t (name) VALUES ('a')"))
            .await
            .unwrap();
        assert_eq!(done.affected, 1);
        assert_eq!(done.last_insert_id, Some(1));

        let result = conn
            .fetch(&BoundQuery::raw("SELECT id, name FROM t"))
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["name"], serde_json::json!("a"));
        assert_eq!(result.fields.len(), 2);
    }

    #[tokio::test]
    async fn test_syntax_error_keeps_connection_open() {
        let mut conn = memory();
        conn.open().await.unwrap();
        let err = conn
            .execute(&BoundQuery::raw("SELEC nothing"))
            .await
            .unwrap_err();
        assert!(err.is_query_error());
        assert_eq!(err.query_text(), Some("SELEC nothing"));
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_describe_table() {
        let mut conn = memory();
        conn.open().await.unwrap();
        assert!(conn.describe_table("missing").await.unwrap().is_none());

        conn.execute(&BoundQuery::raw(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, email TEXT NOT NULL DEFAULT '')",
        ))
        .await
        .unwrap();
        conn.execute(&BoundQuery::raw("CREATE UNIQUE INDEX t_email ON t (email)"))
            .await
            .unwrap();

        let schema = conn.describe_table("t").await.unwrap().unwrap();
        assert_eq!(schema.primary_key, vec!["id".to_string()]);
        assert!(!schema.column("email").unwrap().nullable);
        let idx = schema.index("t_email").unwrap();
        assert!(idx.is_unique);
        assert_eq!(idx.columns, vec!["email".to_string()]);
    }
}
