//! PostgreSQL connection over a single sqlx connection.
//!
//! There is no connection-level insert id; callers ask for generated values
//! with a `RETURNING` clause instead.

use crate::db::connection::{
    Connection, ConnectionState, Execution, not_open, open_failure, track_failure,
    with_connect_timeout,
};
use crate::db::macros::{sqlx_execute, sqlx_fetch_all};
use crate::db::params::{BoundQuery, bind_pg_value};
use crate::db::reader::ResultSet;
use crate::db::schema;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, TableSchema};
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection as _, PgConnection};
use tracing::{debug, info};

pub struct PgSqlDriver {
    info: ConnectionInfo,
    conn: Option<PgConnection>,
    state: ConnectionState,
}

impl PgSqlDriver {
    pub fn new(info: ConnectionInfo) -> Self {
        Self {
            info,
            conn: None,
            state: ConnectionState::Closed,
        }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.info.host)
            .port(self.info.port_or_default())
            .username(&self.info.user);
        if !self.info.password.is_empty() {
            options = options.password(&self.info.password);
        }
        if !self.info.database.is_empty() {
            options = options.database(&self.info.database);
        }
        if let Some(name) = self.info.option("application_name") {
            options = options.application_name(name);
        }
        options
    }
}

#[async_trait]
impl Connection for PgSqlDriver {
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
        let options = self.connect_options();
        let info = &self.info;
        let conn = with_connect_timeout(info, async {
            options
                .connect()
                .await
                .map_err(|e| open_failure(info, DbError::from(e)))
        })
        .await?;

        info!(endpoint = %self.info.endpoint(), "PostgreSQL connection opened");
        self.conn = Some(conn);
        self.state = ConnectionState::Open;
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "PostgreSQL close failed");
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
        let rows = sqlx_fetch_all!(conn, query, bind_pg_value)
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
        let result = sqlx_execute!(conn, query, bind_pg_value)
            .map_err(|e| track_failure(&mut self.state, DbError::from(e), query))?;

        Ok(Execution {
            affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    async fn describe_table(&mut self, table: &str) -> DbResult<Option<TableSchema>> {
        let conn = match self.conn.as_mut() {
            Some(conn) if self.state == ConnectionState::Open => conn,
            _ => return Err(not_open(&self.info)),
        };
        schema::postgres::describe_table(conn, table)
            .await
            .map_err(|e| track_failure(&mut self.state, e, &BoundQuery::raw(table)))
    }
}
