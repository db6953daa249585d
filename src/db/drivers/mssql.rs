//! MsSql connection over tiberius on a tokio `TcpStream`.
//!
//! Parameterised statements go through `sp_executesql` with `@P1..@Pn`
//! markers; transaction control is sent as a plain batch so it survives the
//! procedure boundary. The insert id comes from `@@IDENTITY`.

use crate::db::connection::{
    Connection, ConnectionState, Execution, not_open, open_failure, track_failure,
    with_connect_timeout,
};
use crate::db::params::{BoundQuery, bind_mssql_value};
use crate::db::reader::ResultSet;
use crate::db::statement::classify;
use crate::db::types::mssql::{data_fields, row_to_json};
use crate::db::schema;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, DriverKind, StatementType, TableSchema};
use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

type MsSqlClient = Client<Compat<TcpStream>>;

pub struct MsSqlDriver {
    info: ConnectionInfo,
    client: Option<MsSqlClient>,
    state: ConnectionState,
}

impl MsSqlDriver {
    pub fn new(info: ConnectionInfo) -> Self {
        Self {
            info,
            client: None,
            state: ConnectionState::Closed,
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.info.host);
        config.port(self.info.port_or_default());
        if !self.info.database.is_empty() {
            config.database(&self.info.database);
        }
        config.authentication(AuthMethod::sql_server(&self.info.user, &self.info.password));
        if self.info.option("trust_cert") != Some("false") {
            config.trust_cert();
        }
        config
    }

    /// Send a statement as a plain batch, discarding any rows.
    async fn batch(&mut self, sql: &str) -> DbResult<()> {
        let client = match self.client.as_mut() {
            Some(client) if self.state == ConnectionState::Open => client,
            _ => return Err(not_open(&self.info)),
        };
        let result = async {
            client.simple_query(sql).await?.into_results().await?;
            Ok::<_, DbError>(())
        }
        .await;
        result.map_err(|e| track_failure(&mut self.state, e, &BoundQuery::raw(sql)))
    }
}

async fn last_identity(client: &mut MsSqlClient) -> DbResult<Option<i64>> {
    let row = client
        .simple_query("SELECT CAST(@@IDENTITY AS BIGINT) AS id")
        .await?
        .into_row()
        .await?;
    Ok(row.and_then(|r| r.try_get::<i64, _>(0).ok().flatten()))
}

#[async_trait]
impl Connection for MsSqlDriver {
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
        let config = self.config();
        let info = &self.info;
        let client = with_connect_timeout(info, async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| open_failure(info, DbError::from(e)))?;
            tcp.set_nodelay(true)
                .map_err(|e| open_failure(info, DbError::from(e)))?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| open_failure(info, DbError::from(e)))
        })
        .await?;

        info!(endpoint = %self.info.endpoint(), "MsSql connection opened");
        self.client = Some(client);
        self.state = ConnectionState::Open;
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                debug!(error = %e, "MsSql close failed");
            }
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    async fn ping(&mut self) -> bool {
        self.batch("SELECT 1").await.is_ok()
    }

    async fn fetch(&mut self, query: &BoundQuery) -> DbResult<ResultSet> {
        let client = match self.client.as_mut() {
            Some(client) if self.state == ConnectionState::Open => client,
            _ => return Err(not_open(&self.info)),
        };
        let rows = async {
            let mut statement = Query::new(query.sql.as_str());
            for value in &query.values {
                bind_mssql_value(&mut statement, value);
            }
            let rows = statement.query(client).await?.into_first_result().await?;
            Ok::<_, DbError>(rows)
        }
        .await
        .map_err(|e| track_failure(&mut self.state, e, query))?;

        let fields = rows.first().map(data_fields).unwrap_or_default();
        Ok(ResultSet::new(fields, rows.into_iter().map(row_to_json).collect()))
    }

    async fn execute(&mut self, query: &BoundQuery) -> DbResult<Execution> {
        let client = match self.client.as_mut() {
            Some(client) if self.state == ConnectionState::Open => client,
            _ => return Err(not_open(&self.info)),
        };
        let wants_identity = matches!(
            classify(&query.sql, DriverKind::MsSql),
            StatementType::Insert | StatementType::Upsert
        );
        let execution = async {
            let mut statement = Query::new(query.sql.as_str());
            for value in &query.values {
                bind_mssql_value(&mut statement, value);
            }
            let affected = statement.execute(&mut *client).await?.total();
            let last_insert_id = if wants_identity {
                last_identity(&mut *client).await?
            } else {
                None
            };
            Ok::<_, DbError>(Execution {
                affected,
                last_insert_id,
            })
        }
        .await
        .map_err(|e| track_failure(&mut self.state, e, query))?;
        Ok(execution)
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.batch("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.batch("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.batch("ROLLBACK TRANSACTION").await
    }

    async fn describe_table(&mut self, table: &str) -> DbResult<Option<TableSchema>> {
        let client = match self.client.as_mut() {
            Some(client) if self.state == ConnectionState::Open => client,
            _ => return Err(not_open(&self.info)),
        };
        schema::mssql::describe_table(client, table)
            .await
            .map_err(|e| track_failure(&mut self.state, e, &BoundQuery::raw(table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_address() {
        let info = ConnectionInfo::new(DriverKind::MsSql, "db.local", "app")
            .with_credentials("sa", "secret");
        let driver = MsSqlDriver::new(info);
        assert_eq!(driver.config().get_addr(), "db.local:1433");
        assert_eq!(driver.port(), 1433);
        assert!(!driver.is_open());
    }

    #[tokio::test]
    async fn test_closed_connection_refuses_work() {
        let mut driver = MsSqlDriver::new(ConnectionInfo::new(DriverKind::MsSql, "localhost", ""));
        assert!(!driver.ping().await);
        assert!(driver.fetch(&BoundQuery::raw("SELECT 1")).await.is_err());
        assert!(driver.begin().await.is_err());
    }
}
