//! Connection contract shared by the relational drivers.

use crate::db::params::BoundQuery;
use crate::db::reader::ResultSet;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, DriverKind, TableSchema};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Lifecycle of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    /// A transport error was seen; the handle must be reopened.
    Broken,
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Execution {
    pub affected: u64,
    pub last_insert_id: Option<i64>,
}

/// One live handle to a relational engine.
///
/// Implementations own a single dedicated connection, never a pool. Every
/// fetching and executing method requires the connection to be open.
#[async_trait]
pub trait Connection: Send {
    /// Parameters this connection was created from.
    fn info(&self) -> &ConnectionInfo;

    fn state(&self) -> ConnectionState;

    fn driver(&self) -> DriverKind {
        self.info().driver
    }

    fn host(&self) -> &str {
        &self.info().host
    }

    fn port(&self) -> u16 {
        self.info().port_or_default()
    }

    fn database(&self) -> &str {
        &self.info().database
    }

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    async fn open(&mut self) -> DbResult<()>;

    async fn close(&mut self) -> DbResult<()>;

    async fn reopen(&mut self) -> DbResult<()> {
        self.close().await?;
        self.open().await
    }

    /// Round-trip check; false when closed or the engine does not answer.
    async fn ping(&mut self) -> bool;

    /// Run a row-returning statement and materialise its rows.
    async fn fetch(&mut self, query: &BoundQuery) -> DbResult<ResultSet>;

    /// Run a statement for its side effects.
    async fn execute(&mut self, query: &BoundQuery) -> DbResult<Execution>;

    async fn begin(&mut self) -> DbResult<()> {
        self.execute(&BoundQuery::raw("BEGIN")).await.map(|_| ())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.execute(&BoundQuery::raw("COMMIT")).await.map(|_| ())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.execute(&BoundQuery::raw("ROLLBACK")).await.map(|_| ())
    }

    /// Live column and index metadata; `None` when the table does not exist.
    async fn describe_table(&mut self, table: &str) -> DbResult<Option<TableSchema>>;
}

/// Error for an operation attempted on a handle that is not open.
pub(crate) fn not_open(info: &ConnectionInfo) -> DbError {
    DbError::connection(
        format!("{} connection to {} is not open", info.driver, info.endpoint()),
        "Call open() or reopen() first",
    )
}

/// Attach the rendered query to an engine error and flag the handle when the
/// transport failed.
pub(crate) fn track_failure(
    state: &mut ConnectionState,
    err: DbError,
    query: &BoundQuery,
) -> DbError {
    match err {
        DbError::Connection { .. } | DbError::Timeout { .. } => {
            warn!(error = %err, "Connection marked broken");
            *state = ConnectionState::Broken;
            err
        }
        other => other.with_query(query.rendered.clone()),
    }
}

/// Connect timeout from option `timeout` (seconds), default 30s.
pub(crate) fn connect_timeout(info: &ConnectionInfo) -> Duration {
    Duration::from_secs(info.option_secs("timeout").unwrap_or(30))
}

/// Run a connect future under the configured timeout.
pub(crate) async fn with_connect_timeout<T, F>(info: &ConnectionInfo, fut: F) -> DbResult<T>
where
    F: std::future::Future<Output = DbResult<T>>,
{
    let limit = connect_timeout(info);
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DbError::timeout(
            format!("connect to {}", info.endpoint()),
            limit.as_secs(),
        )),
    }
}

/// Turn an engine error raised while opening into a connection error that
/// keeps the native message and code.
pub(crate) fn open_failure(info: &ConnectionInfo, err: DbError) -> DbError {
    if matches!(err, DbError::Timeout { .. }) {
        return err;
    }
    let message = err.message();
    let failure = DbError::connection(
        format!("Failed to connect to {}: {}", info.endpoint(), message),
        connection_suggestion(info.driver, &message),
    );
    match err.code() {
        Some(code) => failure.with_code(code),
        None => failure,
    }
}

/// Suggestion text for a failed open, keyed on the engine's message.
pub(crate) fn connection_suggestion(driver: DriverKind, message: &str) -> String {
    let message = message.to_lowercase();

    if message.contains("connection refused") {
        format!(
            "Check that the {} server is running and accepting connections on the configured host and port",
            driver
        )
    } else if message.contains("access denied")
        || message.contains("authentication")
        || message.contains("login failed")
        || message.contains("password")
    {
        "Verify the user and password of the connection".to_string()
    } else if message.contains("unknown database")
        || message.contains("does not exist")
        || message.contains("cannot open database")
    {
        "Verify that the database exists".to_string()
    } else if message.contains("unable to open database file") {
        "Check that the SQLite file path exists and is writable".to_string()
    } else if message.contains("timed out") || message.contains("timeout") {
        "The server did not answer in time; check network access or raise the timeout option"
            .to_string()
    } else if message.contains("tls") || message.contains("certificate") {
        "Check the TLS settings of the server and the trust_cert option".to_string()
    } else {
        format!("Check the {} connection settings", driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_failure_marks_broken() {
        let mut state = ConnectionState::Open;
        let query = BoundQuery::raw("select 1");
        let err = track_failure(
            &mut state,
            DbError::connection("reset by peer", "retry"),
            &query,
        );
        assert_eq!(state, ConnectionState::Broken);
        assert!(err.query_text().is_none());
    }

    #[test]
    fn test_track_failure_attaches_query() {
        let mut state = ConnectionState::Open;
        let query = BoundQuery::raw("selec 1");
        let err = track_failure(&mut state, DbError::query("syntax error", None), &query);
        assert_eq!(state, ConnectionState::Open);
        assert_eq!(err.query_text(), Some("selec 1"));
    }

    #[test]
    fn test_connect_timeout_option() {
        let info = ConnectionInfo::new(DriverKind::MySql, "localhost", "app");
        assert_eq!(connect_timeout(&info), Duration::from_secs(30));
        let info = info.with_option("timeout", "5");
        assert_eq!(connect_timeout(&info), Duration::from_secs(5));
    }

    #[test]
    fn test_connection_suggestion() {
        assert!(
            connection_suggestion(DriverKind::MySql, "Connection refused (os error 111)")
                .contains("MySQL")
        );
        assert!(connection_suggestion(DriverKind::PgSql, "password authentication failed")
            .contains("password"));
        assert!(
            connection_suggestion(DriverKind::Sqlite, "unable to open database file")
                .contains("SQLite")
        );
    }
}
