//! Named facade over one relational connection.
//!
//! An access point owns exactly one connection behind a mutex, so operations
//! on it are serialised. Query-family failures are returned as a failed
//! [`QueryInfo`]; connection and configuration failures stay `Err`.

use crate::db::builder::QueryBuilder;
use crate::db::command::Command;
use crate::db::connection::{Connection, ConnectionState};
use crate::db::params::BoundQuery;
use crate::db::reader::DataReader;
use crate::db::statement::classify;
use crate::error::DbResult;
use crate::models::{DriverKind, Params, QueryInfo, QueryOptions, QueryType, Row, TableSchema};
use crate::storage::schema::SchemaBuilder;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Result of [`DataAccessPoint::query`].
#[derive(Debug)]
pub enum QueryOutcome {
    Reader(DataReader),
    Info(QueryInfo),
}

impl QueryOutcome {
    pub fn into_reader(self) -> Option<DataReader> {
        match self {
            Self::Reader(reader) => Some(reader),
            Self::Info(_) => None,
        }
    }

    pub fn into_info(self) -> Option<QueryInfo> {
        match self {
            Self::Info(info) => Some(info),
            Self::Reader(_) => None,
        }
    }

    /// Error text of a failed query.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Info(info) => info.error.as_deref(),
            Self::Reader(_) => None,
        }
    }
}

pub struct DataAccessPoint {
    name: String,
    driver: DriverKind,
    connection: Mutex<Box<dyn Connection>>,
    builder: Box<dyn QueryBuilder>,
    schema: Box<dyn SchemaBuilder>,
    log_queries: bool,
}

impl DataAccessPoint {
    pub fn new(
        name: impl Into<String>,
        connection: Box<dyn Connection>,
        builder: Box<dyn QueryBuilder>,
        schema: Box<dyn SchemaBuilder>,
    ) -> Self {
        Self {
            name: name.into(),
            driver: connection.driver(),
            connection: Mutex::new(connection),
            builder,
            schema,
            log_queries: false,
        }
    }

    /// Log every query at `info` instead of `debug`.
    pub fn with_log_queries(mut self, log_queries: bool) -> Self {
        self.log_queries = log_queries;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    pub fn query_builder(&self) -> &dyn QueryBuilder {
        self.builder.as_ref()
    }

    pub fn schema_builder(&self) -> &dyn SchemaBuilder {
        self.schema.as_ref()
    }

    /// Lock the connection, opening it first if needed.
    async fn acquire(&self) -> DbResult<MutexGuard<'_, Box<dyn Connection>>> {
        let mut conn = self.connection.lock().await;
        match conn.state() {
            ConnectionState::Open => {}
            ConnectionState::Closed => conn.open().await?,
            ConnectionState::Broken => {
                warn!(point = %self.name, "Reconnecting broken connection");
                conn.reopen().await?;
            }
        }
        Ok(conn)
    }

    /// Open the connection if it is not open yet.
    pub async fn open(&self) -> DbResult<()> {
        self.acquire().await.map(|_| ())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run a query template.
    ///
    /// `reader` and `bigdata` return a [`DataReader`] (`reader` also counts the
    /// whole result when paginated); `noninfo` returns a [`QueryInfo`].
    pub async fn query(&self, text: &str, options: QueryOptions) -> DbResult<QueryOutcome> {
        let started = Instant::now();
        let result = self.run(text, &options).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                if self.log_queries {
                    info!(
                        point = %self.name,
                        query = %text,
                        page = options.page,
                        pagesize = options.pagesize,
                        elapsed_ms,
                        "Query"
                    );
                } else {
                    debug!(
                        point = %self.name,
                        query = %text,
                        page = options.page,
                        pagesize = options.pagesize,
                        elapsed_ms,
                        "Query"
                    );
                }
                Ok(outcome)
            }
            Err(e) if e.is_query_error() => {
                warn!(point = %self.name, query = %text, error = %e, elapsed_ms, "Query failed");
                Ok(QueryOutcome::Info(QueryInfo::failed(
                    classify(text, self.driver),
                    e.query_text().unwrap_or(text),
                    e.message(),
                )))
            }
            Err(e) => Err(e),
        }
    }

    async fn run(&self, text: &str, options: &QueryOptions) -> DbResult<QueryOutcome> {
        let mut conn = self.acquire().await?;
        let mut command = Command::new(&mut **conn, self.builder.as_ref(), text)
            .with_params(options.params.clone())
            .with_page(options.page, options.pagesize);

        match options.query_type {
            QueryType::Reader | QueryType::BigData => {
                let count_total = options.query_type == QueryType::Reader;
                command
                    .execute_reader(count_total)
                    .await
                    .map(QueryOutcome::Reader)
            }
            QueryType::NonInfo => command
                .execute_non_query(options.returning.as_deref())
                .await
                .map(QueryOutcome::Info),
        }
    }

    /// Run a built mutation and unwrap its [`QueryInfo`].
    async fn mutate(
        &self,
        sql: String,
        params: Option<Params>,
        returning: Option<&str>,
    ) -> DbResult<QueryInfo> {
        let mut options = QueryOptions::non_info();
        options.params = params;
        options.returning = returning.map(str::to_string);
        let outcome = self.query(&sql, options).await?;
        Ok(match outcome {
            QueryOutcome::Info(info) => info,
            QueryOutcome::Reader(_) => QueryInfo::failed(classify(&sql, self.driver), sql, "no result"),
        })
    }

    // =========================================================================
    // Verbs
    // =========================================================================

    pub async fn insert(
        &self,
        table: &str,
        data: &Row,
        returning: Option<&str>,
    ) -> DbResult<QueryInfo> {
        let sql = self.builder.create_insert(table, data)?;
        self.mutate(sql, None, returning).await
    }

    /// Insert, or update the non-key columns when `key_fields` conflict.
    pub async fn insert_or_update(
        &self,
        table: &str,
        data: &Row,
        key_fields: &[String],
    ) -> DbResult<QueryInfo> {
        let sql = self.builder.create_insert_or_update(table, data, key_fields)?;
        self.mutate(sql, None, None).await
    }

    pub async fn insert_batch(&self, table: &str, rows: &[Row]) -> DbResult<QueryInfo> {
        let sql = self.builder.create_batch_insert(table, rows)?;
        self.mutate(sql, None, None).await
    }

    /// Update rows matching `condition`, which may hold placeholders.
    pub async fn update(
        &self,
        table: &str,
        data: &Row,
        condition: &str,
        params: Option<Params>,
    ) -> DbResult<QueryInfo> {
        let sql = self.builder.create_update(table, data, condition)?;
        self.mutate(sql, params, None).await
    }

    /// Delete rows matching `condition`; an empty condition truncates.
    pub async fn delete(
        &self,
        table: &str,
        condition: &str,
        params: Option<Params>,
    ) -> DbResult<QueryInfo> {
        let sql = self.builder.create_delete(table, condition);
        self.mutate(sql, params, None).await
    }

    /// Table names, optionally filtered by a `LIKE` pattern.
    pub async fn tables(&self, like: Option<&str>) -> DbResult<Vec<String>> {
        let sql = self.builder.create_show_tables(like);
        let mut conn = self.acquire().await?;
        let result = conn.fetch(&BoundQuery::raw(sql)).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.values().next())
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect())
    }

    /// Column listing of a table as the engine reports it.
    pub async fn fields(&self, table: &str) -> DbResult<QueryOutcome> {
        let sql = self.builder.create_show_field(table);
        self.query(&sql, QueryOptions::default()).await
    }

    /// Live metadata; `None` when the table does not exist.
    pub async fn describe_table(&self, table: &str) -> DbResult<Option<TableSchema>> {
        self.acquire().await?.describe_table(table).await
    }

    /// Run a DDL statement; failures are returned, not embedded.
    pub async fn execute_ddl(&self, sql: &str) -> DbResult<u64> {
        let mut conn = self.acquire().await?;
        let started = Instant::now();
        let done = conn.execute(&BoundQuery::raw(sql)).await?;
        if self.log_queries {
            info!(point = %self.name, query = %sql, elapsed_ms = started.elapsed().as_millis() as u64, "DDL");
        } else {
            debug!(point = %self.name, query = %sql, "DDL");
        }
        Ok(done.affected)
    }

    // =========================================================================
    // Transactions and lifecycle
    // =========================================================================

    pub async fn begin(&self) -> DbResult<()> {
        debug!(point = %self.name, "BEGIN");
        self.acquire().await?.begin().await
    }

    pub async fn commit(&self) -> DbResult<()> {
        debug!(point = %self.name, "COMMIT");
        self.acquire().await?.commit().await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        debug!(point = %self.name, "ROLLBACK");
        self.acquire().await?.rollback().await
    }

    /// Whether the engine answers; never opens the connection.
    pub async fn ping(&self) -> bool {
        self.connection.lock().await.ping().await
    }

    pub async fn reopen(&self) -> DbResult<()> {
        self.connection.lock().await.reopen().await
    }

    pub async fn close(&self) -> DbResult<()> {
        self.connection.lock().await.close().await
    }
}

impl std::fmt::Debug for DataAccessPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccessPoint")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("log_queries", &self.log_queries)
            .finish_non_exhaustive()
    }
}
