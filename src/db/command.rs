//! One statement bound to a connection.
//!
//! A `Command` renders its template through the placeholder binder, then runs
//! it either as a reader (optionally windowed, with the total row count taken
//! by a separate count query) or as a mutation. Errors propagate as `Err`;
//! embedding them into a [`QueryInfo`] is the access point's job.

use crate::db::builder::{QueryBuilder, trim_statement};
use crate::db::connection::Connection;
use crate::db::params::{BoundQuery, bind};
use crate::db::reader::{DataReader, ResultSet};
use crate::db::statement::classify;
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_PAGE_SIZE, Params, QueryInfo, StatementType};
use serde_json::Value as JsonValue;
use tracing::trace;

pub struct Command<'a> {
    connection: &'a mut dyn Connection,
    builder: &'a dyn QueryBuilder,
    query: String,
    params: Option<Params>,
    page: u32,
    pagesize: u32,
}

impl<'a> Command<'a> {
    pub fn new(
        connection: &'a mut dyn Connection,
        builder: &'a dyn QueryBuilder,
        query: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            builder,
            query: query.into(),
            params: None,
            page: 0,
            pagesize: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_params(mut self, params: Option<Params>) -> Self {
        self.params = params;
        self
    }

    /// Set a 1-based page window; page 0 reads everything.
    pub fn with_page(mut self, page: u32, pagesize: u32) -> Self {
        self.page = page;
        self.pagesize = pagesize;
        self
    }

    /// Query template.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Resolve every placeholder without executing.
    pub fn render(&self) -> DbResult<BoundQuery> {
        bind(&self.query, self.params.as_ref(), self.builder)
    }

    /// Run the query as a reader.
    ///
    /// With a page set and `count_total`, the total row count of the whole
    /// query is fetched first and exposed as [`DataReader::affected`].
    pub async fn execute_reader(&mut self, count_total: bool) -> DbResult<DataReader> {
        let bound = self.render()?;

        let total = if self.page > 0 && count_total {
            let counting = wrap(&bound, |sql| self.builder.count_query(sql));
            let result = self.connection.fetch(&counting).await?;
            Some(count_value(&result).ok_or_else(|| {
                DbError::query("count query returned no value", None)
                    .with_query(counting.rendered.clone())
            })?)
        } else {
            None
        };

        let windowed = if self.page > 0 {
            let (page, pagesize) = (self.page, self.pagesize);
            wrap(&bound, |sql| self.builder.paginate(sql, page, pagesize))
        } else {
            bound
        };
        trace!(query = %windowed.rendered, total = ?total, "Reading");

        let result = self.connection.fetch(&windowed).await?;
        let reader = DataReader::new(result, windowed.rendered);
        Ok(match total {
            Some(total) => reader.with_affected(total),
            None => reader,
        })
    }

    /// Run the query as a mutation.
    ///
    /// `returning` names a column to collect from the affected rows; dialects
    /// with a `RETURNING` clause append it, the others report the
    /// connection-level insert id.
    pub async fn execute_non_query(&mut self, returning: Option<&str>) -> DbResult<QueryInfo> {
        let bound = self.render()?;
        let statement_type = classify(&bound.sql, self.builder.driver());
        let inserts = matches!(statement_type, StatementType::Insert | StatementType::Upsert);
        let mutates = inserts || matches!(statement_type, StatementType::Update | StatementType::Delete);

        if let Some(field) = returning.filter(|_| mutates) {
            if let Some(clause) = self.builder.returning_clause(field) {
                let with_clause = wrap(&bound, |sql| format!("{}{}", trim_statement(sql), clause));
                let result = self.connection.fetch(&with_clause).await?;
                let returned: Vec<JsonValue> = result
                    .rows
                    .iter()
                    .filter_map(|row| row.get(field).or_else(|| row.values().next()).cloned())
                    .collect();
                let insert_id = if inserts {
                    returned.first().and_then(json_to_i64)
                } else {
                    None
                };
                return Ok(QueryInfo::success(
                    statement_type,
                    with_clause.rendered,
                    result.rows.len() as u64,
                    insert_id,
                )
                .with_returned(returned));
            }
        }

        let execution = self.connection.execute(&bound).await?;
        // The engine keeps the last id per connection; it is stale unless this
        // plain insert actually wrote a row.
        let insert_id = execution
            .last_insert_id
            .filter(|_| statement_type == StatementType::Insert && execution.affected > 0);
        let info = QueryInfo::success(statement_type, bound.rendered, execution.affected, insert_id);
        Ok(match (returning, insert_id) {
            (Some(_), Some(id)) => info.with_returned(vec![JsonValue::from(id)]),
            _ => info,
        })
    }
}

/// Apply the same rewrite to the engine text and the rendered text.
fn wrap(bound: &BoundQuery, rewrite: impl Fn(&str) -> String) -> BoundQuery {
    BoundQuery {
        sql: rewrite(&bound.sql),
        values: bound.values.clone(),
        rendered: rewrite(&bound.rendered),
    }
}

fn json_to_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Numeric value of the first column of a count result.
fn count_value(result: &ResultSet) -> Option<u64> {
    match result.scalar()? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::builder::SqliteBuilder;
    use crate::db::drivers::SqliteDriver;
    use crate::models::{ConnectionInfo, DriverKind, QueryParam};

    async fn seeded(rows: usize) -> SqliteDriver {
        let mut conn = SqliteDriver::new(ConnectionInfo::new(DriverKind::Sqlite, "", ":memory:"));
        conn.open().await.unwrap();
        conn.execute(&BoundQuery::raw(
            "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT)",
        ))
        .await
        .unwrap();
        for i in 1..=rows {
            conn.execute(&BoundQuery::raw(format!(
                "INSERT INTO items (label) VALUES ('item {}')",
                i
            )))
            .await
            .unwrap();
        }
        conn
    }

    fn params(pairs: &[(&str, QueryParam)]) -> Option<Params> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_reader_window_with_total() {
        let mut conn = seeded(25).await;
        let mut cmd = Command::new(&mut conn, &SqliteBuilder, "SELECT * FROM items ORDER BY id")
            .with_page(2, 10);
        let mut reader = cmd.execute_reader(true).await.unwrap();

        assert_eq!(reader.count(), 10);
        assert_eq!(reader.affected(), Some(25));
        let first = reader.read().unwrap();
        assert_eq!(first["id"], serde_json::json!(11));
        assert!(reader.query().ends_with("LIMIT 10, 10"));
    }

    #[tokio::test]
    async fn test_reader_without_count() {
        let mut conn = seeded(5).await;
        let mut cmd = Command::new(&mut conn, &SqliteBuilder, "SELECT * FROM items");
        let reader = cmd.execute_reader(true).await.unwrap();
        assert_eq!(reader.count(), 5);
        assert_eq!(reader.affected(), None);
    }

    #[tokio::test]
    async fn test_reader_binds_list() {
        let mut conn = seeded(5).await;
        let mut cmd = Command::new(
            &mut conn,
            &SqliteBuilder,
            "SELECT * FROM items WHERE id IN ([[ids:integer]])",
        )
        .with_params(params(&[("ids", QueryParam::from(vec![1i64, 3, 5]))]));
        let reader = cmd.execute_reader(false).await.unwrap();
        assert_eq!(reader.count(), 3);
    }

    #[tokio::test]
    async fn test_missing_params_never_reach_engine() {
        let mut conn = seeded(1).await;
        let mut cmd = Command::new(
            &mut conn,
            &SqliteBuilder,
            "DELETE FROM items WHERE id = [[id:integer]]",
        );
        let err = cmd.execute_non_query(None).await.unwrap_err();
        assert!(err.is_query_error());
        assert!(err.message().contains("no params"));

        let reader = Command::new(&mut conn, &SqliteBuilder, "SELECT * FROM items")
            .execute_reader(false)
            .await
            .unwrap();
        assert_eq!(reader.count(), 1);
    }

    #[tokio::test]
    async fn test_non_query_insert_id_and_returning() {
        let mut conn = seeded(2).await;
        let info = Command::new(
            &mut conn,
            &SqliteBuilder,
            "INSERT INTO items (label) VALUES ([[label]])",
        )
        .with_params(params(&[("label", QueryParam::from("third"))]))
        .execute_non_query(None)
        .await
        .unwrap();
        assert_eq!(info.statement_type, StatementType::Insert);
        assert_eq!(info.affected, 1);
        assert_eq!(info.insert_id, Some(3));
        assert_eq!(info.query, "INSERT INTO items (label) VALUES ('third')");

        let info = Command::new(
            &mut conn,
            &SqliteBuilder,
            "UPDATE items SET label = 'x' WHERE id <= 2",
        )
        .execute_non_query(Some("id"))
        .await
        .unwrap();
        assert_eq!(info.statement_type, StatementType::Update);
        assert_eq!(info.affected, 2);
        assert_eq!(info.insert_id, None);
        assert_eq!(info.returned.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_id_not_carried_over() {
        let mut conn = seeded(2).await;
        let info = Command::new(&mut conn, &SqliteBuilder, "INSERT INTO items (label) VALUES ('new')")
            .execute_non_query(None)
            .await
            .unwrap();
        assert_eq!(info.insert_id, Some(3));

        let info = Command::new(
            &mut conn,
            &SqliteBuilder,
            "INSERT INTO items (label) SELECT label FROM items WHERE id > 100",
        )
        .execute_non_query(None)
        .await
        .unwrap();
        assert_eq!(info.statement_type, StatementType::Insert);
        assert_eq!(info.affected, 0);
        assert_eq!(info.insert_id, None);
    }

    #[test]
    fn test_count_value() {
        let mut row = crate::models::Row::new();
        row.insert("affected".into(), serde_json::json!("42"));
        assert_eq!(count_value(&ResultSet::new(vec![], vec![row])), Some(42));
        assert_eq!(count_value(&ResultSet::default()), None);
    }
}
