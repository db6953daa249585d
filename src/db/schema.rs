//! Live table metadata.
//!
//! Each relational driver reads column and index metadata from its system
//! catalogs over its own connection. The migration engine compares the result
//! against declared storages, keyed by real column and index name. A table
//! that does not exist yields `None`.

use crate::error::DbResult;
use crate::models::{ColumnDefinition, IndexInfo, TableSchema};
use tracing::debug;

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name,
            format_type(a.atttypid, a.atttypmod) as column_type,
            c.is_nullable,
            c.column_default,
            c.generation_expression::text as generation_expression,
            CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END as is_primary_key,
            col_description(t.oid, a.attnum) as column_comment
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        LEFT JOIN (
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_name = $1
            AND tc.table_schema = current_schema()
            AND tc.constraint_type = 'PRIMARY KEY'
        ) pk ON c.column_name = pk.column_name
        WHERE c.table_name = $1 AND c.table_schema = current_schema()
        ORDER BY c.ordinal_position
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            i.relname as index_name,
            COALESCE(
                array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum))
                    FILTER (WHERE a.attname IS NOT NULL),
                ARRAY[]::text[]
            ) as column_names,
            ix.indisunique as is_unique,
            ix.indisprimary as is_primary,
            am.amname::text as index_algorithm
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        LEFT JOIN pg_am am ON am.oid = i.relam
        -- Expression indexes (indkey 0) have no attribute row.
        LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE t.relname = $1 AND n.nspname = current_schema()
        GROUP BY i.relname, ix.indisunique, ix.indisprimary, am.amname
        "#;
    }

    pub mod mysql {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY,
            CONVERT(EXTRA USING utf8) AS EXTRA,
            CONVERT(GENERATION_EXPRESSION USING utf8) AS GENERATION_EXPRESSION,
            CONVERT(COLUMN_COMMENT USING utf8) AS COLUMN_COMMENT
        FROM information_schema.columns
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE()
        ORDER BY ORDINAL_POSITION
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            CONVERT(INDEX_NAME USING utf8) AS INDEX_NAME,
            CONVERT(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) USING utf8) as COLUMN_NAMES,
            NOT NON_UNIQUE as IS_UNIQUE,
            CONVERT(INDEX_TYPE USING utf8) AS INDEX_ALGORITHM
        FROM information_schema.STATISTICS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE()
        GROUP BY INDEX_NAME, NON_UNIQUE, INDEX_TYPE
        "#;
    }

    pub mod mssql {
        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.COLUMN_NAME,
            c.DATA_TYPE,
            CAST(c.CHARACTER_MAXIMUM_LENGTH AS INT) AS CHARACTER_MAXIMUM_LENGTH,
            c.IS_NULLABLE,
            c.COLUMN_DEFAULT,
            cc.definition AS GENERATION_EXPRESSION,
            CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS IS_PRIMARY_KEY
        FROM INFORMATION_SCHEMA.COLUMNS c
        LEFT JOIN sys.computed_columns cc
            ON cc.object_id = OBJECT_ID(c.TABLE_SCHEMA + '.' + c.TABLE_NAME)
            AND cc.name = c.COLUMN_NAME
        LEFT JOIN (
            SELECT kcu.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
            WHERE tc.TABLE_NAME = @P1 AND tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
        ) pk ON c.COLUMN_NAME = pk.COLUMN_NAME
        WHERE c.TABLE_NAME = @P1
        ORDER BY c.ORDINAL_POSITION
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            i.name AS INDEX_NAME,
            STRING_AGG(c.name, ',') WITHIN GROUP (ORDER BY ic.key_ordinal) AS COLUMN_NAMES,
            CAST(i.is_unique AS INT) AS IS_UNIQUE,
            CAST(i.is_primary_key AS INT) AS IS_PRIMARY,
            i.type_desc AS INDEX_ALGORITHM
        FROM sys.indexes i
        JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
        WHERE i.object_id = OBJECT_ID(@P1) AND i.name IS NOT NULL
        GROUP BY i.name, i.is_unique, i.is_primary_key, i.type_desc
        "#;
    }
}

/// Assemble a schema from columns and indexes; no columns means no table.
fn assemble(
    table_name: &str,
    columns: Vec<ColumnDefinition>,
    indexes: Vec<IndexInfo>,
) -> Option<TableSchema> {
    if columns.is_empty() {
        return None;
    }
    let schema = columns
        .into_iter()
        .fold(TableSchema::new(table_name), |schema, col| {
            schema.with_column(col)
        });
    let schema = indexes
        .into_iter()
        .fold(schema, |schema, idx| schema.with_index(idx));
    debug!(
        table = %table_name,
        columns = schema.columns.len(),
        indexes = schema.indexes.len(),
        "Described table"
    );
    Some(schema)
}

pub mod postgres {
    use super::*;
    use sqlx::{PgConnection, Row};

    pub async fn describe_table(
        conn: &mut PgConnection,
        table_name: &str,
    ) -> DbResult<Option<TableSchema>> {
        let columns = fetch_columns(conn, table_name).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        let indexes = fetch_indexes(conn, table_name).await?;
        Ok(assemble(table_name, columns, indexes))
    }

    async fn fetch_columns(
        conn: &mut PgConnection,
        table_name: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("column_name");
                let column_type: String = row.get("column_type");
                let nullable: String = row.get("is_nullable");
                let default_value: Option<String> = row.try_get("column_default").ok().flatten();
                let generated: Option<String> =
                    row.try_get("generation_expression").ok().flatten();
                let is_pk: bool = row.get("is_primary_key");
                let comment: Option<String> = row.try_get("column_comment").ok().flatten();

                let mut col = ColumnDefinition::new(&name, &column_type, nullable == "YES")
                    .with_primary_key(is_pk);
                if let Some(def) = default_value {
                    col = col.with_default(def);
                }
                if let Some(expr) = generated {
                    col = col.with_generation_expression(expr);
                }
                if let Some(c) = comment.filter(|c| !c.is_empty()) {
                    col = col.with_comment(c);
                }
                col
            })
            .collect())
    }

    async fn fetch_indexes(conn: &mut PgConnection, table_name: &str) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_INDEXES)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name: String = row.get("index_name");
                let columns: Vec<String> = row.get("column_names");
                let is_unique: bool = row.get("is_unique");
                let is_primary: bool = row.get("is_primary");
                let algorithm: Option<String> = row.try_get("index_algorithm").ok().flatten();

                if columns.is_empty() {
                    return None;
                }
                let mut idx = IndexInfo::new(name, columns)
                    .with_unique(is_unique)
                    .with_primary(is_primary);
                if let Some(algo) = algorithm {
                    idx = idx.with_algorithm(algo);
                }
                Some(idx)
            })
            .collect())
    }
}

pub mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlConnection, Row};

    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &MySqlRow, column: &str) -> String {
        get_optional_string(row, column).unwrap_or_default()
    }

    fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    pub async fn describe_table(
        conn: &mut MySqlConnection,
        table_name: &str,
    ) -> DbResult<Option<TableSchema>> {
        let columns = fetch_columns(conn, table_name).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        let indexes = fetch_indexes(conn, table_name).await?;
        Ok(assemble(table_name, columns, indexes))
    }

    async fn fetch_columns(
        conn: &mut MySqlConnection,
        table_name: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "COLUMN_NAME");
                let column_type = get_string(row, "COLUMN_TYPE");
                let nullable = get_string(row, "IS_NULLABLE");
                let is_pk = get_string(row, "COLUMN_KEY") == "PRI";

                let mut col = ColumnDefinition::new(&name, &column_type, nullable == "YES")
                    .with_primary_key(is_pk);
                if let Some(def) = get_optional_string(row, "COLUMN_DEFAULT") {
                    col = col.with_default(def);
                }
                if let Some(e) = get_optional_string(row, "EXTRA").filter(|e| !e.is_empty()) {
                    col = col.with_extra(e);
                }
                if let Some(expr) = get_optional_string(row, "GENERATION_EXPRESSION") {
                    col = col.with_generation_expression(expr);
                }
                if let Some(c) = get_optional_string(row, "COLUMN_COMMENT").filter(|c| !c.is_empty())
                {
                    col = col.with_comment(c);
                }
                col
            })
            .collect())
    }

    async fn fetch_indexes(
        conn: &mut MySqlConnection,
        table_name: &str,
    ) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_INDEXES)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "INDEX_NAME");
                let columns: Vec<String> = get_string(row, "COLUMN_NAMES")
                    .split(',')
                    .map(|s| s.to_string())
                    .collect();
                let is_unique: i64 = row.try_get("IS_UNIQUE").unwrap_or(0);
                let is_primary = name == "PRIMARY";

                let mut idx = IndexInfo::new(name, columns)
                    .with_unique(is_unique != 0)
                    .with_primary(is_primary);
                if let Some(algo) = get_optional_string(row, "INDEX_ALGORITHM") {
                    idx = idx.with_algorithm(algo);
                }
                idx
            })
            .collect())
    }
}

pub mod sqlite {
    use super::*;
    use sqlx::{Row, SqliteConnection};

    fn quote(name: &str) -> String {
        format!("'{}'", name.replace('\'', "''"))
    }

    pub async fn describe_table(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> DbResult<Option<TableSchema>> {
        let columns = fetch_columns(conn, table_name).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        let indexes = fetch_indexes(conn, table_name).await?;
        Ok(assemble(table_name, columns, indexes))
    }

    /// `table_xinfo` also lists generated columns (hidden = 2 or 3).
    async fn fetch_columns(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let pragma_query = format!("PRAGMA table_xinfo({})", quote(table_name));
        let rows = sqlx::query(&pragma_query).fetch_all(&mut *conn).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let data_type: String = row.get("type");
                let notnull: i32 = row.get("notnull");
                let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
                let pk: i32 = row.get("pk");
                let hidden: i32 = row.try_get("hidden").unwrap_or(0);

                let mut col = ColumnDefinition::new(&name, &data_type, notnull == 0)
                    .with_primary_key(pk > 0);
                if let Some(def) = default_value {
                    col = col.with_default(def);
                }
                if hidden >= 2 {
                    col = col.with_extra("GENERATED");
                }
                col
            })
            .collect())
    }

    async fn fetch_indexes(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> DbResult<Vec<IndexInfo>> {
        let idx_query = format!("PRAGMA index_list({})", quote(table_name));
        let idx_list = sqlx::query(&idx_query).fetch_all(&mut *conn).await?;

        let mut indexes = Vec::new();
        for idx_row in &idx_list {
            let name: String = idx_row.get("name");
            let is_unique: i32 = idx_row.get("unique");
            let origin: String = idx_row.try_get("origin").unwrap_or_default();

            let query = format!("PRAGMA index_info({})", quote(&name));
            let columns: Vec<String> = sqlx::query(&query)
                .fetch_all(&mut *conn)
                .await?
                .iter()
                .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten())
                .collect();
            if !columns.is_empty() {
                indexes.push(
                    IndexInfo::new(name, columns)
                        .with_unique(is_unique != 0)
                        .with_primary(origin == "pk"),
                );
            }
        }
        Ok(indexes)
    }
}

pub mod mssql {
    use super::*;
    use tiberius::{Client, Query};
    use tokio::net::TcpStream;
    use tokio_util::compat::Compat;

    pub async fn describe_table(
        client: &mut Client<Compat<TcpStream>>,
        table_name: &str,
    ) -> DbResult<Option<TableSchema>> {
        let mut query = Query::new(queries::mssql::DESCRIBE_COLUMNS);
        query.bind(table_name.to_string());
        let rows = query.query(client).await?.into_first_result().await?;

        let columns: Vec<ColumnDefinition> = rows
            .iter()
            .map(|row| {
                let name = row.get::<&str, _>("COLUMN_NAME").unwrap_or_default();
                let data_type = row.get::<&str, _>("DATA_TYPE").unwrap_or_default();
                let data_type = match row.get::<i32, _>("CHARACTER_MAXIMUM_LENGTH") {
                    Some(-1) => format!("{}(max)", data_type),
                    Some(len) => format!("{}({})", data_type, len),
                    None => data_type.to_string(),
                };
                let nullable = row.get::<&str, _>("IS_NULLABLE") == Some("YES");
                let is_pk = row.get::<i32, _>("IS_PRIMARY_KEY") == Some(1);

                let mut col =
                    ColumnDefinition::new(name, data_type, nullable).with_primary_key(is_pk);
                if let Some(def) = row.get::<&str, _>("COLUMN_DEFAULT") {
                    col = col.with_default(def);
                }
                if let Some(expr) = row.get::<&str, _>("GENERATION_EXPRESSION") {
                    col = col.with_generation_expression(expr);
                }
                col
            })
            .collect();
        if columns.is_empty() {
            return Ok(None);
        }

        let mut query = Query::new(queries::mssql::DESCRIBE_INDEXES);
        query.bind(table_name.to_string());
        let rows = query.query(client).await?.into_first_result().await?;
        let indexes = rows
            .iter()
            .map(|row| {
                let name = row.get::<&str, _>("INDEX_NAME").unwrap_or_default();
                let columns = row
                    .get::<&str, _>("COLUMN_NAMES")
                    .unwrap_or_default()
                    .split(',')
                    .map(|s| s.to_string())
                    .collect();
                let mut idx = IndexInfo::new(name, columns)
                    .with_unique(row.get::<i32, _>("IS_UNIQUE") == Some(1))
                    .with_primary(row.get::<i32, _>("IS_PRIMARY") == Some(1));
                if let Some(algo) = row.get::<&str, _>("INDEX_ALGORITHM") {
                    idx = idx.with_algorithm(algo);
                }
                idx
            })
            .collect();

        Ok(assemble(table_name, columns, indexes))
    }
}
