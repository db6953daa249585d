//! Statement classification.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with the driver's dialect to
//! decide what kind of statement a query is. Text that does not parse (vendor
//! extensions, partial statements) falls back to a leading-keyword scan.

use crate::models::{DriverKind, StatementType};
use sqlparser::ast::Statement;
use sqlparser::dialect::{
    Dialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;

/// Get the appropriate SQL dialect for the given driver.
fn get_dialect(driver: DriverKind) -> Box<dyn Dialect> {
    match driver {
        DriverKind::PgSql => Box::new(PostgreSqlDialect {}),
        DriverKind::MySql => Box::new(MySqlDialect {}),
        DriverKind::Sqlite => Box::new(SQLiteDialect {}),
        DriverKind::MsSql => Box::new(MsSqlDialect {}),
        DriverKind::MongoDb | DriverKind::Solr => Box::new(GenericDialect {}),
    }
}

/// Classify a query. Multi-statement text is classified by its first statement.
pub fn classify(sql: &str, driver: DriverKind) -> StatementType {
    let dialect = get_dialect(driver);
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => statements
            .first()
            .map(classify_statement)
            .unwrap_or(StatementType::Other),
        Err(_) => classify_keyword(sql),
    }
}

/// Classify a parsed statement.
fn classify_statement(stmt: &Statement) -> StatementType {
    match stmt {
        // =====================================================================
        // Row-returning statements
        // =====================================================================
        Statement::Query(_)
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. }
        | Statement::ExplainTable { .. }
        | Statement::Explain { .. }
        | Statement::Pragma { .. } => StatementType::Select,

        // =====================================================================
        // DML
        // =====================================================================
        Statement::Insert(insert) if insert.on.is_some() || insert.replace_into => {
            StatementType::Upsert
        }
        Statement::Insert(_) => StatementType::Insert,
        Statement::Update { .. } => StatementType::Update,
        Statement::Delete(_) => StatementType::Delete,
        Statement::Merge { .. } => StatementType::Upsert,
        Statement::Truncate { .. } => StatementType::Truncate,

        // =====================================================================
        // DDL
        // =====================================================================
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex(_)
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateTrigger { .. }
        | Statement::CreateVirtualTable { .. }
        | Statement::CreateExtension { .. }
        | Statement::AlterTable { .. }
        | Statement::AlterView { .. }
        | Statement::AlterIndex { .. }
        | Statement::Drop { .. }
        | Statement::DropFunction { .. }
        | Statement::DropProcedure { .. }
        | Statement::DropTrigger { .. }
        | Statement::Comment { .. } => StatementType::Ddl,

        // =====================================================================
        // Transaction control
        // =====================================================================
        Statement::StartTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. }
        | Statement::Savepoint { .. }
        | Statement::ReleaseSavepoint { .. } => StatementType::Transaction,

        _ => StatementType::Other,
    }
}

/// Classify by the first keyword when the parser gives up.
fn classify_keyword(sql: &str) -> StatementType {
    let keyword = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "PRAGMA" | "VALUES" => {
            StatementType::Select
        }
        "INSERT" => StatementType::Insert,
        "REPLACE" | "MERGE" | "UPSERT" => StatementType::Upsert,
        "UPDATE" => StatementType::Update,
        "DELETE" => StatementType::Delete,
        "TRUNCATE" => StatementType::Truncate,
        "CREATE" | "ALTER" | "DROP" | "RENAME" => StatementType::Ddl,
        "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" => StatementType::Transaction,
        _ => StatementType::Other,
    }
}
