//! One-directional schema migration.
//!
//! Declared storages are compared against the live schema of their access
//! point. Missing tables, columns and indexes are created and differing ones
//! are altered; nothing absent from the declaration is ever dropped.

use crate::db::access_point::DataAccessPoint;
use crate::db::registry::{AccessPoint, DataAccessPoints};
use crate::error::{DbError, DbResult};
use crate::models::TableSchema;
use crate::nosql::{DocumentAccessPoint, DocumentField, FieldChange};
use crate::storage::registry::{Storage, Storages};
use crate::storage::schema::{BASELINE_COLUMNS, SchemaBuilder, column_name};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CreateTable,
    AddColumn,
    ModifyColumn,
    AddIndex,
    RecreateIndex,
    CreateCollection,
    AddField,
    ReplaceField,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CreateTable => "create table",
            Self::AddColumn => "add column",
            Self::ModifyColumn => "modify column",
            Self::AddIndex => "add index",
            Self::RecreateIndex => "recreate index",
            Self::CreateCollection => "create collection",
            Self::AddField => "add field",
            Self::ReplaceField => "replace field",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum StepStatus {
    /// Executed successfully.
    Applied,
    /// Rendered but not executed (dry run).
    Planned,
    /// The dialect cannot perform the step.
    Skipped(String),
    /// Failed in dev mode; the migration went on.
    Failed(String),
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("applied"),
            Self::Planned => f.write_str("planned"),
            Self::Skipped(reason) => write!(f, "skipped: {}", reason),
            Self::Failed(error) => write!(f, "failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStep {
    pub kind: StepKind,
    /// Real name of the table, column, index or field.
    pub target: String,
    pub statements: Vec<String>,
    /// Run after `statements` whether or not they succeeded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup: Vec<String>,
    #[serde(flatten)]
    pub status: StepStatus,
}

impl MigrationStep {
    fn planned(kind: StepKind, target: impl Into<String>, statements: Vec<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            statements,
            cleanup: Vec::new(),
            status: StepStatus::Planned,
        }
    }

    /// Planned column change, bracketed by the dialect's session statements.
    fn column(
        kind: StepKind,
        target: &str,
        statements: Vec<String>,
        session: Option<(String, String)>,
    ) -> Self {
        match session {
            Some((setup, restore)) => {
                let mut step = Self::planned(kind, target, vec![setup]);
                step.statements.extend(statements);
                step.cleanup.push(restore);
                step
            }
            None => Self::planned(kind, target, statements),
        }
    }

    fn skipped(kind: StepKind, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            statements: Vec::new(),
            cleanup: Vec::new(),
            status: StepStatus::Skipped(reason.into()),
        }
    }
}

/// What one storage's migration did, or would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub storage: String,
    pub access_point: String,
    pub steps: Vec<MigrationStep>,
}

impl MigrationReport {
    fn new(storage: &Storage) -> Self {
        Self {
            storage: storage.name.clone(),
            access_point: storage.access_point.clone(),
            steps: Vec::new(),
        }
    }

    /// Whether the live schema already matched the declaration.
    pub fn is_up_to_date(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Skipped(_)))
    }

    pub fn count(&self, status: fn(&StepStatus) -> bool) -> usize {
        self.steps.iter().filter(|s| status(&s.status)).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &MigrationStep> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Log DDL failures and continue instead of aborting.
    pub dev: bool,
    /// Plan and report without executing anything.
    pub dry_run: bool,
    /// Storages to migrate; empty migrates all of them.
    pub only: Vec<String>,
}

// =============================================================================
// Planning
// =============================================================================

/// Column steps for a storage against its live table.
pub fn plan_columns(
    storage: &Storage,
    live: &TableSchema,
    schema: &dyn SchemaBuilder,
) -> Vec<MigrationStep> {
    let mut steps = Vec::new();
    for field in &storage.fields {
        let column = storage.column_name(&field.name);
        match live.column(&column) {
            None => steps.push(MigrationStep::column(
                StepKind::AddColumn,
                &column,
                schema.add_column(&storage.name, &column, &field.def),
                schema.column_session(&field.def),
            )),
            Some(existing) if !schema.column_matches(&field.def, existing) => {
                let step = if !schema.supports_modify_column() {
                    MigrationStep::skipped(
                        StepKind::ModifyColumn,
                        &column,
                        format!("{} cannot alter columns in place", schema.driver()),
                    )
                } else {
                    match schema.modify_column(&storage.name, &column, &field.def) {
                        Some(statements) => MigrationStep::column(
                            StepKind::ModifyColumn,
                            &column,
                            statements,
                            schema.column_session(&field.def),
                        ),
                        None => MigrationStep::skipped(
                            StepKind::ModifyColumn,
                            &column,
                            format!("{} cannot alter this column", schema.driver()),
                        ),
                    }
                };
                steps.push(step);
            }
            Some(_) => {}
        }
    }
    steps
}

/// Index steps for a storage against its live table.
pub fn plan_indices(
    storage: &Storage,
    live: &TableSchema,
    schema: &dyn SchemaBuilder,
) -> Vec<MigrationStep> {
    let mut steps = Vec::new();
    for index in &storage.indices {
        let name = storage.index_name(&index.name);
        let columns = storage.index_columns(&index.def);
        let create = schema.add_index(&storage.name, &name, &columns, &index.def);
        let unsupported = || format!("{} cannot build {:?} indexes", schema.driver(), index.def.index_type);

        match live.index(&name) {
            None => steps.push(match create {
                Some(sql) => MigrationStep::planned(StepKind::AddIndex, &name, vec![sql]),
                None => MigrationStep::skipped(StepKind::AddIndex, &name, unsupported()),
            }),
            Some(existing) if !schema.index_matches(&columns, &index.def, existing) => {
                steps.push(match create {
                    Some(sql) => MigrationStep::planned(
                        StepKind::RecreateIndex,
                        &name,
                        vec![schema.drop_index(&storage.name, &name), sql],
                    ),
                    None => MigrationStep::skipped(StepKind::RecreateIndex, &name, unsupported()),
                })
            }
            Some(_) => {}
        }
    }
    steps
}

/// Baseline columns an existing table lacks.
pub fn missing_baseline(storage: &Storage, live: &TableSchema) -> Vec<String> {
    BASELINE_COLUMNS
        .iter()
        .map(|suffix| column_name(&storage.name, suffix))
        .filter(|column| live.column(column).is_none())
        .collect()
}

/// Schema fields of a document storage.
pub fn document_fields(storage: &Storage) -> Vec<DocumentField> {
    storage
        .fields
        .iter()
        .filter(|f| !f.def.is_virtual)
        .map(|f| DocumentField::from_field_def(storage.column_name(&f.name), &f.def))
        .collect()
}

// =============================================================================
// Execution
// =============================================================================

/// Runs migrations for declared storages through their access points.
pub struct Migrator<'a> {
    points: &'a DataAccessPoints,
    storages: &'a Storages,
}

impl<'a> Migrator<'a> {
    pub fn new(points: &'a DataAccessPoints, storages: &'a Storages) -> Self {
        Self { points, storages }
    }

    /// Migrate the selected storages in declaration order.
    ///
    /// Outside dev mode the first DDL failure aborts with a migration error.
    pub async fn run(&self, options: &MigrateOptions) -> DbResult<Vec<MigrationReport>> {
        let selected = self.storages.select(&options.only)?;
        info!(
            storages = selected.len(),
            dev = options.dev,
            dry_run = options.dry_run,
            "Starting migration"
        );

        let mut reports = Vec::with_capacity(selected.len());
        for storage in selected {
            reports.push(self.migrate(storage, options).await?);
        }
        Ok(reports)
    }

    pub async fn migrate(&self, storage: &Storage, options: &MigrateOptions) -> DbResult<MigrationReport> {
        let report = match self.points.point(&storage.access_point).await? {
            AccessPoint::Relational(ap) => migrate_table(&ap, storage, options).await?,
            AccessPoint::Document(ap) => migrate_collection(&ap, storage, options).await?,
        };
        if report.is_up_to_date() {
            debug!(storage = %storage.name, "Storage up to date");
        } else {
            info!(
                storage = %storage.name,
                steps = report.steps.len(),
                failed = report.failures().count(),
                "Storage migrated"
            );
        }
        Ok(report)
    }
}

/// Execute a planned step, honouring dev and dry-run modes.
async fn apply(
    ap: &DataAccessPoint,
    storage: &Storage,
    mut step: MigrationStep,
    options: &MigrateOptions,
) -> DbResult<MigrationStep> {
    if let StepStatus::Skipped(reason) = &step.status {
        warn!(storage = %storage.name, step = %step.kind, target = %step.target, reason = %reason, "Migration step skipped");
        return Ok(step);
    }
    if options.dry_run {
        return Ok(step);
    }

    let mut failure = None;
    for sql in &step.statements {
        if let Err(e) = ap.execute_ddl(sql).await {
            warn!(storage = %storage.name, query = %sql, error = %e, "Migration step failed");
            failure = Some(e.message());
            break;
        }
    }
    // Cleanup restores session state even after a failed statement.
    for sql in &step.cleanup {
        if let Err(e) = ap.execute_ddl(sql).await {
            warn!(storage = %storage.name, query = %sql, error = %e, "Migration cleanup failed");
            failure.get_or_insert_with(|| e.message());
        }
    }

    if let Some(error) = failure {
        let message = format!("{} {}: {}", step.kind, step.target, error);
        if !options.dev {
            return Err(DbError::migration(&storage.name, message));
        }
        step.status = StepStatus::Failed(message);
        return Ok(step);
    }
    debug!(storage = %storage.name, step = %step.kind, target = %step.target, "Migration step applied");
    step.status = StepStatus::Applied;
    Ok(step)
}

async fn migrate_table(
    ap: &DataAccessPoint,
    storage: &Storage,
    options: &MigrateOptions,
) -> DbResult<MigrationReport> {
    let schema = ap.schema_builder();
    let mut report = MigrationReport::new(storage);

    let live = match ap.describe_table(&storage.name).await? {
        Some(live) => {
            let missing = missing_baseline(storage, &live);
            if !missing.is_empty() {
                // The key column cannot be added to a populated table.
                warn!(
                    storage = %storage.name,
                    missing = %missing.join(", "),
                    "Table lacks baseline columns"
                );
            }
            live
        }
        None => {
            let create = MigrationStep::planned(
                StepKind::CreateTable,
                &storage.name,
                vec![schema.create_table(&storage.name)],
            );
            let step = apply(ap, storage, create, options).await?;
            let created = step.status == StepStatus::Applied;
            report.steps.push(step);
            if options.dry_run || !created {
                // Plan the rest against the empty table.
                TableSchema::new(&storage.name)
            } else {
                ap.describe_table(&storage.name)
                    .await?
                    .unwrap_or_else(|| TableSchema::new(&storage.name))
            }
        }
    };

    for step in plan_columns(storage, &live, schema) {
        let step = apply(ap, storage, step, options).await?;
        report.steps.push(step);
    }
    for step in plan_indices(storage, &live, schema) {
        let step = apply(ap, storage, step, options).await?;
        report.steps.push(step);
    }
    Ok(report)
}

async fn migrate_collection(
    ap: &DocumentAccessPoint,
    storage: &Storage,
    options: &MigrateOptions,
) -> DbResult<MigrationReport> {
    let mut report = MigrationReport::new(storage);
    let declared = document_fields(storage);
    let fail = |e: DbError| DbError::migration(&storage.name, e.message());

    let exists = ap.collection_exists(&storage.name).await.map_err(fail)?;
    if !exists {
        let mut step = MigrationStep::planned(StepKind::CreateCollection, &storage.name, Vec::new());
        if options.dry_run {
            report.steps.push(step);
            report.steps.extend(
                declared
                    .iter()
                    .map(|f| MigrationStep::planned(StepKind::AddField, &f.name, Vec::new())),
            );
            return Ok(report);
        }
        match ap.ensure_collection(&storage.name).await {
            Ok(_) => step.status = StepStatus::Applied,
            Err(e) if options.dev => {
                warn!(storage = %storage.name, error = %e, "Collection creation failed");
                step.status = StepStatus::Failed(e.message());
                report.steps.push(step);
                return Ok(report);
            }
            Err(e) => return Err(fail(e)),
        }
        report.steps.push(step);
    }

    let changes = if options.dry_run {
        ap.pending_fields(&storage.name, &declared).await
    } else {
        ap.reconcile_fields(&storage.name, &declared).await
    };
    let status = if options.dry_run {
        StepStatus::Planned
    } else {
        StepStatus::Applied
    };
    match changes {
        Ok(changes) => report.steps.extend(changes.into_iter().map(|change| {
            let (kind, target) = match change {
                FieldChange::Added(name) => (StepKind::AddField, name),
                FieldChange::Replaced(name) => (StepKind::ReplaceField, name),
            };
            MigrationStep {
                kind,
                target,
                statements: Vec::new(),
                cleanup: Vec::new(),
                status: status.clone(),
            }
        })),
        Err(e) if options.dev => {
            warn!(storage = %storage.name, error = %e, "Field reconciliation failed");
            report.steps.push(MigrationStep {
                kind: StepKind::AddField,
                target: storage.name.clone(),
                statements: Vec::new(),
                cleanup: Vec::new(),
                status: StepStatus::Failed(e.message()),
            });
        }
        Err(e) => return Err(fail(e)),
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDefinition, IndexInfo};
    use crate::storage::registry::StoragesConfig;
    use crate::storage::schema::{MySqlSchema, PgSqlSchema, SqliteSchema};
    use std::collections::BTreeMap;

    fn storage() -> Storage {
        let config: StoragesConfig = serde_yaml::from_str(
            r#"
users:
  access-point: main
  fields:
    name: { type: varchar, length: 50, required: true }
    age: int
  indices:
    byname: { fields: [name], type: UNIQUE }
    body: { fields: [name], type: FULLTEXT }
"#,
        )
        .unwrap();
        Storages::from_config(&config, &BTreeMap::new())
            .unwrap()
            .get("users")
            .unwrap()
            .clone()
    }

    #[test]
    fn test_plan_against_empty_table() {
        let storage = storage();
        let live = TableSchema::new("users");

        let columns = plan_columns(&storage, &live, &MySqlSchema);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].kind, StepKind::AddColumn);
        assert_eq!(columns[0].target, "users_name");
        assert_eq!(
            columns[0].statements,
            vec!["ALTER TABLE `users` ADD COLUMN `users_name` varchar(50) NOT NULL".to_string()]
        );

        let indices = plan_indices(&storage, &live, &SqliteSchema);
        assert_eq!(indices[0].status, StepStatus::Planned);
        assert!(matches!(indices[1].status, StepStatus::Skipped(_)));
    }

    #[test]
    fn test_plan_against_matching_table_is_empty() {
        let storage = storage();
        let live = TableSchema::new("users")
            .with_column(ColumnDefinition::new("users_name", "varchar(50)", false))
            .with_column(ColumnDefinition::new("users_age", "int(11)", true))
            .with_index(IndexInfo::new("users_byname", vec!["users_name".into()]).with_unique(true))
            .with_index(
                IndexInfo::new("users_body", vec!["users_name".into()]).with_algorithm("fulltext"),
            );
        assert!(plan_columns(&storage, &live, &MySqlSchema).is_empty());
        assert!(plan_indices(&storage, &live, &MySqlSchema).is_empty());
    }

    #[test]
    fn test_plan_against_live_gin_index() {
        let storage = storage();
        let byname = IndexInfo::new("users_byname", vec!["users_name".into()])
            .with_unique(true)
            .with_algorithm("btree");
        // A to_tsvector index reports no plain columns.
        let live = TableSchema::new("users")
            .with_index(byname.clone())
            .with_index(IndexInfo::new("users_body", vec![]).with_algorithm("gin"));
        assert!(plan_indices(&storage, &live, &PgSqlSchema).is_empty());

        let live = TableSchema::new("users")
            .with_index(byname)
            .with_index(IndexInfo::new("users_body", vec!["users_name".into()]).with_algorithm("btree"));
        let steps = plan_indices(&storage, &live, &PgSqlSchema);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind, StepKind::RecreateIndex);
        assert!(steps[0].statements[1].contains("USING gin"));
    }

    #[test]
    fn test_plan_differences() {
        let storage = storage();
        let live = TableSchema::new("users")
            .with_column(ColumnDefinition::new("users_name", "varchar(20)", true))
            .with_column(ColumnDefinition::new("users_age", "int", true))
            .with_index(IndexInfo::new("users_byname", vec!["users_name".into()]));

        let columns = plan_columns(&storage, &live, &MySqlSchema);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].kind, StepKind::ModifyColumn);

        let columns = plan_columns(&storage, &live, &SqliteSchema);
        assert!(matches!(columns[0].status, StepStatus::Skipped(_)));

        let indices = plan_indices(&storage, &live, &MySqlSchema);
        assert_eq!(indices[0].kind, StepKind::RecreateIndex);
        assert_eq!(indices[0].statements.len(), 2);
        assert!(indices[0].statements[0].contains("DROP INDEX"));
        assert_eq!(indices[1].kind, StepKind::AddIndex);
    }

    #[test]
    fn test_report_helpers() {
        let mut report = MigrationReport::new(&storage());
        assert!(report.is_up_to_date());
        report.steps.push(MigrationStep::skipped(StepKind::AddIndex, "x", "no"));
        assert!(report.is_up_to_date());
        report.steps.push(MigrationStep::planned(StepKind::AddColumn, "y", vec![]));
        assert!(!report.is_up_to_date());
        assert_eq!(report.count(|s| *s == StepStatus::Planned), 1);
        assert_eq!(report.failures().count(), 0);
    }

    fn sqlite_point() -> DataAccessPoint {
        use crate::db::builder::SqliteBuilder;
        use crate::db::drivers::SqliteDriver;
        use crate::models::{ConnectionInfo, DriverKind};

        let info = ConnectionInfo::new(DriverKind::Sqlite, "", ":memory:");
        DataAccessPoint::new(
            "main",
            Box::new(SqliteDriver::new(info)),
            Box::new(SqliteBuilder),
            Box::new(SqliteSchema),
        )
    }

    fn bracketed_step() -> MigrationStep {
        MigrationStep::column(
            StepKind::AddColumn,
            "users_a",
            vec!["ALTER TABLE missing ADD COLUMN users_a INT".to_string()],
            Some((
                "CREATE TABLE session_off (x INT)".to_string(),
                "CREATE TABLE session_on (x INT)".to_string(),
            )),
        )
    }

    #[tokio::test]
    async fn test_cleanup_runs_after_failed_statement() {
        let ap = sqlite_point();
        let storage = storage();
        let dev = MigrateOptions {
            dev: true,
            ..MigrateOptions::default()
        };

        let step = apply(&ap, &storage, bracketed_step(), &dev).await.unwrap();
        assert!(matches!(step.status, StepStatus::Failed(_)), "{:?}", step.status);
        let tables = ap.tables(None).await.unwrap();
        assert!(tables.contains(&"session_off".to_string()));
        assert!(tables.contains(&"session_on".to_string()));

        ap.execute_ddl("DROP TABLE session_on").await.unwrap();
        let err = apply(&ap, &storage, bracketed_step(), &MigrateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Migration { .. }), "{:?}", err);
        assert!(ap.tables(None).await.unwrap().contains(&"session_on".to_string()));
    }

    #[test]
    fn test_uuid_column_restores_binlog_in_cleanup() {
        let config: StoragesConfig = serde_yaml::from_str(
            r#"
refs:
  access-point: main
  fields:
    token: { type: varchar, length: 36, default: "UUID()" }
"#,
        )
        .unwrap();
        let storages = Storages::from_config(&config, &BTreeMap::new()).unwrap();
        let storage = storages.get("refs").unwrap();

        let steps = plan_columns(storage, &TableSchema::new("refs"), &MySqlSchema);
        assert_eq!(steps[0].statements.len(), 2);
        assert_eq!(steps[0].statements[0], "SET SQL_LOG_BIN = 0");
        assert_eq!(steps[0].cleanup, vec!["SET SQL_LOG_BIN = 1".to_string()]);

        let steps = plan_columns(storage, &TableSchema::new("refs"), &SqliteSchema);
        assert!(steps[0].cleanup.is_empty());
    }

    #[test]
    fn test_missing_baseline_columns() {
        let storage = storage();
        let live = TableSchema::new("users")
            .with_column(ColumnDefinition::new("users_id", "integer", false))
            .with_column(ColumnDefinition::new("users_name", "varchar(50)", false));
        assert_eq!(
            missing_baseline(&storage, &live),
            vec!["users_datecreated".to_string(), "users_datemodified".to_string()]
        );

        let live = live
            .with_column(ColumnDefinition::new("USERS_DATECREATED", "datetime", false))
            .with_column(ColumnDefinition::new("users_datemodified", "datetime", false));
        assert!(missing_baseline(&storage, &live).is_empty());
    }

    #[test]
    fn test_document_fields_use_real_names() {
        let fields = document_fields(&storage());
        assert_eq!(fields[0].name, "users_name");
        assert!(fields[0].required);
        assert_eq!(fields[1].field_type, "plong");
    }
}
