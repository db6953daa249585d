//! Integration tests for storage migration against a SQLite file.
//!
//! Tests verify that:
//! - A missing table is created with its baseline and declared columns
//! - A second run finds nothing left to do
//! - Dry runs plan without touching the database
//! - Columns the configuration does not declare are left alone
//! - Dev mode records DDL failures instead of aborting

use colibri_data::config::FileConfig;
use colibri_data::db::DataAccessPoints;
use colibri_data::error::DbError;
use colibri_data::storage::{MigrateOptions, Migrator, StepKind, StepStatus, Storages};
use std::io::Write;
use tempfile::TempDir;

fn config_yaml(db_path: &str) -> String {
    format!(
        r#"
access-points:
  drivers:
    lite: sqlite
  connections:
    local: {{ type: lite }}
  points:
    main: {{ connection: local, database: "{}" }}
storages:
  notes:
    access-point: main
    desc: Notes
    fields:
      title: "varchar(100)"
      body: text
      views: {{ type: int, required: true, default: 0 }}
    indices:
      bytitle: {{ fields: [title], type: UNIQUE }}
modules:
  tags:
    storages:
      tags:
        access-point: main
        fields:
          label: "varchar(40)"
"#,
        db_path
    )
}

struct Fixture {
    _dir: TempDir,
    points: DataAccessPoints,
    storages: Storages,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("storage.db");
    let config = FileConfig::from_yaml(&config_yaml(path.to_str().unwrap())).unwrap();
    let storages = Storages::from_config(&config.storages, &config.modules).unwrap();
    Fixture {
        _dir: dir,
        points: DataAccessPoints::new(config),
        storages,
    }
}

#[tokio::test]
async fn test_migrate_creates_and_converges() {
    let fx = fixture();
    let migrator = Migrator::new(&fx.points, &fx.storages);

    let reports = migrator.run(&MigrateOptions::default()).await.unwrap();
    assert_eq!(reports.len(), 2);
    let notes = &reports[0];
    assert_eq!(notes.storage, "notes");
    assert_eq!(notes.steps[0].kind, StepKind::CreateTable);
    assert_eq!(notes.count(|s| *s == StepStatus::Applied), notes.steps.len());
    let added: Vec<&str> = notes
        .steps
        .iter()
        .filter(|s| s.kind == StepKind::AddColumn)
        .map(|s| s.target.as_str())
        .collect();
    assert_eq!(added, vec!["notes_title", "notes_body", "notes_views"]);

    let ap = fx.points.get("main").await.unwrap();
    let live = ap.describe_table("notes").await.unwrap().unwrap();
    for column in ["notes_id", "notes_datecreated", "notes_title", "notes_views"] {
        assert!(live.column(column).is_some(), "{}", column);
    }
    assert!(live.index("notes_bytitle").unwrap().is_unique);
    assert!(ap.describe_table("tags").await.unwrap().is_some());

    let again = migrator.run(&MigrateOptions::default()).await.unwrap();
    assert!(again.iter().all(|r| r.is_up_to_date()), "{:?}", again);
}

#[tokio::test]
async fn test_dry_run_plans_only() {
    let fx = fixture();
    let options = MigrateOptions {
        dry_run: true,
        ..MigrateOptions::default()
    };
    let reports = Migrator::new(&fx.points, &fx.storages)
        .run(&options)
        .await
        .unwrap();
    let notes = &reports[0];
    assert!(!notes.steps.is_empty());
    assert!(notes.steps.iter().all(|s| s.status == StepStatus::Planned));
    assert!(notes.steps[0].statements[0].starts_with("CREATE TABLE IF NOT EXISTS"));

    let ap = fx.points.get("main").await.unwrap();
    assert!(ap.describe_table("notes").await.unwrap().is_none());
}

#[tokio::test]
async fn test_only_selected_storages() {
    let fx = fixture();
    let options = MigrateOptions {
        only: vec!["tags".to_string()],
        ..MigrateOptions::default()
    };
    let reports = Migrator::new(&fx.points, &fx.storages)
        .run(&options)
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].storage, "tags");

    let ap = fx.points.get("main").await.unwrap();
    assert!(ap.describe_table("notes").await.unwrap().is_none());

    let options = MigrateOptions {
        only: vec!["nope".to_string()],
        ..MigrateOptions::default()
    };
    assert!(
        Migrator::new(&fx.points, &fx.storages)
            .run(&options)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_undeclared_columns_are_kept() {
    let fx = fixture();
    let ap = fx.points.get("main").await.unwrap();
    ap.execute_ddl(
        "CREATE TABLE notes (notes_id INTEGER PRIMARY KEY AUTOINCREMENT, \
         notes_datecreated DATETIME, notes_datemodified DATETIME, \
         notes_title varchar(100), notes_extra TEXT)",
    )
    .await
    .unwrap();

    let reports = Migrator::new(&fx.points, &fx.storages)
        .run(&MigrateOptions::default())
        .await
        .unwrap();
    let kinds: Vec<StepKind> = reports[0].steps.iter().map(|s| s.kind).collect();
    assert!(!kinds.contains(&StepKind::CreateTable));
    assert_eq!(
        kinds.iter().filter(|k| **k == StepKind::AddColumn).count(),
        2
    );

    let live = ap.describe_table("notes").await.unwrap().unwrap();
    assert!(live.column("notes_extra").is_some());
    assert!(live.column("notes_body").is_some());
}

#[tokio::test]
async fn test_dev_mode_records_failures() {
    let fx = fixture();
    let ap = fx.points.get("main").await.unwrap();
    ap.execute_ddl("CREATE TABLE notes (notes_id INTEGER PRIMARY KEY, notes_title TEXT)")
        .await
        .unwrap();
    ap.execute_ddl("INSERT INTO notes (notes_title) VALUES ('a'), ('a')")
        .await
        .unwrap();

    // The unique index cannot be built over duplicate titles.
    let err = Migrator::new(&fx.points, &fx.storages)
        .run(&MigrateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Migration { .. }), "{:?}", err);

    let options = MigrateOptions {
        dev: true,
        ..MigrateOptions::default()
    };
    let reports = Migrator::new(&fx.points, &fx.storages)
        .run(&options)
        .await
        .unwrap();
    let failed: Vec<_> = reports[0].failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind, StepKind::AddIndex);
}

#[tokio::test]
async fn test_load_yaml_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loaded.db");
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(config_yaml(path.to_str().unwrap()).as_bytes())
        .unwrap();

    let config = FileConfig::load(file.path()).unwrap();
    assert_eq!(config.point_names(), vec!["main"]);
    let storages = Storages::from_config(&config.storages, &config.modules).unwrap();
    assert_eq!(storages.names(), vec!["notes", "tags"]);
}
