//! Configuration handling.
//!
//! Two layers: the command line (clap, with environment fallbacks) selects a
//! configuration file and a command; the file (YAML or JSON, chosen by
//! extension) declares drivers, connections, access points, storages and
//! modules.

use crate::error::{DbError, DbResult};
use crate::format::OutputFormat;
use crate::models::{ConnectionInfo, DEFAULT_PAGE_SIZE, DriverKind, QueryType};
use crate::storage::{ModuleConfig, StoragesConfig};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Command line
// =============================================================================

/// Command-line configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "colibri-data",
    about = "Multi-driver data access layer with schema migration",
    version,
    author
)]
pub struct Config {
    /// Configuration file (.yaml, .yml or .json)
    #[arg(short, long = "config", value_name = "FILE", env = "COLIBRI_DATA_CONFIG")]
    pub config: PathBuf,

    /// Log filter (trace, debug, info, warn, error or a tracing directive)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "COLIBRI_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "COLIBRI_JSON_LOGS")]
    pub json_logs: bool,

    /// Output format of command results
    #[arg(long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Bring declared storages in line with the live schema
    Migrate {
        /// Log DDL failures and continue instead of aborting
        #[arg(long)]
        dev: bool,
        /// Plan and print the DDL without executing it
        #[arg(long)]
        dry_run: bool,
        /// Only migrate these storages
        #[arg(long = "storage", value_name = "NAME")]
        storages: Vec<String>,
    },
    /// Run a query against an access point
    Query {
        point: String,
        sql: String,
        /// Placeholder value, repeatable
        #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// 1-based page; 0 reads everything
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        pagesize: u32,
        /// reader, bigdata or noninfo
        #[arg(long = "type", default_value = "bigdata")]
        query_type: QueryType,
    },
    /// List the tables of an access point
    Tables {
        point: String,
        #[arg(long)]
        like: Option<String>,
    },
    /// Show live column and index metadata of a table
    Describe { point: String, table: String },
    /// Check that access points answer; all of them when none are named
    Ping { points: Vec<String> },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

// =============================================================================
// Configuration file
// =============================================================================

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default, rename = "access-points", alias = "access_points")]
    pub access_points: AccessPointsConfig,
    #[serde(default)]
    pub storages: StoragesConfig,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessPointsConfig {
    /// Alias → registered driver id.
    #[serde(default)]
    pub drivers: BTreeMap<String, String>,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub points: BTreeMap<String, PointConfig>,
}

/// A connection entry: explicit fields, a DSN, or a DSN with overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default, rename = "type", alias = "driver")]
    pub driver: Option<String>,
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub options: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointConfig {
    pub connection: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub logqueries: bool,
}

/// An access point with its chain resolved down to a connection profile.
#[derive(Debug, Clone)]
pub struct ResolvedPoint {
    pub name: String,
    pub info: ConnectionInfo,
    pub log_queries: bool,
}

impl FileConfig {
    /// Load a configuration file, picking the format from its extension.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DbError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&text),
            "json" => Self::from_json(&text),
            other => Err(DbError::configuration(format!(
                "unsupported configuration format '{}' (expected .yaml, .yml or .json)",
                other
            ))),
        }
    }

    pub fn from_yaml(text: &str) -> DbResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json(text: &str) -> DbResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Access point names in sorted order.
    pub fn point_names(&self) -> Vec<String> {
        self.access_points.points.keys().cloned().collect()
    }

    /// Resolve point → connection → driver alias → driver.
    pub fn resolve_point(&self, name: &str) -> DbResult<ResolvedPoint> {
        let aps = &self.access_points;
        let point = aps
            .points
            .get(name)
            .ok_or_else(|| DbError::access_point_not_found(name))?;
        let conn = aps
            .connections
            .get(&point.connection)
            .ok_or_else(|| DbError::connection_not_found(&point.connection))?;

        let mut info = match &conn.dsn {
            Some(dsn) => ConnectionInfo::from_dsn(dsn).map_err(|e| {
                DbError::configuration(format!("connection '{}': {}", point.connection, e))
            })?,
            None => {
                let driver = self.driver_kind(conn.driver.as_deref().ok_or_else(|| {
                    DbError::configuration(format!(
                        "connection '{}' has neither type nor dsn",
                        point.connection
                    ))
                })?)?;
                ConnectionInfo::new(driver, "localhost", "")
            }
        };
        if let (Some(_), Some(driver)) = (&conn.dsn, &conn.driver) {
            info.driver = self.driver_kind(driver)?;
        }

        if let Some(host) = conn.host.as_ref().filter(|h| !h.is_empty()) {
            info.host = host.clone();
        }
        if conn.port.is_some() {
            info.port = conn.port;
        }
        if let Some(user) = &conn.user {
            info.user = user.clone();
        }
        if let Some(password) = &conn.password {
            info.password = password.clone();
        }
        info.persistent = conn.persistent;
        for (key, value) in &conn.options {
            let value = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            info.options.insert(key.clone(), value);
        }
        if !point.database.is_empty() {
            info.database = point.database.clone();
        }

        Ok(ResolvedPoint {
            name: name.to_string(),
            info,
            log_queries: point.logqueries,
        })
    }

    /// Driver for a configured type, following one alias hop.
    pub fn driver_kind(&self, id: &str) -> DbResult<DriverKind> {
        let target = self
            .access_points
            .drivers
            .get(id)
            .map(String::as_str)
            .unwrap_or(id);
        DriverKind::from_str(target).map_err(|_| DbError::unknown_driver(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
access-points:
  drivers:
    maria: mysql
  connections:
    local:
      type: maria
      host: db.local
      port: 3307
      user: root
      password: secret
      options: { timeout: 5, charset: utf8mb4 }
    lite:
      dsn: "sqlite:data/app.db"
    broken:
      type: oracle
  points:
    main:
      connection: local
      database: app
      logqueries: true
    files:
      connection: lite
    orphan:
      connection: nowhere
    odd:
      connection: broken
storages:
  users:
    access-point: main
    fields:
      name: "varchar(255)"
"#;

    #[test]
    fn test_resolve_point_chain() {
        let config = FileConfig::from_yaml(YAML).unwrap();
        let main = config.resolve_point("main").unwrap();
        assert_eq!(main.info.driver, DriverKind::MySql);
        assert_eq!(main.info.host, "db.local");
        assert_eq!(main.info.port, Some(3307));
        assert_eq!(main.info.database, "app");
        assert_eq!(main.info.option("timeout"), Some("5"));
        assert_eq!(main.info.option("charset"), Some("utf8mb4"));
        assert!(main.log_queries);

        let files = config.resolve_point("files").unwrap();
        assert_eq!(files.info.driver, DriverKind::Sqlite);
        assert_eq!(files.info.database, "data/app.db");
        assert!(!files.log_queries);
    }

    #[test]
    fn test_resolve_point_errors() {
        let config = FileConfig::from_yaml(YAML).unwrap();
        assert!(matches!(
            config.resolve_point("missing"),
            Err(DbError::AccessPointNotFound { .. })
        ));
        assert!(matches!(
            config.resolve_point("orphan"),
            Err(DbError::ConnectionNotFound { .. })
        ));
        assert!(matches!(
            config.resolve_point("odd"),
            Err(DbError::UnknownDriver { .. })
        ));
    }

    #[test]
    fn test_json_and_storages_section() {
        let config = FileConfig::from_json(
            r#"{"access-points": {"connections": {}, "points": {}},
                "storages": {"t": {"access-point": "main", "fields": {"a": "int"}}}}"#,
        )
        .unwrap();
        assert!(config.point_names().is_empty());
        assert_eq!(config.storages.storages.len(), 1);
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("app.yml");
        std::fs::write(&yaml, YAML).unwrap();
        assert_eq!(FileConfig::load(&yaml).unwrap().point_names().len(), 4);

        let toml = dir.path().join("app.toml");
        std::fs::write(&toml, "").unwrap();
        assert!(FileConfig::load(&toml).is_err());
        assert!(FileConfig::load(dir.path().join("none.yaml")).is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let config = Config::try_parse_from([
            "colibri-data",
            "--config",
            "app.yaml",
            "query",
            "main",
            "SELECT * FROM t WHERE id = [[id:integer]]",
            "--param",
            "id=5",
            "--page",
            "2",
            "--type",
            "reader",
        ])
        .unwrap();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.format, OutputFormat::Table);
        match config.command {
            Commands::Query {
                params,
                page,
                pagesize,
                query_type,
                ..
            } => {
                assert_eq!(params, vec![("id".to_string(), "5".to_string())]);
                assert_eq!(page, 2);
                assert_eq!(pagesize, DEFAULT_PAGE_SIZE);
                assert_eq!(query_type, QueryType::Reader);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let config = Config::try_parse_from([
            "colibri-data", "-c", "app.yaml", "migrate", "--dev", "--dry-run", "--storage", "users",
            "--format", "json",
        ])
        .unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert!(matches!(
            config.command,
            Commands::Migrate { dev: true, dry_run: true, ref storages } if storages == &["users".to_string()]
        ));

        assert!(
            Config::try_parse_from(["colibri-data", "-c", "a.yaml", "query", "p", "x", "--param", "novalue"])
                .is_err()
        );
    }
}
