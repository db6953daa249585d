//! Driver and access point registries.
//!
//! [`DriverRegistry`] maps a [`DriverKind`] to the constructors of its
//! connection and dialect builders. [`DataAccessPoints`] resolves configured
//! access points through it and caches them by name.

use crate::config::FileConfig;
use crate::db::access_point::DataAccessPoint;
use crate::db::builder::{MsSqlBuilder, MySqlBuilder, PgSqlBuilder, QueryBuilder, SqliteBuilder};
use crate::db::connection::Connection;
use crate::db::drivers::{MsSqlDriver, MySqlDriver, PgSqlDriver, SqliteDriver};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, DriverKind};
use crate::nosql::{DocumentAccessPoint, DocumentStore, MongoStore, SolrStore};
use crate::storage::schema::{MsSqlSchema, MySqlSchema, PgSqlSchema, SchemaBuilder, SqliteSchema};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub type ConnectionFactory = fn(ConnectionInfo) -> Box<dyn Connection>;
pub type QueryBuilderFactory = fn() -> Box<dyn QueryBuilder>;
pub type SchemaBuilderFactory = fn() -> Box<dyn SchemaBuilder>;
pub type DocumentFactory = fn(ConnectionInfo) -> Box<dyn DocumentStore>;

/// Constructors registered for one driver.
#[derive(Clone, Copy)]
pub enum DriverEntry {
    Relational {
        connection: ConnectionFactory,
        query_builder: QueryBuilderFactory,
        schema_builder: SchemaBuilderFactory,
    },
    Document(DocumentFactory),
}

impl std::fmt::Debug for DriverEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Relational { .. } => f.write_str("Relational"),
            Self::Document(_) => f.write_str("Document"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    entries: HashMap<DriverKind, DriverEntry>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every driver shipped with the crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_relational(
            DriverKind::MySql,
            |info| Box::new(MySqlDriver::new(info)),
            || Box::new(MySqlBuilder),
            || Box::new(MySqlSchema),
        );
        registry.register_relational(
            DriverKind::PgSql,
            |info| Box::new(PgSqlDriver::new(info)),
            || Box::new(PgSqlBuilder),
            || Box::new(PgSqlSchema),
        );
        registry.register_relational(
            DriverKind::MsSql,
            |info| Box::new(MsSqlDriver::new(info)),
            || Box::new(MsSqlBuilder),
            || Box::new(MsSqlSchema),
        );
        registry.register_relational(
            DriverKind::Sqlite,
            |info| Box::new(SqliteDriver::new(info)),
            || Box::new(SqliteBuilder),
            || Box::new(SqliteSchema),
        );
        registry.register_document(DriverKind::MongoDb, |info| Box::new(MongoStore::new(info)));
        registry.register_document(DriverKind::Solr, |info| Box::new(SolrStore::new(info)));
        registry
    }

    pub fn register_relational(
        &mut self,
        driver: DriverKind,
        connection: ConnectionFactory,
        query_builder: QueryBuilderFactory,
        schema_builder: SchemaBuilderFactory,
    ) {
        self.entries.insert(
            driver,
            DriverEntry::Relational {
                connection,
                query_builder,
                schema_builder,
            },
        );
    }

    pub fn register_document(&mut self, driver: DriverKind, store: DocumentFactory) {
        self.entries.insert(driver, DriverEntry::Document(store));
    }

    pub fn get(&self, driver: DriverKind) -> DbResult<DriverEntry> {
        self.entries
            .get(&driver)
            .copied()
            .ok_or_else(|| DbError::unknown_driver(driver.id()))
    }

    pub fn contains(&self, driver: DriverKind) -> bool {
        self.entries.contains_key(&driver)
    }
}

/// Either kind of access point.
#[derive(Debug, Clone)]
pub enum AccessPoint {
    Relational(Arc<DataAccessPoint>),
    Document(Arc<DocumentAccessPoint>),
}

impl AccessPoint {
    pub fn name(&self) -> &str {
        match self {
            Self::Relational(ap) => ap.name(),
            Self::Document(ap) => ap.name(),
        }
    }

    pub fn driver(&self) -> DriverKind {
        match self {
            Self::Relational(ap) => ap.driver(),
            Self::Document(ap) => ap.driver(),
        }
    }

    pub async fn ping(&self) -> bool {
        match self {
            Self::Relational(ap) => ap.ping().await,
            Self::Document(ap) => ap.ping().await,
        }
    }

    pub async fn close(&self) -> DbResult<()> {
        match self {
            Self::Relational(ap) => ap.close().await,
            Self::Document(ap) => ap.close().await,
        }
    }
}

/// Named access points built from configuration, created on first use.
///
/// A point is opened when it is created; creation happens outside the cache
/// lock, and a point that lost a concurrent creation race is closed again.
#[derive(Debug)]
pub struct DataAccessPoints {
    config: FileConfig,
    drivers: DriverRegistry,
    points: RwLock<HashMap<String, AccessPoint>>,
}

impl DataAccessPoints {
    pub fn new(config: FileConfig) -> Self {
        Self::with_drivers(config, DriverRegistry::builtin())
    }

    pub fn with_drivers(config: FileConfig, drivers: DriverRegistry) -> Self {
        Self {
            config,
            drivers,
            points: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    /// Configured access point names.
    pub fn names(&self) -> Vec<String> {
        self.config.point_names()
    }

    /// Build an access point without opening or caching it.
    pub fn build(&self, name: &str) -> DbResult<AccessPoint> {
        let resolved = self.config.resolve_point(name)?;
        let driver = resolved.info.driver;
        Ok(match self.drivers.get(driver)? {
            DriverEntry::Relational {
                connection,
                query_builder,
                schema_builder,
            } => AccessPoint::Relational(Arc::new(
                DataAccessPoint::new(
                    name,
                    connection(resolved.info),
                    query_builder(),
                    schema_builder(),
                )
                .with_log_queries(resolved.log_queries),
            )),
            DriverEntry::Document(store) => {
                let id_field = resolved.info.option("id_field").unwrap_or("id").to_string();
                AccessPoint::Document(Arc::new(
                    DocumentAccessPoint::new(name, store(resolved.info))
                        .with_log_queries(resolved.log_queries)
                        .with_id_field(id_field),
                ))
            }
        })
    }

    /// Cached access point, created and opened on first use.
    pub async fn point(&self, name: &str) -> DbResult<AccessPoint> {
        {
            let points = self.points.read().await;
            if let Some(point) = points.get(name) {
                return Ok(point.clone());
            }
        }

        let point = self.build(name)?;
        debug!(point = %name, driver = %point.driver(), "Creating access point");
        match &point {
            AccessPoint::Relational(ap) => ap.open().await?,
            AccessPoint::Document(ap) => ap.open().await?,
        }

        // Re-check after the open to prevent a TOCTOU race
        let (winner, loser) = {
            let mut points = self.points.write().await;
            match points.get(name) {
                Some(existing) => (existing.clone(), Some(point)),
                None => {
                    points.insert(name.to_string(), point.clone());
                    (point, None)
                }
            }
        };

        if let Some(loser) = loser {
            if let Err(e) = loser.close().await {
                warn!(point = %name, error = %e, "Failed to close duplicate access point");
            }
        } else {
            info!(point = %name, driver = %winner.driver(), "Access point ready");
        }
        Ok(winner)
    }

    /// Relational access point by name.
    pub async fn get(&self, name: &str) -> DbResult<Arc<DataAccessPoint>> {
        match self.point(name).await? {
            AccessPoint::Relational(ap) => Ok(ap),
            AccessPoint::Document(ap) => Err(DbError::unsupported(
                ap.driver().id(),
                format!("'{}' is a document store, not a relational access point", name),
            )),
        }
    }

    /// Document access point by name.
    pub async fn get_document(&self, name: &str) -> DbResult<Arc<DocumentAccessPoint>> {
        match self.point(name).await? {
            AccessPoint::Document(ap) => Ok(ap),
            AccessPoint::Relational(ap) => Err(DbError::unsupported(
                ap.driver().id(),
                format!("'{}' is a relational access point, not a document store", name),
            )),
        }
    }

    /// Close and forget every cached access point.
    pub async fn close_all(&self) {
        let points: Vec<(String, AccessPoint)> = self.points.write().await.drain().collect();
        for (name, point) in points {
            if let Err(e) = point.close().await {
                warn!(point = %name, error = %e, "Failed to close access point");
            }
        }
    }
}
