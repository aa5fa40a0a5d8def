//! Named pool registry for gridway-rdbc
//!
//! Process-wide map of `database name → ConnectionPool`, built from the
//! `db.*` configuration section. Pools are created lazily on first borrow;
//! creation is guarded so concurrent first-borrows share one pool.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::connection::ConnectionConfig;
use crate::drivers::DriverRegistry;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};

/// Configuration for one named database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Database type, e.g. `"postgresql"` or `"mysql"`; selects the SQL dialect
    #[serde(rename = "type")]
    pub db_type: String,
    /// Name of the registered driver factory
    pub factory: String,
    /// Connection settings handed to the factory
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Pool sizing and validation policy
    #[serde(default)]
    pub pool: PoolConfig,
}

/// The `db` configuration section: a default database plus named entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbSection {
    /// Database used when an operation names none
    #[serde(default)]
    pub default_database: Option<String>,
    /// Named database configurations
    #[serde(flatten)]
    pub databases: HashMap<String, DbConfig>,
}

/// Named registry of connection pools.
pub struct ConnectionPools {
    section: DbSection,
    drivers: DriverRegistry,
    pools: DashMap<String, Arc<ConnectionPool>>,
}

impl ConnectionPools {
    /// Build the registry from the `db` config section and the driver
    /// registry populated at program start.
    pub fn new(section: DbSection, drivers: DriverRegistry) -> Self {
        Self {
            section,
            drivers,
            pools: DashMap::new(),
        }
    }

    /// Resolve an optional database name against the configured default.
    fn resolve_name<'a>(&'a self, db_name: Option<&'a str>) -> Result<&'a str> {
        match db_name {
            Some(name) => Ok(name),
            None => self
                .section
                .default_database
                .as_deref()
                .ok_or_else(|| Error::config("no db.default_database configured")),
        }
    }

    fn db_config(&self, name: &str) -> Result<&DbConfig> {
        self.section
            .databases
            .get(name)
            .ok_or_else(|| Error::config(format!("no db.{name} section configured")))
    }

    fn pool_for(&self, name: &str) -> Result<Arc<ConnectionPool>> {
        if let Some(pool) = self.pools.get(name) {
            return Ok(pool.clone());
        }

        let config = self.db_config(name)?;
        let factory = self.drivers.driver(&config.factory)?;

        // entry() keeps concurrent first-borrows from racing pool creation
        let pool = self
            .pools
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(db = name, driver = %config.factory, "creating connection pool");
                ConnectionPool::new(
                    name,
                    config.connection.clone(),
                    config.pool.clone(),
                    factory,
                )
            })
            .clone();
        Ok(pool)
    }

    /// Borrow a connection from the named (or default) database's pool.
    pub async fn acquire(&self, db_name: Option<&str>) -> Result<PooledConnection> {
        let name = self.resolve_name(db_name)?;
        let pool = self.pool_for(name)?;
        pool.acquire().await
    }

    /// Return a borrowed connection to its pool.
    ///
    /// Failures here are surfaced so the caller can log them, but the
    /// connection guard guarantees the pool slot is freed either way.
    pub async fn release(&self, db_name: Option<&str>, conn: PooledConnection) -> Result<()> {
        let name = self.resolve_name(db_name)?;
        match self.pools.get(name) {
            Some(pool) => {
                pool.release(conn).await;
                Ok(())
            }
            None => {
                error!(db = name, "release for a database with no pool");
                Err(Error::internal(format!("no pool for database '{name}'")))
            }
        }
    }

    /// Look up the configured `type` of a database; selects the SQL dialect.
    pub fn db_type(&self, db_name: Option<&str>) -> Result<String> {
        let name = self.resolve_name(db_name)?;
        Ok(self.db_config(name)?.db_type.clone())
    }

    /// Close every pool.
    pub async fn close_all(&self) {
        for entry in self.pools.iter() {
            entry.value().close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnectionFactory;

    fn registry() -> ConnectionPools {
        let mut drivers = DriverRegistry::new();
        drivers.register("mock", Arc::new(MockConnectionFactory::new()));

        let mut databases = HashMap::new();
        databases.insert(
            "main".to_string(),
            DbConfig {
                db_type: "postgresql".to_string(),
                factory: "mock".to_string(),
                connection: ConnectionConfig::new("mock://main"),
                pool: PoolConfig::default(),
            },
        );

        ConnectionPools::new(
            DbSection {
                default_database: Some("main".to_string()),
                databases,
            },
            drivers,
        )
    }

    #[tokio::test]
    async fn test_acquire_default_database() {
        let pools = registry();
        let conn = pools.acquire(None).await.unwrap();
        pools.release(None, conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_named_database() {
        let pools = registry();
        let conn = pools.acquire(Some("main")).await.unwrap();
        pools.release(Some("main"), conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_database() {
        let pools = registry();
        let err = pools.acquire(Some("reporting")).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_no_default_database() {
        let mut drivers = DriverRegistry::new();
        drivers.register("mock", Arc::new(MockConnectionFactory::new()));
        let pools = ConnectionPools::new(DbSection::default(), drivers);

        let err = pools.acquire(None).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_unknown_driver() {
        let mut databases = HashMap::new();
        databases.insert(
            "main".to_string(),
            DbConfig {
                db_type: "postgresql".to_string(),
                factory: "missing".to_string(),
                connection: ConnectionConfig::default(),
                pool: PoolConfig::default(),
            },
        );
        let pools = ConnectionPools::new(
            DbSection {
                default_database: Some("main".to_string()),
                databases,
            },
            DriverRegistry::new(),
        );

        let err = pools.acquire(None).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDriver { .. }));
    }

    #[test]
    fn test_db_type_lookup() {
        let pools = registry();
        assert_eq!(pools.db_type(None).unwrap(), "postgresql");
        assert_eq!(pools.db_type(Some("main")).unwrap(), "postgresql");
        assert!(pools.db_type(Some("reporting")).is_err());
    }

    #[test]
    fn test_db_section_deserialization() {
        let toml = r#"
            default_database = "main"

            [main]
            type = "postgresql"
            factory = "postgres"

            [main.connection]
            url = "postgres://localhost/app"

            [main.pool]
            max_size = 4
        "#;
        let section: DbSection = toml::from_str(toml).unwrap();
        assert_eq!(section.default_database.as_deref(), Some("main"));
        let main = section.databases.get("main").unwrap();
        assert_eq!(main.db_type, "postgresql");
        assert_eq!(main.factory, "postgres");
        assert_eq!(main.connection.url, "postgres://localhost/app");
        assert_eq!(main.pool.max_size, 4);
    }
}
