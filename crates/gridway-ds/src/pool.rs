//! Data-source pool registry
//!
//! Process-wide map of `data-source id → pool of engine instances`. The
//! descriptor is loaded from disk once per id and cached for the life of
//! the process; engine instances are pooled and handed out exclusively,
//! one operation at a time.
//!
//! Custom engines are provided by a constructor registry populated at
//! program start, keyed by the descriptor's `serverConstructor`.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::DsContext;
use crate::datasource::{DataSource, GenericDataSource};
use crate::descriptor::{load_descriptor, DataSourceDescriptor, ServerType};
use crate::error::{Error, Result};
use crate::json::JsonFileDataSource;
use crate::sql::SqlDataSource;

/// Factory for a custom engine, registered under a `serverConstructor` name.
pub type EngineFactory =
    Arc<dyn Fn(Arc<DataSourceDescriptor>, Arc<DsContext>) -> Box<dyn DataSource> + Send + Sync>;

/// Named registry of pooled data-source engines.
pub struct DataSourcePools {
    ctx: Arc<DsContext>,
    /// Descriptor cache, write-once per id
    descriptors: DashMap<String, Arc<DataSourceDescriptor>>,
    /// Idle engine instances per id
    idle: DashMap<String, Mutex<Vec<Box<dyn DataSource>>>>,
    /// Custom engine constructors
    constructors: HashMap<String, EngineFactory>,
}

impl DataSourcePools {
    /// Create the registry over an engine context.
    pub fn new(ctx: Arc<DsContext>) -> Self {
        Self {
            ctx,
            descriptors: DashMap::new(),
            idle: DashMap::new(),
            constructors: HashMap::new(),
        }
    }

    /// Register a custom engine constructor. Call at program start, before
    /// requests are served.
    pub fn register_constructor(&mut self, name: impl Into<String>, factory: EngineFactory) {
        self.constructors.insert(name.into(), factory);
    }

    /// The cached descriptor for an id, loading it on first need.
    pub async fn descriptor(&self, id: &str) -> Result<Arc<DataSourceDescriptor>> {
        if let Some(descriptor) = self.descriptors.get(id) {
            return Ok(descriptor.clone());
        }
        let loaded = Arc::new(load_descriptor(&self.ctx.path, id).await?);
        info!(id, server_type = ?loaded.server_type, "descriptor loaded");
        // concurrent first loads race benignly; the cache stays write-once
        Ok(self
            .descriptors
            .entry(id.to_string())
            .or_insert(loaded)
            .clone())
    }

    /// Borrow an engine instance for one operation.
    pub async fn acquire(&self, id: &str) -> Result<Box<dyn DataSource>> {
        if let Some(entry) = self.idle.get(id) {
            if let Some(instance) = entry.lock().pop() {
                debug!(id, "reusing pooled data source instance");
                return Ok(instance);
            }
        }
        let descriptor = self.descriptor(id).await?;
        self.construct(descriptor)
    }

    /// Return an engine instance after its operation. Runs the engine's
    /// `free_resources` before pooling it.
    pub async fn release(&self, mut instance: Box<dyn DataSource>) {
        instance.free_resources().await;
        let id = instance.descriptor().id.clone();
        let entry = self.idle.entry(id).or_default();
        let mut idle = entry.lock();
        if idle.len() < self.ctx.pool_max_idle {
            idle.push(instance);
        }
        // beyond the idle cap the instance is simply dropped
    }

    fn construct(&self, descriptor: Arc<DataSourceDescriptor>) -> Result<Box<dyn DataSource>> {
        match &descriptor.server_type {
            ServerType::Sql => Ok(Box::new(SqlDataSource::new(descriptor, self.ctx.clone()))),
            ServerType::Json => Ok(Box::new(JsonFileDataSource::new(
                descriptor,
                self.ctx.clone(),
            ))),
            ServerType::Generic => Ok(Box::new(GenericDataSource::new(descriptor))),
            ServerType::Custom(name) => match self.constructors.get(name) {
                Some(factory) => Ok(factory(descriptor.clone(), self.ctx.clone())),
                None => Err(Error::UnknownServerType {
                    id: descriptor.id.clone(),
                    server_type: name.clone(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataSourceSection;
    use gridway_rdbc::drivers::DriverRegistry;
    use gridway_rdbc::registry::{ConnectionPools, DbSection};

    async fn pools_in(dir: &std::path::Path) -> DataSourcePools {
        let section = DataSourceSection {
            path: dir.display().to_string(),
            ..Default::default()
        };
        let connection_pools = Arc::new(ConnectionPools::new(
            DbSection::default(),
            DriverRegistry::new(),
        ));
        DataSourcePools::new(DsContext::new(&section, connection_pools))
    }

    async fn write_descriptor(dir: &std::path::Path, id: &str, server_type: &str) {
        tokio::fs::write(
            dir.join(format!("{id}.ds.js")),
            format!(
                r#"{{"ID": "{id}", "serverType": "{server_type}",
                     "fields": [{{"name": "id", "primaryKey": true}}]}}"#
            ),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_descriptor_cached_once() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "country", "generic").await;
        let pools = pools_in(dir.path()).await;

        let first = pools.descriptor("country").await.unwrap();
        // deleting the file does not matter: the cache answers
        tokio::fs::remove_file(dir.path().join("country.ds.js"))
            .await
            .unwrap();
        let second = pools.descriptor("country").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_acquire_release_reuses_instance() {
        let dir = tempfile::tempdir().unwrap();
        write_descriptor(dir.path(), "country", "generic").await;
        let pools = pools_in(dir.path()).await;

        let instance = pools.acquire("country").await.unwrap();
        pools.release(instance).await;
        let reused = pools.acquire("country").await.unwrap();
        assert_eq!(reused.descriptor().id, "country");
    }

    #[tokio::test]
    async fn test_unknown_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let pools = pools_in(dir.path()).await;
        let err = pools.acquire("ghost").await.unwrap_err();
        assert!(matches!(err, Error::DescriptorNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unknown_server_constructor() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("custom.ds.js"),
            r#"{"ID": "custom", "serverConstructor": "NoSuchEngine",
                "fields": [{"name": "id"}]}"#,
        )
        .await
        .unwrap();
        let pools = pools_in(dir.path()).await;
        let err = pools.acquire("custom").await.unwrap_err();
        assert!(matches!(err, Error::UnknownServerType { server_type, .. }
            if server_type == "NoSuchEngine"));
    }

    #[tokio::test]
    async fn test_custom_constructor_registry() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("custom.ds.js"),
            r#"{"ID": "custom", "serverConstructor": "Generic2",
                "fields": [{"name": "id"}]}"#,
        )
        .await
        .unwrap();

        let mut pools = pools_in(dir.path()).await;
        pools.register_constructor(
            "Generic2",
            Arc::new(|descriptor, _ctx| Box::new(GenericDataSource::new(descriptor))),
        );
        let instance = pools.acquire("custom").await.unwrap();
        assert_eq!(instance.descriptor().id, "custom");
    }
}
