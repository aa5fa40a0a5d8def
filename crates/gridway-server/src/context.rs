//! Server context
//!
//! All process-wide state lives here: configuration, the connection-pool
//! registry, the data-source pools and the server-object registry. One
//! context is created at startup and threaded through every request
//! handler; nothing is global.

use std::sync::Arc;

use gridway_ds::pool::DataSourcePools;
use gridway_ds::{DsContext, EngineFactory};
use gridway_rdbc::drivers::DriverRegistry;
use gridway_rdbc::registry::ConnectionPools;

use crate::config::ServerConfig;
use crate::registry::ServerObjectRegistry;

/// Process-wide broker state.
pub struct ServerContext {
    /// Broker configuration
    pub config: ServerConfig,
    /// Named connection pools
    pub connection_pools: Arc<ConnectionPools>,
    /// Pooled data-source engines and the descriptor cache
    pub data_source_pools: Arc<DataSourcePools>,
    /// RPC targets
    pub server_objects: ServerObjectRegistry,
}

impl ServerContext {
    /// Build the context from configuration and the registries populated at
    /// program start.
    pub fn new(
        config: ServerConfig,
        drivers: DriverRegistry,
        server_objects: ServerObjectRegistry,
        engines: Vec<(String, EngineFactory)>,
    ) -> Arc<Self> {
        let connection_pools = Arc::new(ConnectionPools::new(config.db.clone(), drivers));
        let ds_context = DsContext::new(&config.data_source, connection_pools.clone());
        let mut data_source_pools = DataSourcePools::new(ds_context);
        for (name, factory) in engines {
            data_source_pools.register_constructor(name, factory);
        }

        Arc::new(Self {
            config,
            connection_pools,
            data_source_pools: Arc::new(data_source_pools),
            server_objects,
        })
    }
}
