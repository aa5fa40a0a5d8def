//! Driver registry for gridway-rdbc
//!
//! Connection factories are registered by name at program start and looked
//! up by the `factory` key of a database's configuration. A registry instead
//! of dynamic loading keeps the request path free of reflection.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::ConnectionFactory;
use crate::error::{Error, Result};

/// Registry of named connection factories.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, Arc<dyn ConnectionFactory>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a driver name. Later registrations under the
    /// same name replace earlier ones.
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn ConnectionFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Look up a factory by driver name.
    pub fn driver(&self, name: &str) -> Result<Arc<dyn ConnectionFactory>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDriver { name: name.into() })
    }

    /// Registered driver names.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Whether no drivers are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
