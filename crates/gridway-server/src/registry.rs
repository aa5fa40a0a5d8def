//! Server-object registry for RPC operations
//!
//! RPC operations address a named server object. Factories are registered
//! at program start and instantiated per request, replacing any notion of
//! loading code by class path at request time.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use gridway_protocol::RpcRequestEnvelope;

/// A server-side RPC target.
///
/// Every hook is optional: the default lifecycle accepts the request, does
/// nothing transactional, and reports `execute` as unimplemented so the
/// broker echoes the request data.
#[async_trait]
pub trait ServerObject: Send + Sync {
    /// Bind the request; runs once before any other hook.
    async fn init(&mut self, _request: &RpcRequestEnvelope) -> anyhow::Result<()> {
        Ok(())
    }

    /// Open whatever transactional scope the object needs.
    async fn start_transaction(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoke a named method. Unknown methods are an error.
    async fn invoke(&mut self, method: &str, _data: &Value) -> anyhow::Result<Value> {
        anyhow::bail!("no method '{method}' on this server object")
    }

    /// Default entry point when the request names no method. `None` means
    /// the object has no execute behaviour and the request data is echoed.
    async fn execute(&mut self, _data: &Value) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    /// Commit the object's transactional scope.
    async fn commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Roll back the object's transactional scope.
    async fn rollback(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release held resources; runs exactly once per operation.
    async fn free_resources(&mut self) {}
}

/// Factory producing one server object per operation.
pub type ServerObjectFactory = Arc<dyn Fn() -> Box<dyn ServerObject> + Send + Sync>;

/// Named registry of server-object factories.
#[derive(Default)]
pub struct ServerObjectRegistry {
    factories: HashMap<String, ServerObjectFactory>,
}

impl ServerObjectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a class name.
    pub fn register(&mut self, name: impl Into<String>, factory: ServerObjectFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Instantiate the object registered under `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn ServerObject>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Registered class names.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ServerObject for Echo {
        async fn invoke(&mut self, method: &str, data: &Value) -> anyhow::Result<Value> {
            Ok(json!({"method": method, "data": data}))
        }
    }

    #[tokio::test]
    async fn test_registry_create() {
        let mut registry = ServerObjectRegistry::new();
        registry.register("Echo", Arc::new(|| Box::new(Echo)));

        let mut object = registry.create("Echo").unwrap();
        let out = object.invoke("ping", &json!(1)).await.unwrap();
        assert_eq!(out, json!({"method": "ping", "data": 1}));

        assert!(registry.create("Missing").is_none());
    }

    struct Inert;

    #[async_trait]
    impl ServerObject for Inert {}

    #[tokio::test]
    async fn test_default_hooks() {
        let mut object: Box<dyn ServerObject> = Box::new(Inert);

        object.init(&RpcRequestEnvelope::default()).await.unwrap();
        object.start_transaction().await.unwrap();
        assert_eq!(object.execute(&json!(null)).await.unwrap(), None);
        assert!(object.invoke("nope", &json!(null)).await.is_err());
        object.commit().await.unwrap();
        object.rollback().await.unwrap();
        object.free_resources().await;
    }
}
