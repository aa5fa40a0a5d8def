//! The abstract data-source contract
//!
//! A data-source engine runs one operation at a time through a fixed
//! lifecycle: `init` binds the request and acquires back-end resources,
//! `start_transaction` opens the per-operation transaction, `execute`
//! dispatches on the operation type, `commit`/`rollback` terminate the
//! transaction, and `free_resources` returns everything to its pool.
//!
//! Engines are pooled and handed out exclusively: between acquire and
//! release an instance belongs to exactly one operation, which is what
//! makes the mutable request binding safe.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use gridway_protocol::{DsResponse, OperationType};

use crate::descriptor::DataSourceDescriptor;
use crate::error::{Error, Result};
use crate::request::DsRequest;

/// The capability set an operation drives.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The descriptor this engine serves.
    fn descriptor(&self) -> &Arc<DataSourceDescriptor>;

    /// The request bound by `init`, if any.
    fn request(&self) -> Option<&DsRequest>;

    /// Bind the request and acquire back-end resources.
    async fn init(&mut self, request: DsRequest) -> Result<()>;

    /// Open the per-operation back-end transaction.
    async fn start_transaction(&mut self) -> Result<()> {
        Ok(())
    }

    /// Dispatch on the bound request's operation type.
    async fn execute(&mut self) -> Result<DsResponse> {
        let operation_type = self
            .request()
            .map(|r| r.operation_type)
            .ok_or_else(|| Error::invalid_request("execute without a bound request"))?;
        match operation_type {
            OperationType::Fetch => self.execute_fetch().await,
            OperationType::Add => self.execute_add().await,
            OperationType::Update => self.execute_update().await,
            OperationType::Remove => self.execute_remove().await,
            OperationType::Custom => self.execute_custom().await,
        }
    }

    /// Fetch a window of records.
    async fn execute_fetch(&mut self) -> Result<DsResponse> {
        Err(Error::unimplemented(OperationType::Fetch.as_str()))
    }

    /// Insert a record.
    async fn execute_add(&mut self) -> Result<DsResponse> {
        Err(Error::unimplemented(OperationType::Add.as_str()))
    }

    /// Update a record addressed by primary key.
    async fn execute_update(&mut self) -> Result<DsResponse> {
        Err(Error::unimplemented(OperationType::Update.as_str()))
    }

    /// Delete a record addressed by primary key.
    async fn execute_remove(&mut self) -> Result<DsResponse> {
        Err(Error::unimplemented(OperationType::Remove.as_str()))
    }

    /// Engine-specific operation.
    async fn execute_custom(&mut self) -> Result<DsResponse> {
        Err(Error::unimplemented(OperationType::Custom.as_str()))
    }

    /// Commit the per-operation transaction.
    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Roll back the per-operation transaction.
    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release everything acquired by `init`. Never fails the caller;
    /// release problems are logged by the implementation.
    async fn free_resources(&mut self);
}

impl std::fmt::Debug for dyn DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("descriptor", self.descriptor())
            .finish()
    }
}

/// The base engine: field projection over a descriptor with no storage.
///
/// Serves `serverType: "generic"` descriptors, whose operations are driven
/// entirely by custom server objects; every operation type answers
/// unimplemented.
pub struct GenericDataSource {
    descriptor: Arc<DataSourceDescriptor>,
    request: Option<DsRequest>,
}

impl GenericDataSource {
    /// Create an engine over a descriptor.
    pub fn new(descriptor: Arc<DataSourceDescriptor>) -> Self {
        Self {
            descriptor,
            request: None,
        }
    }
}

#[async_trait]
impl DataSource for GenericDataSource {
    fn descriptor(&self) -> &Arc<DataSourceDescriptor> {
        &self.descriptor
    }

    fn request(&self) -> Option<&DsRequest> {
        self.request.as_ref()
    }

    async fn init(&mut self, request: DsRequest) -> Result<()> {
        self.request = Some(request);
        Ok(())
    }

    async fn free_resources(&mut self) {
        self.request = None;
    }
}

/// Convert records into the JSON list a response carries.
pub fn records_to_json(records: Vec<serde_json::Map<String, Value>>) -> Value {
    Value::Array(records.into_iter().map(Value::Object).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> Arc<DataSourceDescriptor> {
        Arc::new(
            DataSourceDescriptor::from_json(
                "country",
                &json!({
                    "ID": "country",
                    "serverType": "generic",
                    "fields": [{"name": "id", "primaryKey": true}, {"name": "name"}]
                }),
            )
            .unwrap(),
        )
    }

    fn fetch_request() -> DsRequest {
        DsRequest::from_envelope(
            &serde_json::from_value(json!({
                "appID": "app",
                "operation": "country_fetch"
            }))
            .unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_generic_engine_is_unimplemented() {
        let mut engine = GenericDataSource::new(descriptor());
        engine.init(fetch_request()).await.unwrap();

        let err = engine.execute().await.unwrap_err();
        assert!(matches!(err, Error::Unimplemented { operation } if operation == "fetch"));
    }

    #[tokio::test]
    async fn test_execute_without_init() {
        let mut engine = GenericDataSource::new(descriptor());
        let err = engine.execute().await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_free_resources_clears_binding() {
        let mut engine = GenericDataSource::new(descriptor());
        engine.init(fetch_request()).await.unwrap();
        assert!(engine.request().is_some());
        engine.free_resources().await;
        assert!(engine.request().is_none());
    }
}
