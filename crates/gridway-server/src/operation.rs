//! Operations
//!
//! One operation wraps one classified envelope element and owns its
//! lifecycle for the request: init acquires resources, execute runs the
//! per-operation transaction, free releases everything exactly once.
//! Execute never propagates errors; whatever goes wrong below the operation
//! boundary becomes a failure response in this operation's slot.

use anyhow::anyhow;
use serde_json::Value;
use tracing::{error, warn};

use gridway_ds::{DataSource, DataSourceDescriptor, DsRequest};
use gridway_protocol::{
    DsRequestEnvelope, DsResponse, OperationEnvelope, OperationResponse, OperationType,
    RpcRequestEnvelope, RpcResponse,
};

use crate::context::ServerContext;
use crate::envelope::ParsedOperation;

/// One wire-level operation and its lifecycle state.
pub enum Operation {
    /// Data-source operation
    Ds(DsOperation),
    /// Procedure call
    Rpc(RpcOperation),
}

impl Operation {
    /// Build an operation from a parsed envelope element.
    pub fn from_parsed(parsed: ParsedOperation) -> Operation {
        match parsed.envelope {
            OperationEnvelope::Ds(envelope) => Operation::Ds(DsOperation {
                envelope,
                rest_pk: parsed.rest_pk,
                engine: None,
            }),
            OperationEnvelope::Rpc(envelope) => Operation::Rpc(RpcOperation {
                envelope,
                target: None,
            }),
        }
    }

    /// Acquire resources. An error here fails the whole transaction.
    pub async fn init(&mut self, ctx: &ServerContext) -> anyhow::Result<()> {
        match self {
            Operation::Ds(op) => op.init(ctx).await,
            Operation::Rpc(op) => op.init(ctx).await,
        }
    }

    /// Run the operation; errors become the slot's failure response.
    pub async fn execute(&mut self, ctx: &ServerContext) -> OperationResponse {
        match self {
            Operation::Ds(op) => OperationResponse::Ds(op.execute().await),
            Operation::Rpc(op) => OperationResponse::Rpc(op.execute(ctx).await),
        }
    }

    /// Release resources; never fails, release problems are logged.
    pub async fn free(&mut self, ctx: &ServerContext) {
        match self {
            Operation::Ds(op) => op.free(ctx).await,
            Operation::Rpc(op) => op.free().await,
        }
    }
}

/// A data-source operation.
pub struct DsOperation {
    envelope: DsRequestEnvelope,
    /// Primary key overlaid from a REST URL path, if any
    rest_pk: Option<Value>,
    engine: Option<Box<dyn DataSource>>,
}

impl DsOperation {
    async fn init(&mut self, ctx: &ServerContext) -> anyhow::Result<()> {
        let mut request = DsRequest::from_envelope(&self.envelope)?;

        if let Some(raw_pk) = &self.rest_pk {
            let descriptor = ctx
                .data_source_pools
                .descriptor(&request.data_source)
                .await?;
            overlay_rest_pk(&descriptor, &mut request, raw_pk);
        }

        let mut engine = ctx.data_source_pools.acquire(&request.data_source).await?;
        match engine.init(request).await {
            Ok(()) => {
                self.engine = Some(engine);
                Ok(())
            }
            Err(e) => {
                ctx.data_source_pools.release(engine).await;
                Err(e.into())
            }
        }
    }

    /// The per-operation transaction lifecycle: start-tx, execute, then
    /// commit on success or rollback on failure. A failed commit downgrades
    /// the response to status -10; a failed rollback is logged only.
    async fn execute(&mut self) -> DsResponse {
        let engine = match self.engine.as_mut() {
            Some(engine) => engine,
            None => return DsResponse::failure("operation was not initialised"),
        };
        let id = engine.descriptor().id.clone();

        if let Err(e) = engine.start_transaction().await {
            error!(data_source = %id, error = %e, "transaction begin failed");
            return DsResponse::failure(format!("transaction begin failed: {e}"));
        }

        match engine.execute().await {
            Ok(response) => match engine.commit().await {
                Ok(()) => response,
                Err(commit_err) => {
                    warn!(data_source = %id, error = %commit_err,
                          "commit failed after successful execute");
                    if let Err(rollback_err) = engine.rollback().await {
                        error!(data_source = %id, error = %rollback_err,
                               "rollback after failed commit also failed");
                    }
                    DsResponse::transaction_failed(commit_err.to_string())
                }
            },
            Err(e) => {
                if let Err(rollback_err) = engine.rollback().await {
                    error!(data_source = %id, error = %rollback_err, "rollback failed");
                }
                warn!(data_source = %id, error = %e, "operation failed");
                DsResponse::failure(e.to_string())
            }
        }
    }

    async fn free(&mut self, ctx: &ServerContext) {
        if let Some(engine) = self.engine.take() {
            ctx.data_source_pools.release(engine).await;
        }
    }
}

/// Overlay a URL-path primary key onto the request criteria (and, for
/// updates, the values). Only single-field keys can come from a path.
fn overlay_rest_pk(descriptor: &DataSourceDescriptor, request: &mut DsRequest, raw: &Value) {
    let pk_fields = descriptor.pk_fields();
    let field = match pk_fields.as_slice() {
        [field] => field.name.clone(),
        _ => {
            warn!(data_source = %descriptor.id,
                  "URL primary key ignored: data source has a composite or empty key");
            return;
        }
    };

    if !request.criteria.is_object() {
        request.criteria = Value::Object(serde_json::Map::new());
    }
    if let Some(criteria) = request.criteria.as_object_mut() {
        criteria.insert(field.clone(), raw.clone());
    }

    if request.operation_type == OperationType::Update {
        if !request.values.is_object() {
            request.values = Value::Object(serde_json::Map::new());
        }
        if let Some(values) = request.values.as_object_mut() {
            values.entry(field).or_insert_with(|| raw.clone());
        }
    }
}

/// A procedure-call operation.
pub struct RpcOperation {
    envelope: RpcRequestEnvelope,
    target: Option<Box<dyn crate::registry::ServerObject>>,
}

impl RpcOperation {
    async fn init(&mut self, ctx: &ServerContext) -> anyhow::Result<()> {
        if let Some(class_name) = &self.envelope.class_name {
            let mut target = ctx
                .server_objects
                .create(class_name)
                .ok_or_else(|| anyhow!("no server object '{class_name}' registered"))?;
            target.init(&self.envelope).await?;
            self.target = Some(target);
        }
        Ok(())
    }

    async fn execute(&mut self, ctx: &ServerContext) -> RpcResponse {
        let data = self.envelope.data.clone();
        let target = match self.target.as_mut() {
            // no target: echo the request data
            None => return RpcResponse::success(data),
            Some(target) => target,
        };

        if let Err(e) = target.start_transaction().await {
            error!(error = %e, "rpc transaction begin failed");
            return failure_response(ctx, e);
        }

        let outcome = match &self.envelope.method_name {
            Some(method) => target.invoke(method, &data).await.map(Some),
            None => target.execute(&data).await,
        };

        match outcome {
            Ok(result) => match target.commit().await {
                Ok(()) => RpcResponse::success(result.unwrap_or(data)),
                Err(commit_err) => {
                    warn!(error = %commit_err, "rpc commit failed");
                    if let Err(rollback_err) = target.rollback().await {
                        error!(error = %rollback_err,
                               "rpc rollback after failed commit also failed");
                    }
                    RpcResponse::transaction_failed(commit_err.to_string())
                }
            },
            Err(e) => {
                if let Err(rollback_err) = target.rollback().await {
                    error!(error = %rollback_err, "rpc rollback failed");
                }
                warn!(error = %e, "rpc operation failed");
                failure_response(ctx, e)
            }
        }
    }

    async fn free(&mut self) {
        if let Some(mut target) = self.target.take() {
            target.free_resources().await;
        }
    }
}

fn failure_response(ctx: &ServerContext, error: anyhow::Error) -> RpcResponse {
    let mut response = RpcResponse::failure(error.to_string());
    if ctx.config.rpc.exception_stacktrace {
        response.stacktrace = Some(format!("{error:?}"));
    }
    response
}
