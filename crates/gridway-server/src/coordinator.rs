//! Transaction coordinator
//!
//! Drives one request's operations through three sequential phases:
//!
//! | phase   | stops on first error | outcome |
//! |---------|----------------------|---------|
//! | init    | yes                  | a single top-level error fails the batch |
//! | execute | no                   | one response slot per operation, in order |
//! | free    | no                   | best effort, release problems are logged |
//!
//! If init fails part-way, operations that were already initialised are
//! still freed before the error surfaces.

use std::sync::Arc;
use tracing::{info_span, warn, Instrument};

use gridway_protocol::{OperationResponse, StatusCode};

use crate::context::ServerContext;
use crate::envelope::ParsedRequest;
use crate::error::{Result, ServerError};
use crate::operation::Operation;

/// Coordinates the operation queue of one request.
pub struct TransactionCoordinator {
    ctx: Arc<ServerContext>,
}

impl TransactionCoordinator {
    /// Create a coordinator over the server context.
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Run a parsed request to an ordered response batch.
    pub async fn run(&self, parsed: ParsedRequest) -> Result<Vec<OperationResponse>> {
        let span = info_span!(
            "transaction",
            tx = parsed.transaction_num,
            operations = parsed.operations.len()
        );
        self.run_phases(parsed).instrument(span).await
    }

    async fn run_phases(&self, parsed: ParsedRequest) -> Result<Vec<OperationResponse>> {
        let mut operations: Vec<Operation> = parsed
            .operations
            .into_iter()
            .map(Operation::from_parsed)
            .collect();

        // init: sequential, stop on first error
        let mut failure = None;
        let mut initialised = 0;
        for operation in operations.iter_mut() {
            match operation.init(&self.ctx).await {
                Ok(()) => initialised += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            warn!(error = %e, "init phase failed, freeing initialised operations");
            for operation in operations.iter_mut().take(initialised) {
                operation.free(&self.ctx).await;
            }
            return Err(ServerError::Init(e.to_string()));
        }

        // execute: sequential, every operation runs; failures fill their slot
        let mut responses = Vec::with_capacity(operations.len());
        for operation in operations.iter_mut() {
            responses.push(operation.execute(&self.ctx).await);
        }

        // free: best effort
        for operation in operations.iter_mut() {
            operation.free(&self.ctx).await;
        }

        // queue status: 0 when the whole batch succeeded, -1 otherwise
        let queue_status = if responses
            .iter()
            .all(|r| r.status() == StatusCode::Success)
        {
            0
        } else {
            -1
        };
        for response in responses.iter_mut() {
            if let OperationResponse::Ds(ds) = response {
                ds.queue_status = Some(queue_status);
            }
        }

        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::envelope::ParsedOperation;
    use crate::registry::{ServerObject, ServerObjectRegistry};
    use async_trait::async_trait;
    use gridway_protocol::{OperationEnvelope, StatusCode};
    use gridway_rdbc::drivers::DriverRegistry;
    use gridway_rdbc::registry::{DbConfig, DbSection};
    use gridway_rdbc::testing::{MockConnectionFactory, MockScript};
    use gridway_rdbc::types::{Row, SqlValue};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    struct Doubler;

    #[async_trait]
    impl ServerObject for Doubler {
        async fn invoke(&mut self, method: &str, data: &Value) -> anyhow::Result<Value> {
            match method {
                "double" => Ok(json!(data.as_i64().unwrap_or(0) * 2)),
                other => anyhow::bail!("no method '{other}'"),
            }
        }
    }

    async fn test_context(dir: &std::path::Path) -> (Arc<ServerContext>, Arc<MockScript>) {
        tokio::fs::write(
            dir.join("country.ds.js"),
            r#"{"ID": "country", "serverType": "sql",
                "fields": [
                    {"name": "id", "type": "sequence", "primaryKey": true},
                    {"name": "name"}, {"name": "continent"}
                ]}"#,
        )
        .await
        .unwrap();

        let factory = Arc::new(MockConnectionFactory::new());
        let script = factory.script();

        let mut drivers = DriverRegistry::new();
        drivers.register("mock", factory);

        let mut config = ServerConfig::default();
        config.data_source.path = dir.display().to_string();
        config.db = DbSection {
            default_database: Some("main".to_string()),
            databases: HashMap::from([(
                "main".to_string(),
                DbConfig {
                    db_type: "postgresql".to_string(),
                    factory: "mock".to_string(),
                    connection: Default::default(),
                    pool: Default::default(),
                },
            )]),
        };

        let mut server_objects = ServerObjectRegistry::new();
        server_objects.register("Doubler", Arc::new(|| Box::new(Doubler)));

        (
            ServerContext::new(config, drivers, server_objects, vec![]),
            script,
        )
    }

    fn parsed(operations: Vec<Value>) -> ParsedRequest {
        ParsedRequest {
            transaction_num: Some(1),
            operations: operations
                .iter()
                .map(|raw| ParsedOperation {
                    envelope: OperationEnvelope::classify(raw),
                    rest_pk: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sentinel_rpc_operations() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _script) = test_context(dir.path()).await;
        let coordinator = TransactionCoordinator::new(ctx);

        let responses = coordinator
            .run(parsed(vec![
                json!("__ISC_NULL__"),
                json!("__ISC_EMPTY_STRING__"),
            ]))
            .await
            .unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].status(), StatusCode::Success);
        assert_eq!(responses[0].to_json()["data"], json!(null));
        assert_eq!(responses[1].to_json()["data"], json!(""));
    }

    #[tokio::test]
    async fn test_batch_success_and_failure_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, script) = test_context(dir.path()).await;
        script.push_query_result(vec![Row::from_pairs(vec![
            ("id".to_string(), SqlValue::Int64(1)),
            ("name".to_string(), SqlValue::String("Malta".into())),
            ("continent".to_string(), SqlValue::String("Europe".into())),
        ])]);
        // fetch succeeds; update affects 0 rows → RowNotFound
        script.push_execute_result(0);

        let coordinator = TransactionCoordinator::new(ctx);
        let responses = coordinator
            .run(parsed(vec![
                json!({"appID": "a", "operation": "country_fetch"}),
                json!({"appID": "a", "operation": "country_update",
                       "criteria": {"id": 999}, "values": {"name": "Nowhere"}}),
            ]))
            .await
            .unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].status(), StatusCode::Success);
        assert_eq!(responses[1].status(), StatusCode::Failure);
        let message = responses[1].to_json()["data"].as_str().unwrap().to_string();
        assert!(message.starts_with("Row does not exists"));

        // both operations ran a full transaction lifecycle
        let statements: Vec<String> =
            script.statements().into_iter().map(|(sql, _)| sql).collect();
        let commits = statements.iter().filter(|s| *s == "COMMIT").count();
        let rollbacks = statements.iter().filter(|s| *s == "ROLLBACK").count();
        assert_eq!(commits, 1);
        assert_eq!(rollbacks, 1);

        // batch had a failure: queueStatus is -1 on every DS slot
        assert_eq!(responses[0].to_json()["queueStatus"], json!(-1));
    }

    #[tokio::test]
    async fn test_commit_failure_downgrades_to_transaction_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, script) = test_context(dir.path()).await;
        script.set_fail_commit(true);

        let coordinator = TransactionCoordinator::new(ctx);
        let responses = coordinator
            .run(parsed(vec![json!({
                "appID": "a", "operation": "country_fetch"
            })]))
            .await
            .unwrap();

        assert_eq!(responses[0].status(), StatusCode::TransactionFailed);
        // a rollback was attempted after the failed commit
        let statements: Vec<String> =
            script.statements().into_iter().map(|(sql, _)| sql).collect();
        assert!(statements.contains(&"ROLLBACK".to_string()));
    }

    #[tokio::test]
    async fn test_init_failure_is_top_level() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _script) = test_context(dir.path()).await;

        let coordinator = TransactionCoordinator::new(ctx);
        let err = coordinator
            .run(parsed(vec![
                json!({"appID": "a", "operation": "country_fetch"}),
                json!({"appID": "a", "operation": "ghost_fetch"}),
            ]))
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Init(_)));
    }

    #[tokio::test]
    async fn test_rpc_named_method_and_missing_class() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _script) = test_context(dir.path()).await;
        let coordinator = TransactionCoordinator::new(ctx);

        let responses = coordinator
            .run(parsed(vec![json!({
                "className": "Doubler", "methodName": "double", "data": 21
            })]))
            .await
            .unwrap();
        assert_eq!(responses[0].to_json()["data"], json!(42));

        let err = coordinator
            .run(parsed(vec![json!({
                "className": "Missing", "data": null
            })]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Init(_)));
    }

    #[tokio::test]
    async fn test_rpc_without_target_echoes() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _script) = test_context(dir.path()).await;
        let coordinator = TransactionCoordinator::new(ctx);

        let responses = coordinator
            .run(parsed(vec![json!({"payload": [1, 2, 3]})]))
            .await
            .unwrap();
        assert_eq!(responses[0].status(), StatusCode::Success);
        assert_eq!(
            responses[0].to_json()["data"],
            json!({"payload": [1, 2, 3]})
        );
    }
}
