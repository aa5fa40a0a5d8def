//! Transaction envelope model
//!
//! A transaction is an ordered batch of operation envelopes. Each element is
//! classified by shape: objects carrying `appID` plus an operation id (or an
//! explicit operation config) are data-source requests; the two sentinel
//! strings decode to RPC requests with null / empty-string payloads; every
//! other value is a free-form RPC request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::{
    split_operation_id, OperationType, TextMatchStyle, EMPTY_STRING_SENTINEL, NULL_SENTINEL,
};

/// Explicit operation addressing, an alternative to the combined
/// `"<dsName>_<opType>"` operation id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationConfig {
    /// Target data-source id
    pub data_source: Option<String>,
    /// Operation kind
    pub operation_type: Option<OperationType>,
    /// Match style override for simple criteria
    pub text_match_style: Option<TextMatchStyle>,
}

/// A data-source operation as it appears in the envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DsRequestEnvelope {
    /// Application id (presence marks the element as a DS operation)
    #[serde(rename = "appID")]
    pub app_id: Option<String>,
    /// Combined `"<dsName>_<opType>"` operation id
    pub operation: Option<String>,
    /// Explicit addressing, takes precedence over `operation`
    pub operation_config: Option<OperationConfig>,
    /// Record payload (add/update) or free-form data
    pub data: Option<Value>,
    /// Simple map or advanced criteria tree
    pub criteria: Option<Value>,
    /// New field values (add/update)
    pub values: Option<Value>,
    /// Previous field values as the client saw them
    pub old_values: Option<Value>,
    /// Sort specification: a field name or a list of them, `-` prefix for
    /// descending
    pub sort_by: Option<Value>,
    /// First row of the requested window (inclusive)
    pub start_row: Option<u64>,
    /// End of the requested window (exclusive)
    pub end_row: Option<u64>,
    /// Match style override for simple criteria
    pub text_match_style: Option<TextMatchStyle>,
    /// Originating client component
    pub component_id: Option<String>,
    /// Requested response format (`json`, `xml`, `custom`)
    pub data_format: Option<String>,
}

impl DsRequestEnvelope {
    /// The addressed data-source id.
    pub fn data_source_name(&self) -> Option<String> {
        if let Some(config) = &self.operation_config {
            if let Some(ds) = &config.data_source {
                return Some(ds.clone());
            }
        }
        self.operation
            .as_deref()
            .map(|op| split_operation_id(op).0)
    }

    /// The operation kind, defaulting to `fetch`.
    pub fn operation_type(&self) -> OperationType {
        if let Some(config) = &self.operation_config {
            if let Some(op_type) = config.operation_type {
                return op_type;
            }
        }
        self.operation
            .as_deref()
            .map(|op| split_operation_id(op).1)
            .unwrap_or_default()
    }

    /// The effective text-match style: explicit request value, operation
    /// config, then the per-operation default.
    pub fn text_match_style(&self) -> TextMatchStyle {
        if let Some(style) = self.text_match_style {
            return style;
        }
        if let Some(config) = &self.operation_config {
            if let Some(style) = config.text_match_style {
                return style;
            }
        }
        self.operation_type().default_text_match_style()
    }
}

/// A procedure-call operation as it appears in the envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcRequestEnvelope {
    /// Named server object to invoke
    pub class_name: Option<String>,
    /// Method on the server object; `execute` when absent
    pub method_name: Option<String>,
    /// Free-form payload
    pub data: Value,
}

/// One classified element of a transaction's operation list.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationEnvelope {
    /// Data-source operation
    Ds(DsRequestEnvelope),
    /// Procedure call
    Rpc(RpcRequestEnvelope),
}

impl OperationEnvelope {
    /// Classify a raw operation element.
    pub fn classify(value: &Value) -> OperationEnvelope {
        if let Some(s) = value.as_str() {
            if s == NULL_SENTINEL {
                return OperationEnvelope::Rpc(RpcRequestEnvelope {
                    data: Value::Null,
                    ..Default::default()
                });
            }
            if s == EMPTY_STRING_SENTINEL {
                return OperationEnvelope::Rpc(RpcRequestEnvelope {
                    data: Value::String(String::new()),
                    ..Default::default()
                });
            }
        }

        if let Some(obj) = value.as_object() {
            let is_ds = obj.contains_key("appID")
                && (obj.contains_key("operation") || obj.contains_key("operationConfig"));
            if is_ds {
                if let Ok(ds) = serde_json::from_value::<DsRequestEnvelope>(value.clone()) {
                    return OperationEnvelope::Ds(ds);
                }
            }
            if obj.contains_key("className") || obj.contains_key("methodName") {
                if let Ok(rpc) = serde_json::from_value::<RpcRequestEnvelope>(value.clone()) {
                    return OperationEnvelope::Rpc(rpc);
                }
            }
        }

        OperationEnvelope::Rpc(RpcRequestEnvelope {
            data: value.clone(),
            ..Default::default()
        })
    }
}

/// The transaction envelope: an ordered operation batch plus the callback
/// bookkeeping the client transport needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionEnvelope {
    /// Client-assigned transaction number, echoed in framed replies
    pub transaction_num: Option<i64>,
    /// Callback selector for the hidden-frame transport
    pub jscallback: Option<String>,
    /// Raw operation elements in request order
    pub operations: Vec<Value>,
}

impl TransactionEnvelope {
    /// Parse an envelope from a raw JSON document. A document without an
    /// `operations` list is treated as a single-operation transaction.
    pub fn from_value(value: Value) -> TransactionEnvelope {
        if value.get("operations").is_some() {
            if let Ok(tx) = serde_json::from_value::<TransactionEnvelope>(value.clone()) {
                return tx;
            }
        }
        TransactionEnvelope {
            transaction_num: value.get("transactionNum").and_then(Value::as_i64),
            jscallback: value
                .get("jscallback")
                .and_then(Value::as_str)
                .map(str::to_string),
            operations: vec![value],
        }
    }

    /// Classify every operation element, preserving order.
    pub fn classified_operations(&self) -> Vec<OperationEnvelope> {
        self.operations
            .iter()
            .map(OperationEnvelope::classify)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_ds_operation() {
        let op = json!({
            "appID": "builtinApplication",
            "operation": "country_fetch",
            "criteria": {"continent": "Europe"},
            "startRow": 0,
            "endRow": 2
        });
        match OperationEnvelope::classify(&op) {
            OperationEnvelope::Ds(ds) => {
                assert_eq!(ds.data_source_name().as_deref(), Some("country"));
                assert_eq!(ds.operation_type(), OperationType::Fetch);
                assert_eq!(ds.start_row, Some(0));
                assert_eq!(ds.end_row, Some(2));
                assert_eq!(ds.text_match_style(), TextMatchStyle::Substring);
            }
            other => panic!("expected DS operation, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_operation_config() {
        let op = json!({
            "appID": "app",
            "operationConfig": {
                "dataSource": "country",
                "operationType": "update",
                "textMatchStyle": "exact"
            },
            "criteria": {"id": 1},
            "values": {"name": "Malta"}
        });
        match OperationEnvelope::classify(&op) {
            OperationEnvelope::Ds(ds) => {
                assert_eq!(ds.data_source_name().as_deref(), Some("country"));
                assert_eq!(ds.operation_type(), OperationType::Update);
                assert_eq!(ds.text_match_style(), TextMatchStyle::Exact);
            }
            other => panic!("expected DS operation, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_sentinels() {
        match OperationEnvelope::classify(&json!("__ISC_NULL__")) {
            OperationEnvelope::Rpc(rpc) => assert_eq!(rpc.data, Value::Null),
            other => panic!("expected RPC, got {other:?}"),
        }
        match OperationEnvelope::classify(&json!("__ISC_EMPTY_STRING__")) {
            OperationEnvelope::Rpc(rpc) => assert_eq!(rpc.data, json!("")),
            other => panic!("expected RPC, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_rpc_with_class() {
        let op = json!({
            "className": "OrderReport",
            "methodName": "monthly",
            "data": {"month": "2024-01"}
        });
        match OperationEnvelope::classify(&op) {
            OperationEnvelope::Rpc(rpc) => {
                assert_eq!(rpc.class_name.as_deref(), Some("OrderReport"));
                assert_eq!(rpc.method_name.as_deref(), Some("monthly"));
            }
            other => panic!("expected RPC, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_free_form_rpc() {
        match OperationEnvelope::classify(&json!({"anything": 1})) {
            OperationEnvelope::Rpc(rpc) => {
                assert_eq!(rpc.data, json!({"anything": 1}));
                assert!(rpc.class_name.is_none());
            }
            other => panic!("expected RPC, got {other:?}"),
        }
    }

    #[test]
    fn test_envelope_round_trip() {
        let tx = TransactionEnvelope {
            transaction_num: Some(7),
            jscallback: Some("iframe".into()),
            operations: vec![json!({"appID": "a", "operation": "country_fetch"})],
        };
        let encoded = serde_json::to_value(&tx).unwrap();
        let decoded = TransactionEnvelope::from_value(encoded);
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_bare_document_as_single_operation() {
        let tx = TransactionEnvelope::from_value(json!({
            "appID": "a",
            "operation": "country_fetch"
        }));
        assert_eq!(tx.operations.len(), 1);
        assert!(matches!(
            tx.classified_operations()[0],
            OperationEnvelope::Ds(_)
        ));
    }
}
