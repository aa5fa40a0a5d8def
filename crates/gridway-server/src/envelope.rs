//! Envelope parsing front-ends
//!
//! Two front-ends produce the same parsed shape:
//!
//! - **IDA**: the rich-client transport. Requires the `isc_rpc` marker,
//!   reads `_transaction` from the query or the form body, parses it as
//!   JSON then XML, and classifies each operation element. An empty
//!   `_transaction` is the resubmit signal, answered with the browser
//!   retry trampoline.
//! - **REST**: any HTTP verb. The body (or `_transaction` param) is the
//!   transaction; `/<base>/<dsName>[/<opType>][/<pk>]` URL paths and
//!   request parameters overlay onto every operation.

use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::{debug, warn};

use gridway_ds::descriptor::xml_element_to_json;
use gridway_protocol::{
    DsRequestEnvelope, OperationEnvelope, OperationType, TransactionEnvelope,
};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

/// Reserved transport parameters that never merge into operation data.
const RESERVED_PARAMS: &[&str] = &[
    "isc_rpc",
    "is_isc_rpc",
    "isc_xhr",
    "xmlHttp",
    "isc_v",
    "isc_clientVersion",
    "locale",
    "isc_dd",
    "docDomain",
    "isc_tnum",
    "isc_resubmit",
    "isc_metaDataPrefix",
    "_transaction",
];

/// Requested response body format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    /// JSON body
    #[default]
    Json,
    /// XML body
    Xml,
    /// Responses rendered via their display form
    Custom,
}

impl DataFormat {
    /// Parse a wire format name; unknown names degrade to JSON.
    pub fn from_name(name: &str) -> DataFormat {
        match name {
            "xml" => Self::Xml,
            "custom" => Self::Custom,
            _ => Self::Json,
        }
    }
}

/// The transport-level pieces of one HTTP request.
#[derive(Debug, Clone, Default)]
pub struct RequestInput {
    /// HTTP method
    pub method: String,
    /// URL path (no query string)
    pub path: String,
    /// Decoded query parameters in order
    pub query: Vec<(String, String)>,
    /// Raw request body
    pub body: String,
    /// Content-Type header, if any
    pub content_type: Option<String>,
}

impl RequestInput {
    fn is_form_encoded(&self) -> bool {
        self.content_type
            .as_deref()
            .map_or(false, |ct| ct.starts_with("application/x-www-form-urlencoded"))
    }

    /// Query parameters plus form-body parameters, query first.
    pub fn merged_params(&self) -> Vec<(String, String)> {
        let mut params = self.query.clone();
        if self.is_form_encoded() {
            params.extend(
                url::form_urlencoded::parse(self.body.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
        }
        params
    }

    fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One parsed operation plus its REST URL overlay.
#[derive(Debug, Clone)]
pub struct ParsedOperation {
    /// The classified envelope element
    pub envelope: OperationEnvelope,
    /// Primary key from the REST URL path, if any
    pub rest_pk: Option<Value>,
}

/// A fully parsed request, ready for the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ParsedRequest {
    /// Client transaction number (envelope wins over `isc_tnum`)
    pub transaction_num: Option<i64>,
    /// Hidden-frame callback selector
    pub jscallback: Option<String>,
    /// Operations in request order
    pub operations: Vec<ParsedOperation>,
    /// Requested response format
    pub data_format: DataFormat,
    /// Whether the client used XHR (hidden-frame framing otherwise)
    pub xhr: bool,
}

/// Parse a document as JSON, falling back to XML.
fn parse_json_or_xml(raw: &str) -> Result<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(doc) => Ok(doc),
        Err(json_err) => match roxmltree::Document::parse(raw) {
            Ok(doc) => Ok(coerce_scalars(xml_element_to_json(doc.root_element()))),
            Err(xml_err) => Err(ServerError::Parse(format!(
                "neither JSON ({json_err}) nor XML ({xml_err})"
            ))),
        },
    }
}

/// XML leaves arrive as text; recover numbers, booleans and nulls so the
/// envelope types deserialize identically for both formats.
fn coerce_scalars(value: Value) -> Value {
    match value {
        Value::String(s) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "null" => Value::Null,
            _ => {
                if let Ok(n) = s.parse::<i64>() {
                    Value::from(n)
                } else if let Ok(f) = s.parse::<f64>() {
                    serde_json::Number::from_f64(f)
                        .map(Value::Number)
                        .unwrap_or(Value::String(s))
                } else {
                    Value::String(s)
                }
            }
        },
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_scalars).collect()),
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .map(|(k, v)| (k, coerce_scalars(v)))
                .collect(),
        ),
        other => other,
    }
}

/// XML transactions wrap the operation list as `<operations><elem>…`; peel
/// that back into a plain array.
fn normalize_transaction(mut doc: Value) -> Value {
    if let Some(obj) = doc.as_object_mut() {
        if let Some(operations) = obj.get_mut("operations") {
            if let Some(map) = operations.as_object() {
                if let Some(elem) = map.get("elem") {
                    *operations = match elem {
                        Value::Array(items) => Value::Array(items.clone()),
                        single => Value::Array(vec![single.clone()]),
                    };
                }
            }
        }
    }
    doc
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}

/// Parse an IDA transaction request.
pub fn parse_ida(input: &RequestInput) -> Result<ParsedRequest> {
    let params = input.merged_params();

    let marked = is_truthy(RequestInput::param(&params, "isc_rpc"))
        || is_truthy(RequestInput::param(&params, "is_isc_rpc"));
    if !marked {
        return Err(ServerError::Parse(
            "request is not marked as an RPC (isc_rpc/is_isc_rpc)".into(),
        ));
    }

    let raw_transaction = RequestInput::param(&params, "_transaction").unwrap_or("");
    if raw_transaction.is_empty() {
        debug!("empty _transaction, signalling resubmit");
        return Err(ServerError::Resubmit);
    }

    let doc = normalize_transaction(parse_json_or_xml(raw_transaction)?);
    let transaction = TransactionEnvelope::from_value(doc);

    // the envelope's transactionNum overrides the query parameter
    let transaction_num = transaction.transaction_num.or_else(|| {
        RequestInput::param(&params, "isc_tnum").and_then(|v| v.parse().ok())
    });

    let operations: Vec<ParsedOperation> = transaction
        .classified_operations()
        .into_iter()
        .map(|envelope| ParsedOperation {
            envelope,
            rest_pk: None,
        })
        .collect();

    let data_format = RequestInput::param(&params, "isc_dataFormat")
        .map(DataFormat::from_name)
        .or_else(|| first_ds_format(&operations))
        .unwrap_or_default();

    Ok(ParsedRequest {
        transaction_num,
        jscallback: transaction.jscallback.clone(),
        operations,
        data_format,
        xhr: is_truthy(RequestInput::param(&params, "isc_xhr"))
            || is_truthy(RequestInput::param(&params, "xmlHttp")),
    })
}

fn first_ds_format(operations: &[ParsedOperation]) -> Option<DataFormat> {
    operations.iter().find_map(|op| match &op.envelope {
        OperationEnvelope::Ds(ds) => ds.data_format.as_deref().map(DataFormat::from_name),
        OperationEnvelope::Rpc(_) => None,
    })
}

/// The `/<base>/<dsName>[/<opType>][/<pk>]` overlay of a REST URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestPathOverlay {
    /// Data source named in the path
    pub data_source: Option<String>,
    /// Operation type named in the path
    pub operation_type: Option<OperationType>,
    /// Raw primary key from the path (JSON parse attempted)
    pub pk: Option<Value>,
}

/// Normalise and split a REST path: strip the query, strip the base path,
/// split on `/` and drop empty segments.
pub fn parse_rest_path(path: &str, base: &str) -> RestPathOverlay {
    let path = path.split('?').next().unwrap_or(path);
    let relative = path.strip_prefix(base).unwrap_or(path);
    let parts: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();

    let mut overlay = RestPathOverlay::default();
    let mut rest = parts.as_slice();

    if let [ds, tail @ ..] = rest {
        overlay.data_source = Some((*ds).to_string());
        rest = tail;
    }
    if let [second, tail @ ..] = rest {
        if let Ok(op) = OperationType::from_str(second) {
            overlay.operation_type = Some(op);
            rest = tail;
        }
    }
    if let [pk, ..] = rest {
        overlay.pk = Some(parse_param_value(pk));
    }
    overlay
}

/// Attempt a JSON parse of a parameter value, keeping the raw string when
/// it is not valid JSON.
fn parse_param_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn method_default_operation(method: &str) -> OperationType {
    match method {
        "POST" => OperationType::Add,
        "PUT" | "PATCH" => OperationType::Update,
        "DELETE" => OperationType::Remove,
        _ => OperationType::Fetch,
    }
}

/// Parse a REST request.
pub fn parse_rest(input: &RequestInput, config: &ServerConfig) -> Result<ParsedRequest> {
    let params = input.merged_params();
    let meta_prefix = RequestInput::param(&params, "isc_metaDataPrefix")
        .unwrap_or("_")
        .to_string();
    let format_param = config.rest.dynamic_data_format_param_name.as_str();

    // the transaction document: _transaction param, else the body itself
    let doc = match RequestInput::param(&params, "_transaction") {
        Some(raw) if !raw.is_empty() => Some(parse_json_or_xml(raw)?),
        _ if !input.body.is_empty() && !input.is_form_encoded() => {
            Some(parse_json_or_xml(&input.body)?)
        }
        _ => None,
    };

    let raw_operations: Vec<Value> = match doc {
        Some(doc) => TransactionEnvelope::from_value(normalize_transaction(doc)).operations,
        // a bare GET/DELETE: the operation is built from the URL and params
        None => vec![Value::Object(Map::new())],
    };

    let overlay = parse_rest_path(&input.path, &config.router.rest_call);

    let mut operations = Vec::with_capacity(raw_operations.len());
    for raw in &raw_operations {
        let mut envelope: DsRequestEnvelope = raw
            .as_object()
            .and_then(|_| serde_json::from_value(raw.clone()).ok())
            .unwrap_or_default();

        apply_param_overlay(&mut envelope, &params, &meta_prefix, format_param);
        apply_path_overlay(&mut envelope, &overlay, &input.method);

        operations.push(ParsedOperation {
            envelope: OperationEnvelope::Ds(envelope),
            rest_pk: overlay.pk.clone(),
        });
    }

    let data_format = RequestInput::param(&params, format_param)
        .map(DataFormat::from_name)
        .or_else(|| first_ds_format(&operations))
        .unwrap_or_default();

    Ok(ParsedRequest {
        transaction_num: RequestInput::param(&params, "isc_tnum").and_then(|v| v.parse().ok()),
        jscallback: None,
        operations,
        data_format,
        xhr: true,
    })
}

/// Merge request parameters into an operation: meta-prefixed parameters
/// decode onto the operation itself, everything else joins `data`.
fn apply_param_overlay(
    envelope: &mut DsRequestEnvelope,
    params: &[(String, String)],
    meta_prefix: &str,
    format_param: &str,
) {
    let mut patch = Map::new();
    let mut extra_data = Map::new();

    for (key, value) in params {
        if RESERVED_PARAMS.contains(&key.as_str()) || key == format_param {
            continue;
        }
        match key.strip_prefix(meta_prefix) {
            Some(attribute) if !attribute.is_empty() => {
                patch.insert(attribute.to_string(), parse_param_value(value));
            }
            _ => {
                extra_data.insert(key.clone(), Value::String(value.clone()));
            }
        }
    }

    if !patch.is_empty() {
        // apply meta attributes through the envelope's own deserialization
        let mut merged = serde_json::to_value(&*envelope)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        for (key, value) in patch {
            merged.insert(key, value);
        }
        if let Ok(updated) = serde_json::from_value(Value::Object(merged)) {
            *envelope = updated;
        } else {
            warn!("meta parameter overlay produced an invalid operation, ignoring");
        }
    }

    if !extra_data.is_empty() {
        let mut data = match &envelope.data {
            Some(Value::Object(obj)) => obj.clone(),
            _ => Map::new(),
        };
        data.extend(extra_data);
        envelope.data = Some(Value::Object(data));
    }
}

fn apply_path_overlay(
    envelope: &mut DsRequestEnvelope,
    overlay: &RestPathOverlay,
    method: &str,
) {
    let config = envelope.operation_config.get_or_insert_with(Default::default);

    if let Some(ds) = &overlay.data_source {
        config.data_source = Some(ds.clone());
    }

    let explicitly_typed = config.operation_type.is_some() || envelope.operation.is_some();
    if let Some(op) = overlay.operation_type {
        config.operation_type = Some(op);
    } else if !explicitly_typed {
        config.operation_type = Some(method_default_operation(method));
    }
}
