//! Response formatting
//!
//! Serialises the ordered response batch into the wire body the transport
//! expects: framed JSON/XML for the IDA transport (plus the hidden-iframe
//! HTML scaffold for non-XHR clients), `{response: ...}` wrappers with
//! optional security affixes for REST, or plain text for custom formats.
//! The resubmit and retry trampolines for the legacy browser transport
//! live here too.

use serde_json::Value;

use gridway_protocol::OperationResponse;

use crate::config::ServerConfig;
use crate::envelope::DataFormat;

/// Start marker framing every IDA response body.
pub const RESPONSE_START: &str = "//isc_RPCResponseStart-->";
/// End marker framing every IDA response body.
pub const RESPONSE_END: &str = "//isc_RPCResponseEnd";

/// A rendered response body and its content type.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedResponse {
    /// The response body
    pub body: String,
    /// Value for the Content-Type header
    pub content_type: String,
}

/// Which transport the reply travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// IDA over XMLHttpRequest: framed body
    IdaXhr,
    /// IDA over the hidden-iframe fallback: framed body inside HTML
    IdaHiddenFrame,
    /// REST: wrapped JSON / XML, no framing
    Rest,
}

/// Security prefix/suffix applied to REST JSON bodies. Descriptor-level
/// affixes win over the configured ones.
#[derive(Debug, Clone, Default)]
pub struct JsonAffixes {
    /// Text prepended to the body
    pub prefix: Option<String>,
    /// Text appended to the body
    pub suffix: Option<String>,
}

impl JsonAffixes {
    /// Resolve affixes from configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            prefix: config.rest.json_prefix.clone(),
            suffix: config.rest.json_suffix.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        self.prefix.is_none() && self.suffix.is_none()
    }
}

/// Render a response batch for its transport.
pub fn format_responses(
    responses: &[OperationResponse],
    format: DataFormat,
    transport: Transport,
    config: &ServerConfig,
    transaction_num: Option<i64>,
    jscallback: Option<&str>,
    affixes: &JsonAffixes,
) -> FormattedResponse {
    let payload: Vec<Value> = responses.iter().map(OperationResponse::to_json).collect();

    match transport {
        Transport::Rest => format_rest(&payload, format, config, affixes),
        Transport::IdaXhr => {
            let (content, content_type) = ida_content(responses, &payload, format);
            FormattedResponse {
                body: frame(&content),
                content_type,
            }
        }
        Transport::IdaHiddenFrame => {
            let (content, _) = ida_content(responses, &payload, format);
            FormattedResponse {
                body: hidden_frame_body(&frame(&content), transaction_num, jscallback),
                content_type: "text/html".to_string(),
            }
        }
    }
}

fn ida_content(
    responses: &[OperationResponse],
    payload: &[Value],
    format: DataFormat,
) -> (String, String) {
    match format {
        DataFormat::Json => (
            serde_json::to_string(payload).unwrap_or_else(|_| "[]".to_string()),
            "application/json".to_string(),
        ),
        DataFormat::Xml => (xml_body(payload), "text/xml".to_string()),
        DataFormat::Custom => (custom_body(responses), "text/plain".to_string()),
    }
}

fn format_rest(
    payload: &[Value],
    format: DataFormat,
    config: &ServerConfig,
    affixes: &JsonAffixes,
) -> FormattedResponse {
    match format {
        DataFormat::Json => {
            let wrapped: Value = if config.rest.wrap_json_responses {
                let mut wrapped: Vec<Value> = payload
                    .iter()
                    .map(|r| serde_json::json!({"response": r}))
                    .collect();
                if wrapped.len() == 1 {
                    wrapped.remove(0)
                } else {
                    serde_json::json!({"responses": wrapped})
                }
            } else if payload.len() == 1 {
                payload[0].clone()
            } else {
                Value::Array(payload.to_vec())
            };
            let body = serde_json::to_string(&wrapped).unwrap_or_else(|_| "null".to_string());

            if affixes.is_empty() {
                FormattedResponse {
                    body,
                    content_type: "application/json".to_string(),
                }
            } else {
                // affixed bodies are no longer valid JSON
                FormattedResponse {
                    body: format!(
                        "{}{}{}",
                        affixes.prefix.as_deref().unwrap_or(""),
                        body,
                        affixes.suffix.as_deref().unwrap_or("")
                    ),
                    content_type: "text/plain".to_string(),
                }
            }
        }
        DataFormat::Xml => FormattedResponse {
            body: xml_body(payload),
            content_type: "text/xml".to_string(),
        },
        DataFormat::Custom => FormattedResponse {
            body: payload
                .iter()
                .map(custom_render)
                .collect::<Vec<_>>()
                .join("\n"),
            content_type: "text/plain".to_string(),
        },
    }
}

fn frame(content: &str) -> String {
    format!("{RESPONSE_START}{content}{RESPONSE_END}")
}

fn custom_body(responses: &[OperationResponse]) -> String {
    responses
        .iter()
        .map(|r| custom_render(&r.to_json()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Custom format: a response renders as its data's display form.
fn custom_render(response: &Value) -> String {
    match response.get("data") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// XML rendering
// ---------------------------------------------------------------------------

fn xml_body(payload: &[Value]) -> String {
    let rendered: String = payload
        .iter()
        .map(|r| value_to_xml("response", r))
        .collect();
    if payload.len() > 1 {
        format!("<responses>{rendered}</responses>")
    } else {
        rendered
    }
}

fn value_to_xml(name: &str, value: &Value) -> String {
    match value {
        Value::Null => format!("<{name}/>"),
        Value::Bool(b) => format!("<{name}>{b}</{name}>"),
        Value::Number(n) => format!("<{name}>{n}</{name}>"),
        Value::String(s) => format!("<{name}>{}</{name}>", xml_escape(s)),
        Value::Array(items) => items.iter().map(|item| value_to_xml(name, item)).collect(),
        Value::Object(obj) => {
            let children: String = obj
                .iter()
                .map(|(key, child)| value_to_xml(key, child))
                .collect();
            format!("<{name}>{children}</{name}>")
        }
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ---------------------------------------------------------------------------
// Browser trampolines
// ---------------------------------------------------------------------------

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;")
}

/// Hidden-iframe reply: the framed body rides in a textarea and a script
/// hands it to the client library's hidden-frame dispatcher.
fn hidden_frame_body(
    framed: &str,
    transaction_num: Option<i64>,
    jscallback: Option<&str>,
) -> String {
    let tx = transaction_num.unwrap_or(0);
    let callback = match jscallback {
        Some("iframe") | None => {
            format!("parent.isc.Comm.hiddenFrameReply({tx}, results);")
        }
        Some("iframeNewWindow") => {
            format!("window.opener.parent.isc.Comm.hiddenFrameReply({tx}, results);")
        }
        Some(literal) => literal.to_string(),
    };

    format!(
        "<HTML><HEAD></HEAD><BODY>\
         <SCRIPT>document.domain = document.domain;</SCRIPT>\
         <TEXTAREA readonly id=\"isc_feedback\" style=\"visibility:hidden\">{}</TEXTAREA>\
         <SCRIPT>var results = document.getElementById('isc_feedback').value;\n{}</SCRIPT>\
         </BODY></HTML>",
        html_escape(framed),
        callback
    )
}

/// The retry trampoline answering an empty `_transaction`.
///
/// The resubmit marker asks the client library to retry the transaction;
/// without it an XHR client is told the post body was dropped and a
/// hidden-frame client that the request aborted.
pub fn resubmit_body(xhr: bool, resubmit_marker: bool) -> String {
    let call = if resubmit_marker {
        "parent.isc.RPCManager.retryOperation(window.name);"
    } else if xhr {
        "parent.isc.RPCManager.handleMaxPostSizeExceeded(window.name);"
    } else {
        "parent.isc.RPCManager.handleRequestAborted(window.name);"
    };
    format!(
        "<HTML><HEAD></HEAD><BODY>\
         <SCRIPT>document.domain = document.domain;\n{call}</SCRIPT>\
         </BODY></HTML>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridway_protocol::{DsResponse, RpcResponse};
    use serde_json::json;

    fn responses() -> Vec<OperationResponse> {
        vec![
            OperationResponse::Ds(DsResponse::fetch(json!([{"id": 1}]), 0, 1, 1)),
            OperationResponse::Rpc(RpcResponse::failure("boom")),
        ]
    }

    fn single() -> Vec<OperationResponse> {
        vec![OperationResponse::Ds(DsResponse::success(json!([])))]
    }

    #[test]
    fn test_ida_json_framing() {
        let out = format_responses(
            &responses(),
            DataFormat::Json,
            Transport::IdaXhr,
            &ServerConfig::default(),
            Some(4),
            None,
            &JsonAffixes::default(),
        );
        assert!(out.body.starts_with(RESPONSE_START));
        assert!(out.body.ends_with(RESPONSE_END));
        assert_eq!(out.content_type, "application/json");

        let inner = &out.body[RESPONSE_START.len()..out.body.len() - RESPONSE_END.len()];
        let decoded: Vec<Value> = serde_json::from_str(inner).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0]["status"], json!(0));
        assert_eq!(decoded[1]["status"], json!(-1));
    }

    #[test]
    fn test_rest_single_wrapping() {
        let out = format_responses(
            &single(),
            DataFormat::Json,
            Transport::Rest,
            &ServerConfig::default(),
            None,
            None,
            &JsonAffixes::default(),
        );
        let decoded: Value = serde_json::from_str(&out.body).unwrap();
        assert!(decoded.get("response").is_some());
        assert_eq!(out.content_type, "application/json");
    }

    #[test]
    fn test_rest_multiple_wrapping() {
        let out = format_responses(
            &responses(),
            DataFormat::Json,
            Transport::Rest,
            &ServerConfig::default(),
            None,
            None,
            &JsonAffixes::default(),
        );
        let decoded: Value = serde_json::from_str(&out.body).unwrap();
        let list = decoded["responses"].as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0].get("response").is_some());
    }

    #[test]
    fn test_rest_affixes_force_text_plain() {
        let affixes = JsonAffixes {
            prefix: Some("while(1);".into()),
            suffix: Some("//done".into()),
        };
        let out = format_responses(
            &single(),
            DataFormat::Json,
            Transport::Rest,
            &ServerConfig::default(),
            None,
            None,
            &affixes,
        );
        assert!(out.body.starts_with("while(1);"));
        assert!(out.body.ends_with("//done"));
        assert_eq!(out.content_type, "text/plain");
    }

    #[test]
    fn test_xml_body() {
        let out = format_responses(
            &single(),
            DataFormat::Xml,
            Transport::Rest,
            &ServerConfig::default(),
            None,
            None,
            &JsonAffixes::default(),
        );
        assert!(out.body.starts_with("<response>"));
        assert!(out.body.contains("<status>0</status>"));
        assert_eq!(out.content_type, "text/xml");

        let out = format_responses(
            &responses(),
            DataFormat::Xml,
            Transport::Rest,
            &ServerConfig::default(),
            None,
            None,
            &JsonAffixes::default(),
        );
        assert!(out.body.starts_with("<responses>"));
    }

    #[test]
    fn test_hidden_frame_trampoline() {
        let out = format_responses(
            &single(),
            DataFormat::Json,
            Transport::IdaHiddenFrame,
            &ServerConfig::default(),
            Some(12),
            Some("iframe"),
            &JsonAffixes::default(),
        );
        assert_eq!(out.content_type, "text/html");
        assert!(out.body.contains("document.domain"));
        assert!(out
            .body
            .contains("parent.isc.Comm.hiddenFrameReply(12, results);"));
        // the framed payload rides inside the textarea
        assert!(out.body.contains(RESPONSE_START));
    }

    #[test]
    fn test_resubmit_bodies() {
        assert!(resubmit_body(false, true).contains("retryOperation(window.name)"));
        assert!(resubmit_body(true, false).contains("handleMaxPostSizeExceeded"));
        assert!(resubmit_body(false, false).contains("handleRequestAborted"));
    }

    #[test]
    fn test_xml_escaping() {
        let response = OperationResponse::Ds(DsResponse::failure("a < b & c"));
        let out = format_responses(
            &[response],
            DataFormat::Xml,
            Transport::Rest,
            &ServerConfig::default(),
            None,
            None,
            &JsonAffixes::default(),
        );
        assert!(out.body.contains("a &lt; b &amp; c"));
    }

    #[test]
    fn test_custom_format_uses_data_string() {
        let response = OperationResponse::Rpc(RpcResponse::success(json!("plain text result")));
        let out = format_responses(
            &[response],
            DataFormat::Custom,
            Transport::Rest,
            &ServerConfig::default(),
            None,
            None,
            &JsonAffixes::default(),
        );
        assert_eq!(out.body, "plain text result");
        assert_eq!(out.content_type, "text/plain");
    }
}
