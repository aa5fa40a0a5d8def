//! HTTP front door
//!
//! Three configurable routes: the IDA transaction endpoint, the REST
//! endpoint (bare and path-addressed), and the descriptor loader. Every
//! reply carries no-cache headers; top-level failures (parse errors,
//! init-phase failures) answer with an HTTP error status and no
//! per-operation responses.

use axum::extract::{OriginalUri, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use gridway_protocol::OperationEnvelope;

use crate::context::ServerContext;
use crate::coordinator::TransactionCoordinator;
use crate::envelope::{parse_ida, parse_rest, ParsedRequest, RequestInput};
use crate::error::ServerError;
use crate::format::{
    format_responses, resubmit_body, FormattedResponse, JsonAffixes, Transport,
};

const EXPIRES_IN_THE_PAST: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Reserved descriptor id never served by the loader route.
const SYSTEM_SCHEMA: &str = "$systemSchema";

/// Build the broker's router over its context.
pub fn build_router(ctx: Arc<ServerContext>) -> Router {
    let router = &ctx.config.router;
    Router::new()
        .route(&router.ida_call, any(ida_handler))
        .route(&router.rest_call, any(rest_handler))
        .route(&format!("{}/*rest", router.rest_call), any(rest_handler))
        .route(&router.data_source_loader, get(loader_handler))
        .route("/healthz", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until the shutdown future resolves.
pub async fn serve(
    ctx: Arc<ServerContext>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let address = ctx.config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "gridway listening");
    axum::serve(listener, build_router(ctx))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn request_input(method: &Method, uri: &Uri, headers: &HeaderMap, body: String) -> RequestInput {
    let query = uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default();
    RequestInput {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query,
        body,
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::EXPIRES,
        HeaderValue::from_static(EXPIRES_IN_THE_PAST),
    );
    response
}

fn body_response(formatted: FormattedResponse) -> Response {
    no_cache(
        (
            [(header::CONTENT_TYPE, formatted.content_type)],
            formatted.body,
        )
            .into_response(),
    )
}

fn top_level_error(error: ServerError) -> Response {
    let status = match &error {
        ServerError::Parse(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    no_cache((status, error.to_string()).into_response())
}

/// Affixes for the reply: the first DS operation's descriptor wins over
/// configuration.
async fn resolve_affixes(ctx: &ServerContext, parsed: &ParsedRequest) -> JsonAffixes {
    let mut affixes = JsonAffixes::from_config(&ctx.config);
    for operation in &parsed.operations {
        if let OperationEnvelope::Ds(ds) = &operation.envelope {
            if let Some(name) = ds.data_source_name() {
                if let Ok(descriptor) = ctx.data_source_pools.descriptor(&name).await {
                    if descriptor.json_prefix.is_some() {
                        affixes.prefix = descriptor.json_prefix.clone();
                    }
                    if descriptor.json_suffix.is_some() {
                        affixes.suffix = descriptor.json_suffix.clone();
                    }
                }
            }
            break;
        }
    }
    affixes
}

async fn run_request(
    ctx: Arc<ServerContext>,
    parsed: ParsedRequest,
    transport: Transport,
) -> Response {
    let transaction_num = parsed.transaction_num;
    let jscallback = parsed.jscallback.clone();
    let data_format = parsed.data_format;
    let affixes = resolve_affixes(&ctx, &parsed).await;

    let coordinator = TransactionCoordinator::new(ctx.clone());
    match coordinator.run(parsed).await {
        Ok(responses) => body_response(format_responses(
            &responses,
            data_format,
            transport,
            &ctx.config,
            transaction_num,
            jscallback.as_deref(),
            &affixes,
        )),
        Err(e) => top_level_error(e),
    }
}

async fn ida_handler(
    State(ctx): State<Arc<ServerContext>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let input = request_input(&method, &uri, &headers, body);

    match parse_ida(&input) {
        Ok(parsed) => {
            let transport = if parsed.xhr {
                Transport::IdaXhr
            } else {
                Transport::IdaHiddenFrame
            };
            run_request(ctx, parsed, transport).await
        }
        Err(ServerError::Resubmit) => {
            let params = input.merged_params();
            let find = |name: &str| {
                params
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.as_str())
            };
            let xhr = matches!(find("isc_xhr"), Some("1")) || matches!(find("xmlHttp"), Some("true"));
            let marker = find("isc_resubmit").is_some();
            no_cache(
                (
                    [(header::CONTENT_TYPE, "text/html".to_string())],
                    resubmit_body(xhr, marker),
                )
                    .into_response(),
            )
        }
        Err(e) => top_level_error(e),
    }
}

async fn rest_handler(
    State(ctx): State<Arc<ServerContext>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let input = request_input(&method, &uri, &headers, body);
    match parse_rest(&input, &ctx.config) {
        Ok(parsed) => run_request(ctx, parsed, Transport::Rest).await,
        Err(e) => top_level_error(e),
    }
}

/// `GET ?dataSource=a,b,c` — a JavaScript payload creating each requested
/// data source client-side, de-duplicated, skipping the reserved schema id.
async fn loader_handler(
    State(ctx): State<Arc<ServerContext>>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    let requested = uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == "dataSource")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        })
        .unwrap_or_default();

    let mut seen = Vec::new();
    let mut script = String::new();
    for id in requested.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if id == SYSTEM_SCHEMA || seen.iter().any(|s| s == id) {
            continue;
        }
        seen.push(id.to_string());
        match ctx.data_source_pools.descriptor(id).await {
            Ok(descriptor) => {
                let doc = descriptor.to_client_json();
                script.push_str(&format!(
                    "isc.DataSource.create({});\n",
                    serde_json::to_string(&doc).unwrap_or_else(|_| "{}".to_string())
                ));
            }
            Err(e) => {
                script.push_str(&format!("// dataSource {id} unavailable: {e}\n"));
            }
        }
    }

    no_cache(
        (
            [(header::CONTENT_TYPE, "application/javascript".to_string())],
            script,
        )
            .into_response(),
    )
}

async fn health_handler() -> Response {
    (
        [(header::CONTENT_TYPE, "application/json".to_string())],
        "{\"status\":\"ok\"}".to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_input_query_decoding() {
        let uri: Uri = "/gridway/rest/country?name=Bosnia%20and%20Herzegovina&_startRow=0"
            .parse()
            .unwrap();
        let input = request_input(&Method::GET, &uri, &HeaderMap::new(), String::new());
        assert_eq!(input.path, "/gridway/rest/country");
        assert_eq!(
            input.query[0],
            ("name".to_string(), "Bosnia and Herzegovina".to_string())
        );
        assert_eq!(input.query[1], ("_startRow".to_string(), "0".to_string()));
    }

    #[test]
    fn test_no_cache_headers() {
        let response = no_cache(().into_response());
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");
        assert_eq!(response.headers()[header::EXPIRES], EXPIRES_IN_THE_PAST);
    }
}
