//! Request/response logging, modeled directly on the teacher's
//! `api/src/middleware/logging.rs`.

use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, instrument};
use uuid::Uuid;

/// Default `tower_http` trace layer for the control plane router.
pub fn get_tracing_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

/// Per-request logging middleware: assigns a request id, logs the inbound
/// request and the outcome with duration, matching the teacher's
/// `logging_middleware` shape.
#[instrument(skip(request, next))]
pub async fn logging_middleware(mut request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let method = request.method().clone();
    let uri = request.uri().clone();

    request
        .headers_mut()
        .insert("x-request-id", request_id.parse().unwrap());

    let span = info_span!("http_request", request_id = %request_id, method = %method, uri = %uri);
    info!(request_id = %request_id, %method, %uri, "incoming HTTP request");

    let response = span.in_scope(|| next.run(request)).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis();
    if status.is_server_error() {
        error!(request_id = %request_id, %status, duration_ms, "request failed with server error");
    } else if status.is_client_error() {
        info!(request_id = %request_id, %status, duration_ms, "request rejected with client error");
    } else {
        info!(request_id = %request_id, %status, duration_ms, "request completed");
    }

    response
}
