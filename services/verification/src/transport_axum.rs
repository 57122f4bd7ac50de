use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE, request::Parts},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::transport::{
    HttpRequest, HttpResponse, MAX_HTTP_BODY_BYTES, SharedRuntime, VerificationRuntime,
    handle_request,
};

/// Serves the shared router on a tokio runtime until ctrl-c. Oversized
/// bodies are refused with 413 before routing.
pub fn serve_http_with_axum(
    runtime: VerificationRuntime,
    bind_addr: &str,
    worker_threads: usize,
) -> Result<(), String> {
    let worker_threads = worker_threads.max(1);
    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("certverify-http")
        .enable_all()
        .build()
        .map_err(|err| format!("failed to build tokio runtime: {err}"))?;
    let app = router(Arc::new(Mutex::new(runtime)));

    tokio_runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|err| format!("failed to bind {bind_addr}: {err}"))?;
        info!(bind_addr, worker_threads, "verification transport listening (axum)");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|err| format!("axum server failed: {err}"))
    })
}

fn router(runtime: SharedRuntime) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(runtime)
        .layer(DefaultBodyLimit::max(MAX_HTTP_BODY_BYTES))
}

async fn dispatch(State(runtime): State<SharedRuntime>, parts: Parts, body: Bytes) -> HttpResponse {
    let request = transport_request(&parts, body);
    // verification may wait on the OCR program
    tokio::task::spawn_blocking(move || handle_request(&runtime, &request))
        .await
        .unwrap_or_else(|err| {
            warn!(error = %err, "verification handler task failed");
            HttpResponse::internal_server_error(&format!("request handler failed: {err}"))
        })
}

fn transport_request(parts: &Parts, body: Bytes) -> HttpRequest {
    let target = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path(), |target| target.as_str());
    HttpRequest {
        method: parts.method.as_str().to_string(),
        target: target.to_string(),
        headers: header_map(&parts.headers),
        body: body.to_vec(),
    }
}

/// Header names arrive lower-case; values that are not visible ASCII are
/// dropped.
fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

impl IntoResponse for HttpResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let content_type = HeaderValue::from_str(self.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/json"));
        (status, [(CONTENT_TYPE, content_type)], self.body).into_response()
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install ctrl-c handler; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("verification transport shutting down");
}
