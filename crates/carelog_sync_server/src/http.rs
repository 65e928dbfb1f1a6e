//! HTTP front end for the sync server.

use crate::server::{ServerRequest, SyncServer};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builds a router that forwards every request to `server`.
pub fn router(server: Arc<SyncServer>) -> Router {
    Router::new().fallback(dispatch).with_state(server)
}

/// Serves `server` on `listener` until the task is cancelled.
pub async fn serve(listener: TcpListener, server: Arc<SyncServer>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "sync server listening");
    }
    axum::serve(listener, router(server)).await
}

async fn dispatch(
    State(server): State<Arc<SyncServer>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    let request = ServerRequest {
        method: method.as_str().to_string(),
        target,
        headers,
        body: body.to_vec(),
    };
    let response = server.handle(&request);

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        response.body,
    )
        .into_response()
}
