//! Loopback HTTP listener exposing the media endpoint
//!
//! `GET /media/{id}/{stream|cover}` with an optional `Range` header, answered by
//! whichever proxy the controller currently routes to.

use crate::proxy::controller::ProxyController;
use crate::proxy::messages::MediaRequest;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bridge_traits::http::HttpResponse;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub fn router(controller: Arc<ProxyController>) -> Router {
    Router::new()
        .route("/media/:id/:kind", get(serve_media))
        .with_state(controller)
}

/// Serve the media endpoint until the listener fails.
pub async fn serve(
    listener: TcpListener,
    controller: Arc<ProxyController>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Media endpoint listening");
    }
    axum::serve(listener, router(controller)).await.map_err(|e| {
        error!(error = %e, "Media endpoint stopped");
        e
    })
}

async fn serve_media(
    State(controller): State<Arc<ProxyController>>,
    Path((id, kind)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut request = MediaRequest::new(format!("/media/{id}/{kind}"));
    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        request = request.with_range(range);
    }
    into_axum(controller.fetch(request).await)
}

fn into_axum(response: HttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    (status, headers, Body::from(response.body)).into_response()
}
