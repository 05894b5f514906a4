//! `GET /v1/events/zabbix/`: content negotiation on `Accept` per spec §6.
//!
//! Grounded on the teacher's `media_events_sse_handler`
//! (`ferrex-server/src/handlers/scan/handle_scan.rs`): an `async_stream::
//! stream!` block forwarding a broadcast receiver as the response body. The
//! frames here are pre-formatted bytes from `SseHub::broadcast` rather than
//! `axum::response::sse::Event`, since the hub (not the HTTP adapter) owns
//! the exact wire format per spec §4.4.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use zbx_rtx_core::{Family, Query as RingQuery};

use crate::errors::AppError;
use crate::state::AppState;

const DEMO_HTML: &str = include_str!("../assets/demo.html");

#[derive(Debug, Deserialize)]
pub struct SnapshotParams {
    pub family: Option<String>,
    pub limit: Option<usize>,
    #[serde(rename = "sinceId")]
    pub since_id: Option<u64>,
}

pub async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SnapshotParams>,
) -> Result<Response, AppError> {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if accept.contains("text/event-stream") {
        Ok(sse_stream(state))
    } else if accept.contains("application/json") {
        Ok(snapshot(state, params)?.into_response())
    } else {
        Ok(Html(DEMO_HTML).into_response())
    }
}

fn sse_stream(state: AppState) -> Response {
    let mut client = state.hub.register();

    let body_stream = async_stream::stream! {
        yield Ok::<Bytes, std::convert::Infallible>(Bytes::from_static(b": connected\n\n"));
        while let Some(frame) = client.rx.recv().await {
            client.ack(frame.len());
            yield Ok::<Bytes, std::convert::Infallible>(frame);
        }
        state.hub.unregister(client.id);
    };

    let mut response = Response::new(Body::from_stream(body_stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

fn snapshot(state: AppState, params: SnapshotParams) -> Result<Json<serde_json::Value>, AppError> {
    let family = match params.family {
        Some(raw) => Some(
            Family::from_str_loose(&raw)
                .ok_or_else(|| AppError::bad_request(format!("unknown family {raw:?}")))?,
        ),
        None => None,
    };

    let items = state.ring.query(RingQuery {
        family,
        limit: params.limit,
        since_id: params.since_id,
    });

    Ok(Json(json!({
        "latestId": state.ring.latest_id(),
        "items": items,
    })))
}

pub async fn openapi() -> impl IntoResponse {
    const DOC: &str = include_str!("../assets/openapi.json");
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        DOC,
    )
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn root_redirect() -> impl IntoResponse {
    axum::response::Redirect::found("/v1/events/zabbix/")
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
