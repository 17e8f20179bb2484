//! `POST /api/chat`: run an agent turn and stream its events as NDJSON.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use uuid::Uuid;

use crate::agents::{AgentEvent, ChannelSink, EventSink};

use super::routes::AppState;
use super::types::ChatRequest;

pub const SESSION_HEADER: &str = "x-session-id";
const NDJSON: &str = "application/x-ndjson";

/// Session id from the body, then the request header, else a fresh UUID.
fn resolve_session_id(req: &ChatRequest, headers: &HeaderMap) -> String {
    req.session_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// The turn runs on its own task so a client disconnect does not abort a
/// half-applied proposal; events for a gone client are dropped.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    let session_id = resolve_session_id(&req, &headers);
    let user_message = req.user_message();
    tracing::debug!(
        session_id = %session_id,
        messages = req.messages.len(),
        files = req.files.len(),
        "Chat turn received"
    );

    let (sink, mut rx) = ChannelSink::channel();
    let panic_sink = sink.clone();
    let orchestrator = Arc::clone(&state.orchestrator);
    let turn_session = session_id.clone();
    let files = req.files;

    let turn = tokio::spawn(async move {
        orchestrator
            .run(&turn_session, &user_message, &files, &sink)
            .await
    });
    tokio::spawn(async move {
        if let Err(e) = turn.await {
            tracing::error!("Agent turn task failed: {}", e);
            panic_sink.emit(AgentEvent::error("Internal error while running agent"));
        }
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<_, Infallible>(Bytes::from(event.to_ndjson()));
        }
    };

    let mut response = Body::from_stream(stream).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(NDJSON));
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response_headers.insert(SESSION_HEADER, value);
    }
    response
}
