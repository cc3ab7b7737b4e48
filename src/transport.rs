// src/transport.rs
// C4: streamable-HTTP session transport (spec.md §4.4, §6). A single `/mcp`
// path multiplexes JSON-RPC tool calls over POST, resumable event replay
// over GET, and session teardown over DELETE.

use crate::identity::{derive_identity, AssistantId};
use crate::state::AppState;
use crate::tool_server::ToolServer;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use tracing::{info, warn};
use uuid::Uuid;

/// Request header carrying the session id (spec.md §6). Axum header lookup
/// is already case-insensitive.
const SESSION_HEADER: &str = "mcp-session-id";
const LAST_EVENT_HEADER: &str = "last-event-id";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", post(post_mcp).get(get_mcp).delete(delete_mcp))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

fn bad_request(message: &str) -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "error": { "code": -32000, "message": message },
        "id": Value::Null,
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

fn is_initialize(body: &Value) -> bool {
    body.get("method").and_then(Value::as_str) == Some("initialize")
}

fn request_identity(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<AssistantId> {
    let header_client_id = headers.get("x-client-id").and_then(|v| v.to_str().ok());
    let user_agent = headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok());
    derive_identity(header_client_id, user_agent, query)
}

/// Single-event SSE body: the transport replies to one tool call (or an
/// initialize handshake) with exactly one event, stored first in the
/// session's `EventLog` so a dropped connection can still resume it later.
fn sse_single(event_id: String, payload: Value) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let event = Event::default().id(event_id).data(payload.to_string());
    Sse::new(stream::once(async move { Ok(event) })).keep_alive(KeepAlive::default())
}

async fn post_mcp(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let header_session_id = session_header(&headers);
    let method = body.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
    let id = body.get("id").cloned().unwrap_or(Value::Null);

    // `identity` is the session's assistant, if any is known; `session_id`
    // is always allocated even for an unidentified caller (spec.md §4.5) so
    // the handshake still completes and later tool calls fail per-call with
    // "Unknown client" rather than failing the whole session.
    let (session_id, identity, is_new_session) = match header_session_id {
        Some(sid) => {
            let Some(session) = state.session(&sid).await else {
                return bad_request("Bad Request: Unknown session id");
            };
            (sid, session.assistant, false)
        }
        None => {
            if !is_initialize(&body) {
                return bad_request("Bad Request: missing session id and not an initialize request");
            }
            let sid = Uuid::new_v4().to_string();
            let identity = request_identity(&headers, &query);
            match identity {
                Some(assistant) => {
                    state.register_session(sid.clone(), assistant).await;
                    info!(session_id = %sid, assistant = %assistant, "session initialized");
                }
                None => {
                    state.register_unidentified_session(sid.clone()).await;
                    warn!(session_id = %sid, "session initialized without an identifiable assistant");
                }
            }
            (sid, identity, true)
        }
    };

    let result = match method.as_str() {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "peerbridge", "version": env!("CARGO_PKG_VERSION") },
        }),
        "tools/list" => {
            let server = ToolServer::new(identity, state.db.clone(), state.knowledge_graph.clone(), state.dispatcher.clone());
            json!({ "tools": server.list_tools() })
        }
        "tools/call" => {
            let name = body["params"]["name"].as_str().unwrap_or_default().to_string();
            let arguments = body["params"].get("arguments").cloned().unwrap_or(json!({}));
            let server = ToolServer::new(identity, state.db.clone(), state.knowledge_graph.clone(), state.dispatcher.clone());
            server.call(&name, arguments).await
        }
        other => {
            warn!(method = %other, "unknown jsonrpc method");
            json!({ "error": format!("unknown method: {other}") })
        }
    };

    let envelope = json!({ "jsonrpc": "2.0", "id": id, "result": result });
    let event_id = state.event_log.store(&session_id, envelope.clone()).await;

    let mut response = sse_single(event_id, envelope).into_response();
    if is_new_session {
        if let Ok(value) = axum::http::HeaderValue::from_str(&session_id) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}

async fn get_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return bad_request("Bad Request: Unknown session id");
    };
    if state.session(&session_id).await.is_none() {
        return bad_request("Bad Request: Unknown session id");
    }

    let last_event_id = headers.get(LAST_EVENT_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    let mut replayed = Vec::new();
    if !last_event_id.is_empty() {
        let events = std::sync::Mutex::new(Vec::new());
        state
            .event_log
            .replay_after(&last_event_id, |payload| {
                events.lock().unwrap().push(payload);
                async {}
            })
            .await;
        replayed = events.into_inner().unwrap();
    }

    // Resumption only replays the buffered backlog (spec.md §4.2, §4.4);
    // this bridge never pushes spontaneous server-initiated events, so the
    // stream has nothing further to deliver once the backlog is drained.
    let events: Vec<Result<Event, Infallible>> =
        replayed.into_iter().enumerate().map(|(i, payload)| Ok(Event::default().id(format!("{session_id}:replay:{i}")).data(payload.to_string()))).collect();
    Sse::new(stream::iter(events)).keep_alive(KeepAlive::default()).into_response()
}

async fn delete_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return bad_request("Bad Request: Unknown session id");
    };
    if state.session(&session_id).await.is_none() {
        return bad_request("Bad Request: Unknown session id");
    }
    state.close_session(&session_id).await;
    info!(session_id = %session_id, "session closed");
    StatusCode::OK.into_response()
}

async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.sessions.read().await;
    let list: Vec<Value> =
        sessions.values().map(|s| json!({ "id": s.id, "clientId": s.assistant.map(|a| a.as_str()) })).collect();
    Json(json!({ "sessions": list, "sessionCount": list.len() }))
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let kg = if state.knowledge_graph.is_available().await { "available" } else { "unavailable" };
    Json(json!({ "status": "ok", "knowledge_graph": kg }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let mut config = BridgeConfig::from_env();
        config.db_path = std::path::PathBuf::from(":memory:");
        AppState::new(std::sync::Arc::new(config)).await.unwrap()
    }

    #[tokio::test]
    async fn initialize_then_who_am_i() {
        let app = router(test_state().await);

        let init_body = json!({"jsonrpc":"2.0","method":"initialize","id":1,"params":{}});
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .header("x-client-id", "claude")
            .body(axum::body::Body::from(init_body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session_id = response.headers().get(SESSION_HEADER).unwrap().to_str().unwrap().to_string();
        assert!(!session_id.is_empty());

        let call_body = json!({
            "jsonrpc":"2.0","method":"tools/call","id":2,
            "params": {"name":"who_am_i","arguments":{}},
        });
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .header(SESSION_HEADER, session_id)
            .body(axum::body::Body::from(call_body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("client_id"));
        assert!(text.contains("claude"));
    }

    #[tokio::test]
    async fn post_without_session_id_and_not_initialize_is_400() {
        let app = router(test_state().await);
        let body = json!({"jsonrpc":"2.0","method":"tools/call","id":1,"params":{"name":"who_am_i","arguments":{}}});
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_id_is_400() {
        let app = router(test_state().await);
        let request = axum::http::Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header(SESSION_HEADER, "not-a-real-session")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_and_health_respond() {
        let app = router(test_state().await);
        let request = axum::http::Request::builder().uri("/status").body(axum::body::Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
