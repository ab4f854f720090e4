//! HTTP transport
//!
//! `POST /mcp` carries one JSON-RPC message per exchange. The session token
//! travels in the `Mcp-Session-Id` header and is echoed on every response.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::supervisor::RequestSupervisor;
use crate::error::codes;
use crate::mcp::protocol::request_id;
use crate::mcp::{McpHandler, McpResponse};
use crate::session::SessionManager;
use crate::types::{PlatformInfo, ServerIdentity, PROTOCOL_VERSION, SESSION_HEADER};

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub supervisor: Arc<RequestSupervisor>,
    pub identity: ServerIdentity,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>, supervisor: Arc<RequestSupervisor>) -> Self {
        let identity = sessions.factory().config().identity.clone();
        Self {
            sessions,
            supervisor,
            identity,
        }
    }
}

/// Static liveness document served on GET
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub status: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub platform: PlatformInfo,
}

impl StatusDocument {
    pub fn new(identity: &ServerIdentity) -> Self {
        Self {
            status: "ok".to_string(),
            name: identity.name.clone(),
            version: identity.version.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            platform: PlatformInfo::current(),
        }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_handler).post(rpc_handler))
        .route(
            "/mcp",
            get(status_handler)
                .post(rpc_handler)
                .delete(delete_session_handler),
        )
        .route("/health", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server
pub struct HttpServer {
    state: AppState,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(state: AppState, addr: SocketAddr) -> Self {
        Self { state, addr }
    }

    /// Serve until `shutdown` resolves
    pub async fn start<S>(self, shutdown: S) -> std::io::Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("MCP HTTP server listening on {}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

fn requested_session(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn json_response(session_id: Option<&str>, body: McpResponse) -> Response {
    let mut response = Json(body).into_response();
    if let Some(id) = session_id {
        match HeaderValue::from_str(id) {
            Ok(value) => {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(SESSION_HEADER), value);
            }
            Err(_) => tracing::warn!("Session id is not a valid header value"),
        }
    }
    response
}

/// Status endpoint
async fn status_handler(State(state): State<AppState>) -> Json<StatusDocument> {
    Json(StatusDocument::new(&state.identity))
}

/// JSON-RPC endpoint
async fn rpc_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let session = match state.sessions.get_or_create(requested_session(&headers)) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to open session: {}", e);
            let id = std::str::from_utf8(&body).ok().and_then(request_id);
            return json_response(None, McpResponse::from_error(id, e));
        }
    };

    let dispatcher = session.dispatcher.clone();
    let label = Uuid::new_v4().to_string();
    tracing::debug!(session = %session.id, request = %label, "Dispatching request");

    let outcome = state
        .supervisor
        .run(&label, async move {
            match std::str::from_utf8(&body) {
                Ok(raw) => dispatcher.handle_message(raw).await,
                Err(e) => McpResponse::error(
                    None,
                    codes::PARSE_ERROR,
                    format!("Parse error: body is not UTF-8: {}", e),
                ),
            }
        })
        .await;

    let response = outcome.unwrap_or_else(|e| McpResponse::from_error(None, e));
    json_response(Some(&session.id), response)
}

/// Explicit session termination
async fn delete_session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match requested_session(&headers) {
        Some(id) => {
            state.sessions.remove(id);
            StatusCode::NO_CONTENT
        }
        None => StatusCode::BAD_REQUEST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_document() {
        let doc = StatusDocument::new(&ServerIdentity::default());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["name"], "hostbridge");
        assert_eq!(value["protocolVersion"], "2024-11-05");
        assert_eq!(value["platform"]["os"], std::env::consts::OS);
    }

    #[test]
    fn test_requested_session_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(requested_session(&headers), None);
        headers.insert(SESSION_HEADER, HeaderValue::from_static("  abc  "));
        assert_eq!(requested_session(&headers), Some("abc"));
        headers.insert(SESSION_HEADER, HeaderValue::from_static(""));
        assert_eq!(requested_session(&headers), None);
    }
}
