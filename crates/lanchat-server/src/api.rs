//! HTTP API for the browser client.
//!
//! Routes are mounted under `/api` and again at the root for older clients.
//! Everything else falls through to the static web root.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lan_discovery::{DiscoveryStatus, PeerDiscovery, PeerRecord, Transport, UdpTransport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::messages::{MessageError, MessageStore};

/// Shared application state
pub struct AppState<T: Transport = UdpTransport> {
    pub messages: MessageStore,
    pub discovery: PeerDiscovery<T>,
}

/// Body of `POST /api/messages`
#[derive(Debug, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Query string of `GET /api/messages`
#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    /// Return only the newest `limit` messages
    pub limit: Option<usize>,
}

/// A discovered peer as reported to the browser
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PeerView {
    pub id: String,
    pub address: String,
    pub last_seen_secs: u64,
}

impl PeerView {
    fn from_record(record: &PeerRecord, now: Instant) -> Self {
        Self {
            id: record.id.to_string(),
            address: record.address.to_string(),
            last_seen_secs: record.age(now).as_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub peer_id: String,
    pub discovery: DiscoveryStatus,
    pub peers: usize,
    pub messages: usize,
}

/// Build the application router.
pub fn router<T: Transport>(state: Arc<AppState<T>>, web_root: &Path) -> Router {
    let api = Router::new()
        .route("/messages", get(list_messages::<T>).post(post_message::<T>))
        .route("/clear", post(clear_messages::<T>))
        .route("/peers", get(list_peers::<T>))
        .route("/status", get(status::<T>));

    Router::new()
        .nest("/api", api.clone())
        .merge(api)
        .fallback_service(ServeDir::new(web_root))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "status": "error", "error": message.into() }))).into_response()
}

async fn list_messages<T: Transport>(
    State(state): State<Arc<AppState<T>>>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    let messages = match query.limit {
        Some(limit) => state.messages.recent(limit),
        None => state.messages.all(),
    };
    Json(messages).into_response()
}

async fn post_message<T: Transport>(State(state): State<Arc<AppState<T>>>, body: String) -> Response {
    let request: NewMessage = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Rejected message body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e));
        }
    };

    let (Some(user), Some(text)) = (request.user, request.message) else {
        return error_response(StatusCode::BAD_REQUEST, MessageError::MissingField.to_string());
    };

    match state.messages.add(&user, &text) {
        Ok(message) => {
            tracing::info!("Message {} from {}", message.id, message.user);
            (StatusCode::CREATED, Json(json!({ "status": "success", "id": message.id }))).into_response()
        }
        Err(e @ (MessageError::MissingField | MessageError::TooLong(_))) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            tracing::error!("Failed to store message: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn clear_messages<T: Transport>(State(state): State<Arc<AppState<T>>>) -> Response {
    match state.messages.clear() {
        Ok(()) => {
            tracing::info!("Message history cleared");
            Json(json!({ "status": "cleared" })).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to clear messages: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn list_peers<T: Transport>(State(state): State<Arc<AppState<T>>>) -> Json<Vec<PeerView>> {
    let now = Instant::now();
    let peers = state
        .discovery
        .active_peers()
        .iter()
        .map(|record| PeerView::from_record(record, now))
        .collect();
    Json(peers)
}

async fn status<T: Transport>(State(state): State<Arc<AppState<T>>>) -> Json<StatusView> {
    Json(StatusView {
        peer_id: state.discovery.peer_id().to_string(),
        discovery: state.discovery.status(),
        peers: state.discovery.active_peers().len(),
        messages: state.messages.len(),
    })
}
