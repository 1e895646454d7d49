// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

mod config;
mod dispatch;
mod dynamo;
mod hub;
mod imaging;
mod phase;
mod registry;
mod runtime;
mod scores;
mod store;
#[cfg(test)]
mod test_support;
mod turns;
mod watcher;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use promptparty_common::{
    ArtifactRecord, ErrorCode, LeaderboardEntry, ServerEvent, SessionDocument, WordBank,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    config::ServiceConfig,
    hub::Hub,
    imaging::{ImageGenerator, StableDiffusionGenerator},
    runtime::SessionRuntimes,
    store::DocumentStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub images: Arc<dyn ImageGenerator>,
    pub words: Arc<WordBank>,
    pub hub: Hub,
    pub runtimes: SessionRuntimes,
}

impl AppState {
    pub async fn reply_error(
        &self,
        connection_id: &str,
        code: ErrorCode,
        message: impl Into<String>,
    ) {
        let message = message.into();
        debug!(connection_id = %connection_id, ?code, message = %message, "rejecting client event");
        self.hub
            .send_to(connection_id, ServerEvent::error(code, message))
            .await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "session_service=debug,tower_http=info".to_string()),
        )
        .init();

    let service_config = ServiceConfig::from_env();
    let images = StableDiffusionGenerator::new(service_config.image.clone())?;
    let state = AppState {
        config: Arc::new(service_config),
        store: store::load_document_store().await,
        images: Arc::new(images),
        words: Arc::new(config::load_word_bank()),
        hub: Hub::default(),
        runtimes: SessionRuntimes::default(),
    };

    let changes = state.store.subscribe();
    tokio::spawn(watcher::run_session_watcher(state.clone(), changes));

    let app = build_router(state);
    let bind_addr = parse_bind_addr("SESSION_SERVICE_BIND", "0.0.0.0:5000")?;
    info!(%bind_addr, "session-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/v1/sessions/{lobby_id}", get(get_session_handler))
        .route("/v1/sessions/{lobby_id}/images", get(list_images_handler))
        .route("/v1/leaderboard", get(leaderboard_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "session-service"}))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (connection_id, mut outbound) = state.hub.connect().await;
    info!(connection_id = %connection_id, "client connected");

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else {
                    break;
                };
                if send_ws_event(&mut socket, &connection_id, &event).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        dispatch::dispatch(&state, &connection_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(connection_id = %connection_id, error = %error, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(&connection_id).await;
    registry::handle_disconnect(&state, &connection_id).await;
    info!(connection_id = %connection_id, "client disconnected");
}

async fn send_ws_event(
    socket: &mut WebSocket,
    connection_id: &str,
    event: &ServerEvent,
) -> Result<(), ()> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(connection_id = %connection_id, error = %error, "failed to encode server event");
            return Ok(());
        }
    };
    debug!(connection_id = %connection_id, websocket_payload = %payload, "pushing websocket event");
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|error| {
            warn!(
                connection_id = %connection_id,
                error = ?error,
                "failed to push websocket event"
            );
        })
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(lobby_id): Path<String>,
) -> Result<Json<SessionDocument>, ApiError> {
    let session = state
        .store
        .get_session(&lobby_id)
        .await
        .map_err(|error| ApiError::internal(format!("failed to read session: {error}")))?
        .ok_or_else(|| ApiError::not_found(format!("session {lobby_id} not found")))?;
    Ok(Json(session))
}

async fn list_images_handler(
    State(state): State<AppState>,
    Path(lobby_id): Path<String>,
) -> Result<Json<Vec<ArtifactRecord>>, ApiError> {
    let exists = state
        .store
        .get_session(&lobby_id)
        .await
        .map_err(|error| ApiError::internal(format!("failed to read session: {error}")))?
        .is_some();
    if !exists {
        return Err(ApiError::not_found(format!("session {lobby_id} not found")));
    }
    let artifacts = state
        .store
        .artifacts_for(&lobby_id)
        .await
        .map_err(|error| ApiError::internal(format!("failed to list images: {error}")))?;
    Ok(Json(artifacts))
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    limit: Option<String>,
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let raw_limit = query
        .limit
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok());
    let limit = scores::resolve_limit(raw_limit.as_ref(), state.config.leaderboard_default_limit);
    let entries = scores::lifetime_leaderboard(&state, limit)
        .await
        .map_err(|error| ApiError::internal(format!("failed to load leaderboard: {error}")))?;
    Ok(Json(entries))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
