//! HTTP and WebSocket surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use moodcast_core::PresenceSnapshot;
use moodcast_core::clock::Clock;
use moodcast_core::sampling::Sampler;
use moodcast_core::simulation::SimulationEngine;
use moodcast_core::validation::{normalize_country, validate_room_identifier};

use crate::admin::AdminAuth;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::heartbeat::{HeartbeatService, SamplingStats};
use crate::persist::run_snapshot_writer;
use crate::room::{self, Connection, RoomEvent, RoomHandle, RoomStats, SessionSummary};
use crate::store::Store;

/// Largest inbound WebSocket message accepted.
const MAX_MESSAGE_BYTES: usize = 16 * 1024;

/// Depth of the room → persister queue.
const PERSIST_QUEUE: usize = 4;

const COUNTRY_HEADER: &str = "cf-ipcountry";

#[derive(Clone)]
pub struct AppState {
    pub heartbeat: Arc<HeartbeatService>,
    pub room: RoomHandle,
    pub admin: AdminAuth,
}

/// Spawn the room actor and snapshot writer and wire them into an
/// [`AppState`]. Both tasks stop when `cancel` fires.
pub fn start(
    config: AppConfig,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> (AppState, Vec<JoinHandle<()>>) {
    let (persist_tx, persist_rx) = mpsc::channel(PERSIST_QUEUE);
    let persister = tokio::spawn(run_snapshot_writer(store.clone(), persist_rx, cancel.clone()));

    // Each delivery mode drives its own simulation engine.
    let (room, room_task) = room::spawn(
        config.room.clone(),
        SimulationEngine::new(config.simulation.clone(), clock.clone()),
        clock.clone(),
        Some(persist_tx),
        cancel,
    );
    let heartbeat = HeartbeatService::new(
        store,
        Sampler::new(config.sampling.clone()),
        SimulationEngine::new(config.simulation.clone(), clock.clone()),
        clock,
        config.presence_cache,
    );

    let state = AppState {
        heartbeat: Arc::new(heartbeat),
        room,
        admin: AdminAuth::new(config.admin_token),
    };
    (state, vec![room_task, persister])
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/presence", get(presence))
        .route("/api/ws", get(ws_alias))
        .route("/admin/sessions", get(admin_sessions))
        .route("/admin/events", get(admin_events))
        .route("/admin/stats", get(admin_stats))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serve until `cancel` fires, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "server: listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await?;
    info!("server: stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Sampling endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    /// Untyped so garbage coerces to the default mood instead of a 422.
    #[serde(default)]
    pub mood: Option<serde_json::Value>,
    #[serde(default)]
    pub country: Option<String>,
}

async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<PresenceSnapshot>, ApiError> {
    let Json(body) = body?;
    let country = body
        .country
        .as_deref()
        .filter(|c| normalize_country(Some(c)).is_some())
        .or_else(|| header_country(&headers));
    let snapshot = state
        .heartbeat
        .heartbeat(
            body.session_id.as_deref(),
            body.mood.as_ref().and_then(|m| m.as_str()),
            country,
        )
        .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Default, Deserialize)]
pub struct PresenceQuery {
    #[serde(default)]
    pub realtime: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl PresenceQuery {
    fn realtime(&self) -> bool {
        self.realtime
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }
}

async fn presence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PresenceQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Ok(ws) = upgrade {
        return accept_socket(state.room, ws, query, &headers);
    }
    let result = if query.realtime() {
        state.room.snapshot().await.map_err(ApiError::from).map(|snapshot| {
            ([(header::CACHE_CONTROL, "no-store".to_string())], Json(snapshot)).into_response()
        })
    } else {
        let max_age = state.heartbeat.cache_ttl_secs();
        state.heartbeat.presence().await.map_err(ApiError::from).map(|snapshot| {
            (
                [(header::CACHE_CONTROL, format!("public, max-age={max_age}"))],
                Json(snapshot),
            )
                .into_response()
        })
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn ws_alias(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PresenceQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    accept_socket(state.room, ws, query, &headers)
}

fn header_country(headers: &HeaderMap) -> Option<&str> {
    headers.get(COUNTRY_HEADER).and_then(|v| v.to_str().ok())
}

// ---------------------------------------------------------------------------
// Push connections
// ---------------------------------------------------------------------------

fn accept_socket(
    room: RoomHandle,
    ws: WebSocketUpgrade,
    query: PresenceQuery,
    headers: &HeaderMap,
) -> Response {
    // Reject before upgrading so the client gets a plain 400.
    if let Err(e) = validate_room_identifier(query.session_id.as_deref()) {
        return ApiError::from(e).into_response();
    }
    let country = query
        .country
        .or_else(|| header_country(headers).map(str::to_string));
    let PresenceQuery {
        session_id, mood, ..
    } = query;
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| run_socket(room, socket, session_id, mood, country))
}

async fn run_socket(
    room: RoomHandle,
    socket: WebSocket,
    session_id: Option<String>,
    mood: Option<String>,
    country: Option<String>,
) {
    let connection = match room
        .open(session_id.as_deref(), mood.as_deref(), country.as_deref())
        .await
    {
        Ok(connection) => connection,
        Err(e) => {
            warn!(error = %e, "ws: room refused connection");
            return;
        }
    };
    let Connection {
        socket: socket_id,
        session_id,
        mut outbound,
    } = connection;
    debug!(session_id = %session_id, socket = socket_id, "ws: connected");

    let (mut sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.as_ref().into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if room.message(socket_id, text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(socket = socket_id, error = %e, "ws: read failed");
                        break;
                    }
                }
            }
            _ = &mut writer => break,
        }
    }

    writer.abort();
    if room.close(socket_id).await.is_err() {
        debug!(socket = socket_id, "ws: room already stopped");
    }
    debug!(session_id = %session_id, socket = socket_id, "ws: disconnected");
}

// ---------------------------------------------------------------------------
// Admin and health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct AdminStats {
    pub room: RoomStats,
    pub sampling: SamplingStats,
}

async fn admin_sessions(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    state.admin.authorize(&headers, peer)?;
    Ok(Json(state.room.sessions().await?))
}

async fn admin_events(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<RoomEvent>>, ApiError> {
    state.admin.authorize(&headers, peer)?;
    Ok(Json(state.room.events().await?))
}

async fn admin_stats(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<AdminStats>, ApiError> {
    state.admin.authorize(&headers, peer)?;
    Ok(Json(AdminStats {
        room: state.room.stats().await?,
        sampling: state.heartbeat.stats().await?,
    }))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
