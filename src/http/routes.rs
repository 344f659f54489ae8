//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::combat::WeaponKind;
use crate::game::map::MapData;
use crate::game::{MatchError, Team};
use crate::rooms::{Participant, RoomInfo, ServiceError};
use crate::util::time::uptime_secs;
use crate::ws::ws_handler;

const MAX_NAME_LEN: usize = 32;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_handler))
        .route("/rooms", get(list_rooms_handler).post(create_room_handler))
        .route("/rooms/:room_id/participants", post(add_participant_handler))
        .route("/rooms/:room_id/start", post(start_match_handler))
        .route("/rooms/:room_id/map", post(load_map_handler))
        .route("/lobby/events", get(lobby_events_handler))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.registry.active_matches(),
        active_players: state.registry.total_players(),
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Deserialize, Default)]
#[serde(default)]
struct CreateRoomRequest {
    name: Option<String>,
    /// Inline map; the built-in desert map when absent
    map: Option<MapData>,
    seed: Option<u64>,
}

async fn list_rooms_handler(State(state): State<AppState>) -> Json<Vec<RoomInfo>> {
    Json(state.rooms.list_rooms())
}

async fn create_room_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomInfo>), AppError> {
    let name = req.name.map(|n| validate_name(&n)).transpose()?;
    let room = state.rooms.create_room(name, req.map, req.seed)?;
    Ok((StatusCode::CREATED, Json(room)))
}

#[derive(Deserialize)]
struct AddParticipantRequest {
    name: String,
    #[serde(default)]
    team: Option<Team>,
    #[serde(default)]
    weapon: Option<WeaponKind>,
}

async fn add_participant_handler(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<(StatusCode, Json<Participant>), AppError> {
    let name = validate_name(&req.name)?;
    let participant = state
        .rooms
        .add_participant(room_id, name, req.team, req.weapon)
        .await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

#[derive(Serialize)]
struct StartResponse {
    status: &'static str,
    room_id: Uuid,
}

async fn start_match_handler(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<StartResponse>, AppError> {
    state.rooms.start_match(room_id).await?;
    Ok(Json(StartResponse {
        status: "started",
        room_id,
    }))
}

#[derive(Serialize)]
struct MapResponse {
    status: &'static str,
    room_id: Uuid,
    map: String,
}

async fn load_map_handler(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Json(map): Json<MapData>,
) -> Result<Json<MapResponse>, AppError> {
    let map = state.rooms.load_map(room_id, map).await?;
    Ok(Json(MapResponse {
        status: "loaded",
        room_id,
        map,
    }))
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "name must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

// ============================================================================
// Lobby event stream
// ============================================================================

async fn lobby_events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream::unfold(state.rooms.subscribe_lobby(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                    Ok(sse) => return Some((Ok::<_, Infallible>(sse), rx)),
                    Err(e) => warn!(error = %e, "Failed to encode lobby event"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_count = n, "Lobby listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::RoomNotFound(_) => AppError::NotFound(err.to_string()),
            ServiceError::RoomClosed(_) => AppError::Conflict(err.to_string()),
            ServiceError::Session(_) => AppError::Unauthorized,
            ServiceError::Match(MatchError::Map(e)) => AppError::BadRequest(e.to_string()),
            ServiceError::Match(
                e @ (MatchError::RoomFull(_)
                | MatchError::DuplicatePlayer(_)
                | MatchError::AlreadyStarted
                | MatchError::NotEnoughPlayers),
            ) => AppError::Conflict(e.to_string()),
            ServiceError::Match(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
