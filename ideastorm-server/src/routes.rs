use axum::{
    extract::{Path, State},
    routing::get,
    Json,
};
use serde::Serialize;

use crate::{
    context::ServerContext,
    errors::{ServerError, ServerResult},
    Router,
};

/// Read-only status probe, outside the protocol state machine.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    room_count: usize,
    total_participants: usize,
}

#[derive(Debug, Serialize)]
struct RoomResponse {
    code: String,
    participants: usize,
    idea_count: usize,
}

async fn health(State(context): State<ServerContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        room_count: context.collab.rooms.room_count(),
        total_participants: context.collab.rooms.total_participants(),
    })
}

async fn room_by_code(
    State(context): State<ServerContext>,
    Path(code): Path<String>,
) -> ServerResult<Json<RoomResponse>> {
    let room = context
        .collab
        .rooms
        .room(&code)
        .ok_or(ServerError::NotFound { resource: "Room" })?;

    Ok(Json(RoomResponse {
        code: room.code().to_string(),
        participants: room.participant_count(),
        idea_count: room.idea_count(),
    }))
}

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rooms/:code", get(room_by_code))
}
