use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{Booking, Session, Stage};
use crate::services::conversation::TurnReply;
use crate::state::AppState;

// POST /api/sessions
#[derive(Serialize)]
pub struct CreatedSession {
    session_id: String,
    stage: Stage,
    greeting: String,
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<CreatedSession>), AppError> {
    let session = state.desk.create_session()?;
    let greeting = session
        .messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_else(|| state.desk.greeting());

    Ok((
        StatusCode::CREATED,
        Json(CreatedSession {
            session_id: session.session_id,
            stage: session.stage,
            greeting,
        }),
    ))
}

// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.desk.get_session(&id)?))
}

// POST /api/sessions/:id/turns
#[derive(Deserialize)]
pub struct TurnRequest {
    pub text: String,
}

pub async fn post_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnReply>, AppError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest("text must not be empty".to_string()));
    }
    Ok(Json(state.desk.handle_turn(&id, text).await?))
}

// POST /api/sessions/:id/reset
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TurnReply>, AppError> {
    Ok(Json(state.desk.reset(&id).await?))
}

// POST /api/sessions/:id/abandon
pub async fn abandon_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.desk.abandon(&id).await?))
}

// GET /api/sessions/:id/bookings
pub async fn session_bookings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.desk.bookings_for_session(&id)?))
}
