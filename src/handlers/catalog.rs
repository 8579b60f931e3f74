use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::availability::DATE_FORMAT;
use crate::models::{OpenSlots, Service};
use crate::state::AppState;

// GET /api/services
pub async fn list_services(State(state): State<Arc<AppState>>) -> Json<Vec<Service>> {
    Json(state.desk.list_services().to_vec())
}

// GET /api/services/:id
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(state.desk.get_service(&id)?.clone()))
}

// GET /api/slots?from=YYYY-MM-DD&days=N
#[derive(Deserialize)]
pub struct SlotsQuery {
    pub from: Option<String>,
    pub days: Option<u32>,
}

pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<OpenSlots>, AppError> {
    let from = match query.from.as_deref() {
        Some(s) => Some(
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map_err(|_| AppError::BadRequest(format!("invalid date: {s}")))?,
        ),
        None => None,
    };
    Ok(Json(state.desk.list_open_slots(from, query.days)?))
}
