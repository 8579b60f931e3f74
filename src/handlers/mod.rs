use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod bookings;
pub mod catalog;
pub mod health;
pub mod sessions;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/sessions", post(sessions::create_session))
        .route("/api/sessions/:id", get(sessions::get_session))
        .route("/api/sessions/:id/turns", post(sessions::post_turn))
        .route("/api/sessions/:id/reset", post(sessions::reset_session))
        .route("/api/sessions/:id/abandon", post(sessions::abandon_session))
        .route("/api/sessions/:id/bookings", get(sessions::session_bookings))
        .route("/api/services", get(catalog::list_services))
        .route("/api/services/:id", get(catalog::get_service))
        .route("/api/slots", get(catalog::list_slots))
        .route("/api/bookings/:id", get(bookings::get_booking))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
