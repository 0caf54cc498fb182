mod admin;
mod chat;
mod health;
mod session;
mod vision;

use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use health::SERVICE_NAME;

/// Camera frames arrive as base64 inside JSON bodies.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Builds the HTTP surface. Everything except the health check is rate limited.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/session-token", post(session::create_token))
        .route("/api/end-session", post(session::end))
        .route("/api/chat-stream", post(chat::stream))
        .route("/api/passive-vision", post(vision::passive))
        .route("/api/capture-for-admin", post(vision::capture_for_admin))
        .route("/api/admin/items", get(admin::list_items).post(admin::create_item))
        .route(
            "/api/admin/items/{id}",
            put(admin::update_item).delete(admin::delete_item),
        )
        .route("/api/admin/items/{id}/status", put(admin::set_item_status))
        .route("/api/admin/notes", get(admin::list_notes).post(admin::create_note))
        .route(
            "/api/admin/notes/{id}",
            put(admin::update_note).delete(admin::delete_note),
        )
        .route("/api/admin/notes/{id}/status", put(admin::set_note_status))
        .route("/api/admin/report", get(admin::report))
        .route("/api/admin/sessions", get(admin::sessions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route("/api/health", get(health::health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
