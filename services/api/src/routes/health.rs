use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use consult_types::health::HealthResponse;

pub const SERVICE_NAME: &str = "Dave Moving Consultant";

/// `GET /api/health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let total = state.lifecycle.usage().total_minutes().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        active_sessions: state.lifecycle.store().len().await,
        total_minutes_used: format!("{total:.1}"),
        timestamp: chrono::Utc::now(),
    })
}
