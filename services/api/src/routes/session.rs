use crate::error::{ApiError, ApiResult};
use crate::rate_limit::client_key;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap};
use consult_core::{EndOutcome, TerminationReason};
use consult_types::{EndSessionRequest, EndSessionResponse, SessionTokenResponse};
use std::net::SocketAddr;

/// `POST /api/session-token`
pub async fn create_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
) -> ApiResult<Json<SessionTokenResponse>> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(&headers, peer);

    let response = state
        .lifecycle
        .create_session(&state.persona, &client)
        .await
        .map_err(|e| ApiError::from_core(e, "Failed to create session token"))?;
    Ok(Json(response))
}

/// `POST /api/end-session`
///
/// The body is read raw: page-unload beacons arrive as `text/plain`.
pub async fn end(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<EndSessionResponse>> {
    let request: EndSessionRequest = serde_json::from_slice(&body).unwrap_or_default();
    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("session_id required".to_string()))?;
    let reason = request
        .reason
        .map(TerminationReason::from)
        .unwrap_or(TerminationReason::ClientStop);

    tracing::info!(session_id = %session_id, reason = %reason, "client requested session end");
    let outcome = state.lifecycle.end_session(&session_id, reason).await;

    let message = match outcome {
        EndOutcome::Ended => "Session terminated",
        EndOutcome::AlreadyEnded => "Session already ended",
        EndOutcome::Unknown => "Session not tracked, stop requested",
    };
    Ok(Json(EndSessionResponse {
        success: true,
        message: message.to_string(),
    }))
}
