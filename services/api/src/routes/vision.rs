use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use consult_types::vision::{
    CaptureForAdminRequest, CaptureForAdminResponse, PassiveVisionRequest, PassiveVisionResponse,
};

/// `POST /api/passive-vision`
pub async fn passive(
    State(state): State<AppState>,
    Json(request): Json<PassiveVisionRequest>,
) -> ApiResult<Json<PassiveVisionResponse>> {
    let analysis = state
        .vision
        .analyze_and_record(request.image_data.as_deref(), request.session_id.as_deref())
        .await
        .map_err(|e| ApiError::from_core(e, "Vision analysis failed"))?;
    Ok(Json(PassiveVisionResponse { analysis }))
}

/// `POST /api/capture-for-admin`
pub async fn capture_for_admin(
    State(state): State<AppState>,
    Json(request): Json<CaptureForAdminRequest>,
) -> ApiResult<Json<CaptureForAdminResponse>> {
    let (image, analysis) = state
        .vision
        .analyze_for_admin(request.image_data.as_deref())
        .await
        .map_err(|e| ApiError::from_core(e, "Failed to capture for admin"))?;

    let items = state
        .catalog
        .capture_from_analysis(&analysis, &image, request.note.as_deref())
        .await;
    tracing::info!(items = items.len(), "admin capture processed");

    Ok(Json(CaptureForAdminResponse {
        analysis,
        items,
        tell_dave: true,
    }))
}
