use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use consult_types::AdminReport;
use consult_types::items::{CaptureItemRequest, NoteRequest, StatusUpdate};
use consult_types::session::{SessionListing, SessionSummary};
use serde_json::{Value, json};

fn catalog_error(action: &'static str) -> impl Fn(consult_core::ConsultError) -> ApiError {
    move |e| ApiError::from_core(e, action)
}

pub async fn list_items(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "items": state.catalog.list_items().await }))
}

pub async fn create_item(
    State(state): State<AppState>,
    Json(request): Json<CaptureItemRequest>,
) -> ApiResult<Json<Value>> {
    let item = state
        .catalog
        .add_item(request)
        .await
        .map_err(catalog_error("Failed to capture item"))?;
    Ok(Json(json!({ "success": true, "item": item })))
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CaptureItemRequest>,
) -> ApiResult<Json<Value>> {
    let item = state
        .catalog
        .update_item(&id, request)
        .await
        .map_err(catalog_error("Failed to update item"))?;
    Ok(Json(json!({ "success": true, "item": item })))
}

pub async fn set_item_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<Value>> {
    let item = state
        .catalog
        .set_item_status(&id, update)
        .await
        .map_err(catalog_error("Failed to update item status"))?;
    Ok(Json(json!({ "success": true, "item": item })))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .catalog
        .delete_item(&id)
        .await
        .map_err(catalog_error("Failed to delete item"))?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_notes(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "notes": state.catalog.list_notes().await }))
}

pub async fn create_note(
    State(state): State<AppState>,
    Json(request): Json<NoteRequest>,
) -> ApiResult<Json<Value>> {
    let note = state
        .catalog
        .add_note(request)
        .await
        .map_err(catalog_error("Failed to add note"))?;
    Ok(Json(json!({ "success": true, "note": note })))
}

pub async fn update_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<NoteRequest>,
) -> ApiResult<Json<Value>> {
    let note = state
        .catalog
        .update_note(&id, request)
        .await
        .map_err(catalog_error("Failed to update note"))?;
    Ok(Json(json!({ "success": true, "note": note })))
}

pub async fn set_note_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<Value>> {
    let note = state
        .catalog
        .set_note_status(&id, update)
        .await
        .map_err(catalog_error("Failed to update note status"))?;
    Ok(Json(json!({ "success": true, "note": note })))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .catalog
        .delete_note(&id)
        .await
        .map_err(catalog_error("Failed to delete note"))?;
    Ok(Json(json!({ "success": true })))
}

pub async fn report(State(state): State<AppState>) -> Json<AdminReport> {
    Json(state.catalog.report().await)
}

/// `GET /api/admin/sessions`, oldest first.
pub async fn sessions(State(state): State<AppState>) -> Json<SessionListing> {
    let now = Utc::now();
    let sessions: Vec<SessionSummary> = state
        .lifecycle
        .store()
        .snapshot()
        .await
        .into_iter()
        .map(|record| SessionSummary {
            session_id: record.session_id().to_string(),
            created_at: record.created(),
            age_minutes: format!("{:.1}", record.age_minutes(now)),
            client_ip: record.client_address().to_string(),
            state: record.state().as_str().to_string(),
        })
        .collect();
    let total = state.lifecycle.usage().total_minutes().await;

    Json(SessionListing {
        total_active: sessions.len(),
        total_minutes_used: format!("{total:.1}"),
        sessions,
    })
}
