use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use consult_core::relay::{self, ChatBackend};
use consult_types::{ChatStreamRequest, ReplyChunk};
use std::convert::Infallible;

const NDJSON: &str = "application/x-ndjson";

/// `POST /api/chat-stream`: one `{content}` line per word.
pub async fn stream(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> ApiResult<Response> {
    let deltas = state
        .relay
        .stream_reply(request.messages, request.session_id)
        .await
        .map_err(|e| ApiError::from_core(e, "Failed to generate response"))?;

    let lines = futures::stream::unfold(relay::words(deltas), |mut words| async move {
        let line = ReplyChunk::new(&words.recv().await?).to_line();
        Some((Ok::<_, Infallible>(line), words))
    });

    Ok(([(CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response())
}
