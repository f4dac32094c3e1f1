use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use stacky_logging::stacky_info;

use crate::completion::{build_messages, complete, HistoryMessage};
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    image_data: Option<String>,
    #[serde(default)]
    conversation_history: Option<Vec<HistoryMessage>>,
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub reply: String,
}

pub async fn reply(State(state): State<AppState>, body: Bytes) -> Result<Json<ReplyResponse>, ApiError> {
    let body: ReplyBody =
        serde_json::from_slice(&body).map_err(|_| ApiError::bad_request("Message is required"))?;
    let message = body
        .message
        .filter(|message| !message.is_empty())
        .ok_or_else(|| ApiError::bad_request("Message is required"))?;
    let history = body.conversation_history.unwrap_or_default();

    let messages = build_messages(&message, body.image_data.as_deref(), &history);
    let reply = complete(&state.http, &state.config, &messages).await?;
    stacky_info!(
        "Reply generated ({} history entries, image: {})",
        history.len(),
        body.image_data.is_some()
    );
    Ok(Json(ReplyResponse { reply }))
}
