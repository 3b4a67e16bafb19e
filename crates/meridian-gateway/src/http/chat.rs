//! POST /chat: direct chat with a named agent, bearer-authenticated.
//!
//! Request:  `{"message": "...", "agent": "coder"?, "sender_id": "u1"?}`
//! Response: `{"response": "...", "agent": "coder"}`

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::app::AppState;
use crate::auth::check_bearer;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
}

#[derive(Serialize)]
pub struct ChatReply {
    pub response: String,
    pub agent: String,
}

#[derive(Serialize)]
pub struct ChatError {
    pub error: String,
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, Json<ChatError>)> {
    if !check_bearer(&state.auth_token, &headers) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ChatError {
                error: "Authentication required. Pass 'Authorization: Bearer <token>'.".into(),
            }),
        ));
    }

    if req.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ChatError {
                error: "message cannot be empty".into(),
            }),
        ));
    }

    let agent_name = req
        .agent
        .unwrap_or_else(|| state.runtime.router.default_name().to_string());
    let sender_id = req.sender_id.unwrap_or_default();

    let instance = state
        .runtime
        .pool
        .get(&agent_name, &sender_id)
        .await
        .map_err(|e| {
            error!(agent = %agent_name, error = %e, "pool error");
            (
                StatusCode::NOT_FOUND,
                Json(ChatError {
                    error: e.to_string(),
                }),
            )
        })?;

    let mut agent = instance.lock().await;
    match agent.chat(&req.message, &[]).await {
        Ok(response) => Ok(Json(ChatReply {
            response,
            agent: agent_name,
        })),
        Err(e) => {
            error!(agent = %agent_name, error = %e, "chat failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ChatError {
                    error: e.to_string(),
                }),
            ))
        }
    }
}
