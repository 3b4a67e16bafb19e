//! GET /agents: configured agents, live instance count, routing summary.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::check_bearer;

pub async fn agents_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if !check_bearer(&state.auth_token, &headers) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Authentication required." })),
        ));
    }

    let strategy = format!("{:?}", state.runtime.router.strategy()).to_lowercase();
    Ok(Json(json!({
        "agents": state.runtime.pool.list_agents(),
        "active_instances": state.runtime.pool.active_count().await,
        "routing": {
            "strategy": strategy,
            "default": state.runtime.router.default_name(),
        },
    })))
}
