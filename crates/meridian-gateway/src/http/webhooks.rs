//! POST /gateway/{channel}: channel webhook intake.
//!
//! The HTTP layer builds a framework-neutral [`InboundRequest`] and hands
//! it to the gateway manager. Validation failures surface as 4xx; skipped
//! payloads and successful dispatches both return the channel's own
//! synchronous reply shape (platforms must never see retry-storm errors
//! for internal failures).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use meridian_channels::InboundRequest;

use crate::app::AppState;

pub async fn gateway_handler(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let mut request = InboundRequest {
        headers: headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect(),
        query,
        body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
        raw_body: body,
    };
    if request.body.is_null() {
        request.body = json!({});
    }

    let outcome = state
        .runtime
        .gateway
        .process_inbound(&channel, &request)
        .await;

    if let Some(error) = outcome.error {
        let status = match error.as_str() {
            "Invalid signature" => StatusCode::UNAUTHORIZED,
            "Channel not configured" => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        return (status, Json(json!({ "error": error }))).into_response();
    }

    // Async channels return an empty 200; sync channels return their own
    // payload.
    if outcome.webhook_response.is_null() {
        (StatusCode::OK, String::new()).into_response()
    } else {
        (StatusCode::OK, Json(outcome.webhook_response)).into_response()
    }
}
