//! Bearer-token authentication for the HTTP surface.

use axum::http::HeaderMap;
use tracing::warn;

/// Resolve the effective token at startup. A non-loopback bind with no
/// configured token gets a generated one, logged once so the operator can
/// find it. Loopback with no token stays open.
pub fn resolve_token(configured: &str, bind: &str) -> Option<String> {
    if !configured.is_empty() {
        return Some(configured.to_string());
    }
    let loopback = matches!(bind, "127.0.0.1" | "::1" | "localhost");
    if loopback {
        return None;
    }
    let generated = uuid::Uuid::new_v4().simple().to_string();
    warn!(
        token = %generated,
        "binding to a non-loopback address with no gateway token; generated one"
    );
    Some(generated)
}

/// Check the `Authorization: Bearer <token>` header. No configured token
/// means the check passes (loopback-only deployments).
pub fn check_bearer(token: &Option<String>, headers: &HeaderMap) -> bool {
    let Some(expected) = token else {
        return true;
    };
    let Some(provided) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    constant_time_eq(provided, expected)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
