use std::collections::HashMap;

use chrono::{DateTime, Utc};
use meridian_core::types::MessageId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Normalized message format across all channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub id: MessageId,
    /// Logical channel tag (e.g. "telegram", "webchat").
    pub channel: String,
    pub direction: Direction,
    /// Platform-native sender identifier.
    pub sender_id: String,
    pub sender_display_name: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Channel-specific bag (chat_id, thread_ts, reply_token, …) that
    /// outbound replies must echo back.
    #[serde(default)]
    pub channel_metadata: serde_json::Value,
    #[serde(default)]
    pub raw_payload: serde_json::Value,
}

impl GatewayMessage {
    pub fn inbound(channel: impl Into<String>, sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            channel: channel.into(),
            direction: Direction::Inbound,
            sender_id: sender_id.into(),
            sender_display_name: None,
            text: text.into(),
            timestamp: Utc::now(),
            channel_metadata: serde_json::json!({}),
            raw_payload: serde_json::Value::Null,
        }
    }

    /// String value from the metadata bag (numbers are stringified).
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        match self.channel_metadata.get(key) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Framework-neutral view of an inbound HTTP request, built by the HTTP
/// layer. Header keys are lowercased.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub raw_body: String,
    pub body: serde_json::Value,
}

impl InboundRequest {
    pub fn from_json(body: serde_json::Value) -> Self {
        Self {
            raw_body: body.to_string(),
            body,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_lowercase()).map(|s| s.as_str())
    }
}

/// Outcome of a channel send.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_numbers_stringify() {
        let mut msg = GatewayMessage::inbound("telegram", "42", "hi");
        msg.channel_metadata = serde_json::json!({"chat_id": 987, "thread": "t-1"});
        assert_eq!(msg.metadata_str("chat_id").as_deref(), Some("987"));
        assert_eq!(msg.metadata_str("thread").as_deref(), Some("t-1"));
        assert_eq!(msg.metadata_str("missing"), None);
    }

    #[test]
    fn inbound_request_headers_are_case_insensitive() {
        let req = InboundRequest::from_json(serde_json::json!({}))
            .with_header("X-Webhook-Signature", "abc");
        assert_eq!(req.header("x-webhook-signature"), Some("abc"));
        assert_eq!(req.header("X-WEBHOOK-SIGNATURE"), Some("abc"));
    }

    #[test]
    fn message_ids_use_gateway_prefix() {
        let msg = GatewayMessage::inbound("webchat", "s1", "hello");
        assert!(msg.id.as_str().starts_with("gw-"));
    }
}
