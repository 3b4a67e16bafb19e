//! WebChat adapter: an embeddable HTTP chat endpoint. Replies ride back
//! in the webhook response; there is no separate outbound path.

use async_trait::async_trait;
use chrono::Utc;

use crate::channel::Channel;
use crate::types::{Direction, GatewayMessage, InboundRequest, SendOutcome};
use meridian_core::types::MessageId;

pub struct WebChatChannel {
    api_key: String,
    allowed_origins: Vec<String>,
}

impl WebChatChannel {
    pub fn new(config: &serde_json::Value) -> Self {
        let get = |key: &str, env: &str| -> String {
            config
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .or_else(|| std::env::var(env).ok())
                .unwrap_or_default()
        };
        let allowed_origins = get("allowed_origins", "GATEWAY_WEBCHAT_ALLOWED_ORIGINS")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            api_key: get("api_key", "GATEWAY_WEBCHAT_API_KEY"),
            allowed_origins,
        }
    }
}

#[async_trait]
impl Channel for WebChatChannel {
    fn name(&self) -> &str {
        "webchat"
    }

    fn configured(&self) -> bool {
        // No credentials required; the widget works out of the box.
        true
    }

    fn validate(&self, request: &InboundRequest) -> bool {
        if !self.api_key.is_empty() {
            let auth = request
                .header("authorization")
                .unwrap_or("")
                .trim_start_matches("Bearer ");
            if auth != self.api_key {
                return false;
            }
        }
        if !self.allowed_origins.is_empty() {
            if let Some(origin) = request.header("origin") {
                if !origin.is_empty() && !self.allowed_origins.iter().any(|o| o == origin) {
                    return false;
                }
            }
        }
        true
    }

    fn parse_inbound(&self, request: &InboundRequest) -> Option<GatewayMessage> {
        let data = &request.body;
        let text = data
            .get("message")
            .or_else(|| data.get("text"))
            .and_then(|v| v.as_str())?
            .trim()
            .to_string();
        if text.is_empty() {
            return None;
        }

        let session_id = data
            .get("session_id")
            .or_else(|| data.get("user_id"))
            .and_then(|v| v.as_str())
            .unwrap_or("anonymous")
            .to_string();

        Some(GatewayMessage {
            id: MessageId::new(),
            channel: "webchat".to_string(),
            direction: Direction::Inbound,
            sender_id: session_id.clone(),
            sender_display_name: data.get("name").and_then(|v| v.as_str()).map(String::from),
            text,
            timestamp: Utc::now(),
            channel_metadata: serde_json::json!({
                "session_id": session_id,
                "page_url": data.get("page_url").and_then(|v| v.as_str()).unwrap_or(""),
                "user_agent": request.header("user-agent").unwrap_or(""),
            }),
            raw_payload: data.clone(),
        })
    }

    async fn send(
        &self,
        _recipient_id: &str,
        _text: &str,
        _metadata: Option<&serde_json::Value>,
    ) -> SendOutcome {
        // Synchronous channel: the reply is the webhook response.
        SendOutcome::ok()
    }

    fn format_webhook_response(
        &self,
        response_text: &str,
        inbound: &GatewayMessage,
    ) -> serde_json::Value {
        serde_json::json!({
            "response": response_text,
            "session_id": inbound.sender_id,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_or_text_field() {
        let ch = WebChatChannel::new(&serde_json::json!({}));
        let a = ch
            .parse_inbound(&InboundRequest::from_json(
                serde_json::json!({"message": "hi", "session_id": "s1"}),
            ))
            .unwrap();
        assert_eq!(a.text, "hi");
        assert_eq!(a.sender_id, "s1");

        let b = ch
            .parse_inbound(&InboundRequest::from_json(
                serde_json::json!({"text": "yo", "user_id": "u7"}),
            ))
            .unwrap();
        assert_eq!(b.sender_id, "u7");
    }

    #[test]
    fn anonymous_fallback_sender() {
        let ch = WebChatChannel::new(&serde_json::json!({}));
        let msg = ch
            .parse_inbound(&InboundRequest::from_json(serde_json::json!({"message": "hi"})))
            .unwrap();
        assert_eq!(msg.sender_id, "anonymous");
    }

    #[test]
    fn api_key_validation() {
        let ch = WebChatChannel::new(&serde_json::json!({"api_key": "k1"}));
        let good = InboundRequest::from_json(serde_json::json!({}))
            .with_header("Authorization", "Bearer k1");
        let bad = InboundRequest::from_json(serde_json::json!({}))
            .with_header("Authorization", "Bearer nope");
        assert!(ch.validate(&good));
        assert!(!ch.validate(&bad));
    }

    #[test]
    fn sync_reply_carries_session() {
        let ch = WebChatChannel::new(&serde_json::json!({}));
        let msg = GatewayMessage::inbound("webchat", "s1", "hi");
        let reply = ch.format_webhook_response("hello!", &msg);
        assert_eq!(reply["response"], "hello!");
        assert_eq!(reply["session_id"], "s1");
        assert!(!ch.wants_async_reply());
    }

    #[test]
    fn empty_message_is_skipped() {
        let ch = WebChatChannel::new(&serde_json::json!({}));
        assert!(ch
            .parse_inbound(&InboundRequest::from_json(serde_json::json!({"message": "  "})))
            .is_none());
    }
}
