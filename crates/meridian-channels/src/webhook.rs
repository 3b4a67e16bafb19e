//! Generic webhook adapter: universal catch-all for anything that can
//! send and receive HTTP. Optional HMAC-SHA256 signature validation and a
//! callback URL for async replies.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::channel::Channel;
use crate::types::{Direction, GatewayMessage, InboundRequest, SendOutcome};
use meridian_core::types::MessageId;

const SEND_TIMEOUT_SECS: u64 = 10;

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookChannel {
    secret: String,
    callback_url: String,
    text_field: String,
    sender_field: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: &serde_json::Value) -> Self {
        let get = |key: &str, env: &str| -> String {
            config
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .or_else(|| std::env::var(env).ok())
                .unwrap_or_default()
        };
        Self {
            secret: get("secret", "GATEWAY_WEBHOOK_SECRET"),
            callback_url: get("callback_url", "GATEWAY_WEBHOOK_CALLBACK_URL"),
            text_field: config
                .get("text_field")
                .and_then(|v| v.as_str())
                .unwrap_or("text")
                .to_string(),
            sender_field: config
                .get("sender_field")
                .and_then(|v| v.as_str())
                .unwrap_or("sender")
                .to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn configured(&self) -> bool {
        true
    }

    fn validate(&self, request: &InboundRequest) -> bool {
        if self.secret.is_empty() {
            return true;
        }
        let Some(signature) = request.header("x-webhook-signature") else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return false;
        };
        mac.update(request.raw_body.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        constant_time_eq(&expected, signature)
    }

    fn parse_inbound(&self, request: &InboundRequest) -> Option<GatewayMessage> {
        let data = &request.body;
        let text = extract(data, &self.text_field)?;
        let sender = extract(data, &self.sender_field).unwrap_or_else(|| "webhook".to_string());

        Some(GatewayMessage {
            id: MessageId::new(),
            channel: "webhook".to_string(),
            direction: Direction::Inbound,
            sender_id: sender,
            sender_display_name: None,
            text,
            timestamp: Utc::now(),
            channel_metadata: serde_json::json!({
                "source": request.header("user-agent").unwrap_or("unknown"),
            }),
            raw_payload: data.clone(),
        })
    }

    async fn send(
        &self,
        recipient_id: &str,
        text: &str,
        metadata: Option<&serde_json::Value>,
    ) -> SendOutcome {
        if self.callback_url.is_empty() {
            return SendOutcome::failed("No callback URL configured");
        }
        let mut payload = serde_json::json!({
            "text": text,
            "recipient": recipient_id,
        });
        if let Some(meta) = metadata {
            payload["metadata"] = meta.clone();
        }
        match self.client.post(&self.callback_url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => SendOutcome::ok(),
            Ok(resp) => SendOutcome::failed(format!("HTTP {}", resp.status())),
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }

    fn format_webhook_response(
        &self,
        response_text: &str,
        _inbound: &GatewayMessage,
    ) -> serde_json::Value {
        serde_json::json!({ "response": response_text })
    }
}

/// Dot-path extraction (`message.text`) with numbers stringified.
fn extract(data: &serde_json::Value, field_path: &str) -> Option<String> {
    let mut current = data;
    for part in field_path.split('.') {
        current = current.get(part)?;
    }
    match current {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_request(secret: &str, body: serde_json::Value) -> InboundRequest {
        let raw = body.to_string();
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(raw.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        InboundRequest::from_json(body).with_header("X-Webhook-Signature", &sig)
    }

    #[test]
    fn hmac_signature_validation() {
        let ch = WebhookChannel::new(&serde_json::json!({"secret": "topsecret"}));
        let body = serde_json::json!({"text": "ping", "sender": "ci"});

        let good = signed_request("topsecret", body.clone());
        assert!(ch.validate(&good));

        let bad = signed_request("wrongsecret", body.clone());
        assert!(!ch.validate(&bad));

        let unsigned = InboundRequest::from_json(body);
        assert!(!ch.validate(&unsigned));
    }

    #[test]
    fn no_secret_accepts_everything() {
        let ch = WebhookChannel::new(&serde_json::json!({}));
        assert!(ch.validate(&InboundRequest::from_json(serde_json::json!({}))));
    }

    #[test]
    fn dot_path_field_extraction() {
        let ch = WebhookChannel::new(&serde_json::json!({
            "text_field": "message.text",
            "sender_field": "message.from",
        }));
        let msg = ch
            .parse_inbound(&InboundRequest::from_json(serde_json::json!({
                "message": {"text": "nested hello", "from": 123}
            })))
            .unwrap();
        assert_eq!(msg.text, "nested hello");
        assert_eq!(msg.sender_id, "123");
    }

    #[test]
    fn missing_text_is_skipped() {
        let ch = WebhookChannel::new(&serde_json::json!({}));
        assert!(ch
            .parse_inbound(&InboundRequest::from_json(serde_json::json!({"sender": "x"})))
            .is_none());
    }

    #[test]
    fn sync_response_shape() {
        let ch = WebhookChannel::new(&serde_json::json!({}));
        let msg = GatewayMessage::inbound("webhook", "s", "q");
        assert_eq!(ch.format_webhook_response("pong", &msg)["response"], "pong");
    }
}
