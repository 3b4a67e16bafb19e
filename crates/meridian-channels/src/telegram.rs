//! Telegram adapter: raw HTTP against the Bot API, no bot framework.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tracing::debug;

use crate::channel::Channel;
use crate::types::{Direction, GatewayMessage, InboundRequest, SendOutcome};
use meridian_core::types::MessageId;

const SEND_TIMEOUT_SECS: u64 = 10;

/// Telegram caps messages at 4096 chars; stay under it.
const MAX_TEXT_LEN: usize = 4000;

pub struct TelegramChannel {
    token: String,
    webhook_secret: String,
    allowed_senders: Vec<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(config: &serde_json::Value) -> Self {
        let get = |key: &str, env: &str| -> String {
            config
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .or_else(|| std::env::var(env).ok())
                .unwrap_or_default()
        };

        let allowed_senders = get("allowed_senders", "GATEWAY_TELEGRAM_ALLOWED_SENDERS")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            token: get("bot_token", "GATEWAY_TELEGRAM_BOT_TOKEN"),
            webhook_secret: get("webhook_secret", "GATEWAY_TELEGRAM_WEBHOOK_SECRET"),
            allowed_senders,
            api_base: config
                .get("api_base")
                .and_then(|v| v.as_str())
                .unwrap_or("https://api.telegram.org")
                .to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn configured(&self) -> bool {
        !self.token.is_empty()
    }

    fn validate(&self, request: &InboundRequest) -> bool {
        if self.webhook_secret.is_empty() {
            return true;
        }
        request.header("x-telegram-bot-api-secret-token") == Some(self.webhook_secret.as_str())
    }

    fn parse_inbound(&self, request: &InboundRequest) -> Option<GatewayMessage> {
        let data = &request.body;
        let message = data.get("message").or_else(|| data.get("edited_message"))?;

        let text = message.get("text")?.as_str()?.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let sender = message.get("from").cloned().unwrap_or_default();
        let sender_id = json_id(&sender, "id")?;
        let chat_id = message
            .get("chat")
            .and_then(|c| json_id(c, "id"))
            .unwrap_or_default();

        if !self.allowed_senders.is_empty() && !self.allowed_senders.contains(&sender_id) {
            debug!(sender = %sender_id, "telegram sender not in allow list");
            return None;
        }

        let mut display_name = sender
            .get("first_name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if let Some(last) = sender.get("last_name").and_then(|v| v.as_str()) {
            display_name.push(' ');
            display_name.push_str(last);
        }

        let timestamp = message
            .get("date")
            .and_then(|v| v.as_i64())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        Some(GatewayMessage {
            id: MessageId::new(),
            channel: "telegram".to_string(),
            direction: Direction::Inbound,
            sender_id,
            sender_display_name: (!display_name.trim().is_empty())
                .then(|| display_name.trim().to_string()),
            text,
            timestamp,
            channel_metadata: serde_json::json!({
                "chat_id": chat_id,
                "message_id": message.get("message_id").cloned().unwrap_or_default(),
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
        let text = if text.len() > MAX_TEXT_LEN {
            let mut cut = MAX_TEXT_LEN - 3;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &text[..cut])
        } else {
            text.to_string()
        };

        let chat_id = metadata
            .and_then(|m| m.get("chat_id"))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| recipient_id.to_string());

        // Markdown first; Telegram rejects unbalanced markup, so fall back
        // to plain text on a parse complaint.
        let markdown = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        match self.client.post(self.api_url("sendMessage")).json(&markdown).send().await {
            Ok(resp) if resp.status().is_success() => SendOutcome::ok(),
            Ok(resp) => {
                let body = resp.text().await.unwrap_or_default();
                if body.to_lowercase().contains("can't parse") {
                    let plain = serde_json::json!({ "chat_id": chat_id, "text": text });
                    match self.client.post(self.api_url("sendMessage")).json(&plain).send().await {
                        Ok(r) if r.status().is_success() => SendOutcome::ok(),
                        Ok(r) => SendOutcome::failed(format!("HTTP {}", r.status())),
                        Err(e) => SendOutcome::failed(e.to_string()),
                    }
                } else {
                    SendOutcome::failed(body)
                }
            }
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }

    fn format_webhook_response(
        &self,
        _response_text: &str,
        _inbound: &GatewayMessage,
    ) -> serde_json::Value {
        // Replies go out through the async send path.
        serde_json::Value::Null
    }

    fn wants_async_reply(&self) -> bool {
        true
    }
}

/// Telegram ids arrive as numbers; stringify either form.
fn json_id(value: &serde_json::Value, key: &str) -> Option<String> {
    match value.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
