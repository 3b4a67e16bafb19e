//! Gateway manager: channel registration, the inbound pipeline, and
//! proactive outbound.
//!
//! The manager never knows the agent pool concretely: it dispatches
//! through the narrow [`AgentDispatcher`] capability, which the
//! composition root implements over the router and pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

use crate::channel::{Channel, InboundCallback};
use crate::telegram::TelegramChannel;
use crate::types::{GatewayMessage, InboundRequest, SendOutcome};
use crate::webchat::WebChatChannel;
use crate::webhook::WebhookChannel;

/// Routes a parsed inbound message to an agent and returns the reply text.
/// Implementations catch agent failures and return a stable error string;
/// the pipeline always produces a reply.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(&self, message: &mut GatewayMessage) -> String;
}

/// Result of the inbound pipeline.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub success: bool,
    pub skipped: bool,
    pub error: Option<String>,
    pub response: Option<String>,
    /// Synchronous webhook reply payload (empty/null for async channels).
    pub webhook_response: serde_json::Value,
}

impl ProcessOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: false,
            error: Some(message.into()),
            response: None,
            webhook_response: serde_json::Value::Null,
        }
    }

    fn skipped() -> Self {
        Self {
            success: true,
            skipped: true,
            error: None,
            response: None,
            webhook_response: serde_json::Value::Null,
        }
    }
}

pub struct GatewayManager {
    channels: HashMap<String, Arc<dyn Channel>>,
    dispatcher: Arc<dyn AgentDispatcher>,
}

impl GatewayManager {
    pub fn new(dispatcher: Arc<dyn AgentDispatcher>) -> Self {
        Self {
            channels: HashMap::new(),
            dispatcher,
        }
    }

    /// Register a channel adapter, replacing any prior one under the same
    /// name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        info!(channel = %channel.name(), "registered channel adapter");
        self.channels.insert(channel.name().to_string(), channel);
    }

    /// Register the built-in adapters enabled by configuration or
    /// `GATEWAY_<CHANNEL>_ENABLED` environment toggles. Adapters whose
    /// credentials are missing are skipped.
    pub fn auto_configure(&mut self, gateway_channels: &HashMap<String, serde_json::Value>) {
        let empty = json!({});
        let entry = |name: &str| gateway_channels.get(name).cloned().unwrap_or(empty.clone());

        if channel_enabled(gateway_channels, "telegram") {
            let ch = TelegramChannel::new(&entry("telegram"));
            if ch.configured() {
                self.register(Arc::new(ch));
            } else {
                warn!("telegram enabled but not configured (missing bot_token)");
            }
        }
        if channel_enabled(gateway_channels, "webchat") {
            self.register(Arc::new(WebChatChannel::new(&entry("webchat"))));
        }
        if channel_enabled(gateway_channels, "webhook") {
            self.register(Arc::new(WebhookChannel::new(&entry("webhook"))));
        }

        let mut enabled: Vec<&String> = self.channels.keys().collect();
        enabled.sort();
        info!(channels = ?enabled, "gateway channels");
    }

    /// Start every background-loop channel, handing each a callback into
    /// the shared message pipeline.
    pub fn start_background_channels(&self) {
        let dispatcher = self.dispatcher.clone();
        for channel in self.channels.values() {
            let dispatcher = dispatcher.clone();
            let callback: InboundCallback = Arc::new(move |mut msg: GatewayMessage| {
                let dispatcher = dispatcher.clone();
                Box::pin(async move { dispatcher.dispatch(&mut msg).await })
            });
            if channel.start(callback) {
                info!(channel = %channel.name(), "background channel started");
            }
        }
    }

    pub fn channel(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Full inbound pipeline: configured → validate → parse → dispatch →
    /// webhook reply (+ async send when the channel needs it).
    pub async fn process_inbound(
        &self,
        channel_tag: &str,
        request: &InboundRequest,
    ) -> ProcessOutcome {
        let Some(channel) = self.channels.get(channel_tag) else {
            return ProcessOutcome::error("Channel not configured");
        };
        if !channel.configured() {
            return ProcessOutcome::error("Channel not configured");
        }

        if !channel.validate(request) {
            warn!(channel = %channel_tag, "webhook signature validation failed");
            return ProcessOutcome::error("Invalid signature");
        }

        let Some(mut message) = channel.parse_inbound(request) else {
            return ProcessOutcome::skipped();
        };

        let response_text = self.dispatcher.dispatch(&mut message).await;
        let webhook_response = channel.format_webhook_response(&response_text, &message);

        if channel.wants_async_reply() {
            let recipient = message
                .metadata_str("chat_id")
                .unwrap_or_else(|| message.sender_id.clone());
            let outcome = channel
                .send(&recipient, &response_text, Some(&message.channel_metadata))
                .await;
            if !outcome.success {
                error!(
                    channel = %channel_tag,
                    error = %outcome.error.unwrap_or_default(),
                    "async reply send failed"
                );
            }
        }

        info!(
            channel = %channel_tag,
            sender = %message.sender_id,
            "processed inbound message"
        );

        ProcessOutcome {
            success: true,
            skipped: false,
            error: None,
            response: Some(response_text),
            webhook_response,
        }
    }

    /// Agent-initiated outbound (scheduler results, outreach).
    pub async fn send_proactive(
        &self,
        channel_tag: &str,
        recipient_id: &str,
        text: &str,
        metadata: Option<&serde_json::Value>,
    ) -> SendOutcome {
        let Some(channel) = self.channels.get(channel_tag) else {
            return SendOutcome::failed(format!("Channel {channel_tag} not configured"));
        };
        if !channel.configured() {
            return SendOutcome::failed(format!("Channel {channel_tag} not configured"));
        }
        channel.send(recipient_id, text, metadata).await
    }

    pub fn status(&self) -> serde_json::Value {
        let mut channels = serde_json::Map::new();
        for (name, ch) in &self.channels {
            channels.insert(name.clone(), json!({ "enabled": ch.configured() }));
        }
        json!({ "channels": channels })
    }
}

fn channel_enabled(config: &HashMap<String, serde_json::Value>, name: &str) -> bool {
    let from_config = config
        .get(name)
        .and_then(|c| c.get("enabled"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let env_key = format!("GATEWAY_{}_ENABLED", name.to_uppercase());
    let from_env = std::env::var(env_key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    from_config || from_env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use meridian_core::types::MessageId;

    struct EchoDispatcher;

    #[async_trait]
    impl AgentDispatcher for EchoDispatcher {
        async fn dispatch(&self, message: &mut GatewayMessage) -> String {
            format!("echo: {}", message.text)
        }
    }

    /// A synchronous test channel with a toggleable signature check.
    struct FakeChannel {
        accept_signature: bool,
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &str {
            "fake"
        }
        fn configured(&self) -> bool {
            true
        }
        fn validate(&self, _request: &InboundRequest) -> bool {
            self.accept_signature
        }
        fn parse_inbound(&self, request: &InboundRequest) -> Option<GatewayMessage> {
            let text = request.body.get("text")?.as_str()?.to_string();
            Some(GatewayMessage {
                id: MessageId::new(),
                channel: "fake".to_string(),
                direction: Direction::Inbound,
                sender_id: "s1".to_string(),
                sender_display_name: None,
                text,
                timestamp: chrono::Utc::now(),
                channel_metadata: serde_json::json!({}),
                raw_payload: request.body.clone(),
            })
        }
        async fn send(
            &self,
            _recipient_id: &str,
            _text: &str,
            _metadata: Option<&serde_json::Value>,
        ) -> SendOutcome {
            SendOutcome::ok()
        }
        fn format_webhook_response(
            &self,
            response_text: &str,
            _inbound: &GatewayMessage,
        ) -> serde_json::Value {
            json!({ "response": response_text })
        }
    }

    fn manager(accept_signature: bool) -> GatewayManager {
        let mut m = GatewayManager::new(Arc::new(EchoDispatcher));
        m.register(Arc::new(FakeChannel { accept_signature }));
        m
    }

    #[tokio::test]
    async fn pipeline_produces_webhook_reply() {
        let m = manager(true);
        let out = m
            .process_inbound(
                "fake",
                &InboundRequest::from_json(json!({"text": "hello"})),
            )
            .await;
        assert!(out.success);
        assert!(!out.skipped);
        assert_eq!(out.webhook_response["response"], "echo: hello");
    }

    #[tokio::test]
    async fn unknown_channel_is_an_error() {
        let m = manager(true);
        let out = m
            .process_inbound("nope", &InboundRequest::from_json(json!({})))
            .await;
        assert_eq!(out.error.as_deref(), Some("Channel not configured"));
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected() {
        let m = manager(false);
        let out = m
            .process_inbound(
                "fake",
                &InboundRequest::from_json(json!({"text": "hello"})),
            )
            .await;
        assert_eq!(out.error.as_deref(), Some("Invalid signature"));
    }

    #[tokio::test]
    async fn unparsable_payload_is_skipped() {
        let m = manager(true);
        let out = m
            .process_inbound("fake", &InboundRequest::from_json(json!({"no_text": 1})))
            .await;
        assert!(out.skipped);
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn proactive_send_requires_known_channel() {
        let m = manager(true);
        assert!(m.send_proactive("fake", "r", "hi", None).await.success);
        assert!(!m.send_proactive("ghost", "r", "hi", None).await.success);
    }

    #[tokio::test]
    async fn status_reports_channels() {
        let m = manager(true);
        let status = m.status();
        assert_eq!(status["channels"]["fake"]["enabled"], true);
    }
}
