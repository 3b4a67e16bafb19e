use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{GatewayMessage, InboundRequest, SendOutcome};

/// Callback handed to background-loop channels: each received message is
/// dispatched through the same pipeline as webhook channels, and the
/// returned text is the reply to transmit over the connection.
pub type InboundCallback = Arc<
    dyn Fn(GatewayMessage) -> Pin<Box<dyn Future<Output = String> + Send>> + Send + Sync,
>;

/// Common interface implemented by every channel adapter.
///
/// Implementations must be `Send + Sync` so they can be stored in the
/// [`GatewayManager`](crate::manager::GatewayManager) and driven from
/// multiple tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier (e.g. `"telegram"`), unique across all
    /// registered adapters.
    fn name(&self) -> &str;

    /// Whether required credentials are present.
    fn configured(&self) -> bool;

    /// Signature / shared-secret check on the raw request.
    fn validate(&self, request: &InboundRequest) -> bool;

    /// Parse a raw request into a normalized message, or `None` when the
    /// payload should be ignored (verification challenges, echo-of-self,
    /// non-text message types, disallowed senders). Must never fail for
    /// malformed input.
    fn parse_inbound(&self, request: &InboundRequest) -> Option<GatewayMessage>;

    /// Deliver an outbound message. Long texts are truncated to the
    /// platform limit inside the adapter.
    async fn send(
        &self,
        recipient_id: &str,
        text: &str,
        metadata: Option<&serde_json::Value>,
    ) -> SendOutcome;

    /// Payload for a synchronous webhook reply. Channels that require an
    /// async send return an empty value.
    fn format_webhook_response(
        &self,
        response_text: &str,
        inbound: &GatewayMessage,
    ) -> serde_json::Value;

    /// Whether replies must additionally go out through [`Channel::send`]
    /// (the webhook response alone does not reach the user).
    fn wants_async_reply(&self) -> bool {
        false
    }

    /// Start a long-lived background connection delivering messages via
    /// `callback`. Returns `true` when a loop was spawned; webhook-only
    /// channels keep the default.
    fn start(&self, _callback: InboundCallback) -> bool {
        false
    }
}
