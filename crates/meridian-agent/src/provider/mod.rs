//! Provider abstraction.
//!
//! Every adapter normalizes one remote chat API to the same shapes:
//! [`LlmResponse`] for blocking calls, a channel of [`StreamEvent`]s for
//! streaming. Provider-specific wire formats exist only inside the
//! adapters; above them, only normalized types flow.

pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;
mod sse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use factory::{create_provider, provider_from_config};

/// Seconds before an in-flight provider request is abandoned.
pub const PROVIDER_TIMEOUT_SECS: u64 = 120;

/// Provider families distinguished by system-prompt placement, tool wire
/// format, and streaming idiom. The agent core formats its intermediate
/// tool messages per family; adapters never see agent bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

/// A tool call requested by the model. Arguments are structured values,
/// never JSON strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Normalized non-streaming response.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    pub usage: Usage,
}

/// Events produced while streaming a response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Text { text: String },
    ToolCalls { tool_calls: Vec<ToolCallRequest> },
    Done { usage: Option<Usage> },
}

/// Tool definition in the registry's canonical schema shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Common interface for all LLM providers.
///
/// `messages` are normalized wire values: `{role, content}` where content is
/// plain text or a content-block array, plus the agent core's
/// family-shaped tool messages.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name, e.g. `"OpenAI (gpt-4o)"`.
    fn name(&self) -> String;

    /// Configured model id.
    fn model(&self) -> &str;

    fn family(&self) -> ProviderFamily;

    /// Blocking chat completion.
    async fn chat(
        &self,
        messages: &[serde_json::Value],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<LlmResponse, ProviderError>;

    /// Stream a completion into `tx`, ending with [`StreamEvent::Done`].
    ///
    /// Default: fall back to a blocking call and emit the result as single
    /// events.
    async fn stream(
        &self,
        messages: &[serde_json::Value],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.chat(messages, tools, temperature, max_tokens).await?;
        if !resp.tool_calls.is_empty() {
            let _ = tx
                .send(StreamEvent::ToolCalls {
                    tool_calls: resp.tool_calls,
                })
                .await;
        }
        if !resp.text.is_empty() {
            let _ = tx.send(StreamEvent::Text { text: resp.text }).await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                usage: Some(resp.usage),
            })
            .await;
        Ok(())
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

/// Shared reqwest client with the provider timeout applied.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

/// Parse accumulated tool-call argument text. Malformed JSON at the
/// stream boundary surfaces an empty arguments object rather than failing.
pub(crate) fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_arguments_become_empty_object() {
        assert_eq!(parse_arguments(""), serde_json::json!({}));
        assert_eq!(parse_arguments("{not json"), serde_json::json!({}));
        assert_eq!(
            parse_arguments(r#"{"path":"a.txt"}"#),
            serde_json::json!({"path": "a.txt"})
        );
    }
}
