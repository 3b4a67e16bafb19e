//! Anthropic adapter (messages wire format).
//!
//! System prompt is a separate top-level field, tools are `input_schema`
//! blocks, responses are content-block arrays, streaming is
//! `content_block_start` / `delta` / `stop` SSE events with
//! `input_json_delta` argument accumulation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sse::{sse_data, LineBuffer};
use super::{
    http_client, parse_arguments, LlmProvider, LlmResponse, ProviderError, ProviderFamily,
    StreamEvent, ToolCallRequest, ToolDefinition, Usage,
};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            client: http_client(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            model,
        }
    }

    fn build_body(
        &self,
        messages: &[serde_json::Value],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
        stream: bool,
    ) -> serde_json::Value {
        // The system prompt travels as a top-level field, not a message.
        let mut system = String::new();
        let mut formatted: Vec<serde_json::Value> = Vec::new();
        for msg in messages {
            if msg.get("role").and_then(|r| r.as_str()) == Some("system") {
                if let Some(text) = msg.get("content").and_then(|c| c.as_str()) {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(text);
                }
                continue;
            }
            formatted.push(format_message(msg));
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": formatted,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system);
        }
        if let Some(tools) = tools {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> String {
        format!("Anthropic ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        messages: &[serde_json::Value],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<LlmResponse, ProviderError> {
        debug!(model = %self.model, "sending request to Anthropic");
        let body = self.build_body(messages, tools, temperature, max_tokens, false);
        let resp = self.post(&body).await?;
        let api: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parse_response(api))
    }

    async fn stream(
        &self,
        messages: &[serde_json::Value],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        debug!(model = %self.model, "sending streaming request to Anthropic");
        let body = self.build_body(messages, tools, temperature, max_tokens, true);
        let resp = self.post(&body).await?;

        let mut lines = LineBuffer::new();
        let mut blocks: BTreeMap<u64, PendingBlock> = BTreeMap::new();
        let mut finished_calls: Vec<ToolCallRequest> = Vec::new();
        let mut usage = Usage::default();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ProviderError::Http)?;
            for line in lines.push(&chunk) {
                let Some(data) = sse_data(&line) else { continue };
                let Ok(event) = serde_json::from_str::<SseEvent>(data) else {
                    continue;
                };
                match event.kind.as_str() {
                    "message_start" => {
                        if let Some(u) = event.message.and_then(|m| m.usage) {
                            usage.prompt_tokens = u.input_tokens.unwrap_or(0);
                        }
                    }
                    "content_block_start" => {
                        if let Some(block) = event.content_block {
                            if block.kind == "tool_use" {
                                blocks.insert(
                                    event.index.unwrap_or(0),
                                    PendingBlock {
                                        id: block.id.unwrap_or_default(),
                                        name: block.name.unwrap_or_default(),
                                        json: String::new(),
                                    },
                                );
                            }
                        }
                    }
                    "content_block_delta" => {
                        if let Some(delta) = event.delta {
                            if let Some(text) = delta.text {
                                let _ = tx.send(StreamEvent::Text { text }).await;
                            }
                            if let Some(partial) = delta.partial_json {
                                if let Some(pending) =
                                    blocks.get_mut(&event.index.unwrap_or(0))
                                {
                                    pending.json.push_str(&partial);
                                }
                            }
                        }
                    }
                    "content_block_stop" => {
                        if let Some(pending) = blocks.remove(&event.index.unwrap_or(0)) {
                            finished_calls.push(ToolCallRequest {
                                id: pending.id,
                                name: pending.name,
                                arguments: parse_arguments(&pending.json),
                            });
                        }
                    }
                    "message_delta" => {
                        if let Some(u) = event.usage {
                            usage.completion_tokens = u.output_tokens.unwrap_or(0);
                        }
                    }
                    "message_stop" => {
                        if !finished_calls.is_empty() {
                            let _ = tx
                                .send(StreamEvent::ToolCalls {
                                    tool_calls: std::mem::take(&mut finished_calls),
                                })
                                .await;
                        }
                        let _ = tx.send(StreamEvent::Done { usage: Some(usage) }).await;
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }

        if !finished_calls.is_empty() {
            let _ = tx
                .send(StreamEvent::ToolCalls {
                    tool_calls: finished_calls,
                })
                .await;
        }
        let _ = tx.send(StreamEvent::Done { usage: Some(usage) }).await;
        Ok(())
    }
}

/// Convert a normalized message into the Anthropic wire shape. `tool_use`
/// and `tool_result` blocks already arrive in Anthropic form from the agent
/// core and pass through.
fn format_message(msg: &serde_json::Value) -> serde_json::Value {
    let Some(blocks) = msg.get("content").and_then(|c| c.as_array()) else {
        return msg.clone();
    };

    let parts: Vec<serde_json::Value> = blocks
        .iter()
        .map(|block| match block.get("type").and_then(|t| t.as_str()) {
            Some("image") => {
                let media = block.get("media_type").and_then(|v| v.as_str()).unwrap_or("image/png");
                let data = block.get("data").and_then(|v| v.as_str()).unwrap_or("");
                serde_json::json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media,
                        "data": data,
                    },
                })
            }
            _ => block.clone(),
        })
        .collect();

    let mut out = msg.clone();
    out["content"] = serde_json::Value::Array(parts);
    out
}

struct PendingBlock {
    id: String,
    name: String,
    json: String,
}

fn parse_response(api: ApiResponse) -> LlmResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in api.content {
        match block.kind.as_str() {
            "text" => {
                if let Some(t) = block.text {
                    text.push_str(&t);
                }
            }
            "tool_use" => tool_calls.push(ToolCallRequest {
                id: block.id.unwrap_or_default(),
                name: block.name.unwrap_or_default(),
                arguments: block.input.unwrap_or_else(|| serde_json::json!({})),
            }),
            _ => {}
        }
    }

    let usage = api
        .usage
        .map(|u| Usage {
            prompt_tokens: u.input_tokens.unwrap_or(0),
            completion_tokens: u.output_tokens.unwrap_or(0),
        })
        .unwrap_or_default();

    LlmResponse {
        text,
        tool_calls,
        finish_reason: api.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
        usage,
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ApiBlock>,
    stop_reason: Option<String>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct SseEvent {
    #[serde(rename = "type")]
    kind: String,
    index: Option<u64>,
    content_block: Option<ApiBlock>,
    delta: Option<SseDelta>,
    message: Option<SseMessage>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct SseDelta {
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct SseMessage {
    usage: Option<ApiUsage>,
}
