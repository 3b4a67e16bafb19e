//! OpenAI adapter (chat-completions wire format).
//!
//! System prompt travels inline as a `role:system` message, tools as
//! `{type:"function"}` wrappers with JSON-string arguments, streaming as SSE
//! chunk deltas with index-keyed tool-call accumulation.
//!
//! Also serves OpenAI-compatible endpoints via a custom base URL.

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

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            client: http_client(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
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
        let formatted: Vec<serde_json::Value> = messages.iter().map(format_message).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": formatted,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": stream,
        });

        if let Some(tools) = tools {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
        }

        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
            warn!(status, body = %text, "OpenAI API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> String {
        format!("OpenAI ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAi
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
        debug!(model = %self.model, "sending request to OpenAI");
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
        debug!(model = %self.model, "sending streaming request to OpenAI");
        let body = self.build_body(messages, tools, temperature, max_tokens, true);
        let resp = self.post(&body).await?;

        let mut lines = LineBuffer::new();
        let mut acc = ToolCallAccumulator::default();
        let mut usage: Option<Usage> = None;
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ProviderError::Http)?;
            for line in lines.push(&chunk) {
                let Some(data) = sse_data(&line) else { continue };
                if data.trim() == "[DONE]" {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) else {
                    continue;
                };
                if let Some(u) = parsed.usage {
                    usage = Some(Usage {
                        prompt_tokens: u.prompt_tokens,
                        completion_tokens: u.completion_tokens,
                    });
                }
                let Some(choice) = parsed.choices.into_iter().next() else {
                    continue;
                };
                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        let _ = tx.send(StreamEvent::Text { text }).await;
                    }
                }
                if let Some(deltas) = choice.delta.tool_calls {
                    acc.absorb(deltas);
                }
                // The tool-call boundary is signalled by the finish reason;
                // only then is the accumulated argument JSON complete.
                if choice.finish_reason.as_deref() == Some("tool_calls") {
                    let calls = acc.take();
                    if !calls.is_empty() {
                        let _ = tx.send(StreamEvent::ToolCalls { tool_calls: calls }).await;
                    }
                }
            }
        }

        // Flush stragglers if the stream ended without an explicit boundary.
        let calls = acc.take();
        if !calls.is_empty() {
            let _ = tx.send(StreamEvent::ToolCalls { tool_calls: calls }).await;
        }
        let _ = tx.send(StreamEvent::Done { usage }).await;
        Ok(())
    }
}

/// Convert a normalized message into the OpenAI wire shape. Tool messages
/// and assistant-with-tool-calls messages arrive already shaped by the
/// agent core and pass through unchanged.
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
                    "type": "image_url",
                    "image_url": { "url": format!("data:{media};base64,{data}") },
                })
            }
            _ => block.clone(),
        })
        .collect();

    let mut out = msg.clone();
    out["content"] = serde_json::Value::Array(parts);
    out
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Index-keyed accumulator for incremental tool-call deltas.
#[derive(Default)]
struct ToolCallAccumulator {
    pending: BTreeMap<u64, PendingCall>,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, deltas: Vec<DeltaToolCall>) {
        for delta in deltas {
            let entry = self.pending.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                entry.id = id;
            }
            if let Some(f) = delta.function {
                if let Some(name) = f.name {
                    entry.name = name;
                }
                if let Some(args) = f.arguments {
                    entry.arguments.push_str(&args);
                }
            }
        }
    }

    fn take(&mut self) -> Vec<ToolCallRequest> {
        std::mem::take(&mut self.pending)
            .into_values()
            .filter(|p| !p.name.is_empty())
            .map(|p| ToolCallRequest {
                id: p.id,
                name: p.name,
                arguments: parse_arguments(&p.arguments),
            })
            .collect()
    }
}

fn parse_response(api: ApiResponse) -> LlmResponse {
    let usage = api
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let Some(choice) = api.choices.into_iter().next() else {
        return LlmResponse {
            finish_reason: "stop".to_string(),
            usage,
            ..Default::default()
        };
    };

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallRequest {
            id: tc.id,
            name: tc.function.name,
            arguments: parse_arguments(&tc.function.arguments),
        })
        .collect();

    LlmResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        usage,
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: u64,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_with_tool_calls() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "function": {"name": "get_time", "arguments": "{\"tz\":\"utc\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 5}
            }"#,
        )
        .unwrap();

        let resp = parse_response(api);
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "get_time");
        assert_eq!(resp.tool_calls[0].arguments["tz"], "utc");
        assert_eq!(resp.finish_reason, "tool_calls");
        assert_eq!(resp.usage.prompt_tokens, 12);
    }

    #[test]
    fn malformed_argument_json_becomes_empty_object() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "choices": [{
                    "message": {
                        "content": "",
                        "tool_calls": [{
                            "id": "call_1",
                            "function": {"name": "f", "arguments": "{broken"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            }"#,
        )
        .unwrap();
        let resp = parse_response(api);
        assert_eq!(resp.tool_calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn accumulator_assembles_split_deltas() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(vec![DeltaToolCall {
            index: 0,
            id: Some("call_9".into()),
            function: Some(DeltaFunction {
                name: Some("read_file".into()),
                arguments: Some("{\"pa".into()),
            }),
        }]);
        acc.absorb(vec![DeltaToolCall {
            index: 0,
            id: None,
            function: Some(DeltaFunction {
                name: None,
                arguments: Some("th\":\"a.txt\"}".into()),
            }),
        }]);

        let calls = acc.take();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_9");
        assert_eq!(calls[0].arguments["path"], "a.txt");
    }

    #[test]
    fn image_blocks_become_data_urls() {
        let msg = serde_json::json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "what is this"},
                {"type": "image", "media_type": "image/png", "data": "QUJD"}
            ]
        });
        let out = format_message(&msg);
        assert_eq!(out["content"][1]["type"], "image_url");
        assert_eq!(
            out["content"][1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }

    #[test]
    fn plain_messages_pass_through() {
        let msg = serde_json::json!({"role": "assistant", "content": "hi"});
        assert_eq!(format_message(&msg), msg);
    }
}
