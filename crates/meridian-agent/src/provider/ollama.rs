//! Ollama adapter (local models).
//!
//! No API key. System prompt travels inline, tools as function wrappers,
//! streaming as line-delimited JSON objects. Images ride as a base64 array
//! on the message (llava-style models).

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sse::LineBuffer;
use super::{
    http_client, LlmProvider, LlmResponse, ProviderError, ProviderFamily, StreamEvent,
    ToolCallRequest, ToolDefinition, Usage,
};

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(model: String, base_url: Option<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
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
        let formatted: Vec<serde_json::Value> = messages.iter().map(flatten_message).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": formatted,
            "stream": stream,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
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

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ProviderError::Unavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running? Start it with: ollama serve",
                        self.base_url
                    ))
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> String {
        format!("Ollama ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Ollama
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
        debug!(model = %self.model, "sending request to Ollama");
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
        debug!(model = %self.model, "sending streaming request to Ollama");
        let body = self.build_body(messages, tools, temperature, max_tokens, true);
        let resp = self.post(&body).await?;

        let mut lines = LineBuffer::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        let mut usage: Option<Usage> = None;
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ProviderError::Http)?;
            for line in lines.push(&chunk) {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<ApiResponse>(&line) else {
                    continue;
                };
                absorb_chunk(parsed, &tx, &mut tool_calls, &mut usage).await;
            }
        }

        if !tool_calls.is_empty() {
            let _ = tx.send(StreamEvent::ToolCalls { tool_calls }).await;
        }
        let _ = tx.send(StreamEvent::Done { usage }).await;
        Ok(())
    }
}

async fn absorb_chunk(
    parsed: ApiResponse,
    tx: &mpsc::Sender<StreamEvent>,
    tool_calls: &mut Vec<ToolCallRequest>,
    usage: &mut Option<Usage>,
) {
    if let Some(message) = parsed.message {
        if let Some(content) = message.content {
            if !content.is_empty() {
                let _ = tx.send(StreamEvent::Text { text: content }).await;
            }
        }
        for tc in message.tool_calls.unwrap_or_default() {
            tool_calls.push(ToolCallRequest {
                id: format!("call_{}", tool_calls.len()),
                name: tc.function.name,
                arguments: tc.function.arguments.unwrap_or_else(|| serde_json::json!({})),
            });
        }
    }
    if parsed.done.unwrap_or(false) {
        *usage = Some(Usage {
            prompt_tokens: parsed.prompt_eval_count.unwrap_or(0),
            completion_tokens: parsed.eval_count.unwrap_or(0),
        });
    }
}

/// Flatten normalized block content into Ollama's `{content, images}` shape.
fn flatten_message(msg: &serde_json::Value) -> serde_json::Value {
    let Some(blocks) = msg.get("content").and_then(|c| c.as_array()) else {
        return msg.clone();
    };

    let mut texts: Vec<&str> = Vec::new();
    let mut images: Vec<&str> = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    texts.push(t);
                }
            }
            Some("image") => {
                if let Some(d) = block.get("data").and_then(|v| v.as_str()) {
                    images.push(d);
                }
            }
            _ => {}
        }
    }

    let mut out = serde_json::json!({
        "role": msg.get("role").cloned().unwrap_or_else(|| "user".into()),
        "content": texts.join(" "),
    });
    if !images.is_empty() {
        out["images"] = serde_json::json!(images);
    }
    out
}

fn parse_response(api: ApiResponse) -> LlmResponse {
    let usage = Usage {
        prompt_tokens: api.prompt_eval_count.unwrap_or(0),
        completion_tokens: api.eval_count.unwrap_or(0),
    };

    let Some(message) = api.message else {
        return LlmResponse {
            finish_reason: "stop".to_string(),
            usage,
            ..Default::default()
        };
    };

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, tc)| ToolCallRequest {
            id: format!("call_{i}"),
            name: tc.function.name,
            arguments: tc.function.arguments.unwrap_or_else(|| serde_json::json!({})),
        })
        .collect();

    LlmResponse {
        text: message.content.unwrap_or_default(),
        tool_calls,
        finish_reason: "stop".to_string(),
        usage,
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    message: Option<ApiMessage>,
    done: Option<bool>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_calls_with_synthesized_ids() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "message": {
                    "content": "",
                    "tool_calls": [
                        {"function": {"name": "get_time", "arguments": {"tz": "utc"}}},
                        {"function": {"name": "read_file", "arguments": {"path": "a.txt"}}}
                    ]
                },
                "done": true,
                "prompt_eval_count": 9,
                "eval_count": 4
            }"#,
        )
        .unwrap();

        let resp = parse_response(api);
        assert_eq!(resp.tool_calls.len(), 2);
        assert_eq!(resp.tool_calls[0].id, "call_0");
        assert_eq!(resp.tool_calls[1].id, "call_1");
        assert_eq!(resp.usage.completion_tokens, 4);
    }

    #[test]
    fn block_content_flattens_with_images() {
        let msg = serde_json::json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "describe"},
                {"type": "image", "media_type": "image/png", "data": "QUJD"}
            ]
        });
        let out = flatten_message(&msg);
        assert_eq!(out["content"], "describe");
        assert_eq!(out["images"][0], "QUJD");
    }

    #[test]
    fn string_content_untouched() {
        let msg = serde_json::json!({"role": "user", "content": "plain"});
        assert_eq!(flatten_message(&msg), msg);
    }
}
