//! Gemini adapter (generateContent wire format).
//!
//! System prompt goes in a separate `system_instruction` field, tools are a
//! `functionDeclarations` list, streaming arrives as SSE-framed chunked
//! candidates with parts. Function-call ids are synthesized; the API does
//! not assign them.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sse::{sse_data, LineBuffer};
use super::{
    http_client, LlmProvider, LlmResponse, ProviderError, ProviderFamily, StreamEvent,
    ToolCallRequest, ToolDefinition, Usage,
};

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            client: http_client(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            model,
        }
    }

    fn build_body(
        &self,
        messages: &[serde_json::Value],
        tools: Option<&[ToolDefinition]>,
        temperature: f32,
        max_tokens: u32,
    ) -> serde_json::Value {
        let mut system = String::new();
        let mut contents: Vec<serde_json::Value> = Vec::new();

        for msg in messages {
            let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
            match role {
                "system" => {
                    if let Some(text) = msg.get("content").and_then(|c| c.as_str()) {
                        if !system.is_empty() {
                            system.push('\n');
                        }
                        system.push_str(text);
                    }
                }
                "user" | "assistant" => {
                    let gemini_role = if role == "user" { "user" } else { "model" };
                    contents.push(serde_json::json!({
                        "role": gemini_role,
                        "parts": content_parts(msg.get("content")),
                    }));
                }
                // Tool results reach this family as plain user text.
                _ => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": content_parts(msg.get("content")),
                })),
            }
        }

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens,
            },
        });
        if !system.is_empty() {
            body["system_instruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }
        if let Some(tools) = tools {
            let declarations: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{ "functionDeclarations": declarations }]);
        }
        body
    }

    async fn post(
        &self,
        endpoint: &str,
        sse: bool,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let alt = if sse { "alt=sse&" } else { "" };
        let url = format!(
            "{}/v1beta/models/{}:{}?{}key={}",
            self.base_url, self.model, endpoint, alt, self.api_key
        );
        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_ms: 5000,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Gemini API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> String {
        format!("Gemini ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Gemini
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
        debug!(model = %self.model, "sending request to Gemini");
        let body = self.build_body(messages, tools, temperature, max_tokens);
        let resp = self.post("generateContent", false, &body).await?;
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
        debug!(model = %self.model, "sending streaming request to Gemini");
        let body = self.build_body(messages, tools, temperature, max_tokens);
        let resp = self.post("streamGenerateContent", true, &body).await?;

        let mut lines = LineBuffer::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        let mut usage: Option<Usage> = None;
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ProviderError::Http)?;
            for line in lines.push(&chunk) {
                let Some(data) = sse_data(&line) else { continue };
                let Ok(parsed) = serde_json::from_str::<ApiResponse>(data) else {
                    continue;
                };
                if let Some(meta) = &parsed.usage_metadata {
                    usage = Some(Usage {
                        prompt_tokens: meta.prompt_token_count.unwrap_or(0),
                        completion_tokens: meta.candidates_token_count.unwrap_or(0),
                    });
                }
                for candidate in &parsed.candidates {
                    let Some(content) = &candidate.content else { continue };
                    for part in &content.parts {
                        if let Some(text) = &part.text {
                            if !text.is_empty() {
                                let _ = tx.send(StreamEvent::Text { text: text.clone() }).await;
                            }
                        }
                        if let Some(call) = &part.function_call {
                            tool_calls.push(ToolCallRequest {
                                id: format!("call_{}", tool_calls.len()),
                                name: call.name.clone(),
                                arguments: call.args.clone().unwrap_or_else(|| serde_json::json!({})),
                            });
                        }
                    }
                }
            }
        }

        if !tool_calls.is_empty() {
            let _ = tx.send(StreamEvent::ToolCalls { tool_calls }).await;
        }
        let _ = tx.send(StreamEvent::Done { usage }).await;
        Ok(())
    }
}

/// Normalized content → Gemini `parts`.
fn content_parts(content: Option<&serde_json::Value>) -> Vec<serde_json::Value> {
    match content {
        Some(serde_json::Value::String(text)) => vec![serde_json::json!({ "text": text })],
        Some(serde_json::Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => Some(serde_json::json!({
                    "text": block.get("text").and_then(|t| t.as_str()).unwrap_or(""),
                })),
                Some("image") => Some(serde_json::json!({
                    "inline_data": {
                        "mime_type": block.get("media_type").and_then(|v| v.as_str()).unwrap_or("image/png"),
                        "data": block.get("data").and_then(|v| v.as_str()).unwrap_or(""),
                    },
                })),
                _ => None,
            })
            .collect(),
        _ => vec![serde_json::json!({ "text": "" })],
    }
}

fn parse_response(api: ApiResponse) -> LlmResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = "stop".to_string();

    if let Some(candidate) = api.candidates.first() {
        if let Some(reason) = &candidate.finish_reason {
            finish_reason = reason.to_lowercase();
        }
        if let Some(content) = &candidate.content {
            for part in &content.parts {
                if let Some(t) = &part.text {
                    text.push_str(t);
                }
                if let Some(call) = &part.function_call {
                    tool_calls.push(ToolCallRequest {
                        id: format!("call_{}", tool_calls.len()),
                        name: call.name.clone(),
                        arguments: call.args.clone().unwrap_or_else(|| serde_json::json!({})),
                    });
                }
            }
        }
    }

    let usage = api
        .usage_metadata
        .map(|m| Usage {
            prompt_tokens: m.prompt_token_count.unwrap_or(0),
            completion_tokens: m.candidates_token_count.unwrap_or(0),
        })
        .unwrap_or_default();

    LlmResponse {
        text,
        tool_calls,
        finish_reason,
        usage,
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    args: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}
