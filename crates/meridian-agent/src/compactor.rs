//! Context compactor: summarizes old history to stay under the model's
//! token budget without breaking tool-call/tool-result pairing.
//!
//! Token counting is approximate (chars/4): a budget heuristic, not an
//! accountant.

use tracing::{debug, info, warn};

use crate::content::{ChatMessage, Content, ContentBlock, Role};
use crate::provider::LlmProvider;

/// Marker prepended to every generated summary so prior digests are never
/// re-summarized recursively.
pub const SUMMARY_PREFIX: &str = "[Summary of earlier conversation]";

pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Known model context windows (tokens). Longest-prefix matched after an
/// exact lookup fails, so dated model ids resolve to their family.
const MODEL_CONTEXT_WINDOWS: &[(&str, usize)] = &[
    // OpenAI
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("o1", 200_000),
    ("o1-mini", 128_000),
    ("o3", 200_000),
    ("o3-mini", 128_000),
    // Anthropic
    ("claude-sonnet-4-5-20250929", 200_000),
    ("claude-opus-4-5-20250929", 200_000),
    ("claude-3-5-sonnet-20241022", 200_000),
    ("claude-3-5-haiku-20241022", 200_000),
    // Gemini
    ("gemini-2.5-flash", 1_048_576),
    ("gemini-2.5-pro", 1_048_576),
    ("gemini-2.0-flash", 1_048_576),
    // Ollama (conservative defaults)
    ("llama3.1", 128_000),
    ("llama3.2", 128_000),
    ("mistral", 32_000),
    ("mixtral", 32_000),
    ("codellama", 16_000),
    ("phi3", 128_000),
    ("qwen2", 32_000),
];

const SUMMARIZATION_PROMPT: &str = "Summarize the following conversation history into a concise digest.

PRESERVE:
- Key facts and data mentioned
- Decisions made and their reasoning
- File paths, URLs, commands used
- Errors encountered and their resolutions
- User preferences expressed
- Task progress and status

FORMAT:
- Use bullet points
- Group by topic/task
- Be concise but don't lose critical details
- Start with: \"{prefix}\"

CONVERSATION TO SUMMARIZE:
{conversation}";

#[derive(Debug, Clone)]
pub struct CompactorConfig {
    /// Compact when the estimate exceeds this fraction of the window.
    pub threshold: f32,
    /// Always keep the last N messages verbatim.
    pub keep_recent: usize,
    /// Model name for the window lookup.
    pub model_name: String,
    /// Explicit window override (0 = resolve from model name).
    pub context_window: usize,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            keep_recent: 10,
            model_name: String::new(),
            context_window: 0,
        }
    }
}

impl CompactorConfig {
    pub fn for_model(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }
}

pub struct ContextCompactor {
    config: CompactorConfig,
    context_window: usize,
}

impl ContextCompactor {
    pub fn new(config: CompactorConfig) -> Self {
        let context_window = resolve_context_window(&config);
        Self {
            config,
            context_window,
        }
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    /// Approximate token count: roughly chars/4, images at a fixed nominal
    /// cost, plus a small per-message framing overhead.
    pub fn estimate_tokens(history: &[ChatMessage]) -> usize {
        let mut total_chars = 0usize;
        for msg in history {
            match &msg.content {
                Content::Text(text) => total_chars += text.len(),
                Content::Blocks(blocks) => {
                    for block in blocks {
                        match block {
                            ContentBlock::Text { text } => total_chars += text.len(),
                            ContentBlock::ToolResult { content, .. } => {
                                total_chars += content.len()
                            }
                            ContentBlock::Image { .. } => total_chars += 4000,
                            ContentBlock::ToolUse { name, arguments, .. } => {
                                total_chars += name.len() + arguments.to_string().len()
                            }
                        }
                    }
                }
            }
            total_chars += 4 + 9; // framing + role
        }
        total_chars / 4
    }

    pub fn needs_compaction(&self, history: &[ChatMessage]) -> bool {
        if history.len() <= self.config.keep_recent {
            return false;
        }
        let estimated = Self::estimate_tokens(history);
        let threshold = (self.context_window as f32 * self.config.threshold) as usize;
        debug!(
            estimated,
            window = self.context_window,
            threshold,
            messages = history.len(),
            "token estimate"
        );
        estimated > threshold
    }

    /// Compact history by summarizing older messages. Recent messages (the
    /// last `keep_recent`) are preserved verbatim; the split point walks
    /// backwards so no tool-use/tool-result pair is severed.
    pub async fn compact(
        &self,
        provider: &dyn LlmProvider,
        history: Vec<ChatMessage>,
    ) -> Vec<ChatMessage> {
        if !self.needs_compaction(&history) {
            return history;
        }

        let target = history.len() - self.config.keep_recent;
        let split = safe_split_point(&history, target);
        if split == 0 {
            return history;
        }

        let old = &history[..split];
        let recent = &history[split..];
        info!(
            compacting = old.len(),
            keeping = recent.len(),
            "compacting history into summary"
        );

        let transcript = format_for_summary(old);
        match self.summarize(provider, &transcript).await {
            Some(summary) => {
                let mut result = vec![ChatMessage::user(summary)];
                result.extend_from_slice(recent);
                result
            }
            None => {
                warn!("summarization failed, keeping recent messages only");
                recent.to_vec()
            }
        }
    }

    async fn summarize(&self, provider: &dyn LlmProvider, transcript: &str) -> Option<String> {
        let prompt = SUMMARIZATION_PROMPT
            .replace("{prefix}", SUMMARY_PREFIX)
            .replace("{conversation}", transcript);

        let messages = vec![
            serde_json::json!({
                "role": "system",
                "content": "You are a conversation summarizer. Be concise and accurate.",
            }),
            serde_json::json!({ "role": "user", "content": prompt }),
        ];

        match provider.chat(&messages, None, 0.3, 2048).await {
            Ok(resp) => {
                let mut summary = resp.text.trim().to_string();
                if summary.is_empty() {
                    return None;
                }
                if !summary.starts_with(SUMMARY_PREFIX) {
                    summary = format!("{SUMMARY_PREFIX}\n{summary}");
                }
                info!(chars = summary.len(), "generated summary");
                Some(summary)
            }
            Err(e) => {
                warn!(error = %e, "summarization call failed");
                None
            }
        }
    }
}

fn resolve_context_window(config: &CompactorConfig) -> usize {
    if config.context_window > 0 {
        return config.context_window;
    }
    let model = config.model_name.as_str();

    if let Some((_, window)) = MODEL_CONTEXT_WINDOWS.iter().find(|(k, _)| *k == model) {
        return *window;
    }
    // Longest prefix wins, so "gpt-4o-2024-11-20" resolves to gpt-4o, not gpt-4.
    if let Some((_, window)) = MODEL_CONTEXT_WINDOWS
        .iter()
        .filter(|(k, _)| model.starts_with(k))
        .max_by_key(|(k, _)| k.len())
    {
        return *window;
    }

    info!(model, window = DEFAULT_CONTEXT_WINDOW, "unknown model, using default context window");
    DEFAULT_CONTEXT_WINDOW
}

/// Walk the split point backwards while it would sever a tool-use/result
/// pair or strand a tool result without its initiating call.
fn safe_split_point(history: &[ChatMessage], target: usize) -> usize {
    let mut idx = target;
    while idx > 0 {
        let msg = &history[idx];

        // Never split right after an assistant message carrying tool calls.
        if msg.role == Role::Assistant && msg.content.has_tool_use() {
            idx -= 1;
            continue;
        }
        // Never split on a tool result (orphaned without its call).
        if msg.role == Role::Tool {
            idx -= 1;
            continue;
        }
        if msg.role == Role::User && msg.content.has_tool_result() {
            idx -= 1;
            continue;
        }
        break;
    }
    idx
}

/// Render messages into a plain-text transcript for the summarizer. Prior
/// summaries are marked so they are never recursively re-summarized; tool
/// activity is stubbed and previewed.
fn format_for_summary(messages: &[ChatMessage]) -> String {
    let mut lines = Vec::new();
    for msg in messages {
        let role = match msg.role {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::Tool => "TOOL",
        };
        match &msg.content {
            Content::Text(text) => {
                if text.starts_with(SUMMARY_PREFIX) {
                    lines.push(format!("[PREVIOUS SUMMARY]\n{text}\n"));
                } else if text.len() > 2000 {
                    let mut cut = 2000;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    lines.push(format!("{role}: {}...", &text[..cut]));
                } else {
                    lines.push(format!("{role}: {text}"));
                }
            }
            Content::Blocks(blocks) => {
                let mut parts = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => parts.push(text.clone()),
                        ContentBlock::ToolUse { name, .. } => {
                            parts.push(format!("[called {name}]"))
                        }
                        ContentBlock::ToolResult { content, .. } => {
                            let mut cut = content.len().min(500);
                            while !content.is_char_boundary(cut) {
                                cut -= 1;
                            }
                            parts.push(format!("[result: {}]", &content[..cut]))
                        }
                        ContentBlock::Image { .. } => parts.push("[image]".to_string()),
                    }
                }
                if !parts.is_empty() {
                    lines.push(format!("{role}: {}", parts.join(" ")));
                }
            }
        }
    }
    lines.join("\n")
}
