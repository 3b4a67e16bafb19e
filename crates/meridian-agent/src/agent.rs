//! Agent core: the bounded tool-calling loop.
//!
//! Flow: user message → model (with tools) → tool calls? → execute →
//! feed results back → repeat. The loop ends when the model answers with
//! text alone or the iteration cap is reached.
//!
//! History holds only persistent turns: user messages and committed final
//! assistant texts. Tool-use/tool-result pairs from within a turn are
//! deliberately not persisted, so stale tool ids can never re-enter future
//! provider calls.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::compactor::ContextCompactor;
use crate::content::{ChatMessage, ContentBlock};
use crate::personality::Personality;
use crate::provider::{
    LlmProvider, LlmResponse, ProviderError, ProviderFamily, StreamEvent, ToolCallRequest,
    ToolDefinition,
};
use crate::skills::SkillLoader;
use crate::tools::ToolRegistry;

/// Compile-time bound on model↔tool iterations per chat call.
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Hard history cap when no compactor is configured.
const HARD_TRIM_MESSAGES: usize = 40;

const FALLBACK_TEXT: &str = "I got stuck in a tool loop. Try rephrasing?";

pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    personality: Personality,
    temperature: f32,
    max_tokens: u32,
    registry: ToolRegistry,
    compactor: Option<ContextCompactor>,
    skills: Option<Arc<SkillLoader>>,
    history: Vec<ChatMessage>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        personality: Personality,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        info!(personality = %personality.name, provider = %provider.name(), "agent initialized");
        Self {
            provider,
            personality,
            temperature,
            max_tokens,
            registry: ToolRegistry::new(),
            compactor: None,
            skills: None,
            history: Vec::new(),
        }
    }

    pub fn with_compactor(mut self, compactor: ContextCompactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn with_skills(mut self, skills: Arc<SkillLoader>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn set_history(&mut self, history: Vec<ChatMessage>) {
        self.history = history;
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Send a message and return the final assistant text. Tools are
    /// called automatically.
    pub async fn chat(
        &mut self,
        message: &str,
        images: &[ContentBlock],
    ) -> Result<String, ProviderError> {
        self.push_user_turn(message, images);
        let mut working = self.build_working(message);

        let defs = self.tool_definitions();
        let tools = defs.as_deref();

        let mut last_text = String::new();
        for iteration in 0..MAX_TOOL_ITERATIONS {
            let response = self
                .provider
                .chat(&working, tools, self.temperature, self.max_tokens)
                .await?;

            if response.tool_calls.is_empty() {
                let final_text = response.text.trim().to_string();
                self.commit_assistant(final_text.clone()).await;
                return Ok(final_text);
            }

            info!(
                iteration = iteration + 1,
                tools = ?response.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "executing tool calls"
            );

            working.push(self.format_assistant_tool_message(&response));
            for call in &response.tool_calls {
                let result = self
                    .registry
                    .dispatch(&call.name, call.arguments.clone())
                    .await;
                working.push(self.format_tool_result(call, &result));
            }
            last_text = response.text;
        }

        warn!(max = MAX_TOOL_ITERATIONS, "tool loop hit maximum iterations");
        let fallback = if last_text.is_empty() {
            FALLBACK_TEXT.to_string()
        } else {
            last_text
        };
        self.commit_assistant(fallback.clone()).await;
        Ok(fallback)
    }

    /// Streaming variant. Tool iterations use the non-streaming API (the
    /// tool-call decision must be known synchronously); only the final
    /// assistant turn is streamed token by token.
    pub async fn chat_stream(
        &mut self,
        message: &str,
        images: &[ContentBlock],
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        self.push_user_turn(message, images);
        let mut working = self.build_working(message);

        let defs = self.tool_definitions();
        let tools = defs.as_deref();

        if tools.is_some() {
            for iteration in 0..MAX_TOOL_ITERATIONS - 1 {
                let response = self
                    .provider
                    .chat(&working, tools, self.temperature, self.max_tokens)
                    .await?;

                if response.tool_calls.is_empty() {
                    // Already have the final answer non-streaming; emit it
                    // as a single chunk.
                    let final_text = response.text.trim().to_string();
                    self.commit_assistant(final_text.clone()).await;
                    let _ = tx.send(StreamEvent::Text { text: final_text }).await;
                    let _ = tx
                        .send(StreamEvent::Done {
                            usage: Some(response.usage),
                        })
                        .await;
                    return Ok(());
                }

                info!(
                    iteration = iteration + 1,
                    tools = ?response.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    "executing tool calls (stream)"
                );

                working.push(self.format_assistant_tool_message(&response));
                for call in &response.tool_calls {
                    let _ = tx
                        .send(StreamEvent::ToolCalls {
                            tool_calls: vec![call.clone()],
                        })
                        .await;
                    let result = self
                        .registry
                        .dispatch(&call.name, call.arguments.clone())
                        .await;
                    working.push(self.format_tool_result(call, &result));
                }
            }
        }

        // Final pass: stream it.
        let (ptx, mut prx) = mpsc::channel::<StreamEvent>(64);
        let provider = self.provider.clone();
        let stream_fut = provider.stream(&working, tools, self.temperature, self.max_tokens, ptx);
        let forward_fut = async {
            let mut full_text = String::new();
            let mut late_calls: Vec<ToolCallRequest> = Vec::new();
            let mut done_usage = None;
            while let Some(event) = prx.recv().await {
                match event {
                    StreamEvent::Text { text } => {
                        full_text.push_str(&text);
                        let _ = tx.send(StreamEvent::Text { text }).await;
                    }
                    StreamEvent::ToolCalls { tool_calls } => late_calls.extend(tool_calls),
                    StreamEvent::Done { usage } => done_usage = usage,
                }
            }
            (full_text, late_calls, done_usage)
        };
        let (stream_result, (full_text, late_calls, done_usage)) =
            tokio::join!(stream_fut, forward_fut);
        stream_result?;

        if !late_calls.is_empty() {
            // Late tool calls in the streaming pass: handle them and make
            // one final non-streaming recovery call.
            info!(
                tools = ?late_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "late tool calls in stream"
            );
            let pseudo = LlmResponse {
                text: full_text,
                tool_calls: late_calls.clone(),
                ..Default::default()
            };
            working.push(self.format_assistant_tool_message(&pseudo));
            for call in &late_calls {
                let _ = tx
                    .send(StreamEvent::ToolCalls {
                        tool_calls: vec![call.clone()],
                    })
                    .await;
                let result = self
                    .registry
                    .dispatch(&call.name, call.arguments.clone())
                    .await;
                working.push(self.format_tool_result(call, &result));
            }

            let recovery = self
                .provider
                .chat(&working, tools, self.temperature, self.max_tokens)
                .await?;
            let final_text = recovery.text.trim().to_string();
            self.commit_assistant(final_text.clone()).await;
            let _ = tx.send(StreamEvent::Text { text: final_text }).await;
            let _ = tx
                .send(StreamEvent::Done {
                    usage: Some(recovery.usage),
                })
                .await;
            return Ok(());
        }

        let final_text = full_text.trim().to_string();
        self.commit_assistant(final_text).await;
        let _ = tx.send(StreamEvent::Done { usage: done_usage }).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn tool_definitions(&self) -> Option<Vec<ToolDefinition>> {
        if self.registry.is_empty() || !self.provider.supports_tools() {
            None
        } else {
            Some(self.registry.definitions())
        }
    }

    fn push_user_turn(&mut self, message: &str, images: &[ContentBlock]) {
        if !images.is_empty() && self.provider.supports_vision() {
            let mut blocks = vec![ContentBlock::Text {
                text: message.to_string(),
            }];
            blocks.extend(images.iter().cloned());
            self.history
                .push(ChatMessage::blocks(crate::content::Role::User, blocks));
        } else {
            if !images.is_empty() {
                warn!(
                    provider = %self.provider.name(),
                    "provider does not support vision, dropping image attachments"
                );
            }
            self.history.push(ChatMessage::user(message));
        }
    }

    /// Rebuild the working list from scratch: system prompt (with the
    /// skills index), persisted history, and a system injection per skill
    /// triggered by the current message. Rebuilding each call keeps prompt
    /// changes visible without mutating history.
    fn build_working(&self, user_message: &str) -> Vec<serde_json::Value> {
        let mut system_prompt = self.personality.to_system_prompt();
        if let Some(skills) = &self.skills {
            let tier1 = skills.tier1_block();
            if !tier1.is_empty() {
                system_prompt.push('\n');
                system_prompt.push_str(&tier1);
            }
        }

        let mut working = vec![serde_json::json!({
            "role": "system",
            "content": system_prompt,
        })];
        working.extend(self.history.iter().map(|m| m.to_value()));

        if let Some(skills) = &self.skills {
            for name in skills.match_triggers(user_message) {
                if let Some(skill) = skills.get(&name) {
                    working.push(serde_json::json!({
                        "role": "system",
                        "content": format!("[Auto-loaded skill: {}]\n{}", skill.name, skill.tier2),
                    }));
                }
            }
        }

        working
    }

    /// Shape the assistant-with-tool-calls message for the provider family.
    fn format_assistant_tool_message(&self, response: &LlmResponse) -> serde_json::Value {
        match self.provider.family() {
            ProviderFamily::OpenAi => {
                let calls: Vec<serde_json::Value> = response
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                serde_json::json!({
                    "role": "assistant",
                    "content": response.text,
                    "tool_calls": calls,
                })
            }
            ProviderFamily::Anthropic => {
                let mut content: Vec<serde_json::Value> = Vec::new();
                if !response.text.is_empty() {
                    content.push(serde_json::json!({ "type": "text", "text": response.text }));
                }
                for tc in &response.tool_calls {
                    content.push(serde_json::json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                serde_json::json!({ "role": "assistant", "content": content })
            }
            // Families without a structured assistant tool-call shape get
            // the calls embedded as text.
            ProviderFamily::Gemini | ProviderFamily::Ollama => {
                let calls_text: Vec<String> = response
                    .tool_calls
                    .iter()
                    .map(|tc| format!("[Calling {}({})]", tc.name, tc.arguments))
                    .collect();
                let text = format!("{}\n{}", response.text, calls_text.join("\n"))
                    .trim()
                    .to_string();
                serde_json::json!({ "role": "assistant", "content": text })
            }
        }
    }

    /// Shape a tool result message for the provider family.
    fn format_tool_result(&self, call: &ToolCallRequest, result: &str) -> serde_json::Value {
        match self.provider.family() {
            ProviderFamily::OpenAi => serde_json::json!({
                "role": "tool",
                "tool_call_id": call.id,
                "content": result,
            }),
            ProviderFamily::Anthropic => serde_json::json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": result,
                }],
            }),
            ProviderFamily::Gemini | ProviderFamily::Ollama => serde_json::json!({
                "role": "user",
                "content": format!("[Tool result for {}]: {}", call.name, result),
            }),
        }
    }

    async fn commit_assistant(&mut self, text: String) {
        self.history.push(ChatMessage::assistant(text));
        self.compact_or_trim().await;
    }

    /// Compact through the summarizer when configured, otherwise hard-trim.
    async fn compact_or_trim(&mut self) {
        match &self.compactor {
            Some(compactor) => {
                let history = std::mem::take(&mut self.history);
                self.history = compactor.compact(self.provider.as_ref(), history).await;
            }
            None => {
                if self.history.len() > HARD_TRIM_MESSAGES {
                    let drop = self.history.len() - HARD_TRIM_MESSAGES;
                    self.history.drain(..drop);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Usage;
    use crate::test_support::ScriptedProvider;
    use crate::tools::{Tool, ToolError};
    use async_trait::async_trait;

    struct GetTimeTool;

    #[async_trait]
    impl Tool for GetTimeTool {
        fn name(&self) -> &str {
            "get_time"
        }
        fn description(&self) -> &str {
            "current time"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
            Ok("15:00".to_string())
        }
    }

    struct ExplodingTool;

    #[async_trait]
    impl Tool for ExplodingTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
            Err(ToolError::new("ValueError", "boom"))
        }
    }

    fn tool_call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({}),
        }
    }

    fn agent_with(provider: ScriptedProvider) -> (Agent, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let mut agent = Agent::new(
            provider.clone(),
            Personality::default(),
            0.7,
            4096,
        );
        agent.registry_mut().register(Box::new(GetTimeTool));
        agent.registry_mut().register(Box::new(ExplodingTool));
        (agent, provider)
    }

    #[tokio::test]
    async fn tool_calling_round_trip() {
        let (mut agent, provider) = agent_with(ScriptedProvider::new(vec![
            LlmResponse {
                text: String::new(),
                tool_calls: vec![tool_call("c1", "get_time")],
                finish_reason: "tool_calls".into(),
                usage: Usage::default(),
            },
            LlmResponse {
                text: "The time is 15:00.".into(),
                ..Default::default()
            },
        ]));

        let reply = agent.chat("What time?", &[]).await.unwrap();
        assert_eq!(reply, "The time is 15:00.");
        assert_eq!(agent.history().len(), 2);
        assert_eq!(provider.call_count(), 2);

        // The second invocation must carry the tool result back.
        let second = provider.call_messages(1);
        let serialized = serde_json::to_string(&second).unwrap();
        assert!(serialized.contains("15:00"), "tool result missing: {serialized}");
        assert!(serialized.contains("c1"));
    }

    #[tokio::test]
    async fn tool_failure_keeps_loop_alive() {
        let (mut agent, provider) = agent_with(ScriptedProvider::new(vec![
            LlmResponse {
                tool_calls: vec![tool_call("c1", "explode")],
                ..Default::default()
            },
            LlmResponse {
                text: "That tool is broken.".into(),
                ..Default::default()
            },
        ]));

        let reply = agent.chat("try the tool", &[]).await.unwrap();
        assert_eq!(reply, "That tool is broken.");
        // User + final assistant, regardless of the failure.
        assert_eq!(agent.history().len(), 2);
        assert!(provider.call_count() >= 2);

        let second = provider.call_messages(1);
        let serialized = serde_json::to_string(&second).unwrap();
        assert!(serialized.contains("Tool 'explode' failed: ValueError: boom"));
    }

    #[tokio::test]
    async fn unknown_tool_reports_stable_error() {
        let (mut agent, provider) = agent_with(ScriptedProvider::new(vec![
            LlmResponse {
                tool_calls: vec![tool_call("c1", "imaginary")],
                ..Default::default()
            },
            LlmResponse {
                text: "ok".into(),
                ..Default::default()
            },
        ]));

        agent.chat("go", &[]).await.unwrap();
        let second = provider.call_messages(1);
        let serialized = serde_json::to_string(&second).unwrap();
        assert!(serialized.contains("Error: Unknown tool 'imaginary'"));
    }

    #[tokio::test]
    async fn iteration_cap_commits_fallback() {
        let responses: Vec<LlmResponse> = (0..MAX_TOOL_ITERATIONS)
            .map(|_| LlmResponse {
                tool_calls: vec![tool_call("c1", "get_time")],
                ..Default::default()
            })
            .collect();
        let (mut agent, provider) = agent_with(ScriptedProvider::new(responses));

        let reply = agent.chat("loop forever", &[]).await.unwrap();
        assert_eq!(reply, "I got stuck in a tool loop. Try rephrasing?");
        assert_eq!(agent.history().len(), 2);
        assert_eq!(provider.call_count(), MAX_TOOL_ITERATIONS);
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let (mut agent, _provider) = agent_with(ScriptedProvider::failing());
        let err = agent.chat("hello", &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn anthropic_family_gets_content_block_shapes() {
        let provider = ScriptedProvider::new(vec![
            LlmResponse {
                tool_calls: vec![tool_call("tu_1", "get_time")],
                ..Default::default()
            },
            LlmResponse {
                text: "done".into(),
                ..Default::default()
            },
        ])
        .with_family(ProviderFamily::Anthropic);
        let (mut agent, provider) = agent_with(provider);

        agent.chat("time?", &[]).await.unwrap();
        let second = provider.call_messages(1);

        let assistant = &second[second.len() - 2];
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["content"][0]["type"], "tool_use");

        let result = &second[second.len() - 1];
        assert_eq!(result["role"], "user");
        assert_eq!(result["content"][0]["type"], "tool_result");
        assert_eq!(result["content"][0]["tool_use_id"], "tu_1");
    }

    #[tokio::test]
    async fn openai_family_gets_tool_call_arrays() {
        let (mut agent, provider) = agent_with(ScriptedProvider::new(vec![
            LlmResponse {
                tool_calls: vec![tool_call("call_1", "get_time")],
                ..Default::default()
            },
            LlmResponse {
                text: "done".into(),
                ..Default::default()
            },
        ]));

        agent.chat("time?", &[]).await.unwrap();
        let second = provider.call_messages(1);

        let assistant = &second[second.len() - 2];
        assert_eq!(assistant["tool_calls"][0]["type"], "function");
        // Arguments travel as a JSON string on this family.
        assert!(assistant["tool_calls"][0]["function"]["arguments"].is_string());

        let result = &second[second.len() - 1];
        assert_eq!(result["role"], "tool");
        assert_eq!(result["tool_call_id"], "call_1");
    }

    #[tokio::test]
    async fn working_list_is_rebuilt_each_call() {
        let (mut agent, provider) = agent_with(ScriptedProvider::new(vec![
            LlmResponse {
                text: "first".into(),
                ..Default::default()
            },
            LlmResponse {
                text: "second".into(),
                ..Default::default()
            },
        ]));

        agent.chat("one", &[]).await.unwrap();
        agent.chat("two", &[]).await.unwrap();

        // Second call: system + (user, assistant, user), no residue of the
        // first call's working list.
        let second = provider.call_messages(1);
        assert_eq!(second.len(), 4);
        assert_eq!(second[0]["role"], "system");
        assert_eq!(second[3]["content"], "two");
    }

    #[tokio::test]
    async fn stream_emits_tool_and_text_events() {
        let (mut agent, _provider) = agent_with(ScriptedProvider::new(vec![
            LlmResponse {
                tool_calls: vec![tool_call("c1", "get_time")],
                ..Default::default()
            },
            LlmResponse {
                text: "The time is 15:00.".into(),
                ..Default::default()
            },
        ]));

        let (tx, mut rx) = mpsc::channel(32);
        agent.chat_stream("What time?", &[], tx).await.unwrap();

        let mut saw_tool = false;
        let mut text = String::new();
        let mut saw_done = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::ToolCalls { tool_calls } => {
                    saw_tool = true;
                    assert_eq!(tool_calls[0].name, "get_time");
                }
                StreamEvent::Text { text: t } => text.push_str(&t),
                StreamEvent::Done { .. } => saw_done = true,
            }
        }
        assert!(saw_tool);
        assert!(saw_done);
        assert_eq!(text, "The time is 15:00.");
        assert_eq!(agent.history().len(), 2);
    }
}
