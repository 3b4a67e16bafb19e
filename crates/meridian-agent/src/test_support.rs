//! Shared test doubles for agent-loop and compactor tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use meridian_core::paths::DataRoot;
use meridian_safety::{CommandGate, PathSandbox};

use crate::memory::Memory;
use crate::provider::{
    LlmProvider, LlmResponse, ProviderError, ProviderFamily, ToolDefinition,
};
use crate::tools::ToolDeps;

/// A provider that replays a fixed list of responses and records every
/// request's message list.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<LlmResponse>>,
    pub calls: Mutex<Vec<Vec<serde_json::Value>>>,
    family: ProviderFamily,
    fail: bool,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
            family: ProviderFamily::OpenAi,
            fail: false,
        }
    }

    pub fn with_family(mut self, family: ProviderFamily) -> Self {
        self.family = family;
        self
    }

    /// A provider whose every call fails.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            family: ProviderFamily::OpenAi,
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_messages(&self, index: usize) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> String {
        "Scripted (test)".to_string()
    }

    fn model(&self) -> &str {
        "scripted-test"
    }

    fn family(&self) -> ProviderFamily {
        self.family
    }

    async fn chat(
        &self,
        messages: &[serde_json::Value],
        _tools: Option<&[ToolDefinition]>,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<LlmResponse, ProviderError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if self.fail {
            return Err(ProviderError::Unavailable("scripted failure".to_string()));
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Unavailable("script exhausted".to_string()))
    }
}

/// Tool deps rooted in a fresh temp directory, with no confirmation
/// callback and an unrestricted sandbox.
pub fn tool_deps() -> (ToolDeps, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let data_root = DataRoot::new(dir.path().join("data"));
    data_root.ensure().unwrap();
    let memory = Memory::new(data_root.clone());
    let deps = ToolDeps {
        data_root,
        memory: std::sync::Arc::new(tokio::sync::Mutex::new(memory)),
        skills: None,
        scheduler: None,
        gate: CommandGate::new(),
        sandbox: PathSandbox::unrestricted(),
    };
    (deps, dir)
}
