//! Tool system.
//!
//! Defines the [`Tool`] trait all tools implement and the registry that
//! names, schemas, and dispatches them. Handlers return an explicit
//! `Result<String, ToolError>`; the dispatch layer normalizes failures into
//! the tool-error strings the model reads.

pub mod catalog;
pub mod cron;
pub mod file_ops;
pub mod registry;
pub mod terminal;
pub mod web;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use meridian_core::paths::DataRoot;
use meridian_safety::{CommandGate, PathSandbox};
use meridian_scheduler::SchedulerHandle;

use crate::memory::Memory;
use crate::provider::ToolDefinition;
use crate::skills::SkillLoader;

pub use registry::{ToolFlags, ToolRegistry};

/// Structured tool failure: a short kind plus a message, rendered as
/// `<kind>: <message>` inside the dispatch error string.
#[derive(Debug, Clone)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new("InvalidArguments", message)
    }

    pub fn io(err: &std::io::Error) -> Self {
        Self::new("IoError", err.to_string())
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name; the single source of truth for what the model sees.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters
    /// (`{type:"object", properties:{…}, required:[…]}`).
    fn parameters(&self) -> serde_json::Value;

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError>;
}

/// Dependencies handed to tool constructors at registration time. Tool
/// handlers receive everything they need here instead of reaching for
/// globals.
#[derive(Clone)]
pub struct ToolDeps {
    pub data_root: DataRoot,
    pub memory: Arc<tokio::sync::Mutex<Memory>>,
    pub skills: Option<Arc<SkillLoader>>,
    pub scheduler: Option<SchedulerHandle>,
    pub gate: CommandGate,
    pub sandbox: PathSandbox,
}

/// Convert registered tools to the definitions passed to a provider.
pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters(),
        })
        .collect()
}

/// Fetch a required string argument.
pub(crate) fn required_str<'a>(
    args: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::invalid_args(format!("missing required parameter: {key}")))
}

pub(crate) fn optional_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

pub(crate) fn optional_u64(args: &serde_json::Value, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64())
}
