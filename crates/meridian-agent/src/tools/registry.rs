//! Tool registry: `name → (handler, schema)` with replace-on-register
//! semantics and a dispatch layer that never fails outward.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::provider::ToolDefinition;

use super::{to_definitions, Tool, ToolDeps};

/// Boolean gates for the built-in tool groups. File operations are always
/// registered; every other group is gated. Flags for leaf groups the
/// runtime does not ship built-ins for (browser, voice, screen, sandbox,
/// presence, recording, outreach, connectors) are accepted and ignored.
#[derive(Debug, Clone)]
pub struct ToolFlags {
    pub terminal: bool,
    pub web: bool,
    pub memory: bool,
    pub skills: bool,
    pub cron: bool,
    pub catalog: bool,
}

impl Default for ToolFlags {
    fn default() -> Self {
        Self {
            terminal: true,
            web: true,
            memory: true,
            skills: true,
            cron: true,
            catalog: true,
        }
    }
}

impl ToolFlags {
    /// Apply per-agent overrides (`enable_terminal: false`, …) on top of
    /// the defaults. Unknown keys are ignored.
    pub fn with_overrides(mut self, overrides: &HashMap<String, bool>) -> Self {
        for (key, &value) in overrides {
            match key.as_str() {
                "enable_terminal" | "terminal" => self.terminal = value,
                "enable_web" | "web" => self.web = value,
                "enable_memory" | "memory" => self.memory = value,
                "enable_skills" | "skills" => self.skills = value,
                "enable_cron" | "cron" => self.cron = value,
                "enable_registry" | "registry" | "catalog" => self.catalog = value,
                _ => {}
            }
        }
        self
    }
}

/// Ordered tool table. Registration order is preserved; re-registering a
/// name replaces the prior entry in place.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool, replacing any prior entry under the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        debug!(tool = %tool.name(), "tool registered");
        if let Some(slot) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            *slot = tool;
        } else {
            self.tools.push(tool);
        }
    }

    /// Ordered schema list to pass to a provider.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        to_definitions(&self.tools)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke the named tool. Never fails outward: unknown tools and
    /// handler failures come back as strings the model can read.
    pub async fn dispatch(&self, name: &str, arguments: serde_json::Value) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return format!("Error: Unknown tool '{name}'");
        };

        debug!(tool = %name, "executing tool");
        match tool.execute(arguments).await {
            Ok(result) if result.is_empty() => "Done.".to_string(),
            Ok(result) => result,
            Err(e) => format!("Tool '{name}' failed: {e}"),
        }
    }

    /// Register the built-in tool groups selected by `flags`.
    pub fn load_builtins(&mut self, flags: &ToolFlags, deps: &ToolDeps) {
        // File operations are always on.
        super::file_ops::register(self, deps);

        if flags.terminal {
            super::terminal::register(self, deps);
        }
        if flags.web {
            super::web::register(self, deps);
        }
        if flags.memory {
            crate::memory::register_tools(self, deps);
        }
        if flags.skills {
            if deps.skills.is_some() {
                crate::skills::register_tools(self, deps);
            }
        }
        if flags.cron {
            if deps.scheduler.is_some() {
                super::cron::register(self, deps);
            }
        }
        if flags.catalog {
            super::catalog::register(self, deps);
        }

        info!(count = self.tools.len(), "built-in tools loaded");
    }
}
