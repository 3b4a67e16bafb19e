//! Agent pool: named agent instances with per-sender isolation and LRU
//! eviction.
//!
//! Each (agent-name, sender-id) pair gets its own [`Agent`] with an
//! independent history. The pool is the sole owner of instances; callers
//! get an `Arc<Mutex<Agent>>` whose lock serializes that instance's calls.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use meridian_core::config::{AgentEntry, Config};
use meridian_core::CoreError;

use crate::agent::Agent;
use crate::compactor::{CompactorConfig, ContextCompactor};
use crate::personality;
use crate::provider::create_provider;
use crate::tools::{ToolDeps, ToolFlags, ToolRegistry};

/// Cached-instance ceiling; least-recently-used instances are evicted
/// one at a time past this.
pub const MAX_CACHE: usize = 200;

pub struct AgentPool {
    configs: HashMap<String, AgentEntry>,
    global: Config,
    deps: ToolDeps,
    /// LRU order: front = oldest, back = most recently used.
    agents: Mutex<Vec<(String, Arc<Mutex<Agent>>)>>,
}

impl AgentPool {
    pub fn new(configs: HashMap<String, AgentEntry>, global: Config, deps: ToolDeps) -> Self {
        Self {
            configs,
            global,
            deps,
            agents: Mutex::new(Vec::new()),
        }
    }

    /// Single-agent setup: one `default` entry inheriting everything from
    /// the global configuration (including its personality selection).
    pub fn single(global: Config, deps: ToolDeps) -> Self {
        let mut configs = HashMap::new();
        configs.insert(
            "default".to_string(),
            AgentEntry {
                personality: meridian_core::config::PersonalitySpec::Name(
                    global.personality_name.clone(),
                ),
                ..Default::default()
            },
        );
        Self::new(configs, global, deps)
    }

    pub fn list_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_config(&self, name: &str) -> Option<&AgentEntry> {
        self.configs.get(name)
    }

    pub async fn active_count(&self) -> usize {
        self.agents.lock().await.len()
    }

    /// Get or create the instance for (name, sender). An empty sender id
    /// (CLI / single-user use) collapses to the agent name alone.
    pub async fn get(
        &self,
        name: &str,
        sender_id: &str,
    ) -> Result<Arc<Mutex<Agent>>, CoreError> {
        let name = if self.configs.contains_key(name) {
            name
        } else {
            warn!(agent = %name, "agent not configured, falling back to 'default'");
            if !self.configs.contains_key("default") {
                return Err(CoreError::Config("No 'default' agent configured".into()));
            }
            "default"
        };

        let key = if sender_id.is_empty() {
            name.to_string()
        } else {
            format!("{name}:{sender_id}")
        };

        let mut agents = self.agents.lock().await;
        if let Some(pos) = agents.iter().position(|(k, _)| *k == key) {
            let entry = agents.remove(pos);
            let instance = entry.1.clone();
            agents.push(entry);
            return Ok(instance);
        }

        let agent = self.create_agent(name)?;
        let instance = Arc::new(Mutex::new(agent));
        agents.push((key.clone(), instance.clone()));
        let shown_sender = if sender_id.is_empty() { "cli" } else { sender_id };
        debug!(agent = %name, sender = %shown_sender, "created agent instance");

        while agents.len() > MAX_CACHE {
            let (evicted, _) = agents.remove(0);
            info!(key = %evicted, "evicted agent instance");
        }

        Ok(instance)
    }

    /// Compose a fresh agent from its named config, inheriting unset
    /// fields from the global configuration.
    fn create_agent(&self, name: &str) -> Result<Agent, CoreError> {
        let cfg = self
            .configs
            .get(name)
            .ok_or_else(|| CoreError::Config(format!("unknown agent '{name}'")))?;

        let provider_name = if cfg.provider.is_empty() {
            &self.global.provider
        } else {
            &cfg.provider
        };
        let model = if cfg.model.is_empty() {
            &self.global.model
        } else {
            &cfg.model
        };
        let api_key = if cfg.api_key.is_empty() {
            &self.global.api_key
        } else {
            &cfg.api_key
        };
        // A custom endpoint only applies when the agent does not override
        // the provider.
        let base_url = if cfg.provider.is_empty() && !self.global.base_url.is_empty() {
            Some(self.global.base_url.clone())
        } else {
            None
        };

        let provider = create_provider(
            provider_name,
            model,
            api_key,
            base_url,
            &self.global.ollama_base_url,
        )?;

        let temperature = if cfg.temperature > 0.0 {
            cfg.temperature
        } else {
            self.global.temperature
        };

        let compactor = ContextCompactor::new(CompactorConfig::for_model(provider.model()));
        let personality = personality::resolve(&cfg.personality);

        let mut agent = Agent::new(provider, personality, temperature, self.global.max_tokens)
            .with_compactor(compactor);
        if let Some(skills) = &self.deps.skills {
            agent = agent.with_skills(skills.clone());
        }

        let flags = self.global_flags().with_overrides(&cfg.tools);
        let mut registry = ToolRegistry::new();
        registry.load_builtins(&flags, &self.deps);
        agent = agent.with_registry(registry);

        Ok(agent)
    }

    fn global_flags(&self) -> ToolFlags {
        ToolFlags {
            terminal: self.global.enable_terminal,
            web: self.global.enable_web,
            memory: true,
            skills: self.global.enable_skills,
            cron: self.global.enable_cron,
            catalog: self.global.enable_registry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tool_deps;

    fn pool() -> (AgentPool, tempfile::TempDir) {
        let (deps, dir) = tool_deps();
        let mut global = Config::default();
        global.provider = "ollama".to_string();
        global.enable_cron = false; // no scheduler handle in tests

        let mut configs = HashMap::new();
        configs.insert("default".to_string(), AgentEntry::default());
        configs.insert(
            "coder".to_string(),
            AgentEntry {
                personality: meridian_core::config::PersonalitySpec::Name("coder".into()),
                ..Default::default()
            },
        );
        (AgentPool::new(configs, global, deps), dir)
    }

    #[tokio::test]
    async fn repeated_gets_return_same_instance() {
        let (pool, _dir) = pool();
        let a = pool.get("coder", "alice").await.unwrap();
        let b = pool.get("coder", "alice").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.active_count().await, 1);
    }

    #[tokio::test]
    async fn different_senders_are_isolated() {
        let (pool, _dir) = pool();
        let a = pool.get("coder", "alice").await.unwrap();
        let b = pool.get("coder", "bob").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.active_count().await, 2);

        a.lock().await.set_history(vec![crate::ChatMessage::user("private")]);
        assert!(b.lock().await.history().is_empty());
    }

    #[tokio::test]
    async fn empty_sender_collapses_to_name_alone() {
        let (pool, _dir) = pool();
        let a = pool.get("default", "").await.unwrap();
        let b = pool.get("default", "").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn unknown_agent_falls_back_to_default() {
        let (pool, _dir) = pool();
        let a = pool.get("nonexistent", "alice").await.unwrap();
        let b = pool.get("default", "alice").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn missing_default_is_an_error() {
        let (deps, _dir) = tool_deps();
        let mut global = Config::default();
        global.provider = "ollama".to_string();
        let pool = AgentPool::new(HashMap::new(), global, deps);
        assert!(pool.get("anything", "s").await.is_err());
    }

    #[tokio::test]
    async fn lru_eviction_past_cap() {
        let (pool, _dir) = pool();
        for i in 0..MAX_CACHE {
            pool.get("default", &format!("sender-{i}")).await.unwrap();
        }
        assert_eq!(pool.active_count().await, MAX_CACHE);

        // Touch sender-0 so it becomes most recently used.
        pool.get("default", "sender-0").await.unwrap();

        // One new key evicts exactly one entry: the LRU (sender-1).
        pool.get("default", "sender-new").await.unwrap();
        assert_eq!(pool.active_count().await, MAX_CACHE);

        let agents = pool.agents.lock().await;
        assert!(agents.iter().any(|(k, _)| k == "default:sender-0"));
        assert!(!agents.iter().any(|(k, _)| k == "default:sender-1"));
        assert!(agents.iter().any(|(k, _)| k == "default:sender-new"));
    }

    #[tokio::test]
    async fn list_agents_reports_configured_names() {
        let (pool, _dir) = pool();
        assert_eq!(pool.list_agents(), vec!["coder", "default"]);
    }
}
