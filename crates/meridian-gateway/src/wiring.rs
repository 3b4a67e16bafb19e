//! Composition root.
//!
//! All runtime singletons (skills loader, memory, scheduler, pool,
//! gateway) are constructed here and wired through narrow capability
//! interfaces: the scheduler sees an `AgentFactory` and an
//! `OutboundSender`; the gateway sees an `AgentDispatcher`. Nothing
//! reaches for globals.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::error;

use meridian_agent::compactor::{CompactorConfig, ContextCompactor};
use meridian_agent::memory::Memory;
use meridian_agent::personality::Personality;
use meridian_agent::pool::AgentPool;
use meridian_agent::provider::provider_from_config;
use meridian_agent::router::AgentRouter;
use meridian_agent::skills::SkillLoader;
use meridian_agent::tools::{ToolDeps, ToolFlags, ToolRegistry};
use meridian_agent::Agent;
use meridian_channels::{AgentDispatcher, GatewayManager, GatewayMessage};
use meridian_core::config::Config;
use meridian_core::paths::DataRoot;
use meridian_core::CoreError;
use meridian_safety::{CommandGate, PathSandbox};
use meridian_scheduler::{
    AgentFactory, OutboundSender, ScheduledAgent, Scheduler, SchedulerHandle,
};

/// Fully wired runtime.
pub struct Runtime {
    pub config: Config,
    pub data_root: DataRoot,
    pub memory: Arc<tokio::sync::Mutex<Memory>>,
    pub pool: Arc<AgentPool>,
    pub router: Arc<AgentRouter>,
    pub gateway: Arc<GatewayManager>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub scheduler_handle: Option<SchedulerHandle>,
}

/// Build the whole runtime from configuration.
pub fn build_runtime(config: Config, tool_overrides: &HashMap<String, bool>) -> Result<Runtime, CoreError> {
    let data_root = config.data_root();
    data_root.ensure()?;

    let skills = if config.enable_skills {
        Some(Arc::new(SkillLoader::new(data_root.skills_dir(), Vec::new())))
    } else {
        None
    };
    let memory = Arc::new(tokio::sync::Mutex::new(Memory::new(data_root.clone())));

    // The scheduler's outbound sender is late-bound: the gateway manager
    // that backs it is constructed after the scheduler.
    let late_sender = Arc::new(GatewaySender::default());

    let base_deps = ToolDeps {
        data_root: data_root.clone(),
        memory: memory.clone(),
        skills,
        scheduler: None,
        // Server-mode agents have no interactive confirmation surface, so
        // destructive commands stay blocked.
        gate: CommandGate::new(),
        sandbox: PathSandbox::unrestricted(),
    };

    let (scheduler, scheduler_handle) = if config.enable_cron {
        let factory = Arc::new(EphemeralAgentFactory {
            config: config.clone(),
            deps: base_deps.clone(),
            overrides: tool_overrides.clone(),
        });
        let scheduler = Arc::new(Scheduler::new(
            data_root.jobs_path(),
            data_root.results_dir(),
            factory,
            Some(late_sender.clone() as Arc<dyn OutboundSender>),
        ));
        let handle = scheduler.handle();
        (Some(scheduler), Some(handle))
    } else {
        (None, None)
    };

    let mut deps = base_deps;
    deps.scheduler = scheduler_handle.clone();

    let pool = Arc::new(if config.has_multi_agent() {
        AgentPool::new(config.agents.clone(), config.clone(), deps)
    } else {
        AgentPool::single(config.clone(), deps)
    });

    let router = Arc::new(AgentRouter::from_config(&config.routing)?);

    let dispatcher = Arc::new(PoolDispatcher {
        pool: pool.clone(),
        router: router.clone(),
    });
    let mut manager = GatewayManager::new(dispatcher);
    if config.gateway_enabled {
        manager.auto_configure(&config.gateway_channels);
    }
    let gateway = Arc::new(manager);
    gateway.start_background_channels();
    late_sender.bind(gateway.clone());

    Ok(Runtime {
        config,
        data_root,
        memory,
        pool,
        router,
        gateway,
        scheduler,
        scheduler_handle,
    })
}

/// Routes inbound gateway messages through the router and pool.
pub struct PoolDispatcher {
    pool: Arc<AgentPool>,
    router: Arc<AgentRouter>,
}

#[async_trait]
impl AgentDispatcher for PoolDispatcher {
    async fn dispatch(&self, message: &mut GatewayMessage) -> String {
        let agent_name = self.router.route(
            &message.channel,
            &message.sender_id,
            &mut message.text,
        );

        let instance = match self.pool.get(&agent_name, &message.sender_id).await {
            Ok(a) => a,
            Err(e) => {
                error!(agent = %agent_name, error = %e, "agent pool error");
                return "Agent not configured.".to_string();
            }
        };

        let mut agent = instance.lock().await;
        match agent.chat(&message.text, &[]).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(agent = %agent_name, error = %e, "agent chat failed");
                "Something went wrong. Try again?".to_string()
            }
        }
    }
}

/// Outbound sender whose gateway manager is attached after construction.
/// Sends before binding fail cleanly (the scheduler falls back to files).
#[derive(Default)]
pub struct GatewaySender {
    gateway: OnceLock<Arc<GatewayManager>>,
}

impl GatewaySender {
    pub fn bind(&self, gateway: Arc<GatewayManager>) {
        let _ = self.gateway.set(gateway);
    }
}

#[async_trait]
impl OutboundSender for GatewaySender {
    async fn send(&self, channel: &str, recipient: &str, text: &str) -> Result<(), String> {
        let Some(gateway) = self.gateway.get() else {
            return Err("gateway not available".to_string());
        };
        let outcome = gateway.send_proactive(channel, recipient, text, None).await;
        if outcome.success {
            Ok(())
        } else {
            Err(outcome.error.unwrap_or_else(|| "send failed".to_string()))
        }
    }
}

/// Builds a fresh agent per scheduled-job execution. Jobs never share
/// histories, and their agents cannot schedule further jobs.
pub struct EphemeralAgentFactory {
    config: Config,
    deps: ToolDeps,
    overrides: HashMap<String, bool>,
}

#[async_trait]
impl AgentFactory for EphemeralAgentFactory {
    async fn create_agent(&self) -> Result<Box<dyn ScheduledAgent>, String> {
        let provider = provider_from_config(&self.config).map_err(|e| e.to_string())?;
        let compactor = ContextCompactor::new(CompactorConfig::for_model(provider.model()));

        let flags = ToolFlags {
            terminal: self.config.enable_terminal,
            web: self.config.enable_web,
            memory: true,
            skills: self.config.enable_skills,
            cron: false,
            catalog: self.config.enable_registry,
        }
        .with_overrides(&self.overrides);

        let mut registry = ToolRegistry::new();
        registry.load_builtins(&flags, &self.deps);

        let mut agent = Agent::new(
            provider,
            Personality::default(),
            self.config.temperature,
            self.config.max_tokens,
        )
        .with_compactor(compactor)
        .with_registry(registry);
        if let Some(skills) = &self.deps.skills {
            agent = agent.with_skills(skills.clone());
        }

        Ok(Box::new(JobAgent(agent)))
    }
}

/// Adapter giving the scheduler its narrow view of an [`Agent`].
pub struct JobAgent(Agent);

#[async_trait]
impl ScheduledAgent for JobAgent {
    async fn chat(&mut self, query: &str) -> Result<String, String> {
        self.0.chat(query, &[]).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.provider = "ollama".to_string();
        config.data_root = dir.display().to_string();
        config
    }

    #[tokio::test]
    async fn runtime_builds_single_agent_mode() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = build_runtime(test_config(dir.path()), &HashMap::new()).unwrap();
        assert_eq!(runtime.pool.list_agents(), vec!["default"]);
        assert!(runtime.scheduler.is_some());
        assert!(runtime.data_root.jobs_path().parent().unwrap().exists());
    }

    #[tokio::test]
    async fn runtime_builds_multi_agent_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.agents.insert(
            "default".to_string(),
            meridian_core::config::AgentEntry::default(),
        );
        config.agents.insert(
            "coder".to_string(),
            meridian_core::config::AgentEntry::default(),
        );
        let runtime = build_runtime(config, &HashMap::new()).unwrap();
        assert_eq!(runtime.pool.list_agents(), vec!["coder", "default"]);
    }

    #[tokio::test]
    async fn invalid_routing_strategy_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.routing.strategy = "nonsense".to_string();
        assert!(build_runtime(config, &HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn unbound_sender_fails_cleanly() {
        let sender = GatewaySender::default();
        assert!(sender.send("telegram", "1", "hi").await.is_err());
    }

    #[tokio::test]
    async fn factory_builds_agents_without_cron_tools() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runtime = build_runtime(config.clone(), &HashMap::new()).unwrap();
        // The factory exists inside the scheduler; building a standalone
        // one exercises the same path.
        let data_root = config.data_root();
        let factory = EphemeralAgentFactory {
            config,
            deps: ToolDeps {
                data_root: data_root.clone(),
                memory: Arc::new(tokio::sync::Mutex::new(Memory::new(data_root))),
                skills: None,
                scheduler: runtime.scheduler_handle.clone(),
                gate: CommandGate::new(),
                sandbox: PathSandbox::unrestricted(),
            },
            overrides: HashMap::new(),
        };
        assert!(factory.create_agent().await.is_ok());
    }
}
