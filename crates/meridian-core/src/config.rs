//! Layered configuration (meridian.yaml + MERIDIAN_* env overrides).
//!
//! Load order: explicit path, then the first of cwd /
//! `~/.config/meridian/` / `~/.meridian/` that has a `meridian.yaml`.
//! Environment variables override file values. Provider API keys found in
//! the conventional env vars (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`,
//! `GEMINI_API_KEY`, `GOOGLE_API_KEY`) select a provider when no explicit
//! `MERIDIAN_PROVIDER` is set.

use std::collections::HashMap;
use std::path::PathBuf;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CoreError, Result};

pub const CONFIG_FILENAME: &str = "meridian.yaml";
pub const ENV_PREFIX: &str = "MERIDIAN_";

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 18990;

/// Per-agent configuration. Empty string / zero fields inherit from the
/// global configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentEntry {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub personality: PersonalitySpec,
    pub tools: HashMap<String, bool>,
}

/// A personality is referenced by built-in name or defined inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonalitySpec {
    Name(String),
    Inline {
        #[serde(default)]
        name: String,
        #[serde(default)]
        role: String,
        #[serde(default)]
        tone: String,
        #[serde(default)]
        rules: Vec<String>,
        #[serde(default)]
        context: String,
    },
}

impl Default for PersonalitySpec {
    fn default() -> Self {
        PersonalitySpec::Name("default".to_string())
    }
}

/// Router configuration (`routing:` block).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub strategy: String,
    pub rules: HashMap<String, String>,
    pub default: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: "channel".to_string(),
            rules: HashMap::new(),
            default: "default".to_string(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // LLM selection
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub ollama_base_url: String,

    // Loop parameters
    pub temperature: f32,
    pub max_tokens: u32,
    pub personality_name: String,

    // Tool-group gates
    pub enable_terminal: bool,
    pub enable_web: bool,
    pub enable_skills: bool,
    pub enable_cron: bool,
    pub enable_registry: bool,

    // Gateway
    pub gateway_enabled: bool,
    pub gateway_channels: HashMap<String, serde_json::Value>,
    pub gateway_token: String,
    pub bind: String,
    pub port: u16,

    // Multi-agent
    pub agents: HashMap<String, AgentEntry>,
    pub routing: RoutingConfig,

    // Storage
    pub data_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: String::new(),
            api_key: String::new(),
            base_url: String::new(),
            ollama_base_url: "http://localhost:11434".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            personality_name: "default".to_string(),
            enable_terminal: true,
            enable_web: true,
            enable_skills: true,
            enable_cron: true,
            enable_registry: true,
            gateway_enabled: false,
            gateway_channels: HashMap::new(),
            gateway_token: String::new(),
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            agents: HashMap::new(),
            routing: RoutingConfig::default(),
            data_root: String::new(),
        }
    }
}

impl Config {
    /// Load configuration: explicit path > searched yaml file > defaults,
    /// with env vars layered on top.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(PathBuf::from(p)),
            None => Self::search_paths().into_iter().find(|p| p.exists()),
        };

        let mut figment = Figment::from(figment::providers::Serialized::defaults(Config::default()));
        if let Some(ref p) = file {
            figment = figment.merge(Yaml::file(p));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        let mut config: Config = figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        if let Some(p) = file {
            info!(path = %p.display(), "loaded config file");
        }

        config.apply_provider_env();

        if config.model.is_empty() {
            config.model = default_model_for(&config.provider).to_string();
        }

        Ok(config)
    }

    /// Config file search order: cwd, then XDG config dir, then the dotdir.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILENAME)];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("meridian").join(CONFIG_FILENAME));
            paths.push(home.join(".meridian").join(CONFIG_FILENAME));
        }
        paths
    }

    /// Provider auto-selection from conventional API-key env vars.
    ///
    /// Only applies when no credentials were configured explicitly and no
    /// `MERIDIAN_PROVIDER` override is present.
    fn apply_provider_env(&mut self) {
        if !self.api_key.is_empty() || std::env::var(format!("{ENV_PREFIX}PROVIDER")).is_ok() {
            return;
        }
        let detections: [(&str, &str); 4] = [
            ("OPENAI_API_KEY", "openai"),
            ("ANTHROPIC_API_KEY", "anthropic"),
            ("GEMINI_API_KEY", "gemini"),
            ("GOOGLE_API_KEY", "gemini"),
        ];
        for (var, provider) in detections {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    self.provider = provider.to_string();
                    self.api_key = key;
                    return;
                }
            }
        }
    }

    /// Whether multi-agent routing is configured.
    pub fn has_multi_agent(&self) -> bool {
        !self.agents.is_empty()
    }

    /// Resolved data root (config override or `~/.meridian`).
    pub fn data_root(&self) -> crate::paths::DataRoot {
        if self.data_root.is_empty() {
            crate::paths::DataRoot::default_root()
        } else {
            crate::paths::DataRoot::new(&self.data_root)
        }
    }
}

/// Default model per provider, used when no model is configured.
pub fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "claude-sonnet-4-5-20250929",
        "gemini" => "gemini-2.5-flash",
        "ollama" => "llama3.1",
        _ => "gpt-4o",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.provider, "openai");
        assert_eq!(c.temperature, 0.7);
        assert_eq!(c.max_tokens, 4096);
        assert!(c.enable_terminal);
        assert!(!c.gateway_enabled);
    }

    #[test]
    fn default_model_table() {
        assert_eq!(default_model_for("openai"), "gpt-4o");
        assert_eq!(default_model_for("ollama"), "llama3.1");
        assert_eq!(default_model_for("unknown"), "gpt-4o");
    }

    #[test]
    fn yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meridian.yaml");
        std::fs::write(
            &path,
            "provider: ollama\napi_key: unused\ntemperature: 0.2\nagents:\n  coder:\n    model: qwen2\n",
        )
        .unwrap();
        let config = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.model, "llama3.1");
        assert!(config.agents.contains_key("coder"));
    }

    #[test]
    fn inline_personality_spec_parses() {
        let spec: PersonalitySpec = serde_json::from_str(
            r#"{"name":"ops","role":"sre","tone":"terse","rules":["no speculation"]}"#,
        )
        .unwrap();
        match spec {
            PersonalitySpec::Inline { name, rules, .. } => {
                assert_eq!(name, "ops");
                assert_eq!(rules.len(), 1);
            }
            _ => panic!("expected inline spec"),
        }
    }
}
