//! Message → agent-name routing.
//!
//! Four strategies: sender, channel, content (regex), prefix. Prefix
//! routing strips the matched prefix from the message text in place so the
//! model never sees the addressing syntax.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use meridian_core::config::RoutingConfig;
use meridian_core::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sender,
    Channel,
    Content,
    Prefix,
}

impl std::str::FromStr for Strategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(Strategy::Sender),
            "channel" => Ok(Strategy::Channel),
            "content" => Ok(Strategy::Content),
            "prefix" => Ok(Strategy::Prefix),
            other => Err(CoreError::Config(format!(
                "Invalid routing strategy '{other}'. Valid: sender, channel, content, prefix"
            ))),
        }
    }
}

pub struct AgentRouter {
    strategy: Strategy,
    rules: Vec<(String, String)>,
    compiled: Vec<(Regex, String)>,
    default: String,
}

impl AgentRouter {
    /// Build a router. Content-strategy patterns are compiled once,
    /// case-insensitive; invalid patterns are warned about and skipped.
    pub fn new(
        strategy: Strategy,
        rules: HashMap<String, String>,
        default: impl Into<String>,
    ) -> Self {
        let mut ordered: Vec<(String, String)> = rules.into_iter().collect();
        ordered.sort();

        let mut compiled = Vec::new();
        if strategy == Strategy::Content {
            for (pattern, agent) in &ordered {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(re) => compiled.push((re, agent.clone())),
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "invalid content routing pattern")
                    }
                }
            }
        }

        Self {
            strategy,
            rules: ordered,
            compiled,
            default: default.into(),
        }
    }

    /// Build from the config block. Invalid strategies are a
    /// construction-time error.
    pub fn from_config(config: &RoutingConfig) -> Result<Self, CoreError> {
        let strategy: Strategy = config.strategy.parse()?;
        Ok(Self::new(
            strategy,
            config.rules.clone(),
            config.default.clone(),
        ))
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// Pick the agent for a message. Prefix routing mutates `text` in
    /// place, stripping the matched prefix.
    pub fn route(&self, channel: &str, sender_id: &str, text: &mut String) -> String {
        match self.strategy {
            Strategy::Sender => self.lookup(sender_id),
            Strategy::Channel => self.lookup(channel),
            Strategy::Content => {
                for (re, agent) in &self.compiled {
                    if re.is_match(text) {
                        return agent.clone();
                    }
                }
                self.default.clone()
            }
            Strategy::Prefix => {
                for (prefix, agent) in &self.rules {
                    if let Some(rest) = text.strip_prefix(prefix.as_str()) {
                        *text = rest.trim_start().to_string();
                        return agent.clone();
                    }
                }
                self.default.clone()
            }
        }
    }

    fn lookup(&self, key: &str) -> String {
        self.rules
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}
