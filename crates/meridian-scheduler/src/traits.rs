//! Narrow capability interfaces.
//!
//! The scheduler can send results through the gateway, and the gateway's
//! pool builds agents whose tools can talk to the scheduler. These traits
//! break that cycle: the engine only ever sees an [`AgentFactory`] and an
//! [`OutboundSender`]; concrete implementations are wired by the
//! composition root.

use async_trait::async_trait;

/// An ephemeral agent created for a single job execution. Jobs do not share
/// conversation histories.
#[async_trait]
pub trait ScheduledAgent: Send {
    async fn chat(&mut self, query: &str) -> Result<String, String>;
}

/// Produces a fresh [`ScheduledAgent`] per job execution.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create_agent(&self) -> Result<Box<dyn ScheduledAgent>, String>;
}

/// Delivers a job result proactively over a gateway channel.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send(&self, channel: &str, recipient: &str, text: &str) -> Result<(), String>;
}
