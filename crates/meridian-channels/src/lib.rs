//! Gateway: channel adapters and the manager that routes them to agents.
//!
//! Every adapter implements the [`Channel`] contract; the
//! [`GatewayManager`] owns the registered set, runs the inbound pipeline,
//! and provides proactive outbound sends.

pub mod channel;
pub mod manager;
pub mod telegram;
pub mod types;
pub mod webchat;
pub mod webhook;

pub use channel::{Channel, InboundCallback};
pub use manager::{AgentDispatcher, GatewayManager, ProcessOutcome};
pub use types::{Direction, GatewayMessage, InboundRequest, SendOutcome};
