//! Persistent scheduler: natural-language + cron schedules, a single timer
//! loop, exponential-backoff failure handling, and result delivery.
//!
//! Jobs survive restarts via a JSON store under `<data_root>/cron/`.

pub mod engine;
pub mod error;
pub mod schedule;
pub mod store;
pub mod traits;
pub mod types;

pub use engine::{Scheduler, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use traits::{AgentFactory, OutboundSender, ScheduledAgent};
pub use types::Job;
