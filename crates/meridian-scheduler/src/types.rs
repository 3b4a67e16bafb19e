use chrono::{DateTime, Utc};
use meridian_core::types::JobId;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// A persistent scheduled job.
///
/// Invariant: whenever `enabled` and `next_run <= now`, the engine attempts
/// execution; success or terminal failure rewrites `next_run`. One-shot
/// schedules (`at ...`) flip `enabled` off after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub schedule: String,
    pub query: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub recipient: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failures: u32,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn default_max_failures() -> u32 {
    DEFAULT_MAX_FAILURES
}

fn enabled_default() -> bool {
    true
}

impl Job {
    /// Whether this job runs once and then disables itself.
    pub fn is_one_shot(&self) -> bool {
        crate::schedule::is_one_shot(&self.schedule)
    }

    /// Whether the job is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.map(|t| t <= now).unwrap_or(false)
    }
}
