use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Could not parse schedule: '{0}'")]
    InvalidSchedule(String),

    #[error("Job '{id}' not found")]
    JobNotFound { id: String },

    #[error("Maximum of {max} scheduled jobs reached. Remove existing jobs first.")]
    JobLimit { max: usize },

    #[error("Store error: {0}")]
    Store(#[from] meridian_core::CoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
