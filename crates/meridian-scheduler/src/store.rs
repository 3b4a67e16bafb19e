//! JSON-backed job store.
//!
//! All jobs live in a single array at `<data_root>/cron/jobs.json`,
//! rewritten atomically after every mutation. Records that fail to parse on
//! load are skipped with a warning rather than poisoning the whole store.

use std::path::PathBuf;

use meridian_core::store::{read_json_or, write_json_atomic};
use tracing::{info, warn};

use crate::error::{Result, SchedulerError};
use crate::types::Job;

/// Global ceiling on stored jobs.
pub const MAX_JOBS: usize = 20;

#[derive(Debug)]
pub struct JobStore {
    path: PathBuf,
    jobs: Vec<Job>,
}

impl JobStore {
    /// Load the store from `path`, skipping malformed records.
    pub fn load(path: PathBuf) -> Self {
        let raw: Vec<serde_json::Value> = match read_json_or(&path, Vec::new()) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load jobs file, starting empty");
                Vec::new()
            }
        };

        let mut jobs = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<Job>(value) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(error = %e, "skipping malformed job record"),
            }
        }

        info!(count = jobs.len(), path = %path.display(), "job store loaded");
        Self { path, jobs }
    }

    /// Persist the current job list atomically.
    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.jobs)?;
        Ok(())
    }

    /// Insert a job, enforcing [`MAX_JOBS`].
    pub fn add(&mut self, job: Job) -> Result<()> {
        if self.jobs.len() >= MAX_JOBS {
            return Err(SchedulerError::JobLimit { max: MAX_JOBS });
        }
        self.jobs.push(job);
        self.save()
    }

    /// Remove a job by id.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.id.as_str() != id);
        if self.jobs.len() == before {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        self.save()
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id.as_str() == id)
    }

    /// Apply `update` to the job with `id`, then persist. A job removed
    /// between collection and update is silently skipped.
    pub fn update<F: FnOnce(&mut Job)>(&mut self, id: &str, update: F) -> Result<()> {
        if let Some(job) = self.jobs.iter_mut().find(|j| j.id.as_str() == id) {
            update(job);
            self.save()?;
        }
        Ok(())
    }

    /// Jobs due at `now`.
    pub fn due(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<Job> {
        self.jobs.iter().filter(|j| j.is_due(now)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meridian_core::types::JobId;

    fn job(schedule: &str) -> Job {
        Job {
            id: JobId::new(),
            schedule: schedule.to_string(),
            query: "check the weather".to_string(),
            channel: String::new(),
            recipient: String::new(),
            created_at: Utc::now(),
            last_run: None,
            next_run: crate::schedule::next_run(schedule, Utc::now()),
            failures: 0,
            max_failures: 3,
            enabled: true,
        }
    }

    #[test]
    fn save_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let mut store = JobStore::load(path.clone());
        let j = job("every 6h");
        let id = j.id.clone();
        store.add(j).unwrap();

        let reloaded = JobStore::load(path);
        assert_eq!(reloaded.len(), 1);
        let loaded = reloaded.get(id.as_str()).unwrap();
        assert_eq!(loaded.schedule, "every 6h");
        assert_eq!(loaded.query, "check the weather");
        assert!(loaded.enabled);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(
            &path,
            r#"[{"id":"j-deadbeef","schedule":"every 1h","query":"q","created_at":"2026-01-01T00:00:00Z"},{"bogus":true}]"#,
        )
        .unwrap();

        let store = JobStore::load(path);
        assert_eq!(store.len(), 1);
        assert!(store.get("j-deadbeef").is_some());
    }

    #[test]
    fn job_cap_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JobStore::load(dir.path().join("jobs.json"));
        for _ in 0..MAX_JOBS {
            store.add(job("every 1h")).unwrap();
        }
        let err = store.add(job("every 1h")).unwrap_err();
        assert!(matches!(err, SchedulerError::JobLimit { max: MAX_JOBS }));
    }

    #[test]
    fn remove_unknown_job_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JobStore::load(dir.path().join("jobs.json"));
        assert!(matches!(
            store.remove("j-missing1"),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }
}
