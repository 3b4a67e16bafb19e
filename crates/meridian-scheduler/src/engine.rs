//! Scheduler engine: a single timer loop that executes due jobs.
//!
//! Each execution gets a fresh ephemeral agent from the [`AgentFactory`].
//! Results are delivered through the [`OutboundSender`] when the job names a
//! channel and recipient, falling back to a results file on disk. Failures
//! back off exponentially (capped at 60 minutes) and disable the job after
//! `max_failures` consecutive errors.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use meridian_core::types::JobId;

use crate::error::{Result, SchedulerError};
use crate::schedule;
use crate::store::JobStore;
use crate::traits::{AgentFactory, OutboundSender};
use crate::types::{Job, DEFAULT_MAX_FAILURES};

/// Seconds between timer ticks.
const CHECK_INTERVAL_SECS: u64 = 60;

/// Shared handle for job management while the engine loop runs.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<Mutex<JobStore>>,
}

impl SchedulerHandle {
    /// Parse the schedule, create the job record, and persist it.
    pub async fn add_job(
        &self,
        schedule: &str,
        query: &str,
        channel: &str,
        recipient: &str,
    ) -> Result<Job> {
        let now = Utc::now();
        let next = schedule::next_run(schedule, now)
            .ok_or_else(|| SchedulerError::InvalidSchedule(schedule.to_string()))?;

        let job = Job {
            id: JobId::new(),
            schedule: schedule.to_string(),
            query: query.to_string(),
            channel: channel.to_string(),
            recipient: recipient.to_string(),
            created_at: now,
            last_run: None,
            next_run: Some(next),
            failures: 0,
            max_failures: DEFAULT_MAX_FAILURES,
            enabled: true,
        };

        self.store.lock().await.add(job.clone())?;
        info!(job_id = %job.id, %schedule, "job added");
        Ok(job)
    }

    pub async fn remove_job(&self, id: &str) -> Result<()> {
        self.store.lock().await.remove(id)?;
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.store.lock().await.list()
    }

    pub async fn job_count(&self) -> usize {
        self.store.lock().await.len()
    }
}

/// The engine. Owns the job store and drives execution.
pub struct Scheduler {
    store: Arc<Mutex<JobStore>>,
    factory: Arc<dyn AgentFactory>,
    sender: Option<Arc<dyn OutboundSender>>,
    results_dir: PathBuf,
}

impl Scheduler {
    pub fn new(
        jobs_path: PathBuf,
        results_dir: PathBuf,
        factory: Arc<dyn AgentFactory>,
        sender: Option<Arc<dyn OutboundSender>>,
    ) -> Self {
        let store = JobStore::load(jobs_path);
        Self {
            store: Arc::new(Mutex::new(store)),
            factory,
            sender,
            results_dir,
        }
    }

    /// Cheap clone for tool handlers and HTTP endpoints.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            store: self.store.clone(),
        }
    }

    /// Main loop: wake every minute, run due jobs, until `shutdown` turns
    /// true. Tick errors are logged and never terminate the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let count = self.store.lock().await.len();
        info!(jobs = count, "scheduler started");

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(CHECK_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Execute every job whose `next_run` has arrived. Jobs run
    /// sequentially; a long job delays the rest of the tick.
    pub async fn tick(&self) {
        let now = Utc::now();
        let due = self.store.lock().await.due(now);
        for job in due {
            self.execute_job(job).await;
        }
    }

    async fn execute_job(&self, job: Job) {
        info!(job_id = %job.id, query = %job.query, "executing job");

        let outcome = async {
            let mut agent = self.factory.create_agent().await?;
            agent.chat(&job.query).await
        }
        .await;

        let now = Utc::now();
        let id = job.id.as_str().to_string();

        match outcome {
            Ok(result) => {
                self.deliver(&job, &result).await;

                let one_shot = job.is_one_shot();
                let next = if one_shot {
                    None
                } else {
                    schedule::next_run(&job.schedule, now)
                };

                let update = self.store.lock().await.update(&id, |j| {
                    j.last_run = Some(now);
                    j.failures = 0;
                    if one_shot {
                        j.enabled = false;
                    } else {
                        j.next_run = next;
                    }
                });
                if let Err(e) = update {
                    error!(job_id = %id, error = %e, "failed to persist job after run");
                }
                if one_shot {
                    info!(job_id = %id, "one-shot job completed, now disabled");
                }
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "job failed");
                let update = self.store.lock().await.update(&id, |j| {
                    j.failures += 1;
                    j.last_run = Some(now);
                    let backoff_minutes = 2u32.pow(j.failures.min(6)).min(60) as i64;
                    j.next_run = Some(now + Duration::minutes(backoff_minutes));
                    if j.failures >= j.max_failures {
                        j.enabled = false;
                        warn!(job_id = %j.id, failures = j.failures, "job disabled after repeated failures");
                    }
                });
                if let Err(e) = update {
                    error!(job_id = %id, error = %e, "failed to persist job after failure");
                }
            }
        }
    }

    /// Deliver a result through the configured channel, falling back to a
    /// file under the results directory.
    async fn deliver(&self, job: &Job, result: &str) {
        if !job.channel.is_empty() && !job.recipient.is_empty() {
            if let Some(sender) = &self.sender {
                match sender.send(&job.channel, &job.recipient, result).await {
                    Ok(()) => {
                        info!(job_id = %job.id, channel = %job.channel, recipient = %job.recipient, "job result delivered");
                        return;
                    }
                    Err(e) => {
                        error!(job_id = %job.id, channel = %job.channel, error = %e, "delivery failed, saving to file");
                    }
                }
            }
        }
        self.save_result_to_file(job, result);
    }

    fn save_result_to_file(&self, job: &Job, result: &str) {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.results_dir.join(format!("{}_{}.txt", job.id, timestamp));
        let content = format!(
            "Job: {}\nQuery: {}\nSchedule: {}\nExecuted: {}\n{}\n\n{}",
            job.id,
            job.query,
            job.schedule,
            Utc::now().to_rfc3339(),
            "=".repeat(40),
            result,
        );
        if let Err(e) = std::fs::create_dir_all(&self.results_dir)
            .and_then(|_| std::fs::write(&path, content))
        {
            error!(job_id = %job.id, error = %e, "failed to write result file");
        } else {
            info!(job_id = %job.id, path = %path.display(), "job result saved to file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkAgent;

    #[async_trait]
    impl crate::traits::ScheduledAgent for OkAgent {
        async fn chat(&mut self, query: &str) -> std::result::Result<String, String> {
            Ok(format!("ran: {query}"))
        }
    }

    struct FailAgent;

    #[async_trait]
    impl crate::traits::ScheduledAgent for FailAgent {
        async fn chat(&mut self, _query: &str) -> std::result::Result<String, String> {
            Err("provider exploded".to_string())
        }
    }

    struct Factory {
        fail: bool,
        created: AtomicUsize,
    }

    #[async_trait]
    impl AgentFactory for Factory {
        async fn create_agent(
            &self,
        ) -> std::result::Result<Box<dyn crate::traits::ScheduledAgent>, String> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Ok(Box::new(FailAgent))
            } else {
                Ok(Box::new(OkAgent))
            }
        }
    }

    struct RecordingSender {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl OutboundSender for RecordingSender {
        async fn send(
            &self,
            channel: &str,
            recipient: &str,
            text: &str,
        ) -> std::result::Result<(), String> {
            self.sent
                .lock()
                .await
                .push((channel.to_string(), recipient.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn scheduler(dir: &std::path::Path, fail: bool) -> (Arc<Scheduler>, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        });
        let factory = Arc::new(Factory {
            fail,
            created: AtomicUsize::new(0),
        });
        let s = Scheduler::new(
            dir.join("jobs.json"),
            dir.join("results"),
            factory,
            Some(sender.clone()),
        );
        (Arc::new(s), sender)
    }

    async fn force_due(handle: &SchedulerHandle, id: &str) {
        handle
            .store
            .lock()
            .await
            .update(id, |j| j.next_run = Some(Utc::now() - Duration::minutes(1)))
            .unwrap();
    }

    #[tokio::test]
    async fn one_shot_job_disables_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _) = scheduler(dir.path(), false);
        let handle = sched.handle();

        let job = handle.add_job("at 09:00", "say hi", "", "").await.unwrap();
        force_due(&handle, job.id.as_str()).await;
        sched.tick().await;

        let jobs = handle.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].enabled);
        assert!(jobs[0].last_run.is_some());
    }

    #[tokio::test]
    async fn recurring_job_reschedules() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _) = scheduler(dir.path(), false);
        let handle = sched.handle();

        let job = handle.add_job("every 1h", "ping", "", "").await.unwrap();
        force_due(&handle, job.id.as_str()).await;
        sched.tick().await;

        let jobs = handle.list_jobs().await;
        assert!(jobs[0].enabled);
        assert!(jobs[0].next_run.unwrap() > Utc::now());
        assert_eq!(jobs[0].failures, 0);
    }

    #[tokio::test]
    async fn delivery_goes_through_sender() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, sender) = scheduler(dir.path(), false);
        let handle = sched.handle();

        let job = handle
            .add_job("every 1h", "report status", "telegram", "12345")
            .await
            .unwrap();
        force_due(&handle, job.id.as_str()).await;
        sched.tick().await;

        let sent = sender.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "telegram");
        assert_eq!(sent[0].1, "12345");
        assert!(sent[0].2.contains("report status"));
    }

    #[tokio::test]
    async fn failure_backoff_then_disable() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _) = scheduler(dir.path(), true);
        let handle = sched.handle();

        let job = handle.add_job("every 1h", "flaky", "", "").await.unwrap();
        let id = job.id.as_str().to_string();

        for expected_failures in 1..=3u32 {
            force_due(&handle, &id).await;
            sched.tick().await;
            let jobs = handle.list_jobs().await;
            assert_eq!(jobs[0].failures, expected_failures);
        }

        let jobs = handle.list_jobs().await;
        assert!(!jobs[0].enabled, "job should disable at max_failures");
    }

    #[tokio::test]
    async fn no_delivery_target_writes_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _) = scheduler(dir.path(), false);
        let handle = sched.handle();

        let job = handle.add_job("every 1h", "ping", "", "").await.unwrap();
        force_due(&handle, job.id.as_str()).await;
        sched.tick().await;

        let results: Vec<_> = std::fs::read_dir(dir.path().join("results"))
            .unwrap()
            .collect();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn bad_schedule_rejected_at_add() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _) = scheduler(dir.path(), false);
        let err = sched
            .handle()
            .add_job("soonish", "q", "", "")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
    }
}
