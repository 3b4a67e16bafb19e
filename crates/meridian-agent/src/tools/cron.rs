//! Scheduler tools: the model's surface for managing timed jobs.

use async_trait::async_trait;

use meridian_scheduler::SchedulerHandle;

use super::{optional_str, required_str, Tool, ToolDeps, ToolError, ToolRegistry};

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    let Some(handle) = deps.scheduler.clone() else {
        return;
    };
    registry.register(Box::new(CronAddTool {
        handle: handle.clone(),
    }));
    registry.register(Box::new(CronListTool {
        handle: handle.clone(),
    }));
    registry.register(Box::new(CronRemoveTool { handle }));
}

struct CronAddTool {
    handle: SchedulerHandle,
}

#[async_trait]
impl Tool for CronAddTool {
    fn name(&self) -> &str {
        "cron_add"
    }

    fn description(&self) -> &str {
        "Schedule a task. The agent runs the query on the given schedule and \
         delivers results to a channel or saves them to disk. Formats: \
         'every 6h', 'every day at 9am', 'every monday', 'at 3pm' (one-shot), \
         'cron 0 */6 * * *'."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "schedule": { "type": "string", "description": "Schedule expression (e.g. 'every 6h', 'every day at 9am', 'cron 0 */6 * * *')." },
                "query": { "type": "string", "description": "The question/task to run on each execution." },
                "channel": { "type": "string", "description": "Optional delivery channel (telegram, webchat, webhook, ...)." },
                "recipient": { "type": "string", "description": "Optional recipient id on that channel." }
            },
            "required": ["schedule", "query"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let schedule = required_str(&args, "schedule")?;
        let query = required_str(&args, "query")?;
        let channel = optional_str(&args, "channel").unwrap_or("");
        let recipient = optional_str(&args, "recipient").unwrap_or("");

        match self.handle.add_job(schedule, query, channel, recipient).await {
            Ok(job) => {
                let delivery = if channel.is_empty() {
                    "saved to file".to_string()
                } else {
                    format!("{channel}:{recipient}")
                };
                let next = job
                    .next_run
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "?".to_string());
                Ok(format!(
                    "Scheduled job {}:\n  Query: {query}\n  Schedule: {schedule}\n  Next run: {next}\n  Delivery: {delivery}",
                    job.id
                ))
            }
            Err(e) => Ok(format!("Error: {e}")),
        }
    }
}

struct CronListTool {
    handle: SchedulerHandle,
}

#[async_trait]
impl Tool for CronListTool {
    fn name(&self) -> &str {
        "cron_list"
    }

    fn description(&self) -> &str {
        "List scheduled jobs with status, next run time, and failure count."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        let jobs = self.handle.list_jobs().await;
        if jobs.is_empty() {
            return Ok("No scheduled jobs.".to_string());
        }

        let mut lines = vec![format!("Scheduled jobs ({}):", jobs.len())];
        for j in jobs {
            let status = if j.enabled { "ENABLED" } else { "DISABLED" };
            let next = j
                .next_run
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "?".to_string());
            let query: String = j.query.chars().take(60).collect();
            lines.push(format!(
                "  {} [{status}] {}\n    Query: {query}\n    Next: {next} | Failures: {}",
                j.id, j.schedule, j.failures
            ));
        }
        Ok(lines.join("\n"))
    }
}

struct CronRemoveTool {
    handle: SchedulerHandle,
}

#[async_trait]
impl Tool for CronRemoveTool {
    fn name(&self) -> &str {
        "cron_remove"
    }

    fn description(&self) -> &str {
        "Remove a scheduled job by its id (e.g. 'j-1a2b3c4d')."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "job_id": { "type": "string", "description": "The job id to remove." }
            },
            "required": ["job_id"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let job_id = required_str(&args, "job_id")?;
        match self.handle.remove_job(job_id).await {
            Ok(()) => Ok(format!("Removed job {job_id}.")),
            Err(e) => Ok(format!("Error: {e}")),
        }
    }
}
