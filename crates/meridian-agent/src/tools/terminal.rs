//! Terminal tools: one-shot shell commands and background processes.
//!
//! Every command passes the safety gate before a subprocess is spawned.
//! Foreground commands are killed at their timeout; background processes
//! are never implicitly killed; the model stops them through
//! `background_kill`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use meridian_safety::CommandGate;

use super::{optional_u64, required_str, Tool, ToolDeps, ToolError, ToolRegistry};

/// Default and ceiling for foreground timeouts (seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 600;

/// Maximum concurrent background processes.
const MAX_BACKGROUND: usize = 10;

/// Rolling output buffer per background session (lines).
const OUTPUT_BUFFER_LINES: usize = 5000;

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    let sessions = Arc::new(BackgroundSessions::default());
    registry.register(Box::new(RunCommandTool {
        gate: deps.gate.clone(),
    }));
    registry.register(Box::new(RunBackgroundTool {
        gate: deps.gate.clone(),
        sessions: sessions.clone(),
    }));
    registry.register(Box::new(BackgroundOutputTool {
        sessions: sessions.clone(),
    }));
    registry.register(Box::new(BackgroundKillTool {
        sessions: sessions.clone(),
    }));
    registry.register(Box::new(BackgroundListTool { sessions }));
}

struct RunCommandTool {
    gate: CommandGate,
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout, stderr, and the exit \
         code. Destructive commands require confirmation and are blocked \
         otherwise. Default timeout 30 seconds."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to run via sh -c." },
                "timeout": { "type": "integer", "description": "Timeout in seconds (default 30, max 600)." }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let command = required_str(&args, "command")?;
        if let Err(blocked) = self.gate.authorize(command) {
            return Ok(blocked);
        }

        let timeout_secs = optional_u64(&args, "timeout")
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::new("SpawnError", e.to_string()))?;

        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await;

        let output = match waited {
            Ok(result) => result.map_err(|e| ToolError::io(&e))?,
            Err(_) => {
                return Ok(format!(
                    "Error: command timed out after {timeout_secs}s and was terminated."
                ));
            }
        };

        let mut text = String::new();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.is_empty() {
            text.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]\n");
            text.push_str(&stderr);
        }
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            text.push_str(&format!("\n[exit code: {code}]"));
        }
        if text.is_empty() {
            text = "(no output)".to_string();
        }
        Ok(text)
    }
}

/// A background shell process with a rolling captured-output buffer.
struct BackgroundSession {
    command: String,
    started: Instant,
    child: Arc<Mutex<tokio::process::Child>>,
    output: Arc<std::sync::Mutex<Vec<String>>>,
}

impl BackgroundSession {
    async fn alive(&self) -> bool {
        self.child.lock().await.try_wait().ok().flatten().is_none()
    }

    fn tail(&self, last_n: usize) -> String {
        let lines = self.output.lock().unwrap_or_else(|p| p.into_inner());
        let start = lines.len().saturating_sub(last_n);
        lines[start..].join("\n")
    }
}

#[derive(Default)]
struct BackgroundSessions {
    counter: AtomicU64,
    map: Mutex<HashMap<String, Arc<BackgroundSession>>>,
}

impl BackgroundSessions {
    async fn alive_count(&self) -> usize {
        let map = self.map.lock().await;
        let mut count = 0;
        for session in map.values() {
            if session.alive().await {
                count += 1;
            }
        }
        count
    }
}

fn spawn_reader(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    prefix: &'static str,
    output: Arc<std::sync::Mutex<Vec<String>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut buf = output.lock().unwrap_or_else(|p| p.into_inner());
            if buf.len() >= OUTPUT_BUFFER_LINES {
                buf.remove(0);
            }
            buf.push(format!("{prefix}{line}"));
        }
    });
}

struct RunBackgroundTool {
    gate: CommandGate,
    sessions: Arc<BackgroundSessions>,
}

#[async_trait]
impl Tool for RunBackgroundTool {
    fn name(&self) -> &str {
        "run_background"
    }

    fn description(&self) -> &str {
        "Start a long-running shell command in the background (dev servers, \
         watchers). Returns a session id for checking output or killing the \
         process later."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to run via sh -c." }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let command = required_str(&args, "command")?;
        if let Err(blocked) = self.gate.authorize(command) {
            return Ok(blocked);
        }

        if self.sessions.alive_count().await >= MAX_BACKGROUND {
            return Ok(format!(
                "Error: maximum of {MAX_BACKGROUND} background processes reached. Kill one first."
            ));
        }

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ToolError::new("SpawnError", e.to_string()))?;

        let output = Arc::new(std::sync::Mutex::new(Vec::new()));
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, "", output.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, "[stderr] ", output.clone());
        }

        let sid = format!("bg-{}", self.sessions.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let session = Arc::new(BackgroundSession {
            command: command.to_string(),
            started: Instant::now(),
            child: Arc::new(Mutex::new(child)),
            output,
        });
        self.sessions.map.lock().await.insert(sid.clone(), session);

        Ok(format!("Started background process {sid}: {command}"))
    }
}

struct BackgroundOutputTool {
    sessions: Arc<BackgroundSessions>,
}

#[async_trait]
impl Tool for BackgroundOutputTool {
    fn name(&self) -> &str {
        "background_output"
    }

    fn description(&self) -> &str {
        "Get recent output from a background process by session id."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string", "description": "Session id returned by run_background." },
                "lines": { "type": "integer", "description": "How many trailing lines (default 100)." }
            },
            "required": ["session_id"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let sid = required_str(&args, "session_id")?;
        let last_n = optional_u64(&args, "lines").unwrap_or(100) as usize;

        let map = self.sessions.map.lock().await;
        let Some(session) = map.get(sid) else {
            return Ok(format!("Error: no background session '{sid}'."));
        };

        let status = if session.alive().await {
            "running".to_string()
        } else {
            let code = session
                .child
                .lock()
                .await
                .try_wait()
                .ok()
                .flatten()
                .and_then(|s| s.code())
                .unwrap_or(-1);
            format!("exited ({code})")
        };

        let tail = session.tail(last_n);
        let shown = if tail.is_empty() {
            "(no output yet)"
        } else {
            tail.as_str()
        };
        Ok(format!(
            "[{sid}] {} — {status}, {}s elapsed\n{shown}",
            session.command,
            session.started.elapsed().as_secs(),
        ))
    }
}

struct BackgroundKillTool {
    sessions: Arc<BackgroundSessions>,
}

#[async_trait]
impl Tool for BackgroundKillTool {
    fn name(&self) -> &str {
        "background_kill"
    }

    fn description(&self) -> &str {
        "Terminate a background process by session id."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string", "description": "Session id returned by run_background." }
            },
            "required": ["session_id"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let sid = required_str(&args, "session_id")?;
        let mut map = self.sessions.map.lock().await;
        let Some(session) = map.remove(sid) else {
            return Ok(format!("Error: no background session '{sid}'."));
        };
        let _ = session.child.lock().await.start_kill();
        Ok(format!("Killed background process {sid}."))
    }
}

struct BackgroundListTool {
    sessions: Arc<BackgroundSessions>,
}

#[async_trait]
impl Tool for BackgroundListTool {
    fn name(&self) -> &str {
        "background_list"
    }

    fn description(&self) -> &str {
        "List background processes with their status and elapsed time."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        let map = self.sessions.map.lock().await;
        if map.is_empty() {
            return Ok("No background processes.".to_string());
        }
        let mut lines = Vec::new();
        for (sid, session) in map.iter() {
            let status = if session.alive().await { "running" } else { "exited" };
            lines.push(format!(
                "{sid} [{status}] {}s — {}",
                session.started.elapsed().as_secs(),
                session.command
            ));
        }
        lines.sort();
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tool_deps;

    #[tokio::test]
    async fn run_command_captures_output() {
        let (deps, _dir) = tool_deps();
        let mut reg = ToolRegistry::new();
        register(&mut reg, &deps);

        let out = reg
            .dispatch("run_command", serde_json::json!({"command": "echo hello"}))
            .await;
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn run_command_reports_exit_code() {
        let (deps, _dir) = tool_deps();
        let mut reg = ToolRegistry::new();
        register(&mut reg, &deps);

        let out = reg
            .dispatch("run_command", serde_json::json!({"command": "exit 3"}))
            .await;
        assert!(out.contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn dangerous_command_is_blocked_without_callback() {
        let (deps, _dir) = tool_deps();
        let mut reg = ToolRegistry::new();
        register(&mut reg, &deps);

        let out = reg
            .dispatch(
                "run_command",
                serde_json::json!({"command": "rm${IFS}-rf /tmp/victim"}),
            )
            .await;
        assert!(out.starts_with("Blocked:"), "got: {out}");
    }

    #[tokio::test]
    async fn foreground_timeout_terminates() {
        let (deps, _dir) = tool_deps();
        let mut reg = ToolRegistry::new();
        register(&mut reg, &deps);

        let out = reg
            .dispatch(
                "run_command",
                serde_json::json!({"command": "sleep 5", "timeout": 1}),
            )
            .await;
        assert!(out.contains("timed out"));
    }

    #[tokio::test]
    async fn background_session_lifecycle() {
        let (deps, _dir) = tool_deps();
        let mut reg = ToolRegistry::new();
        register(&mut reg, &deps);

        let started = reg
            .dispatch(
                "run_background",
                serde_json::json!({"command": "echo bg-line && sleep 30"}),
            )
            .await;
        assert!(started.contains("bg-1"), "got: {started}");

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let output = reg
            .dispatch(
                "background_output",
                serde_json::json!({"session_id": "bg-1"}),
            )
            .await;
        assert!(output.contains("bg-line"), "got: {output}");

        let listed = reg
            .dispatch("background_list", serde_json::json!({}))
            .await;
        assert!(listed.contains("bg-1"));

        let killed = reg
            .dispatch("background_kill", serde_json::json!({"session_id": "bg-1"}))
            .await;
        assert!(killed.contains("Killed"));

        let missing = reg
            .dispatch(
                "background_output",
                serde_json::json!({"session_id": "bg-1"}),
            )
            .await;
        assert!(missing.contains("no background session"));
    }
}
