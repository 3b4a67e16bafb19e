//! Persistent memory: cross-session notes and saved conversations.
//!
//! Layout under the data root:
//!   `memory/notes.json`                    key → {value, saved_at, session}
//!   `memory/conversations/<session>.json`  saved histories

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use meridian_core::paths::DataRoot;
use meridian_core::store::{read_json_or, write_json_atomic};
use meridian_core::types::SessionId;
use meridian_core::CoreError;

use crate::content::ChatMessage;
use crate::tools::{optional_str, required_str, Tool, ToolDeps, ToolError, ToolRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub value: String,
    pub saved_at: DateTime<Utc>,
    pub session: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedConversation {
    session_id: String,
    saved_at: DateTime<Utc>,
    message_count: usize,
    messages: Vec<ChatMessage>,
}

pub struct Memory {
    data_root: DataRoot,
    session_id: SessionId,
    notes: HashMap<String, Note>,
}

impl Memory {
    pub fn new(data_root: DataRoot) -> Self {
        if let Err(e) = data_root.ensure() {
            warn!(error = %e, "failed to create memory directories");
        }
        let notes = match read_json_or(&data_root.notes_path(), HashMap::new()) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to load notes, starting fresh");
                HashMap::new()
            }
        };
        let session_id = SessionId::new();
        info!(session = %session_id, notes = notes.len(), "memory initialized");
        Self {
            data_root,
            session_id,
            notes,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn save_notes(&self) -> Result<(), CoreError> {
        write_json_atomic(&self.data_root.notes_path(), &self.notes)
    }

    /// Store a key fact that persists across sessions.
    pub fn remember(&mut self, key: &str, value: &str) -> Result<String, CoreError> {
        self.notes.insert(
            key.to_string(),
            Note {
                value: value.to_string(),
                saved_at: Utc::now(),
                session: self.session_id.as_str().to_string(),
            },
        );
        self.save_notes()?;
        Ok(format!("Remembered: {key} = {value}"))
    }

    /// Recall one fact (with fuzzy key fallback) or list everything.
    pub fn recall(&self, key: Option<&str>) -> String {
        if self.notes.is_empty() {
            return "No saved memories.".to_string();
        }

        let Some(key) = key else {
            let mut keys: Vec<&String> = self.notes.keys().collect();
            keys.sort();
            let mut lines = vec![format!("Saved memories ({}):", self.notes.len())];
            for k in keys {
                lines.push(format!("  {k}: {}", self.notes[k].value));
            }
            return lines.join("\n");
        };

        if let Some(note) = self.notes.get(key) {
            return format!(
                "{key}: {} (saved {})",
                note.value,
                note.saved_at.format("%Y-%m-%d")
            );
        }

        let lower = key.to_lowercase();
        let mut matches: Vec<&String> = self
            .notes
            .keys()
            .filter(|k| k.to_lowercase().contains(&lower))
            .collect();
        matches.sort();
        if matches.is_empty() {
            return format!("No memory found for '{key}'.");
        }
        let mut lines = vec![format!("No exact match for '{key}'. Similar:")];
        for m in matches {
            lines.push(format!("  {m}: {}", self.notes[m].value));
        }
        lines.join("\n")
    }

    pub fn forget(&mut self, key: &str) -> Result<String, CoreError> {
        if self.notes.remove(key).is_some() {
            self.save_notes()?;
            Ok(format!("Forgot: {key}"))
        } else {
            Ok(format!("No memory found for '{key}'."))
        }
    }

    /// Save a conversation history under the current session id.
    pub fn save_conversation(&self, history: &[ChatMessage]) -> Result<String, CoreError> {
        if history.is_empty() {
            return Ok("Nothing to save.".to_string());
        }
        let data = SavedConversation {
            session_id: self.session_id.as_str().to_string(),
            saved_at: Utc::now(),
            message_count: history.len(),
            messages: history.to_vec(),
        };
        let path = self
            .data_root
            .conversations_dir()
            .join(format!("{}.json", self.session_id));
        write_json_atomic(&path, &data)?;
        Ok(format!(
            "Conversation saved ({} messages) to {}.json",
            history.len(),
            self.session_id
        ))
    }

    /// Load a saved conversation. Defaults to the most recently saved
    /// session. Ids are validated to stay inside the conversations
    /// directory.
    pub fn load_conversation(
        &self,
        session_id: Option<&str>,
    ) -> Result<Vec<ChatMessage>, CoreError> {
        let dir = self.data_root.conversations_dir();

        let path = match session_id {
            Some(id) => {
                if !is_safe_session_id(id) {
                    warn!(session = %id, "rejected suspicious session id");
                    return Ok(Vec::new());
                }
                dir.join(format!("{id}.json"))
            }
            None => {
                let Some(latest) = most_recent_file(&dir) else {
                    return Ok(Vec::new());
                };
                latest
            }
        };

        if !path.exists() {
            return Ok(Vec::new());
        }
        let saved: SavedConversation = meridian_core::store::read_json(&path)?;
        Ok(saved.messages)
    }

    pub fn list_sessions(&self) -> Vec<String> {
        let dir = self.data_root.conversations_dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut sessions: Vec<String> = entries
            .flatten()
            .filter_map(|e| {
                e.path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
            })
            .collect();
        sessions.sort();
        sessions
    }

    /// Human-readable listing of saved conversations.
    pub fn list_conversations(&self) -> String {
        let sessions = self.list_sessions();
        if sessions.is_empty() {
            return "No saved conversations.".to_string();
        }
        let mut lines = vec![format!("Saved conversations ({}):", sessions.len())];
        for session in sessions {
            let path = self
                .data_root
                .conversations_dir()
                .join(format!("{session}.json"));
            match meridian_core::store::read_json::<SavedConversation>(&path) {
                Ok(saved) => lines.push(format!(
                    "  {session}: {} messages (saved {})",
                    saved.message_count,
                    saved.saved_at.format("%Y-%m-%d %H:%M")
                )),
                Err(_) => lines.push(format!("  {session}: (unreadable)")),
            }
        }
        lines.join("\n")
    }
}

fn is_safe_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn most_recent_file(dir: &std::path::Path) -> Option<std::path::PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
        .max_by_key(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH)
        })
        .map(|e| e.path())
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

pub fn register_tools(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(Box::new(RememberTool {
        memory: deps.memory.clone(),
    }));
    registry.register(Box::new(RecallTool {
        memory: deps.memory.clone(),
    }));
    registry.register(Box::new(ForgetTool {
        memory: deps.memory.clone(),
    }));
    registry.register(Box::new(ListConversationsTool {
        memory: deps.memory.clone(),
    }));
}

struct RememberTool {
    memory: Arc<Mutex<Memory>>,
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Store a key fact that persists across sessions (e.g. user \
         preferences, project details)."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Short label for the fact." },
                "value": { "type": "string", "description": "The fact to remember." }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let key = required_str(&args, "key")?;
        let value = required_str(&args, "value")?;
        self.memory
            .lock()
            .await
            .remember(key, value)
            .map_err(|e| ToolError::new("StoreError", e.to_string()))
    }
}

struct RecallTool {
    memory: Arc<Mutex<Memory>>,
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Recall a remembered fact by key, or list all saved facts when no \
         key is given."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Key to look up (optional)." }
            },
            "required": []
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let key = optional_str(&args, "key");
        Ok(self.memory.lock().await.recall(key))
    }
}

struct ForgetTool {
    memory: Arc<Mutex<Memory>>,
}

#[async_trait]
impl Tool for ForgetTool {
    fn name(&self) -> &str {
        "forget"
    }

    fn description(&self) -> &str {
        "Remove a remembered fact by key."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Key to forget." }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let key = required_str(&args, "key")?;
        self.memory
            .lock()
            .await
            .forget(key)
            .map_err(|e| ToolError::new("StoreError", e.to_string()))
    }
}

struct ListConversationsTool {
    memory: Arc<Mutex<Memory>>,
}

#[async_trait]
impl Tool for ListConversationsTool {
    fn name(&self) -> &str {
        "list_conversations"
    }

    fn description(&self) -> &str {
        "List all saved conversation sessions with message counts."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        Ok(self.memory.lock().await.list_conversations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> (Memory, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let root = DataRoot::new(dir.path().join("data"));
        (Memory::new(root), dir)
    }

    #[test]
    fn remember_recall_round_trip() {
        let (mut mem, _dir) = memory();
        mem.remember("favorite_editor", "helix").unwrap();
        let out = mem.recall(Some("favorite_editor"));
        assert!(out.contains("helix"));
    }

    #[test]
    fn fuzzy_recall_suggests_similar_keys() {
        let (mut mem, _dir) = memory();
        mem.remember("project_deadline", "March 3").unwrap();
        let out = mem.recall(Some("deadline"));
        assert!(out.contains("Similar"));
        assert!(out.contains("project_deadline"));
    }

    #[test]
    fn forget_removes_note() {
        let (mut mem, _dir) = memory();
        mem.remember("temp", "x").unwrap();
        assert!(mem.forget("temp").unwrap().contains("Forgot"));
        assert!(mem.recall(Some("temp")).contains("No memory found"));
    }

    #[test]
    fn notes_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let root = DataRoot::new(dir.path().join("data"));
        {
            let mut mem = Memory::new(root.clone());
            mem.remember("color", "green").unwrap();
        }
        let mem = Memory::new(root);
        assert!(mem.recall(Some("color")).contains("green"));
    }

    #[test]
    fn conversation_save_and_load() {
        let (mem, _dir) = memory();
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        mem.save_conversation(&history).unwrap();

        let loaded = mem
            .load_conversation(Some(mem.session_id().as_str()))
            .unwrap();
        assert_eq!(loaded.len(), 2);

        let latest = mem.load_conversation(None).unwrap();
        assert_eq!(latest.len(), 2);
    }

    #[test]
    fn traversal_session_ids_rejected() {
        let (mem, _dir) = memory();
        let loaded = mem.load_conversation(Some("../../etc/passwd")).unwrap();
        assert!(loaded.is_empty());
    }
}
