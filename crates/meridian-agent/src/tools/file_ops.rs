//! File operation tools. Every path goes through the sandbox first.

use async_trait::async_trait;
use regex::RegexBuilder;

use meridian_safety::PathSandbox;

use super::{optional_str, optional_u64, required_str, Tool, ToolDeps, ToolError, ToolRegistry};

/// Maximum characters returned by any file tool, to avoid flooding the
/// context window.
const MAX_OUTPUT_CHARS: usize = 30_000;

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    registry.register(Box::new(ReadFileTool {
        sandbox: deps.sandbox.clone(),
    }));
    registry.register(Box::new(WriteFileTool {
        sandbox: deps.sandbox.clone(),
    }));
    registry.register(Box::new(ListDirTool {
        sandbox: deps.sandbox.clone(),
    }));
    registry.register(Box::new(SearchFilesTool {
        sandbox: deps.sandbox.clone(),
    }));
}

fn truncate(text: String) -> String {
    if text.len() > MAX_OUTPUT_CHARS {
        let mut cut = MAX_OUTPUT_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "{}\n\n[output truncated at {MAX_OUTPUT_CHARS} characters]",
            &text[..cut]
        )
    } else {
        text
    }
}

struct ReadFileTool {
    sandbox: PathSandbox,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Optionally limit to a line range with \
         `offset` (1-based first line) and `limit` (number of lines)."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file." },
                "offset": { "type": "integer", "description": "1-based line to start from (optional)." },
                "limit": { "type": "integer", "description": "Maximum lines to return (optional)." }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let resolved = self
            .sandbox
            .validate(path, "read")
            .map_err(|e| ToolError::new("PathBlocked", e))?;

        let content = std::fs::read_to_string(&resolved).map_err(|e| ToolError::io(&e))?;

        let offset = optional_u64(&args, "offset").map(|v| (v as usize).saturating_sub(1));
        let limit = optional_u64(&args, "limit").map(|v| v as usize);

        let result = if offset.is_some() || limit.is_some() {
            let lines: Vec<&str> = content.lines().skip(offset.unwrap_or(0)).collect();
            let lines = match limit {
                Some(n) => &lines[..n.min(lines.len())],
                None => &lines[..],
            };
            lines.join("\n")
        } else {
            content
        };

        Ok(truncate(result))
    }
}

struct WriteFileTool {
    sandbox: PathSandbox,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. \
         Overwrites existing content."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to write." },
                "content": { "type": "string", "description": "Content to write." }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let resolved = self
            .sandbox
            .validate(path, "write")
            .map_err(|e| ToolError::new("PathBlocked", e))?;

        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ToolError::io(&e))?;
        }
        std::fs::write(&resolved, content).map_err(|e| ToolError::io(&e))?;
        Ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            resolved.display()
        ))
    }
}

struct ListDirTool {
    sandbox: PathSandbox,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory (name, kind, size)."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list. Defaults to the current directory." }
            },
            "required": []
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let path = optional_str(&args, "path").unwrap_or(".");
        let resolved = self
            .sandbox
            .validate(path, "list")
            .map_err(|e| ToolError::new("PathBlocked", e))?;

        let mut entries: Vec<String> = Vec::new();
        let read = std::fs::read_dir(&resolved).map_err(|e| ToolError::io(&e))?;
        for entry in read.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let meta = entry.metadata().ok();
            let kind = match &meta {
                Some(m) if m.is_dir() => "dir",
                Some(_) => "file",
                None => "?",
            };
            let size = meta.map(|m| m.len()).unwrap_or(0);
            entries.push(format!("{kind:4} {size:>10}  {name}"));
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(format!("{} is empty.", resolved.display()));
        }
        Ok(truncate(entries.join("\n")))
    }
}

struct SearchFilesTool {
    sandbox: PathSandbox,
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search files under a directory for a regex pattern. Returns \
         matching lines as path:line:text."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex to search for (case-insensitive)." },
                "path": { "type": "string", "description": "Directory to search. Defaults to the current directory." },
                "max_results": { "type": "integer", "description": "Maximum matches to return (default 50)." }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        let path = optional_str(&args, "path").unwrap_or(".");
        let max_results = optional_u64(&args, "max_results").unwrap_or(50) as usize;

        let resolved = self
            .sandbox
            .validate(path, "search")
            .map_err(|e| ToolError::new("PathBlocked", e))?;

        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ToolError::new("InvalidPattern", e.to_string()))?;

        let mut matches = Vec::new();
        search_dir(&resolved, &re, &mut matches, max_results);

        if matches.is_empty() {
            return Ok(format!("No matches for '{pattern}'."));
        }
        Ok(truncate(matches.join("\n")))
    }
}

fn search_dir(
    dir: &std::path::Path,
    re: &regex::Regex,
    matches: &mut Vec<String>,
    max_results: usize,
) {
    if matches.len() >= max_results {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if matches.len() >= max_results {
            return;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == "target" || name == "node_modules" {
            continue;
        }
        if path.is_dir() {
            search_dir(&path, re, matches, max_results);
        } else if let Ok(content) = std::fs::read_to_string(&path) {
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(format!("{}:{}:{}", path.display(), i + 1, line.trim()));
                    if matches.len() >= max_results {
                        return;
                    }
                }
            }
        }
    }
}
