//! Skills: lazily loaded markdown guides that teach the model
//! domain-specific workflows.
//!
//! Three-tier loading:
//!   Tier 1: name + description, always appended to the system prompt.
//!   Tier 2: full guide body, loaded on demand via `skill_get`.
//!   Tier 3: reference detail below the `<!-- tier3 -->` marker.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use regex::RegexBuilder;
use tracing::{debug, info, warn};

use crate::tools::{optional_u64, required_str, Tool, ToolDeps, ToolError, ToolRegistry};

const TIER3_MARKER: &str = "<!-- tier3 -->";

#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub tools: Vec<String>,
    pub trigger: String,
    pub tier2: String,
    pub tier3: String,
    pub source_path: String,
}

impl Skill {
    fn tier1_summary(&self) -> String {
        format!("- **{}**: {}", self.name, self.description)
    }
}

/// Scans skill directories and provides tiered access.
pub struct SkillLoader {
    dirs: Vec<PathBuf>,
    skills: RwLock<BTreeMap<String, Skill>>,
}

impl SkillLoader {
    /// Scan the default directories (`<data_root>/skills`, `./skills`) plus
    /// any extras.
    pub fn new(data_skills_dir: PathBuf, extra_dirs: Vec<PathBuf>) -> Self {
        let mut dirs = vec![data_skills_dir];
        let local = std::env::current_dir()
            .map(|d| d.join("skills"))
            .unwrap_or_else(|_| PathBuf::from("skills"));
        if local.exists() {
            dirs.push(local);
        }
        dirs.extend(extra_dirs);

        let loader = Self {
            dirs,
            skills: RwLock::new(BTreeMap::new()),
        };
        loader.rescan();
        loader
    }

    /// Re-read every skill directory. Safe to call at any time.
    pub fn rescan(&self) {
        let mut found = BTreeMap::new();
        for dir in &self.dirs {
            if !dir.exists() {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut paths: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().map(|x| x == "md").unwrap_or(false))
                .collect();
            paths.sort();
            for path in paths {
                match parse_skill(&path) {
                    Some(skill) => {
                        debug!(skill = %skill.name, path = %path.display(), "loaded skill");
                        found.insert(skill.name.clone(), skill);
                    }
                    None => warn!(path = %path.display(), "skipping unparsable skill file"),
                }
            }
        }
        info!(count = found.len(), dirs = self.dirs.len(), "skills loaded");
        *self.skills.write().unwrap_or_else(|p| p.into_inner()) = found;
    }

    pub fn get(&self, name: &str) -> Option<Skill> {
        self.skills
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    pub fn list(&self) -> Vec<Skill> {
        self.skills
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Short "Available Skills" index for the system prompt. Empty when no
    /// skills are loaded.
    pub fn tier1_block(&self) -> String {
        let skills = self.skills.read().unwrap_or_else(|p| p.into_inner());
        if skills.is_empty() {
            return String::new();
        }
        let mut lines = vec![
            "\n## Available Skills".to_string(),
            "You have access to specialized skill guides. Use `skill_get` to \
             load the full guide for any skill before attempting the task."
                .to_string(),
        ];
        for skill in skills.values() {
            lines.push(skill.tier1_summary());
        }
        lines.join("\n")
    }

    /// Names of skills whose trigger regex matches the message, in skill
    /// order. Invalid patterns are ignored.
    pub fn match_triggers(&self, message: &str) -> Vec<String> {
        let skills = self.skills.read().unwrap_or_else(|p| p.into_inner());
        skills
            .values()
            .filter(|s| !s.trigger.is_empty())
            .filter(|s| {
                RegexBuilder::new(&s.trigger)
                    .case_insensitive(true)
                    .build()
                    .map(|re| re.is_match(message))
                    .unwrap_or(false)
            })
            .map(|s| s.name.clone())
            .collect()
    }
}

/// Parse a frontmatter-prefixed markdown skill file.
fn parse_skill(path: &std::path::Path) -> Option<Skill> {
    let text = std::fs::read_to_string(path).ok()?;
    let rest = text.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let frontmatter = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n');

    let fm = parse_frontmatter(frontmatter);
    let name = fm.get("name")?.clone();
    let description = fm.get("description")?.clone();
    if name.is_empty() || description.is_empty() {
        return None;
    }

    let tools = fm
        .get("tools")
        .map(|raw| {
            raw.trim()
                .trim_matches(['[', ']'])
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let (tier2, tier3) = match body.split_once(TIER3_MARKER) {
        Some((t2, t3)) => (t2.trim().to_string(), t3.trim().to_string()),
        None => (body.trim().to_string(), String::new()),
    };

    Some(Skill {
        name,
        description,
        tools,
        trigger: fm.get("trigger").cloned().unwrap_or_default(),
        tier2,
        tier3,
        source_path: path.to_string_lossy().to_string(),
    })
}

/// Colon-separated `key: value` pairs, one per line, surrounding quotes
/// stripped.
fn parse_frontmatter(text: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim().trim_matches(['"', '\'']).to_string();
            result.insert(key.trim().to_string(), value);
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

pub fn register_tools(registry: &mut ToolRegistry, deps: &ToolDeps) {
    let Some(loader) = deps.skills.clone() else {
        return;
    };
    registry.register(Box::new(SkillGetTool {
        loader: loader.clone(),
    }));
    registry.register(Box::new(SkillListTool { loader }));
}

struct SkillGetTool {
    loader: Arc<SkillLoader>,
}

#[async_trait]
impl Tool for SkillGetTool {
    fn name(&self) -> &str {
        "skill_get"
    }

    fn description(&self) -> &str {
        "Load a skill guide that teaches you how to handle a specific task. \
         Call this BEFORE attempting a task that matches an available skill. \
         Tier 2 = full guide (default), tier 3 = guide + reference docs."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Skill name to load." },
                "tier": { "type": "integer", "description": "2 for the full guide, 3 to include reference docs.", "enum": [2, 3] }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let name = required_str(&args, "name")?;
        let tier = optional_u64(&args, "tier").unwrap_or(2);

        let Some(skill) = self.loader.get(name) else {
            let available: Vec<String> = self.loader.list().iter().map(|s| s.name.clone()).collect();
            return Ok(format!(
                "Skill '{name}' not found. Available: {}",
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            ));
        };

        if tier >= 3 && !skill.tier3.is_empty() {
            Ok(format!(
                "# {} (Full Guide + Reference)\n\n{}\n\n---\n\n{}",
                skill.name, skill.tier2, skill.tier3
            ))
        } else {
            Ok(format!("# {}\n\n{}", skill.name, skill.tier2))
        }
    }
}

struct SkillListTool {
    loader: Arc<SkillLoader>,
}

#[async_trait]
impl Tool for SkillListTool {
    fn name(&self) -> &str {
        "skill_list"
    }

    fn description(&self) -> &str {
        "List all available skill guides with their descriptions."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        let skills = self.loader.list();
        if skills.is_empty() {
            return Ok("No skills loaded. Add .md files to the skills directory.".to_string());
        }
        let mut lines = vec![format!("Available skills ({}):", skills.len())];
        for s in skills {
            let tools = if s.tools.is_empty() {
                String::new()
            } else {
                format!(" (tools: {})", s.tools.join(", "))
            };
            lines.push(format!("  {}: {}{tools}", s.name, s.description));
        }
        Ok(lines.join("\n"))
    }
}
