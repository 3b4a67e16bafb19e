//! Known-APIs catalog: a name-keyed store of API endpoints with call
//! statistics and word-overlap search.
//!
//! Backed by `<data_root>/registry/catalog.json`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use meridian_core::store::{read_json_or, write_json_atomic};

use super::{optional_str, required_str, Tool, ToolDeps, ToolError, ToolRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogStats {
    pub calls: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub auth: String,
    #[serde(default)]
    pub stats: CatalogStats,
}

pub struct ApiCatalog {
    path: PathBuf,
    entries: HashMap<String, CatalogEntry>,
}

impl ApiCatalog {
    pub fn load(path: PathBuf) -> Self {
        let entries: HashMap<String, CatalogEntry> = match read_json_or(&path, HashMap::new()) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load catalog, starting fresh");
                HashMap::new()
            }
        };
        Self { path, entries }
    }

    fn save(&self) -> Result<(), ToolError> {
        write_json_atomic(&self.path, &self.entries)
            .map_err(|e| ToolError::new("StoreError", e.to_string()))
    }

    pub fn add(&mut self, entry: CatalogEntry) -> Result<(), ToolError> {
        self.entries.insert(entry.name.to_lowercase(), entry);
        self.save()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Word-overlap relevance scoring against name, tags, and description.
    pub fn search(&self, query: &str, category: Option<&str>) -> Vec<(&CatalogEntry, f64)> {
        let mut scored: Vec<(&CatalogEntry, f64)> = self
            .entries
            .values()
            .map(|e| (e, score_match(e, query, category)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    pub fn list(&self) -> Vec<&CatalogEntry> {
        let mut entries: Vec<&CatalogEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

fn score_match(entry: &CatalogEntry, query: &str, category: Option<&str>) -> f64 {
    let q = query.trim().to_lowercase();
    let words: Vec<&str> = q.split_whitespace().collect();
    let name = entry.name.to_lowercase();
    let desc = entry.description.to_lowercase();
    let cat = entry.category.to_lowercase();

    let mut score = 0.0;

    if let Some(wanted) = category {
        if cat != wanted.to_lowercase() {
            return 0.0;
        }
        score += 30.0;
    }

    if q == name {
        score += 100.0;
    } else if name.contains(&q) || q.contains(&name) {
        score += 50.0;
    }

    for tag in &entry.tags {
        let tag = tag.to_lowercase();
        if tag == q || words.contains(&tag.as_str()) {
            score += 40.0;
        } else if words.iter().any(|w| tag.contains(w) || w.contains(tag.as_str())) {
            score += 20.0;
        }
    }

    let desc_words: std::collections::HashSet<&str> = desc.split_whitespace().collect();
    score += words.iter().filter(|w| desc_words.contains(**w)).count() as f64 * 10.0;
    if desc.contains(&q) {
        score += 25.0;
    }

    score
}

pub fn register(registry: &mut ToolRegistry, deps: &ToolDeps) {
    let catalog = Arc::new(Mutex::new(ApiCatalog::load(deps.data_root.catalog_path())));
    registry.register(Box::new(RegistrySearchTool {
        catalog: catalog.clone(),
    }));
    registry.register(Box::new(RegistryAddTool {
        catalog: catalog.clone(),
    }));
    registry.register(Box::new(RegistryListTool { catalog }));
}

struct RegistrySearchTool {
    catalog: Arc<Mutex<ApiCatalog>>,
}

#[async_trait]
impl Tool for RegistrySearchTool {
    fn name(&self) -> &str {
        "registry_search"
    }

    fn description(&self) -> &str {
        "Search the known-APIs catalog by capability (e.g. 'weather', \
         'send sms'). Optionally filter by category."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What capability you need." },
                "category": { "type": "string", "description": "Optional category filter." }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let query = required_str(&args, "query")?;
        let category = optional_str(&args, "category");

        let catalog = self.catalog.lock().await;
        if catalog.is_empty() {
            return Ok("The API catalog is empty. Add entries with registry_add.".to_string());
        }

        let results = catalog.search(query, category);
        if results.is_empty() {
            let cats: std::collections::BTreeSet<&str> = catalog
                .list()
                .iter()
                .map(|e| {
                    if e.category.is_empty() {
                        "uncategorized"
                    } else {
                        e.category.as_str()
                    }
                })
                .collect();
            return Ok(format!(
                "No APIs matched '{query}'. Categories: {}\nTotal APIs in catalog: {}",
                cats.into_iter().collect::<Vec<_>>().join(", "),
                catalog.len()
            ));
        }

        let mut lines = vec![format!("APIs matching '{query}':")];
        for (entry, _score) in results.iter().take(5) {
            lines.push(format!(
                "  {} [{}] — {}\n    {} | calls: {}, errors: {}",
                entry.name,
                if entry.category.is_empty() { "uncategorized" } else { &entry.category },
                entry.description,
                if entry.base_url.is_empty() { "(no url)" } else { &entry.base_url },
                entry.stats.calls,
                entry.stats.errors,
            ));
        }
        Ok(lines.join("\n"))
    }
}

struct RegistryAddTool {
    catalog: Arc<Mutex<ApiCatalog>>,
}

#[async_trait]
impl Tool for RegistryAddTool {
    fn name(&self) -> &str {
        "registry_add"
    }

    fn description(&self) -> &str {
        "Register a new API in the catalog: name, description, category, \
         comma-separated tags, base URL, auth style."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Short unique name." },
                "description": { "type": "string", "description": "What the API does." },
                "category": { "type": "string", "description": "Category (optional)." },
                "tags": { "type": "string", "description": "Comma-separated tags (optional)." },
                "base_url": { "type": "string", "description": "API base URL (optional)." },
                "auth": { "type": "string", "description": "Auth style, e.g. 'api_key', 'oauth', 'none' (optional)." }
            },
            "required": ["name", "description"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let name = required_str(&args, "name")?;
        let description = required_str(&args, "description")?;
        let tags = optional_str(&args, "tags")
            .map(|t| {
                t.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let entry = CatalogEntry {
            name: name.to_string(),
            description: description.to_string(),
            category: optional_str(&args, "category").unwrap_or("").to_string(),
            tags,
            base_url: optional_str(&args, "base_url").unwrap_or("").to_string(),
            auth: optional_str(&args, "auth").unwrap_or("").to_string(),
            stats: CatalogStats::default(),
        };

        self.catalog.lock().await.add(entry)?;
        Ok(format!("Registered API '{name}' in the catalog."))
    }
}

struct RegistryListTool {
    catalog: Arc<Mutex<ApiCatalog>>,
}

#[async_trait]
impl Tool for RegistryListTool {
    fn name(&self) -> &str {
        "registry_list"
    }

    fn description(&self) -> &str {
        "List all APIs in the catalog with categories and call stats."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
        let catalog = self.catalog.lock().await;
        let entries = catalog.list();
        if entries.is_empty() {
            return Ok("The API catalog is empty.".to_string());
        }
        let mut lines = vec![format!("Known APIs ({}):", entries.len())];
        for e in entries {
            lines.push(format!(
                "  {}: {} [{}]",
                e.name,
                e.description,
                if e.category.is_empty() { "uncategorized" } else { &e.category }
            ));
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tool_deps;

    #[tokio::test]
    async fn add_then_search_then_list() {
        let (deps, _dir) = tool_deps();
        let mut reg = ToolRegistry::new();
        register(&mut reg, &deps);

        let added = reg
            .dispatch(
                "registry_add",
                serde_json::json!({
                    "name": "openweather",
                    "description": "Current weather and forecasts",
                    "category": "weather",
                    "tags": "weather, forecast",
                    "base_url": "https://api.openweathermap.org"
                }),
            )
            .await;
        assert!(added.contains("Registered"));

        let found = reg
            .dispatch("registry_search", serde_json::json!({"query": "weather"}))
            .await;
        assert!(found.contains("openweather"), "got: {found}");

        let listed = reg.dispatch("registry_list", serde_json::json!({})).await;
        assert!(listed.contains("openweather"));
    }

    #[tokio::test]
    async fn catalog_persists_across_loads() {
        let (deps, _dir) = tool_deps();
        let mut catalog = ApiCatalog::load(deps.data_root.catalog_path());
        catalog
            .add(CatalogEntry {
                name: "stripe".to_string(),
                description: "payments".to_string(),
                category: "payments".to_string(),
                tags: vec![],
                base_url: String::new(),
                auth: "api_key".to_string(),
                stats: CatalogStats::default(),
            })
            .unwrap();

        let reloaded = ApiCatalog::load(deps.data_root.catalog_path());
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn category_filter_is_hard() {
        let entry = CatalogEntry {
            name: "x".into(),
            description: "sms sending".into(),
            category: "messaging".into(),
            tags: vec!["sms".into()],
            base_url: String::new(),
            auth: String::new(),
            stats: CatalogStats::default(),
        };
        assert_eq!(score_match(&entry, "sms", Some("weather")), 0.0);
        assert!(score_match(&entry, "sms", Some("messaging")) > 0.0);
    }
}
