//! Web fetch tool.
//!
//! Redirects are followed manually: every hop re-validates against the SSRF
//! rules with a hard cap, so a public URL cannot bounce the runtime into a
//! metadata endpoint or a private network.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use meridian_safety::validate_url;

use super::{optional_u64, required_str, Tool, ToolDeps, ToolError, ToolRegistry};

/// Hard cap on manually followed redirects.
const MAX_REDIRECTS: usize = 5;

/// Seconds before an outbound fetch is abandoned.
const FETCH_TIMEOUT_SECS: u64 = 15;

const DEFAULT_MAX_LENGTH: usize = 5000;

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid pattern"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid pattern"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid pattern"));
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid pattern"));

pub fn register(registry: &mut ToolRegistry, _deps: &ToolDeps) {
    registry.register(Box::new(FetchUrlTool::new()));
}

pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        // Redirects are followed manually so each hop can be re-validated.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent("Mozilla/5.0 (compatible; Meridian/0.3)")
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch(&self, raw_url: &str, max_length: usize) -> Result<String, ToolError> {
        let mut url = match validate_url(raw_url) {
            Ok(u) => u,
            Err(e) => return Ok(format!("Error: {e}")),
        };

        for _hop in 0..=MAX_REDIRECTS {
            let resp = self
                .client
                .get(url.as_str())
                .send()
                .await
                .map_err(|e| ToolError::new("FetchError", e.to_string()))?;

            if resp.status().is_redirection() {
                let Some(location) = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                else {
                    return Ok("Error: redirect without a Location header.".to_string());
                };

                // Relative redirects resolve against the current hop.
                let next = url
                    .join(location)
                    .map_err(|_| ToolError::new("FetchError", "invalid redirect target"))?;

                url = match validate_url(next.as_str()) {
                    Ok(u) => u,
                    Err(e) => {
                        warn!(target = %next, "redirect target blocked");
                        return Ok(format!("Error: redirect blocked — {e}"));
                    }
                };
                continue;
            }

            if !resp.status().is_success() {
                return Ok(format!(
                    "Error fetching {url}: HTTP {}.",
                    resp.status().as_u16()
                ));
            }

            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let body = resp
                .text()
                .await
                .map_err(|e| ToolError::new("FetchError", e.to_string()))?;

            let mut text = if content_type.contains("text/html") {
                strip_html(&body)
            } else {
                body
            };
            if text.len() > max_length {
                let mut cut = max_length;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text = format!("{}\n... (truncated)", &text[..cut]);
            }
            return Ok(format!("Content from {url}:\n\n{text}"));
        }

        Ok(format!(
            "Error: too many redirects (limit {MAX_REDIRECTS}) fetching {raw_url}."
        ))
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its text content. HTML is stripped for \
         readability. Only public http(s) hosts are reachable."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL to fetch." },
                "max_length": { "type": "integer", "description": "Maximum content length (default 5000)." }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let url = required_str(&args, "url")?;
        let max_length = optional_u64(&args, "max_length").unwrap_or(DEFAULT_MAX_LENGTH as u64) as usize;
        self.fetch(url, max_length).await
    }
}

fn strip_html(html: &str) -> String {
    let no_scripts = SCRIPT_RE.replace_all(html, "");
    let no_styles = STYLE_RE.replace_all(&no_scripts, "");
    let no_tags = TAG_RE.replace_all(&no_styles, " ");
    SPACE_RE.replace_all(&no_tags, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_scheme_is_refused() {
        let tool = FetchUrlTool::new();
        let out = tool
            .execute(serde_json::json!({"url": "file:///etc/passwd"}))
            .await
            .unwrap();
        assert!(out.starts_with("Error:"));
    }

    #[tokio::test]
    async fn metadata_host_is_refused_without_request() {
        let tool = FetchUrlTool::new();
        let out = tool
            .execute(serde_json::json!({"url": "http://169.254.169.254/latest/"}))
            .await
            .unwrap();
        assert!(out.contains("blocked"));
    }

    #[tokio::test]
    async fn private_host_is_refused() {
        let tool = FetchUrlTool::new();
        let out = tool
            .execute(serde_json::json!({"url": "http://10.0.0.8/secrets"}))
            .await
            .unwrap();
        assert!(out.contains("blocked"));
    }

    #[test]
    fn html_stripping() {
        let html = "<html><head><style>p{}</style><script>x()</script></head>\
                    <body><p>Hello <b>world</b></p></body></html>";
        assert_eq!(strip_html(html), "Hello world");
    }
}
