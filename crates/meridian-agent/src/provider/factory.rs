//! Provider construction from configuration.

use std::sync::Arc;

use meridian_core::config::{default_model_for, Config};
use meridian_core::CoreError;

use super::anthropic::AnthropicProvider;
use super::gemini::GeminiProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAiProvider;
use super::LlmProvider;

/// Build a provider by name. Unknown names are a configuration error and
/// refuse to start the component.
pub fn create_provider(
    provider: &str,
    model: &str,
    api_key: &str,
    base_url: Option<String>,
    ollama_base_url: &str,
) -> Result<Arc<dyn LlmProvider>, CoreError> {
    let model = if model.is_empty() {
        default_model_for(provider).to_string()
    } else {
        model.to_string()
    };

    match provider {
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            api_key.to_string(),
            model,
            base_url,
        ))),
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            api_key.to_string(),
            model,
            base_url,
        ))),
        "gemini" => Ok(Arc::new(GeminiProvider::new(
            api_key.to_string(),
            model,
            base_url,
        ))),
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            model,
            Some(ollama_base_url.to_string()),
        ))),
        other => Err(CoreError::Config(format!(
            "Unknown provider: {other}. Valid: openai, anthropic, gemini, ollama"
        ))),
    }
}

/// Build the globally configured provider.
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn LlmProvider>, CoreError> {
    let base_url = if config.base_url.is_empty() {
        None
    } else {
        Some(config.base_url.clone())
    };
    create_provider(
        &config.provider,
        &config.model,
        &config.api_key,
        base_url,
        &config.ollama_base_url,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_each_known_provider() {
        for name in ["openai", "anthropic", "gemini", "ollama"] {
            let p = create_provider(name, "", "key", None, "http://localhost:11434").unwrap();
            assert!(!p.model().is_empty(), "{name} should get a default model");
        }
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let err = match create_provider("grokinator", "m", "k", None, "") {
            Ok(_) => panic!("expected an error for unknown provider"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("Unknown provider"));
    }
}
