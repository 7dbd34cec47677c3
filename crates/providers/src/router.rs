//! Provider router: builds the configured LLM provider.

use std::sync::Arc;

use taskloop_config::AppConfig;
use taskloop_core::error::ProviderError;
use taskloop_core::provider::Provider;
use tracing::info;

use crate::openai_compat::OpenAiCompatProvider;

/// Build the provider named in the configuration.
///
/// `api_url` overrides the well-known base URL. Hosted providers need an API
/// key; local servers accept any.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = config.provider.as_str();
    let base_url = config
        .api_url
        .clone()
        .or_else(|| default_base_url(name))
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "unknown provider '{name}'; set api_url to use a custom endpoint"
            ))
        })?;

    let api_key = match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => key.to_string(),
        None if is_local(name) || config.api_url.is_some() => name.to_string(),
        None => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{name}' (set TASKLOOP_API_KEY or OPENAI_API_KEY)"
            )));
        }
    };

    info!(provider = name, base_url = %base_url, model = %config.model, "Provider configured");
    Ok(Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)))
}

fn is_local(provider_name: &str) -> bool {
    matches!(provider_name, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.into())
}
