use super::anthropic::AnthropicProvider;
use super::compatible::{AuthStyle, OpenAiCompatibleProvider, compatible_provider_spec};
use super::traits::Provider;
use super::types::ProviderSpec;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Resolve an API key for a provider from the spec and environment.
///
/// Resolution order:
/// 1. Explicitly provided key (trimmed, filtered if empty)
/// 2. Provider-specific environment variable
/// 3. Generic fallback variables (`NEWSGATE_API_KEY`, `API_KEY`)
pub fn resolve_api_key(name: &str, explicit_api_key: Option<&str>) -> Option<String> {
    if let Some(key) = explicit_api_key.map(str::trim).filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }

    let provider_env_candidates: Vec<&str> = match name {
        "anthropic" => vec!["ANTHROPIC_API_KEY"],
        "openai" => vec!["OPENAI_API_KEY"],
        "openrouter" => vec!["OPENROUTER_API_KEY"],
        "groq" => vec!["GROQ_API_KEY"],
        "mistral" => vec!["MISTRAL_API_KEY"],
        "deepseek" => vec!["DEEPSEEK_API_KEY"],
        "together" | "together-ai" => vec!["TOGETHER_API_KEY"],
        "fireworks" | "fireworks-ai" => vec!["FIREWORKS_API_KEY"],
        "perplexity" => vec!["PERPLEXITY_API_KEY"],
        _ => vec![],
    };

    for env_var in provider_env_candidates {
        if let Ok(value) = std::env::var(env_var) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    for env_var in ["NEWSGATE_API_KEY", "API_KEY"] {
        if let Ok(value) = std::env::var(env_var) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

fn requires_credential(name: &str) -> bool {
    name != "ollama" && !name.starts_with("custom:")
}

/// Lazily constructed, per-name cache of provider clients.
///
/// Owned by the router instance and injected where needed, so tests stay
/// hermetic. Client construction never touches the network; credential
/// presence and shape are checked first and fail fast with a
/// [`ConfigError`].
#[derive(Default)]
pub struct ProviderRegistry {
    clients: Mutex<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Startup-time credential check for one spec, no client built yet.
    pub fn validate(spec: &ProviderSpec) -> Result<(), ConfigError> {
        if !known_provider(&spec.name) {
            return Err(ConfigError::UnknownProvider(spec.name.clone()));
        }
        if !requires_credential(&spec.name) {
            return Ok(());
        }
        let key = resolve_api_key(&spec.name, spec.api_key.as_deref()).ok_or_else(|| {
            ConfigError::MissingCredential {
                provider: spec.name.clone(),
            }
        })?;
        check_key_shape(&spec.name, &key)
    }

    /// Pre-seed a client under `name`, bypassing construction. Used to
    /// inject in-memory providers in tests and local deployments.
    pub fn register(&self, name: impl Into<String>, client: Arc<dyn Provider>) {
        self.clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.into(), client);
    }

    /// True when a client is already cached under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(name)
    }

    /// Fetch the cached client for `spec`, building it on first use.
    pub fn get_or_build(&self, spec: &ProviderSpec) -> Result<Arc<dyn Provider>, ConfigError> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(client) = clients.get(&spec.name) {
            return Ok(Arc::clone(client));
        }

        Self::validate(spec)?;
        let key = resolve_api_key(&spec.name, spec.api_key.as_deref());
        let client = create_provider(&spec.name, key.as_deref())?;
        clients.insert(spec.name.clone(), Arc::clone(&client));
        Ok(client)
    }
}

fn known_provider(name: &str) -> bool {
    name == "anthropic"
        || name == "ollama"
        || compatible_provider_spec(name).is_some()
        || name
            .strip_prefix("custom:")
            .is_some_and(|url| !url.is_empty())
}

fn check_key_shape(provider: &str, key: &str) -> Result<(), ConfigError> {
    if key.chars().any(char::is_whitespace) {
        return Err(ConfigError::MalformedCredential {
            provider: provider.to_string(),
            reason: "contains whitespace".into(),
        });
    }
    if key.len() < 8 {
        return Err(ConfigError::MalformedCredential {
            provider: provider.to_string(),
            reason: "implausibly short".into(),
        });
    }
    Ok(())
}

fn create_provider(name: &str, api_key: Option<&str>) -> Result<Arc<dyn Provider>, ConfigError> {
    if name == "anthropic" {
        let key = api_key.unwrap_or_default();
        return Ok(Arc::new(AnthropicProvider::new(key)));
    }

    if name == "ollama" {
        return Ok(Arc::new(OpenAiCompatibleProvider::new(
            "Ollama",
            "http://localhost:11434",
            None,
            AuthStyle::None,
        )));
    }

    if let Some((display_name, base_url)) = compatible_provider_spec(name) {
        return Ok(Arc::new(OpenAiCompatibleProvider::new(
            display_name,
            base_url,
            api_key,
            AuthStyle::Bearer,
        )));
    }

    if let Some(base_url) = name.strip_prefix("custom:") {
        if base_url.is_empty() {
            return Err(ConfigError::Validation(
                "custom provider requires a URL, format: custom:https://your-api.com".into(),
            ));
        }
        return Ok(Arc::new(OpenAiCompatibleProvider::new(
            "Custom",
            base_url,
            api_key,
            if api_key.is_some() {
                AuthStyle::Bearer
            } else {
                AuthStyle::None
            },
        )));
    }

    Err(ConfigError::UnknownProvider(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ProviderSpec;

    #[test]
    fn resolve_api_key_explicit_takes_precedence() {
        let key = resolve_api_key("anthropic", Some("sk-explicit"));
        assert_eq!(key, Some("sk-explicit".to_string()));
    }

    #[test]
    fn resolve_api_key_trims_whitespace() {
        let key = resolve_api_key("anthropic", Some("  sk-padded  "));
        assert_eq!(key, Some("sk-padded".to_string()));
    }

    #[test]
    fn missing_credential_fails_validation() {
        let spec = ProviderSpec::primary("unknown-provider-xyz", "model");
        assert!(matches!(
            ProviderRegistry::validate(&spec),
            Err(ConfigError::UnknownProvider(_))
        ));

        let spec = ProviderSpec::primary("perplexity", "sonar").with_api_key("short");
        assert!(matches!(
            ProviderRegistry::validate(&spec),
            Err(ConfigError::MalformedCredential { .. })
        ));
    }

    #[test]
    fn malformed_credential_detected() {
        assert!(check_key_shape("openai", "sk with spaces").is_err());
        assert!(check_key_shape("openai", "sk-1").is_err());
        assert!(check_key_shape("openai", "sk-perfectly-fine-key").is_ok());
    }

    #[test]
    fn keyless_providers_validate_without_credentials() {
        let spec = ProviderSpec::fallback("ollama", "llama3.2");
        assert!(ProviderRegistry::validate(&spec).is_ok());
    }

    #[test]
    fn clients_are_cached_per_name() {
        let registry = ProviderRegistry::new();
        let spec = ProviderSpec::primary("anthropic", "claude-sonnet-4-5")
            .with_api_key("sk-ant-test-key");
        let first = registry.get_or_build(&spec).unwrap();
        let second = registry.get_or_build(&spec).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn custom_provider_requires_url() {
        let spec = ProviderSpec::fallback("custom:", "any");
        assert!(ProviderRegistry::validate(&spec).is_err());

        let spec = ProviderSpec::fallback("custom:https://proxy.example.com", "any");
        assert!(ProviderRegistry::validate(&spec).is_ok());
    }
}
