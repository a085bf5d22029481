use super::traits::Provider;
use super::types::CallBudget;
use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// How the API key is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    Bearer,
    /// Keyless endpoints (local inference servers).
    None,
}

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatibleProvider {
    display_name: &'static str,
    cached_completions_url: String,
    cached_auth_value: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        display_name: &'static str,
        base_url: &str,
        api_key: Option<&str>,
        auth_style: AuthStyle,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        let cached_auth_value = match auth_style {
            AuthStyle::Bearer => api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| format!("Bearer {k}")),
            AuthStyle::None => None,
        };
        Self {
            display_name,
            cached_completions_url: format!("{base}/v1/chat/completions"),
            cached_auth_value,
            client: super::build_provider_client(),
        }
    }

    fn build_request(system_prompt: Option<&str>, message: &str, budget: &CallBudget) -> ChatRequest {
        let capacity = if system_prompt.is_some() { 2 } else { 1 };
        let mut messages = Vec::with_capacity(capacity);

        if let Some(sys) = system_prompt {
            messages.push(Message {
                role: "system",
                content: sys.to_string(),
            });
        }
        messages.push(Message {
            role: "user",
            content: message.to_string(),
        });

        ChatRequest {
            model: budget.model.clone(),
            messages,
            temperature: budget.temperature,
            max_tokens: budget.max_output_tokens,
        }
    }
}

impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        self.display_name
    }

    fn complete<'a>(
        &'a self,
        system_prompt: Option<&'a str>,
        message: &'a str,
        budget: &'a CallBudget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let request = Self::build_request(system_prompt, message, budget);

            let mut builder = self.client.post(&self.cached_completions_url);
            if let Some(auth) = &self.cached_auth_value {
                builder = builder.header("Authorization", auth);
            }

            let response = builder
                .json(&request)
                .send()
                .await
                .with_context(|| format!("{} request failed", self.display_name))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("{} API error ({status}): {body}", self.display_name);
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .with_context(|| format!("parse {} response JSON", self.display_name))?;

            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .ok_or_else(|| {
                    anyhow::anyhow!("{} response contained no message content", self.display_name)
                })
        })
    }
}

/// Maps well-known compatible provider names to `(display_name, base_url)`.
pub fn compatible_provider_spec(name: &str) -> Option<(&'static str, &'static str)> {
    let spec = match name {
        "openai" => ("OpenAI", "https://api.openai.com"),
        "openrouter" => ("OpenRouter", "https://openrouter.ai/api"),
        "groq" => ("Groq", "https://api.groq.com/openai"),
        "mistral" => ("Mistral", "https://api.mistral.ai"),
        "deepseek" => ("DeepSeek", "https://api.deepseek.com"),
        "together" | "together-ai" => ("Together AI", "https://api.together.xyz"),
        "fireworks" | "fireworks-ai" => ("Fireworks AI", "https://api.fireworks.ai/inference"),
        "perplexity" => ("Perplexity", "https://api.perplexity.ai"),
        _ => return None,
    };
    Some(spec)
}
