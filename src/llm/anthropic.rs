use super::traits::Provider;
use super::types::CallBudget;
use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Native Anthropic messages-API client.
pub struct AnthropicProvider {
    /// Pre-computed auth: `("Authorization", "Bearer <token>")` or
    /// `("x-api-key", "<key>")`.
    cached_auth: (&'static str, String),
    cached_messages_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: Vec<ResponseContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Unsupported,
}

impl AnthropicProvider {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, None)
    }

    pub fn with_base_url(api_key: &str, base_url: Option<&str>) -> Self {
        let base = base_url
            .map_or("https://api.anthropic.com", |u| u.trim_end_matches('/'))
            .to_string();
        let key = api_key.trim();
        let cached_auth = if Self::is_setup_token(key) {
            ("Authorization", format!("Bearer {key}"))
        } else {
            ("x-api-key", key.to_string())
        };
        Self {
            cached_auth,
            cached_messages_url: format!("{base}/v1/messages"),
            client: super::build_provider_client(),
        }
    }

    fn is_setup_token(token: &str) -> bool {
        token.starts_with("sk-ant-oat01-")
    }

    fn build_request(
        system_prompt: Option<&str>,
        message: &str,
        budget: &CallBudget,
    ) -> ChatRequest {
        ChatRequest {
            model: budget.model.clone(),
            max_tokens: budget.max_output_tokens,
            system: system_prompt.map(ToString::to_string),
            messages: vec![Message {
                role: "user",
                content: message.to_string(),
            }],
            temperature: budget.temperature,
        }
    }
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn complete<'a>(
        &'a self,
        system_prompt: Option<&'a str>,
        message: &'a str,
        budget: &'a CallBudget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let request = Self::build_request(system_prompt, message, budget);
            let (auth_header, auth_value) = &self.cached_auth;

            let response = self
                .client
                .post(&self.cached_messages_url)
                .header(*auth_header, auth_value)
                .header("anthropic-version", "2023-06-01")
                .json(&request)
                .send()
                .await
                .context("Anthropic request failed")?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Anthropic API error ({status}): {body}");
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .context("parse Anthropic response JSON")?;

            let text = parsed
                .content
                .iter()
                .filter_map(|block| match block {
                    ResponseContentBlock::Text { text } => Some(text.as_str()),
                    ResponseContentBlock::Unsupported => None,
                })
                .collect::<Vec<_>>()
                .join("");

            if text.is_empty() {
                anyhow::bail!("Anthropic response contained no text blocks");
            }
            Ok(text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn completes_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "{\"decision\""},
                    {"type": "text", "text": ": \"keep\"}"}
                ]
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("sk-ant-test", Some(&server.uri()));
        let budget = CallBudget::new("claude-sonnet-4-5");
        let text = provider
            .complete(Some("classify"), "article text", &budget)
            .await
            .unwrap();
        assert_eq!(text, "{\"decision\": \"keep\"}");
    }

    #[tokio::test]
    async fn surfaces_api_error_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_base_url("sk-ant-test", Some(&server.uri()));
        let budget = CallBudget::new("claude-sonnet-4-5");
        let err = provider
            .complete(None, "article", &budget)
            .await
            .expect_err("529 should fail");
        assert!(err.to_string().contains("529"));
    }

    #[test]
    fn setup_token_uses_bearer_auth() {
        let provider = AnthropicProvider::new("sk-ant-oat01-abc");
        assert_eq!(provider.cached_auth.0, "Authorization");
        assert!(provider.cached_auth.1.starts_with("Bearer "));

        let provider = AnthropicProvider::new("sk-ant-regular");
        assert_eq!(provider.cached_auth.0, "x-api-key");
    }
}
