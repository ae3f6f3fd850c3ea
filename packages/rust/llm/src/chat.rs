//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use medgraph_shared::{LlmConfig, MedGraphError, Result, resolve_api_key};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use crate::http::{Transport, endpoint};

/// A language model that turns a system role and a user prompt into text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion and return the reply text verbatim.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions over HTTP (DeepSeek by default).
pub struct ChatClient {
    transport: Transport,
    url: Url,
    model: String,
    temperature: f32,
}

impl ChatClient {
    /// Build a client from config, reading the API key from its env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(&config.api_key_env)?;
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(
                api_key,
                config.timeout_secs,
                config.max_retries,
                "llm request",
            )?,
            url: endpoint(&config.base_url, "chat/completions")?,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Override the base delay between retries.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.transport.set_backoff(backoff);
        self
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: user,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: false,
        };

        let response: ChatResponse = self.transport.post_json(&self.url, &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MedGraphError::Generation("model returned no completion".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> LlmConfig {
        LlmConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            max_retries: 2,
            ..LlmConfig::default()
        }
    }

    fn reply(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn complete_sends_roles_and_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-chat",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("hi there")))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(&config(&server), "test-key".into()).unwrap();
        let text = client.complete("be brief", "hello").await.unwrap();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("recovered")))
            .mount(&server)
            .await;

        let client = ChatClient::new(&config(&server), "k".into())
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        assert_eq!(client.complete("", "q").await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn rejected_credentials_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(&config(&server), "bad".into())
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let err = client.complete("", "q").await.unwrap_err();
        assert!(matches!(err, MedGraphError::Config { .. }));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply("late"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let cfg = LlmConfig {
            timeout_secs: 1,
            max_retries: 0,
            ..config(&server)
        };
        let client = ChatClient::new(&cfg, "k".into()).unwrap();
        let err = client.complete("", "q").await.unwrap_err();
        assert!(matches!(err, MedGraphError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_choices_is_a_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let client = ChatClient::new(&config(&server), "k".into()).unwrap();
        let err = client.complete("", "q").await.unwrap_err();
        assert!(matches!(err, MedGraphError::Generation(_)));
    }
}
