//! OpenAI-compatible HTTP adapters.
//!
//! Talks to any endpoint that speaks the `/chat/completions` and
//! `/embeddings` wire format (OpenAI itself, local inference servers,
//! gateway proxies). Only full-completion mode is implemented here; token
//! streaming falls back to the trait default of one delta per reply.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::message::{Message, ResponseMeta};

use super::{ChatModel, ChatOutput, EmbeddingModel, ModelError};

const PROVIDER: &str = "openai";

#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl Endpoint {
    fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ModelError> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_error_message(&body)
                .unwrap_or_else(|| format!("status {status}"));
            return Err(ModelError::Provider {
                provider: PROVIDER,
                message: message.clone(),
                user_message: Some(message),
            });
        }
        let payload = response.text().await?;
        serde_json::from_str(&payload).map_err(|err| ModelError::Malformed(err.to_string()))
    }
}

fn parse_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(String::from)
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
}

/// Chat completions over an OpenAI-compatible endpoint.
pub struct OpenAiChatModel {
    endpoint: Endpoint,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Endpoint::new(base_url, api_key),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<ChatOutput, ModelError> {
        let wire_messages = messages
            .iter()
            .map(|m| {
                let (role, content) = m.render();
                WireMessage { role, content }
            })
            .collect();
        let request = ChatRequest {
            model: &self.model,
            messages: wire_messages,
        };
        let response: ChatResponse = self.endpoint.post_json("/chat/completions", &request).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Malformed("response carried no choices".to_string()))?;
        let content = choice.message.content.unwrap_or_default();

        let extra = response
            .id
            .map(|id| serde_json::json!({ "id": id }))
            .unwrap_or(serde_json::Value::Null);

        Ok(ChatOutput::new(
            content,
            ResponseMeta {
                model: response.model.or_else(|| Some(self.model.clone())),
                usage: response.usage.map(|u| {
                    crate::envelope::Usage::new(
                        u.prompt_tokens,
                        u.completion_tokens,
                        u.total_tokens,
                    )
                }),
                finish_reason: choice.finish_reason,
                extra,
            },
        ))
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Embeddings over an OpenAI-compatible endpoint.
pub struct OpenAiEmbeddingModel {
    endpoint: Endpoint,
    model: String,
}

impl OpenAiEmbeddingModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Endpoint::new(base_url, api_key),
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbeddingModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };
        let response: EmbeddingsResponse =
            self.endpoint.post_json("/embeddings", &request).await?;
        if response.data.len() != texts.len() {
            return Err(ModelError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn chat_completion_parses_content_usage_and_finish_reason() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(serde_json::json!({
                "id": "chatcmpl-abc",
                "model": "served-model",
                "choices": [{
                    "message": {"role": "assistant", "content": "merged"},
                    "finish_reason": "COMPLETE"
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            }));
        });

        let model = OpenAiChatModel::new(server.base_url(), None, "req-model");
        let output = model.complete(&[Message::user("merge?")]).await.unwrap();

        mock.assert();
        assert_eq!(output.content, "merged");
        assert_eq!(output.meta.model.as_deref(), Some("served-model"));
        assert_eq!(output.meta.finish_reason.as_deref(), Some("COMPLETE"));
        let usage = output.meta.usage.unwrap();
        assert_eq!(usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn provider_error_body_becomes_user_safe_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).json_body(serde_json::json!({
                "error": {"message": "rate limited, retry later"}
            }));
        });

        let model = OpenAiChatModel::new(server.base_url(), None, "m");
        let err = model.complete(&[Message::user("x")]).await.unwrap_err();
        assert_eq!(err.user_facing(), Some("rate limited, retry later"));
    }

    #[tokio::test]
    async fn embeddings_parse_in_input_order() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [
                    {"embedding": [0.1, 0.2]},
                    {"embedding": [0.3, 0.4]}
                ]
            }));
        });

        let model = OpenAiEmbeddingModel::new(server.base_url(), None, "embed");
        let vectors = model
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn embedding_count_mismatch_is_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200)
                .json_body(serde_json::json!({"data": [{"embedding": [0.5]}]}));
        });

        let model = OpenAiEmbeddingModel::new(server.base_url(), None, "embed");
        let err = model
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }
}
