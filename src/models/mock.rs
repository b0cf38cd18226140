//! Deterministic in-process model fakes.
//!
//! Exposed publicly so downstream users can exercise the engine and the
//! ingestion pipeline without live providers. [`MockEmbeddingModel`] derives
//! vectors from content bytes, so identical text always embeds identically
//! and different text (almost) never collides — exactly the property the
//! dedup and retrieval tests rely on.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::envelope::Usage;
use crate::message::{Message, ResponseMeta};

use super::{ChatModel, ChatOutput, EmbeddingModel, ModelError};

/// Scripted chat model: pops pre-loaded replies in order and records every
/// request it receives.
pub struct MockChatModel {
    name: String,
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    fail: bool,
    failure_user_message: Option<String>,
}

impl MockChatModel {
    /// Replies are served first-in first-out; once exhausted the model
    /// answers with a fixed marker so tests notice over-consumption.
    pub fn with_replies(replies: Vec<&str>) -> Self {
        Self {
            name: "mock-chat".to_string(),
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            calls: Mutex::new(Vec::new()),
            usage: None,
            finish_reason: Some("stop".to_string()),
            fail: false,
            failure_user_message: None,
        }
    }

    /// A model whose every call fails, optionally with a user-safe message.
    pub fn failing(user_message: Option<&str>) -> Self {
        Self {
            name: "mock-chat".to_string(),
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            usage: None,
            finish_reason: None,
            fail: true,
            failure_user_message: user_message.map(String::from),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    #[must_use]
    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Every request this model has served, in order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[Message]) -> Result<ChatOutput, ModelError> {
        self.calls.lock().push(messages.to_vec());

        if self.fail {
            return Err(ModelError::Provider {
                provider: "mock",
                message: "scripted failure".to_string(),
                user_message: self.failure_user_message.clone(),
            });
        }

        let content = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| "<no scripted reply>".to_string());

        Ok(ChatOutput::new(
            content,
            ResponseMeta {
                model: Some(self.name.clone()),
                usage: self.usage,
                finish_reason: self.finish_reason.clone(),
                extra: serde_json::Value::Null,
            },
        ))
    }
}

/// Hash-derived embeddings: deterministic, content-sensitive, cheap.
pub struct MockEmbeddingModel {
    name: String,
    dimensions: usize,
    fail: bool,
}

impl MockEmbeddingModel {
    pub fn new() -> Self {
        Self {
            name: "mock-embed".to_string(),
            dimensions: 16,
            fail: false,
        }
    }

    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// An embedder whose every call fails; used to exercise the ingestion
    /// abort path.
    pub fn failing() -> Self {
        Self {
            name: "mock-embed".to_string(),
            dimensions: 16,
            fail: true,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        // FNV-style rolling hash spread across the dimensions; components
        // are signed so unrelated texts land near-orthogonal.
        let mut acc: u64 = 0xcbf2_9ce4_8422_2325;
        for (i, byte) in text.bytes().enumerate() {
            acc ^= u64::from(byte);
            acc = acc.wrapping_mul(0x0000_0100_0000_01b3);
            vector[i % self.dimensions] += (acc % 2000) as f32 / 1000.0 - 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingModel for MockEmbeddingModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if self.fail {
            return Err(ModelError::Provider {
                provider: "mock",
                message: "scripted embedding failure".to_string(),
                user_message: None,
            });
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_are_served_in_order() {
        let model = MockChatModel::with_replies(vec!["one", "two"]);
        let a = model.complete(&[Message::user("x")]).await.unwrap();
        let b = model.complete(&[Message::user("y")]).await.unwrap();
        assert_eq!(a.content, "one");
        assert_eq!(b.content, "two");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let model = MockEmbeddingModel::new();
        let inputs = vec![
            "hello world".to_string(),
            "goodbye world".to_string(),
            "hello world".to_string(),
        ];
        let first = model.embed(&inputs).await.unwrap();
        let second = model.embed(&inputs).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], first[2]);
        assert_ne!(first[0], first[1]);
    }

    #[tokio::test]
    async fn failing_chat_model_carries_user_message() {
        let model = MockChatModel::failing(Some("the model is overloaded"));
        let err = model.complete(&[Message::user("x")]).await.unwrap_err();
        assert_eq!(err.user_facing(), Some("the model is overloaded"));
    }
}
