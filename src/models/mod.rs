//! Model adapter seams.
//!
//! The engine never talks to a provider directly; callers hand it resolved
//! handles behind two traits:
//!
//! - [`ChatModel`]: `complete(messages) -> ChatOutput`, with an optional
//!   streaming variant that feeds a [`TokenSink`] as tokens are produced.
//! - [`EmbeddingModel`]: `embed(texts) -> vectors`.
//!
//! An OpenAI-compatible HTTP implementation lives in [`openai`];
//! deterministic in-process fakes live in [`mock`].

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Message, ResponseMeta};
use crate::stream::TokenSink;

/// Errors surfaced by model adapters.
///
/// `Provider` failures may carry a user-safe message; the generation phases
/// substitute it into an apologetic assistant reply instead of failing the
/// turn. Everything else is surfaced to the caller.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{provider} request failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        user_message: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// The user-safe message, when the provider supplied one.
    #[must_use]
    pub fn user_facing(&self) -> Option<&str> {
        match self {
            ModelError::Provider { user_message, .. } => user_message.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Transport(err.to_string())
    }
}

/// Output of one chat completion call.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatOutput {
    pub content: String,
    pub meta: ResponseMeta,
}

impl ChatOutput {
    pub fn new(content: impl Into<String>, meta: ResponseMeta) -> Self {
        Self {
            content: content.into(),
            meta,
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Name reported in the response envelope when the provider does not
    /// return one.
    fn model_name(&self) -> &str;

    async fn complete(&self, messages: &[Message]) -> Result<ChatOutput, ModelError>;

    /// Complete while feeding token deltas into `sink`.
    ///
    /// The default forwards to [`complete`](Self::complete) and emits the
    /// full text as a single delta; adapters with native streaming override
    /// this to emit incrementally.
    async fn complete_streaming(
        &self,
        messages: &[Message],
        sink: &TokenSink,
    ) -> Result<ChatOutput, ModelError> {
        let output = self.complete(messages).await?;
        sink.delta(&output.content);
        Ok(output)
    }
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embedding model identifier, recorded in store descriptors.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;
}
