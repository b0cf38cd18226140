//! Conversation messages and retrieved documents.
//!
//! A [`Message`] is either an ordinary chat entry (`Chat`) or the tagged
//! retrieval variant (`Retrieval`) that represents a retrieval result
//! uniformly, regardless of whether the underlying chat model natively
//! supports tool calls. Downstream code matches on the variant instead of
//! sniffing fabricated tool-call payloads.
//!
//! # Examples
//!
//! ```
//! use ragmill::message::{Message, Role};
//!
//! let user = Message::user("What is a staging store?");
//! assert!(user.is_from(Role::User));
//!
//! let json = serde_json::to_string(&user).unwrap();
//! let parsed: Message = serde_json::from_str(&json).unwrap();
//! assert_eq!(user, parsed);
//! ```

use serde::{Deserialize, Serialize};

use crate::envelope::Usage;

/// Role of a chat message sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved document: content plus source provenance and a relevance
/// score when the search strategy produced one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            score: None,
        }
    }

    #[must_use]
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

/// Response metadata attached to assistant messages produced by a model
/// call: token usage, finish reason, and any provider-specific leftovers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

/// A message in a conversation thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// An ordinary chat entry.
    Chat {
        role: Role,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<ResponseMeta>,
    },
    /// A retrieval result recorded into the message list so generation
    /// treats retrieval uniformly across providers.
    Retrieval {
        query: String,
        documents: Vec<Document>,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::Chat {
            role: Role::System,
            content: content.into(),
            meta: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::Chat {
            role: Role::User,
            content: content.into(),
            meta: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Chat {
            role: Role::Assistant,
            content: content.into(),
            meta: None,
        }
    }

    pub fn assistant_with_meta(content: impl Into<String>, meta: ResponseMeta) -> Self {
        Message::Chat {
            role: Role::Assistant,
            content: content.into(),
            meta: Some(meta),
        }
    }

    pub fn retrieval(query: impl Into<String>, documents: Vec<Document>) -> Self {
        Message::Retrieval {
            query: query.into(),
            documents,
        }
    }

    /// Returns `true` for `Chat` entries with the given role.
    #[must_use]
    pub fn is_from(&self, role: Role) -> bool {
        matches!(self, Message::Chat { role: r, .. } if *r == role)
    }

    #[must_use]
    pub fn is_retrieval(&self) -> bool {
        matches!(self, Message::Retrieval { .. })
    }

    /// Chat content, if this is a `Chat` entry.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::Chat { content, .. } => Some(content),
            Message::Retrieval { .. } => None,
        }
    }

    /// Response metadata, if this is an assistant entry produced by a model.
    #[must_use]
    pub fn meta(&self) -> Option<&ResponseMeta> {
        match self {
            Message::Chat { meta, .. } => meta.as_ref(),
            Message::Retrieval { .. } => None,
        }
    }

    /// Render into a `(role, content)` pair for wire adapters.
    ///
    /// `Retrieval` renders as a system-side context block so providers
    /// without native tool support still see the retrieved text.
    #[must_use]
    pub fn render(&self) -> (&'static str, String) {
        match self {
            Message::Chat { role, content, .. } => (role.as_str(), content.clone()),
            Message::Retrieval { query, documents } => {
                let mut block = format!("Retrieved context for \"{query}\":\n");
                for doc in documents {
                    block.push_str("\n[");
                    block.push_str(&doc.source);
                    block.push_str("]\n");
                    block.push_str(&doc.content);
                    block.push('\n');
                }
                ("system", block)
            }
        }
    }
}
