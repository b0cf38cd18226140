//! The normalized completion envelope returned at the end of every turn.
//!
//! Whatever path a turn takes through the state machine, the caller receives
//! one [`ChatCompletion`]: a stable, provider-agnostic shape with an id, a
//! creation timestamp, the model name, token-usage counters, and a finish
//! reason mapped into a small closed set. Provider-specific finish strings
//! are translated where known and passed through unchanged where not.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token accounting for one completion.
///
/// The counters are either all real numbers reported by the provider or all
/// [`Usage::UNAVAILABLE`] — never a mix. Adapters that cannot supply every
/// counter must supply none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl Usage {
    /// Sentinel value used for every counter when the provider reported none.
    pub const UNAVAILABLE: Usage = Usage {
        prompt_tokens: -1,
        completion_tokens: -1,
        total_tokens: -1,
    };

    pub fn new(prompt_tokens: i64, completion_tokens: i64, total_tokens: i64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    /// Returns `true` when the counters hold real numbers.
    #[must_use]
    pub fn is_available(&self) -> bool {
        *self != Self::UNAVAILABLE
    }
}

impl Default for Usage {
    fn default() -> Self {
        Self::UNAVAILABLE
    }
}

/// Finish reasons form a closed set; anything a provider reports outside of
/// it is carried through verbatim rather than guessed at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    /// Translate a provider-specific finish string into the closed set.
    ///
    /// Known aliases (e.g. `"COMPLETE"`, `"MAX_TOKENS"`) are mapped;
    /// unrecognized values pass through unchanged.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "stop" | "COMPLETE" => FinishReason::Stop,
            "length" | "MAX_TOKENS" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Other(raw) => raw,
        }
    }
}

impl Serialize for FinishReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FinishReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(FinishReason::from_provider(&raw))
    }
}

/// The assistant message carried inside a [`Choice`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChoiceMessage,
    pub finish_reason: FinishReason,
    pub logprobs: Option<serde_json::Value>,
}

/// One completed turn, normalized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub usage: Usage,
    pub choices: Vec<Choice>,
}

impl ChatCompletion {
    /// Build a single-choice completion for an assistant reply.
    pub fn assistant(
        model: impl Into<String>,
        content: impl Into<String>,
        usage: Usage,
        finish_reason: FinishReason,
    ) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            created: Utc::now().timestamp(),
            model: model.into(),
            usage,
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content: content.into(),
                },
                finish_reason,
                logprobs: None,
            }],
        }
    }

    /// Content of the first choice, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_translates_known_provider_strings() {
        assert_eq!(FinishReason::from_provider("COMPLETE"), FinishReason::Stop);
        assert_eq!(
            FinishReason::from_provider("MAX_TOKENS"),
            FinishReason::Length
        );
        assert_eq!(FinishReason::from_provider("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("length"), FinishReason::Length);
    }

    #[test]
    fn finish_reason_passes_unrecognized_values_through() {
        let reason = FinishReason::from_provider("SAFETY_BLOCKED");
        assert_eq!(reason, FinishReason::Other("SAFETY_BLOCKED".to_string()));
        assert_eq!(reason.as_str(), "SAFETY_BLOCKED");
    }

    #[test]
    fn unavailable_usage_fills_every_counter() {
        let usage = Usage::UNAVAILABLE;
        assert_eq!(usage.prompt_tokens, -1);
        assert_eq!(usage.completion_tokens, -1);
        assert_eq!(usage.total_tokens, -1);
        assert!(!usage.is_available());
    }

    #[test]
    fn assistant_completion_has_one_choice() {
        let completion =
            ChatCompletion::assistant("test-model", "hello", Usage::UNAVAILABLE, FinishReason::Stop);
        assert_eq!(completion.choices.len(), 1);
        assert_eq!(completion.content(), Some("hello"));
        assert_eq!(completion.model, "test-model");
        assert!(completion.id.starts_with("chatcmpl-"));
    }

    #[test]
    fn envelope_serializes_finish_reason_as_string() {
        let completion =
            ChatCompletion::assistant("m", "x", Usage::new(1, 2, 3), FinishReason::Length);
        let json = serde_json::to_value(&completion).unwrap();
        assert_eq!(json["choices"][0]["finish_reason"], "length");
        assert_eq!(json["usage"]["total_tokens"], 3);
    }
}
