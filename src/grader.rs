//! Binary relevance grading of retrieved context.
//!
//! A chat-model call constrained to a single yes/no token. Fail closed: only
//! an exact (case-insensitive, trimmed) "yes" counts; any other reply, and
//! any model error, grades as "no" so ungraded context is never used.

use std::sync::Arc;

use crate::message::{Document, Message};
use crate::models::ChatModel;

const GRADING_PROMPT: &str = "You are a grader assessing whether retrieved context is relevant \
to a user question. Answer with the single word \"yes\" if the context is relevant, or \"no\" \
if it is not. Do not output anything else.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grade {
    Yes,
    No,
}

pub struct RelevanceGrader {
    chat: Arc<dyn ChatModel>,
    enabled: bool,
}

impl RelevanceGrader {
    pub fn new(chat: Arc<dyn ChatModel>, enabled: bool) -> Self {
        Self { chat, enabled }
    }

    /// Grade retrieved documents against the (rephrased) question.
    ///
    /// When grading is disabled the context is trusted unconditionally.
    pub async fn grade(&self, question: &str, documents: &[Document]) -> Grade {
        if !self.enabled {
            return Grade::Yes;
        }

        let context: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let messages = vec![
            Message::system(GRADING_PROMPT),
            Message::user(format!(
                "Question: {question}\n\nRetrieved context:\n{}",
                context.join("\n\n")
            )),
        ];

        match self.chat.complete(&messages).await {
            Ok(output) => {
                let grade = parse_grade(&output.content);
                tracing::debug!(raw = %output.content.trim(), ?grade, "graded retrieved context");
                grade
            }
            Err(err) => {
                tracing::warn!(error = %err, "grading call failed, failing closed");
                Grade::No
            }
        }
    }
}

pub(crate) fn parse_grade(raw: &str) -> Grade {
    if raw.trim().eq_ignore_ascii_case("yes") {
        Grade::Yes
    } else {
        Grade::No
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mock::MockChatModel;

    #[test]
    fn only_exact_yes_passes() {
        assert_eq!(parse_grade("yes"), Grade::Yes);
        assert_eq!(parse_grade("Yes"), Grade::Yes);
        assert_eq!(parse_grade("  YES \n"), Grade::Yes);
        assert_eq!(parse_grade("Yes."), Grade::No);
        assert_eq!(parse_grade("maybe"), Grade::No);
        assert_eq!(parse_grade("no"), Grade::No);
        assert_eq!(parse_grade(""), Grade::No);
        assert_eq!(parse_grade("yes, definitely"), Grade::No);
    }

    #[tokio::test]
    async fn disabled_grader_trusts_context() {
        let chat = Arc::new(MockChatModel::with_replies(vec![]));
        let grader = RelevanceGrader::new(chat.clone(), false);
        let grade = grader.grade("q", &[Document::new("ctx", "s")]).await;
        assert_eq!(grade, Grade::Yes);
        assert_eq!(chat.call_count(), 0, "disabled grading must not call the model");
    }

    #[tokio::test]
    async fn model_error_fails_closed() {
        let chat = Arc::new(MockChatModel::failing(None));
        let grader = RelevanceGrader::new(chat, true);
        let grade = grader.grade("q", &[Document::new("ctx", "s")]).await;
        assert_eq!(grade, Grade::No);
    }

    #[tokio::test]
    async fn grading_prompt_includes_question_and_context() {
        let chat = Arc::new(MockChatModel::with_replies(vec!["yes"]));
        let grader = RelevanceGrader::new(chat.clone(), true);
        let documents = vec![
            Document::new("first passage", "a.md"),
            Document::new("second passage", "b.md"),
        ];
        let grade = grader.grade("what is staging?", &documents).await;
        assert_eq!(grade, Grade::Yes);

        let calls = chat.calls();
        assert_eq!(calls.len(), 1);
        let user = calls[0][1].content().unwrap();
        assert!(user.contains("what is staging?"));
        assert!(user.contains("first passage"));
        assert!(user.contains("second passage"));
    }
}
