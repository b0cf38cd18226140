//! Per-turn conversation orchestration.
//!
//! One turn is a sequential walk over an explicit phase enum, driven by a
//! plain loop — no graph runtime. The decision points (`Prepare`, `Grade`)
//! route through pure functions so the control flow is testable in
//! isolation:
//!
//! ```text
//! Prepare ──rag off──────────────► GenerateDirect ─┐
//!    │ rag on                                      │
//!    ▼                                             ▼
//! Retrieve ──► Grade ──no──► GenerateDirect ──► Respond ──► Done
//!                │ yes                             ▲
//!                ▼                                 │
//!           GenerateGrounded ──────────────────────┘
//! ```
//!
//! Turn state lives in a [`TurnState`] value created at turn start, passed
//! by reference through the phase handlers, and discarded at turn end; the
//! injected [`ConversationHistory`] is the only longer-lived object. A RAG
//! failure never crashes the conversation: retrieval degrades, grading
//! fails closed, and generation substitutes a user-safe apology when the
//! provider offers one.

use std::sync::Arc;

use crate::envelope::{ChatCompletion, FinishReason, Usage};
use crate::error::RagError;
use crate::grader::{Grade, RelevanceGrader};
use crate::history::ConversationHistory;
use crate::message::{Document, Message, Role};
use crate::models::{ChatModel, ModelError};
use crate::retriever::ContextRetriever;
use crate::settings::RagSettings;
use crate::stream::TokenSink;

/// Static, per-turn configuration supplied by the caller.
#[derive(Clone, Debug)]
pub struct TurnConfig {
    pub system_prompt: String,
    /// Prompt for rewriting a follow-up question into a standalone query.
    /// When absent, rewriting is skipped.
    pub rewrite_prompt: Option<String>,
    pub history_enabled: bool,
    pub rag: RagSettings,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            rewrite_prompt: None,
            history_enabled: true,
            rag: RagSettings::default(),
        }
    }
}

/// Transient state for one turn. Never persisted.
pub struct TurnState {
    /// Raw history plus the just-received user message.
    raw: Vec<Message>,
    /// Cleaned message list built by `Prepare`.
    cleaned: Vec<Message>,
    /// The retrieval query: rewritten when rewriting ran, verbatim otherwise.
    query: String,
    /// Retrieved documents; replaced wholesale each turn, never accumulated.
    documents: Vec<Document>,
    response: Option<ChatCompletion>,
    user_text: String,
}

impl TurnState {
    fn new(prior: Vec<Message>, user_text: &str) -> Self {
        let mut raw = prior;
        raw.push(Message::user(user_text));
        Self {
            raw,
            cleaned: Vec::new(),
            query: user_text.to_string(),
            documents: Vec::new(),
            response: None,
            user_text: user_text.to_string(),
        }
    }

    fn last_assistant(&self) -> Option<&Message> {
        self.cleaned
            .iter()
            .rev()
            .find(|m| m.is_from(Role::Assistant))
    }
}

/// The states of the per-turn machine. `Grade` and the branch out of
/// `Prepare` are decision points; `Respond` is the single terminal
/// producer; `Done` ends the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Prepare,
    Retrieve,
    Grade,
    GenerateGrounded,
    GenerateDirect,
    Respond,
    Done,
}

/// Routing out of `Prepare`: retrieval only when RAG is enabled.
fn route_after_prepare(rag: &RagSettings) -> Phase {
    if rag.enabled {
        Phase::Retrieve
    } else {
        Phase::GenerateDirect
    }
}

/// Routing out of `Grade`: relevant context is used, anything else is
/// discarded entirely.
fn route_after_grade(grade: Grade) -> Phase {
    match grade {
        Grade::Yes => Phase::GenerateGrounded,
        Grade::No => Phase::GenerateDirect,
    }
}

/// Executes turns against a fixed set of collaborators.
pub struct TurnEngine {
    chat: Arc<dyn ChatModel>,
    retriever: Arc<dyn ContextRetriever>,
    history: Arc<dyn ConversationHistory>,
    config: TurnConfig,
}

impl TurnEngine {
    pub fn builder() -> TurnEngineBuilder {
        TurnEngineBuilder::default()
    }

    /// Run one full-completion turn.
    pub async fn run(&self, thread_id: &str, user_text: &str) -> Result<ChatCompletion, RagError> {
        self.run_with_sink(thread_id, user_text, &TokenSink::disabled())
            .await
    }

    /// Run one turn, streaming visible token deltas into `sink`.
    ///
    /// The end-of-stream sentinel is emitted exactly once, whether the turn
    /// completes or fails.
    pub async fn run_with_sink(
        &self,
        thread_id: &str,
        user_text: &str,
        sink: &TokenSink,
    ) -> Result<ChatCompletion, RagError> {
        let prior = self.history.get(thread_id).await;
        let mut state = TurnState::new(prior, user_text);

        let result = self.drive(&mut state, sink).await;
        sink.finish();

        let response = result?;
        self.history
            .append(thread_id, Message::user(user_text))
            .await;
        if let Some(assistant) = state.last_assistant().cloned() {
            self.history.append(thread_id, assistant).await;
        }
        Ok(response)
    }

    async fn drive(
        &self,
        state: &mut TurnState,
        sink: &TokenSink,
    ) -> Result<ChatCompletion, RagError> {
        let mut phase = Phase::Prepare;
        while phase != Phase::Done {
            tracing::debug!(?phase, "entering turn phase");
            phase = match phase {
                Phase::Prepare => self.prepare(state),
                Phase::Retrieve => self.retrieve(state, sink).await,
                Phase::Grade => self.grade(state).await,
                Phase::GenerateGrounded => self.generate_grounded(state, sink).await?,
                Phase::GenerateDirect => self.generate_direct(state, sink).await?,
                Phase::Respond => self.respond(state)?,
                Phase::Done => unreachable!("loop exits before entering Done"),
            };
        }
        state
            .response
            .take()
            .ok_or_else(|| RagError::Completion("turn ended without a response".into()))
    }

    /// Build the cleaned message list: system/retrieval entries stripped,
    /// or — with history disabled — just the latest user message, then the
    /// configured system prompt up front.
    fn prepare(&self, state: &mut TurnState) -> Phase {
        let mut cleaned = vec![Message::system(&self.config.system_prompt)];
        if self.config.history_enabled {
            cleaned.extend(
                state
                    .raw
                    .iter()
                    .filter(|m| m.is_from(Role::User) || m.is_from(Role::Assistant))
                    .cloned(),
            );
        } else {
            cleaned.push(Message::user(&state.user_text));
        }
        state.cleaned = cleaned;
        route_after_prepare(&self.config.rag)
    }

    async fn retrieve(&self, state: &mut TurnState, sink: &TokenSink) -> Phase {
        let prior_messages = state.raw.len().saturating_sub(1);
        let should_rewrite = self.config.history_enabled
            && self.config.rewrite_prompt.is_some()
            && prior_messages > 1;

        let query = if should_rewrite {
            self.rewrite_query(state, sink).await
        } else {
            state.user_text.clone()
        };

        let documents = self.retriever.retrieve(&query).await;
        state.query = query;
        state.documents = documents.clone();
        state
            .cleaned
            .push(Message::retrieval(state.query.clone(), documents));
        Phase::Grade
    }

    /// Ask the model to fold prior turns into a standalone query. Falls back
    /// to the verbatim user text on model error or an empty rewrite.
    async fn rewrite_query(&self, state: &TurnState, sink: &TokenSink) -> String {
        let prompt = self.config.rewrite_prompt.as_deref().unwrap_or_default();
        let mut messages = vec![Message::system(prompt)];
        messages.extend(
            state.raw[..state.raw.len() - 1]
                .iter()
                .filter(|m| m.is_from(Role::User) || m.is_from(Role::Assistant))
                .cloned(),
        );
        messages.push(Message::user(&state.user_text));

        match self.chat.complete_streaming(&messages, &sink.hidden()).await {
            Ok(output) => {
                let rewritten = output.content.trim().to_string();
                if rewritten.is_empty() {
                    state.user_text.clone()
                } else {
                    rewritten
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "query rewrite failed, using verbatim question");
                state.user_text.clone()
            }
        }
    }

    async fn grade(&self, state: &mut TurnState) -> Phase {
        let grader = RelevanceGrader::new(self.chat.clone(), self.config.rag.grading);
        let grade = grader.grade(&state.query, &state.documents).await;
        route_after_grade(grade)
    }

    async fn generate_grounded(
        &self,
        state: &mut TurnState,
        sink: &TokenSink,
    ) -> Result<Phase, RagError> {
        let context = build_context_block(&state.documents);
        let messages = vec![
            Message::system(&self.config.system_prompt),
            Message::system(format!(
                "Answer using the following retrieved context.\n\n{context}"
            )),
            Message::user(&state.query),
        ];
        self.generate(state, sink, &messages).await?;
        Ok(Phase::Respond)
    }

    async fn generate_direct(
        &self,
        state: &mut TurnState,
        sink: &TokenSink,
    ) -> Result<Phase, RagError> {
        // Discarded retrieval context must not leak into direct generation.
        let messages: Vec<Message> = state
            .cleaned
            .iter()
            .filter(|m| !m.is_retrieval())
            .cloned()
            .collect();
        self.generate(state, sink, &messages).await?;
        Ok(Phase::Respond)
    }

    async fn generate(
        &self,
        state: &mut TurnState,
        sink: &TokenSink,
        messages: &[Message],
    ) -> Result<(), RagError> {
        match self.chat.complete_streaming(messages, sink).await {
            Ok(output) => {
                state
                    .cleaned
                    .push(Message::assistant_with_meta(output.content, output.meta));
                Ok(())
            }
            Err(err) => self.substitute_user_safe(state, sink, err),
        }
    }

    /// A provider error carrying a user-safe message becomes an apologetic
    /// assistant reply; anything else is surfaced to the caller.
    fn substitute_user_safe(
        &self,
        state: &mut TurnState,
        sink: &TokenSink,
        err: ModelError,
    ) -> Result<(), RagError> {
        match err.user_facing() {
            Some(user_message) => {
                let apology =
                    format!("I'm sorry, I wasn't able to complete that request: {user_message}");
                tracing::warn!(error = %err, "substituting user-safe reply for failed generation");
                sink.delta(&apology);
                state.cleaned.push(Message::assistant(apology));
                Ok(())
            }
            None => Err(RagError::Completion(err.to_string())),
        }
    }

    /// Normalize the last assistant message into the response envelope.
    fn respond(&self, state: &mut TurnState) -> Result<Phase, RagError> {
        let message = state
            .last_assistant()
            .ok_or_else(|| RagError::Completion("no assistant message was produced".into()))?;
        let content = message.content().unwrap_or_default().to_string();
        let meta = message.meta().cloned().unwrap_or_default();

        let model = meta
            .model
            .unwrap_or_else(|| self.chat.model_name().to_string());
        let usage = meta.usage.unwrap_or(Usage::UNAVAILABLE);
        let finish_reason = meta
            .finish_reason
            .as_deref()
            .map(FinishReason::from_provider)
            .unwrap_or(FinishReason::Stop);

        state.response = Some(ChatCompletion::assistant(model, content, usage, finish_reason));
        Ok(Phase::Done)
    }
}

fn build_context_block(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| format!("[{}]\n{}", d.source, d.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Builder for [`TurnEngine`].
#[derive(Default)]
pub struct TurnEngineBuilder {
    chat: Option<Arc<dyn ChatModel>>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    history: Option<Arc<dyn ConversationHistory>>,
    config: Option<TurnConfig>,
}

impl TurnEngineBuilder {
    #[must_use]
    pub fn chat(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(chat);
        self
    }

    #[must_use]
    pub fn retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    #[must_use]
    pub fn history(mut self, history: Arc<dyn ConversationHistory>) -> Self {
        self.history = Some(history);
        self
    }

    #[must_use]
    pub fn config(mut self, config: TurnConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// # Panics
    ///
    /// Panics if chat, retriever, or history were not provided.
    pub fn build(self) -> TurnEngine {
        TurnEngine {
            chat: self.chat.expect("TurnEngineBuilder requires a chat model"),
            retriever: self
                .retriever
                .expect("TurnEngineBuilder requires a retriever"),
            history: self
                .history
                .expect("TurnEngineBuilder requires a history store"),
            config: self.config.unwrap_or_default(),
        }
    }

    /// Non-panicking variant; returns `None` if a collaborator is missing.
    pub fn try_build(self) -> Option<TurnEngine> {
        Some(TurnEngine {
            chat: self.chat?,
            retriever: self.retriever?,
            history: self.history?,
            config: self.config.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_routes_on_the_rag_switch() {
        let mut rag = RagSettings::default();
        rag.enabled = true;
        assert_eq!(route_after_prepare(&rag), Phase::Retrieve);
        rag.enabled = false;
        assert_eq!(route_after_prepare(&rag), Phase::GenerateDirect);
    }

    #[test]
    fn grade_routes_yes_to_grounded_and_everything_else_away() {
        assert_eq!(route_after_grade(Grade::Yes), Phase::GenerateGrounded);
        assert_eq!(route_after_grade(Grade::No), Phase::GenerateDirect);
    }

    #[test]
    fn context_block_labels_every_source() {
        let block = build_context_block(&[
            Document::new("alpha", "a.md"),
            Document::new("beta", "b.md"),
        ]);
        assert!(block.contains("[a.md]\nalpha"));
        assert!(block.contains("[b.md]\nbeta"));
        assert!(block.contains("---"));
    }

    #[test]
    fn builder_without_collaborators_does_not_build() {
        assert!(TurnEngineBuilder::default().try_build().is_none());
    }
}
