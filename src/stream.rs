//! Token streaming for turn execution.
//!
//! Generation emits text fragments through a [`TokenSink`]; the sink carries
//! an explicit `visible` flag set by the emitting call site, so deltas from
//! internal model calls (query rewriting, grading) are suppressed at the
//! source instead of being filtered after the fact. The stream is terminated
//! by a single [`StreamFragment::Done`] sentinel once the turn completes.

/// One element of a turn's output stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFragment {
    /// A user-visible piece of assistant text.
    Delta(String),
    /// End-of-stream sentinel; emitted exactly once per turn.
    Done,
}

/// Write side of a turn's token stream.
#[derive(Clone)]
pub struct TokenSink {
    tx: Option<flume::Sender<StreamFragment>>,
    visible: bool,
}

impl TokenSink {
    /// A sink whose deltas reach the subscriber.
    pub fn new(tx: flume::Sender<StreamFragment>) -> Self {
        Self {
            tx: Some(tx),
            visible: true,
        }
    }

    /// A sink that discards everything; used for non-streaming turns.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            visible: false,
        }
    }

    /// A copy of this sink with deltas suppressed, for internal model calls
    /// whose output must never stream to the user.
    #[must_use]
    pub fn hidden(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            visible: false,
        }
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible && self.tx.is_some()
    }

    /// Emit a text delta. Dropped unless the sink is visible; a disconnected
    /// subscriber is not an error.
    pub fn delta(&self, text: &str) {
        if !self.visible {
            return;
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(StreamFragment::Delta(text.to_string()));
        }
    }

    /// Emit the end-of-stream sentinel. Sent even through hidden sinks so a
    /// subscriber always observes termination.
    pub(crate) fn finish(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(StreamFragment::Done);
        }
    }
}
