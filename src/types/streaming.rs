//! Types for streaming responses.

/// Events produced by a backend stream.
///
/// A well-formed stream is zero or more `Delta`s followed by exactly one `Done`.
/// Failures are carried as `Err` items of the surrounding stream instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A chunk of generated text, in upstream order.
    Delta { text: String },
    /// The upstream finished cleanly.
    Done,
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        StreamEvent::Delta { text: text.into() }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done)
    }
}
