//! Generation results: a buffered string or a lazy stream of chunks.

use crate::{Error, StreamEvent};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Boxed stream of backend events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// How the caller wants the result delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Buffered,
    Streaming,
}

/// A lazy, finite, non-restartable sequence of text chunks.
///
/// Ends with `StreamEvent::Done` on success or an `Err` item on failure.
pub struct TokenStream {
    stream: EventStream,
}

impl TokenStream {
    /// Create a new token stream from a stream of events.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StreamEvent, Error>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
        }
    }

    /// Drain the stream and concatenate its deltas.
    ///
    /// Fails if the stream reports an error or ends without `Done`.
    pub async fn text(mut self) -> Result<String, Error> {
        let mut text = String::new();
        while let Some(event) = self.stream.next().await {
            match event? {
                StreamEvent::Delta { text: delta } => text.push_str(&delta),
                StreamEvent::Done => return Ok(text),
            }
        }
        Err(Error::upstream("stream ended before completion"))
    }
}

impl Stream for TokenStream {
    type Item = Result<StreamEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenStream")
    }
}

/// What a backend returns for one request.
#[derive(Debug)]
pub enum GenerationResult {
    Buffered(String),
    Streaming(TokenStream),
}

impl GenerationResult {
    /// Resolve to the full text, draining the stream if there is one.
    pub async fn into_text(self) -> Result<String, Error> {
        match self {
            GenerationResult::Buffered(text) => Ok(text),
            GenerationResult::Streaming(stream) => stream.text().await,
        }
    }
}
