//! Shapes generation results for the caller.
//!
//! Transport-neutral: the api layer turns these into JSON bodies and SSE frames.

use crate::{Error, StreamEvent, TokenStream};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Successful buffered reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub response: String,
}

/// Uniform error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl From<&Error> for ErrorBody {
    fn from(error: &Error) -> Self {
        Self {
            detail: error.to_string(),
        }
    }
}

/// One unit of a relayed stream.
///
/// Every relayed stream ends with exactly one `End` or one `Abort`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Chunk(String),
    /// The upstream finished normally.
    End,
    /// The upstream failed; partial output before this frame is all there is.
    Abort { detail: String },
}

pub fn buffered(text: String) -> CompletionResponse {
    CompletionResponse { response: text }
}

/// Relay chunks in upstream order, then a single terminal frame.
pub fn relay_stream(stream: TokenStream) -> impl Stream<Item = RelayFrame> + Send {
    futures_util::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        let frame = match stream.next().await {
            Some(Ok(StreamEvent::Delta { text })) => {
                return Some((RelayFrame::Chunk(text), Some(stream)))
            }
            Some(Ok(StreamEvent::Done)) => RelayFrame::End,
            Some(Err(e)) => abort(&e),
            None => abort(&Error::upstream("stream ended without completion")),
        };
        Some((frame, None))
    })
}

fn abort(error: &Error) -> RelayFrame {
    warn!(error = %error, "Relaying aborted stream");
    RelayFrame::Abort {
        detail: ErrorBody::from(error).detail,
    }
}
