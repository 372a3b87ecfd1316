use crate::relay::{relay_stream, RelayFrame};
use crate::{GenerationResult, StreamEvent, TokenStream};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Send a generation result as Server-Sent Events.
pub fn respond(result: GenerationResult) -> Response {
    let tokens = match result {
        GenerationResult::Streaming(tokens) => tokens,
        GenerationResult::Buffered(text) => TokenStream::from_stream(stream::iter([
            Ok(StreamEvent::Delta { text }),
            Ok(StreamEvent::Done),
        ])),
    };

    let events = relay_stream(tokens).map(|frame| Ok::<_, Infallible>(to_event(frame)));
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response()
}

pub(crate) fn to_event(frame: RelayFrame) -> Event {
    match frame {
        RelayFrame::Chunk(text) => Event::default().data(normalize_newlines(&text)),
        RelayFrame::End => Event::default().event("done").data("[DONE]"),
        RelayFrame::Abort { detail } => Event::default()
            .event("error")
            .data(json!({ "detail": detail }).to_string()),
    }
}

/// SSE has no escaping; a bare `\r` would end the line early, so fold it into `\n`.
fn normalize_newlines(text: &str) -> String {
    if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text.to_string()
    }
}
