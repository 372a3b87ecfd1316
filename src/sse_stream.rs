//! Stream adapter for parsing SSE (Server-Sent Events) from upstream byte chunks.

use crate::Error;
use futures_util::{Stream, StreamExt};
use memchr::memmem;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Largest single event we are willing to buffer before giving up on the upstream.
pub const MAX_EVENT_BYTES: usize = 1_000_000;

/// A Server-Sent Events (SSE) event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Event type (optional).
    pub event_type: Option<String>,
    /// Event data, multiple `data:` lines joined with `\n`.
    pub data: String,
}

impl SseEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            event_type: None,
            data: data.into(),
        }
    }

    /// OpenAI-compatible servers end a stream with `data: [DONE]`.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Parses SSE events out of a byte stream.
/// Events may be split across chunks at any byte, including inside a UTF-8 sequence.
pub struct SseStream<S> {
    inner: S,
    buffer: Vec<u8>,
    events: VecDeque<SseEvent>,
    finished: bool,
}

impl<S> SseStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: Vec::new(),
            events: VecDeque::new(),
            finished: false,
        }
    }

    /// Move every complete event out of the buffer.
    fn parse_buffer(&mut self) -> Result<(), Error> {
        let mut start = 0;

        while let Some((end, separator_len)) = find_boundary(&self.buffer[start..]) {
            let event_bytes = &self.buffer[start..start + end];
            let event_text = std::str::from_utf8(event_bytes)
                .map_err(|e| Error::upstream(format!("invalid UTF-8 in event stream: {e}")))?;

            if let Some(event) = parse_event(event_text) {
                self.events.push_back(event);
            }
            start += end + separator_len;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        Ok(())
    }

    /// Whatever is left when the upstream closes without a trailing blank line.
    fn take_trailing_event(&mut self) -> Option<SseEvent> {
        let buffer = std::mem::take(&mut self.buffer);
        let text = std::str::from_utf8(&buffer).ok()?.trim();
        if text.is_empty() {
            None
        } else {
            parse_event(text)
        }
    }
}

/// Position and length of the first blank-line separator (`\n\n` or `\r\n\r\n`).
fn find_boundary(bytes: &[u8]) -> Option<(usize, usize)> {
    let lf = memmem::find(bytes, b"\n\n").map(|pos| (pos, 2));
    let crlf = memmem::find(bytes, b"\r\n\r\n").map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_event(text: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event_type = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event_type,
        data: data_lines.join("\n"),
    })
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<SseEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                    if let Err(e) = self.parse_buffer() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    if self.buffer.len() > MAX_EVENT_BYTES {
                        self.finished = true;
                        self.buffer.clear();
                        return Poll::Ready(Some(Err(Error::upstream(format!(
                            "event exceeded {MAX_EVENT_BYTES} bytes"
                        )))));
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(Error::upstream(format!(
                        "stream interrupted: {e}"
                    )))));
                }
                None => {
                    self.finished = true;
                    if let Some(event) = self.take_trailing_event() {
                        return Poll::Ready(Some(Ok(event)));
                    }
                    return Poll::Ready(None);
                }
            }
        }
    }
}

/// Extension trait to add SSE parsing to byte streams.
pub trait SseStreamExt: Stream {
    fn sse_events(self) -> SseStream<Self>
    where
        Self: Sized,
    {
        SseStream::new(self)
    }
}

impl<S: Stream> SseStreamExt for S {}
