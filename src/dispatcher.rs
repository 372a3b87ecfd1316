//! Request lifecycle: validate, wait for a slot, call the backend, release.
//!
//! A request moves through `Validated -> Queued -> InFlight` and ends as
//! completed or failed. The slot taken at `InFlight` is returned on every
//! exit: success, upstream error, timeout, or the caller going away while
//! queued, in flight, or halfway through a stream.

use crate::backend::ModelBackend;
use crate::backends::OpenAICompatibleBackend;
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::settings::Settings;
use crate::types::{BackendConfig, BackendKind, GenerationRequest, ParamOverrides, Payload};
use crate::validator::validate_request;
use crate::{Error, GenerationResult, Mode, StreamEvent, TokenStream};
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::{debug, debug_span, warn, Instrument, Span};
use uuid::Uuid;

/// One backend with its gate and default arguments.
pub struct Lane {
    kind: BackendKind,
    gate: ConcurrencyGate,
    backend: Arc<dyn ModelBackend>,
    defaults: ParamOverrides,
}

impl Lane {
    pub fn new(
        kind: BackendKind,
        gate: ConcurrencyGate,
        backend: Arc<dyn ModelBackend>,
        defaults: ParamOverrides,
    ) -> Self {
        Self {
            kind,
            gate,
            backend,
            defaults,
        }
    }

    /// Build an OpenAI-compatible lane from configuration.
    pub fn from_config(kind: BackendKind, config: &BackendConfig) -> Result<Self, Error> {
        let gate = ConcurrencyGate::new(kind.as_str(), config.max_concurrency, config.max_queued)?;
        let backend = OpenAICompatibleBackend::new(config)?;
        Ok(Self::new(
            kind,
            gate,
            Arc::new(backend),
            config.llm_args.clone(),
        ))
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn backend(&self) -> &dyn ModelBackend {
        self.backend.as_ref()
    }

    pub fn defaults(&self) -> &ParamOverrides {
        &self.defaults
    }

    fn check_payload(&self, payload: &Payload) -> Result<(), Error> {
        let accepted = match self.kind {
            BackendKind::Text => matches!(payload, Payload::Chat { .. }),
            BackendKind::Image => matches!(payload, Payload::Vision { .. }),
        };
        if accepted {
            Ok(())
        } else {
            Err(Error::validation(
                "payload",
                format!(
                    "{} backend does not accept {} requests",
                    self.kind,
                    payload.kind()
                ),
            ))
        }
    }
}

/// Routes requests to the text or image lane.
pub struct Dispatcher {
    text: Lane,
    image: Lane,
}

impl Dispatcher {
    pub fn new(text: Lane, image: Lane) -> Self {
        Self { text, image }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        Ok(Self::new(
            Lane::from_config(BackendKind::Text, &settings.text_model)?,
            Lane::from_config(BackendKind::Image, &settings.image_model)?,
        ))
    }

    pub fn lane(&self, kind: BackendKind) -> &Lane {
        match kind {
            BackendKind::Text => &self.text,
            BackendKind::Image => &self.image,
        }
    }

    /// Run one request to completion (buffered) or to its first byte (streaming).
    ///
    /// Validation happens before any slot is requested. For streaming results
    /// the slot stays held until the stream finishes, fails, or is dropped.
    pub async fn dispatch(
        &self,
        kind: BackendKind,
        request: GenerationRequest,
        mode: Mode,
    ) -> Result<GenerationResult, Error> {
        let span = debug_span!(
            "dispatch",
            backend = %kind,
            request_id = %Uuid::new_v4(),
            mode = ?mode
        );
        self.run(kind, request, mode, span.clone())
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        kind: BackendKind,
        request: GenerationRequest,
        mode: Mode,
        span: Span,
    ) -> Result<GenerationResult, Error> {
        let lane = self.lane(kind);

        lane.check_payload(&request.payload)?;
        let validated = validate_request(request, &lane.defaults).map_err(|e| {
            debug!(error = %e, "Request rejected by validation");
            e
        })?;
        debug!(
            in_use = lane.gate.in_use(),
            queued = lane.gate.queued(),
            "Request validated, waiting for slot"
        );

        let permit = lane.gate.acquire().await?;
        debug!(model = lane.backend.model_name(), "Request in flight");

        match lane.backend.invoke(&validated, mode).await {
            Ok(GenerationResult::Buffered(text)) => {
                permit.release();
                debug!(chars = text.len(), "Request completed");
                Ok(GenerationResult::Buffered(text))
            }
            Ok(GenerationResult::Streaming(stream)) => {
                debug!("Upstream stream opened");
                Ok(GenerationResult::Streaming(TokenStream::from_stream(
                    GuardedStream::new(stream, permit, span),
                )))
            }
            Err(e) => {
                warn!(error = %e, "Upstream request failed");
                Err(e)
            }
        }
    }

    /// Like [`dispatch`](Self::dispatch), but gives up with `Cancelled` as soon
    /// as `cancelled` resolves, releasing anything the request holds.
    ///
    /// The HTTP handlers do not use this: axum drops the handler future when
    /// the client disconnects, and dropping a `dispatch` future at any await
    /// point releases its queue place or slot. This is for embedders that hold
    /// an explicit cancellation signal.
    pub async fn dispatch_or_cancel<C>(
        &self,
        kind: BackendKind,
        request: GenerationRequest,
        mode: Mode,
        cancelled: C,
    ) -> Result<GenerationResult, Error>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.dispatch(kind, request, mode) => result,
            _ = cancelled => {
                debug!(backend = %kind, "Request cancelled by caller");
                Err(Error::Cancelled)
            }
        }
    }

    /// Refuse new work on both lanes.
    pub fn close(&self) {
        self.text.gate.close();
        self.image.gate.close();
    }
}

/// Holds the slot for as long as the consumer keeps reading.
struct GuardedStream {
    inner: TokenStream,
    permit: Option<GatePermit>,
    span: Span,
}

impl GuardedStream {
    fn new(inner: TokenStream, permit: GatePermit, span: Span) -> Self {
        Self {
            inner,
            permit: Some(permit),
            span,
        }
    }
}

impl Stream for GuardedStream {
    type Item = Result<StreamEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.permit.is_none() {
            return Poll::Ready(None);
        }

        let item = ready!(self.inner.poll_next_unpin(cx));
        let _entered = self.span.clone().entered();
        match item {
            Some(Ok(StreamEvent::Delta { text })) => {
                Poll::Ready(Some(Ok(StreamEvent::Delta { text })))
            }
            Some(Ok(StreamEvent::Done)) => {
                self.permit = None;
                debug!("Stream completed");
                Poll::Ready(Some(Ok(StreamEvent::Done)))
            }
            Some(Err(e)) => {
                self.permit = None;
                warn!(error = %e, "Stream aborted by upstream");
                Poll::Ready(Some(Err(e)))
            }
            None => {
                self.permit = None;
                warn!("Stream ended without completion");
                Poll::Ready(Some(Err(Error::upstream(
                    "stream ended without completion",
                ))))
            }
        }
    }
}

impl Drop for GuardedStream {
    fn drop(&mut self) {
        if self.permit.is_some() {
            let _entered = self.span.enter();
            debug!("Stream cancelled by consumer");
        }
    }
}
