use crate::validator::ValidatedRequest;
use crate::{Error, GenerationResult, Mode, TokenStream};

/// An upstream model server that can answer a validated request.
///
/// Implementations are pure forwarders: no retries, no caching, no rewriting
/// of message content. Concurrency limits are enforced by the dispatcher,
/// not here.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync + 'static {
    /// Name of the upstream model, for logs.
    fn model_name(&self) -> &str;

    /// Wait for the complete response text.
    async fn complete(&self, request: &ValidatedRequest) -> Result<String, Error>;

    /// Start a generation and return its chunks as they arrive.
    ///
    /// Returns once the upstream has accepted the request; failures after
    /// that point arrive as `Err` items on the stream.
    async fn stream(&self, request: &ValidatedRequest) -> Result<TokenStream, Error>;

    async fn invoke(
        &self,
        request: &ValidatedRequest,
        mode: Mode,
    ) -> Result<GenerationResult, Error> {
        match mode {
            Mode::Buffered => self.complete(request).await.map(GenerationResult::Buffered),
            Mode::Streaming => self.stream(request).await.map(GenerationResult::Streaming),
        }
    }
}
