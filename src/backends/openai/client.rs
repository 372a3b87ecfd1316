use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ContentPart, ErrorEnvelope,
    ImageUrl, MessageContent, StreamPayload,
};
use crate::backend::ModelBackend;
use crate::sse_stream::SseStreamExt;
use crate::types::{BackendConfig, Payload};
use crate::validator::ValidatedRequest;
use crate::{Error, StreamEvent, TokenStream};
use base64::Engine;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, instrument, warn};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Client for an OpenAI-compatible Chat Completions endpoint (vLLM, llama.cpp server, Ollama, ...).
pub struct OpenAICompatibleBackend {
    client: Client,
    base_url: String,
    model_name: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAICompatibleBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, Error> {
        if config.base_url.trim().is_empty() {
            return Err(Error::config("backend base_url must not be empty"));
        }

        // No client-wide timeout: it would also cut off long streams.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_name: config.model_name.clone(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Convert a validated request to the Chat Completions wire format.
    fn convert_request(&self, request: &ValidatedRequest, stream: bool) -> ChatCompletionRequest {
        let params = request.params();
        ChatCompletionRequest {
            model: self.model_name.clone(),
            messages: Self::convert_payload(request.payload()),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            seed: params.seed,
            response_format: params.response_format.clone(),
            stream,
        }
    }

    fn convert_payload(payload: &Payload) -> Vec<ChatMessage> {
        match payload {
            Payload::Chat { messages } => messages
                .iter()
                .map(|message| ChatMessage {
                    role: message.role.as_str().to_string(),
                    content: MessageContent::Text(message.content.clone()),
                })
                .collect(),
            Payload::Vision { image, prompt } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&image.data);
                vec![ChatMessage {
                    role: "user".to_string(),
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: prompt.clone(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:{};base64,{encoded}", image.mime_type),
                            },
                        },
                    ]),
                }]
            }
        }
    }

    async fn send(
        &self,
        body: &ChatCompletionRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, Error> {
        let mut builder = self.client.post(self.endpoint()).json(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = error_message(status, &body);
        warn!(status = %status, error = %message, "Upstream returned error status");
        Err(Error::upstream_status(status.as_u16(), message))
    }

    /// Parse one SSE `data:` payload into a delta, if it carries text.
    fn parse_chunk(data: &str) -> Result<Option<String>, Error> {
        let payload: StreamPayload = serde_json::from_str(data)
            .map_err(|e| Error::upstream(format!("malformed stream chunk: {e}")))?;

        match payload {
            StreamPayload::Error { error } => Err(Error::upstream(error.describe())),
            StreamPayload::Chunk(chunk) => Ok(chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|content| !content.is_empty())),
        }
    }

    /// Turn the upstream byte stream into deltas terminated by `Done` or an error.
    fn event_stream(bytes: ByteStream) -> TokenStream {
        let events = bytes.sse_events();

        let stream = futures_util::stream::unfold(Some(events), |state| async move {
            let mut events = state?;
            loop {
                match events.next().await {
                    // Some proxies close the connection without sending [DONE].
                    None => return Some((Ok(StreamEvent::Done), None)),
                    Some(Err(e)) => return Some((Err(e), None)),
                    Some(Ok(event)) if event.is_done() => {
                        return Some((Ok(StreamEvent::Done), None))
                    }
                    Some(Ok(event)) => match Self::parse_chunk(&event.data) {
                        Ok(Some(text)) => {
                            return Some((Ok(StreamEvent::Delta { text }), Some(events)))
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), None)),
                    },
                }
            }
        });

        TokenStream::from_stream(stream)
    }
}

/// Best-effort extraction of a readable message from an upstream error body.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.describe();
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }

    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.chars().take(512).collect()
    }
}

#[async_trait::async_trait]
impl ModelBackend for OpenAICompatibleBackend {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    #[instrument(skip_all, fields(model = %self.model_name, payload = request.payload().kind()))]
    async fn complete(&self, request: &ValidatedRequest) -> Result<String, Error> {
        let body = self.convert_request(request, false);
        debug!(url = %self.endpoint(), "Sending completion request");

        let response = self.send(&body, Some(self.timeout)).await?;
        let bytes = response.bytes().await?;
        let completion: ChatCompletionResponse = serde_json::from_slice(&bytes)
            .map_err(|e| Error::upstream(format!("malformed completion response: {e}")))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        debug!(chars = text.len(), "Completion received");
        Ok(text)
    }

    #[instrument(skip_all, fields(model = %self.model_name, payload = request.payload().kind()))]
    async fn stream(&self, request: &ValidatedRequest) -> Result<TokenStream, Error> {
        let body = self.convert_request(request, true);
        debug!(url = %self.endpoint(), "Sending streaming request");

        let response = self.send(&body, None).await?;
        Ok(Self::event_stream(Box::pin(response.bytes_stream())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenerationRequest, ImageInput, Message, ParamOverrides};
    use crate::validator::validate_request;
    use futures_util::stream;

    fn backend() -> OpenAICompatibleBackend {
        OpenAICompatibleBackend::new(&BackendConfig::new("test-model", "http://localhost:8000/v1/"))
            .unwrap()
    }

    #[test]
    fn test_backend_creation() {
        let backend = backend();
        assert_eq!(backend.base_url(), "http://localhost:8000/v1");
        assert_eq!(backend.model_name(), "test-model");

        assert!(OpenAICompatibleBackend::new(&BackendConfig::new("m", " ")).is_err());
    }

    #[test]
    fn test_request_conversion() {
        let request = GenerationRequest::chat(vec![Message::system("terse"), Message::user("Hi")])
            .with_params(ParamOverrides {
                temperature: Some(0.5),
                max_tokens: Some(100),
                ..Default::default()
            });
        let validated = validate_request(request, &ParamOverrides::default()).unwrap();

        let wire = backend().convert_request(&validated, true);
        assert_eq!(wire.model, "test-model");
        assert_eq!(wire.temperature, 0.5);
        assert_eq!(wire.max_tokens, 100);
        assert!(wire.stream);

        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Hi");
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_image_request_conversion() {
        let image = ImageInput::new(vec![0xFFu8, 0xD8, 0xFF], "image/jpeg");
        let request = GenerationRequest::vision(image, "Describe this");
        let validated = validate_request(request, &ParamOverrides::default()).unwrap();

        let json = serde_json::to_value(backend().convert_request(&validated, false)).unwrap();
        let parts = &json["messages"][0]["content"];
        assert_eq!(parts[0]["text"], "Describe this");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"message":"context too long","type":"invalid_request_error"}}"#
            ),
            "context too long"
        );
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, r#"{"detail":"Not Found"}"#),
            "Not Found"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "  "),
            "Bad Gateway"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, "plain failure"),
            "plain failure"
        );
    }

    fn byte_stream(parts: Vec<&'static str>) -> ByteStream {
        Box::pin(stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<_, reqwest::Error>(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn test_event_stream_skips_empty_deltas() {
        let mut events = OpenAICompatibleBackend::event_stream(byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]));

        assert_eq!(events.next().await.unwrap().unwrap(), StreamEvent::delta("Hel"));
        assert_eq!(events.next().await.unwrap().unwrap(), StreamEvent::delta("lo"));
        assert_eq!(events.next().await.unwrap().unwrap(), StreamEvent::Done);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_event_stream_error_payload_terminates() {
        let mut events = OpenAICompatibleBackend::event_stream(byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"engine died\"}}\n\n",
        ]));

        assert_eq!(events.next().await.unwrap().unwrap(), StreamEvent::delta("a"));
        let error = events.next().await.unwrap().unwrap_err();
        assert!(error.to_string().contains("engine died"));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_event_stream_without_done_marker() {
        let text = OpenAICompatibleBackend::event_stream(byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}\n\n",
        ]))
        .text()
        .await
        .unwrap();
        assert_eq!(text, "end");
    }
}
