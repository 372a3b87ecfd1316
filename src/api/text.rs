use super::{sse, ApiError, AppState};
use crate::relay::{buffered, CompletionResponse};
use crate::types::{BackendKind, GenerationRequest, Message, ParamOverrides};
use crate::Mode;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

/// Body of the text endpoints: the conversation plus optional generation arguments.
#[derive(Debug, Deserialize)]
pub struct TextChatRequest {
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub params: ParamOverrides,
}

impl From<TextChatRequest> for GenerationRequest {
    fn from(body: TextChatRequest) -> Self {
        GenerationRequest::chat(body.messages).with_params(body.params)
    }
}

pub async fn completion(
    State(state): State<AppState>,
    body: Result<Json<TextChatRequest>, JsonRejection>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let Json(body) = body?;
    let text = state
        .dispatcher
        .dispatch(BackendKind::Text, body.into(), Mode::Buffered)
        .await?
        .into_text()
        .await?;
    Ok(Json(buffered(text)))
}

pub async fn stream(
    State(state): State<AppState>,
    body: Result<Json<TextChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let result = state
        .dispatcher
        .dispatch(BackendKind::Text, body.into(), Mode::Streaming)
        .await?;
    Ok(sse::respond(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_params_sit_beside_messages() {
        let body: TextChatRequest = serde_json::from_str(
            r#"{
                "messages": [{"role": "user", "content": "Hi"}],
                "temperature": 0.7,
                "max_tokens": 128,
                "response_format": {"type": "json_object"}
            }"#,
        )
        .unwrap();

        assert_eq!(body.messages[0].role, Role::User);
        assert_eq!(body.params.temperature, Some(0.7));
        assert_eq!(body.params.max_tokens, Some(128));
        assert!(body.params.response_format.is_some());
        assert_eq!(body.params.top_p, None);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let result = serde_json::from_str::<TextChatRequest>(
            r#"{"messages": [{"role": "tool", "content": "Hi"}]}"#,
        );
        assert!(result.is_err());
    }
}
