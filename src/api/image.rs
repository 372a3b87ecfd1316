use super::{sse, ApiError, AppState};
use crate::relay::{buffered, CompletionResponse};
use crate::types::{BackendKind, GenerationRequest, ImageInput, ParamOverrides};
use crate::{Error, Mode};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::response::Response;
use axum::Json;
use std::fmt::Display;
use std::str::FromStr;
use tracing::debug;

/// Used when the form carries no `prompt` field at all.
pub const DEFAULT_PROMPT: &str = "Describe this image";

pub async fn completion(
    State(state): State<AppState>,
    form: Result<Multipart, MultipartRejection>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let request = read_form(form?).await?;
    let text = state
        .dispatcher
        .dispatch(BackendKind::Image, request, Mode::Buffered)
        .await?
        .into_text()
        .await?;
    Ok(Json(buffered(text)))
}

pub async fn stream(
    State(state): State<AppState>,
    form: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let request = read_form(form?).await?;
    let result = state
        .dispatcher
        .dispatch(BackendKind::Image, request, Mode::Streaming)
        .await?;
    Ok(sse::respond(result))
}

/// Collect the image, prompt and generation arguments from a multipart form.
async fn read_form(mut form: Multipart) -> Result<GenerationRequest, ApiError> {
    let mut image = None;
    let mut prompt = None;
    let mut params = ParamOverrides::default();

    while let Some(field) = form.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().map(str::to_owned);
                let content_type = field.content_type().map(str::to_owned);
                let data = field.bytes().await?;
                debug!(bytes = data.len(), ?file_name, "Received image upload");
                image = Some(ImageInput::from_upload(
                    data,
                    file_name.as_deref(),
                    content_type.as_deref(),
                ));
            }
            "prompt" => prompt = Some(field.text().await?),
            "temperature" => params.temperature = parse_number(&name, &field.text().await?)?,
            "max_tokens" => params.max_tokens = parse_number(&name, &field.text().await?)?,
            "top_p" => params.top_p = parse_number(&name, &field.text().await?)?,
            "frequency_penalty" => {
                params.frequency_penalty = parse_number(&name, &field.text().await?)?
            }
            "presence_penalty" => {
                params.presence_penalty = parse_number(&name, &field.text().await?)?
            }
            "seed" => params.seed = parse_number(&name, &field.text().await?)?,
            "response_format" => {
                params.response_format = parse_json(&name, &field.text().await?)?
            }
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    let image = image.ok_or_else(|| Error::validation("image", "an image file is required"))?;
    let prompt = prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string());
    Ok(GenerationRequest::vision(image, prompt).with_params(params))
}

/// Blank fields count as absent.
fn parse_number<T>(field: &str, raw: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|e| Error::validation(field, format!("expected a number, got {raw:?} ({e})")))
}

fn parse_json(field: &str, raw: &str) -> Result<Option<serde_json::Value>, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| Error::validation(field, format!("must be a JSON object: {e}")))
}
