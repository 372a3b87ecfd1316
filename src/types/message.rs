use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::params::ParamOverrides;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message with role and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a new message with role and text content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// An uploaded image held in memory.
#[derive(Clone, PartialEq)]
pub struct ImageInput {
    pub data: Bytes,
    pub mime_type: String,
}

impl ImageInput {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Build an image from an upload, preferring the declared content type and
    /// falling back to the file extension.
    pub fn from_upload(
        data: impl Into<Bytes>,
        file_name: Option<&str>,
        content_type: Option<&str>,
    ) -> Self {
        let mime_type = content_type
            .filter(|ct| ct.starts_with("image/"))
            .map(str::to_string)
            .unwrap_or_else(|| mime_from_extension(file_name).to_string());
        Self::new(data, mime_type)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Image bytes are noise in logs.
impl fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageInput")
            .field("bytes", &self.data.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

fn mime_from_extension(file_name: Option<&str>) -> &'static str {
    let extension = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// What the caller wants the model to look at.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A conversation for the text model.
    Chat { messages: Vec<Message> },
    /// A single image plus an instruction for the vision model.
    Vision { image: ImageInput, prompt: String },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Chat { .. } => "chat",
            Payload::Vision { .. } => "vision",
        }
    }
}

/// A request as received from a caller, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub payload: Payload,
    pub params: ParamOverrides,
}

impl GenerationRequest {
    pub fn chat(messages: Vec<Message>) -> Self {
        Self {
            payload: Payload::Chat { messages },
            params: ParamOverrides::default(),
        }
    }

    pub fn vision(image: ImageInput, prompt: impl Into<String>) -> Self {
        Self {
            payload: Payload::Vision {
                image,
                prompt: prompt.into(),
            },
            params: ParamOverrides::default(),
        }
    }

    pub fn with_params(mut self, params: ParamOverrides) -> Self {
        self.params = params;
        self
    }
}
