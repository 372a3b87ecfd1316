//! Generation parameters: the partial form callers and configuration supply,
//! and the fully populated form forwarded upstream.

use serde::{Deserialize, Deserializer, Serialize};

/// Generation parameters where every field may be absent.
///
/// Used both for request-level overrides and for a backend's configured
/// defaults. Numeric fields are kept wide here so the validator, not serde,
/// reports out-of-range values. Floats stay `f64` until they pass their
/// range check so a value just past a bound cannot round onto it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Raw `response_format` document; accepts an object or a JSON string.
    #[serde(
        default,
        deserialize_with = "object_or_json_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_format: Option<serde_json::Value>,
}

impl ParamOverrides {
    /// Overlay `self` on top of `base`, field by field. Present fields in `self` win.
    pub fn overlay(&self, base: &ParamOverrides) -> ParamOverrides {
        ParamOverrides {
            temperature: self.temperature.or(base.temperature),
            max_tokens: self.max_tokens.or(base.max_tokens),
            top_p: self.top_p.or(base.top_p),
            frequency_penalty: self.frequency_penalty.or(base.frequency_penalty),
            presence_penalty: self.presence_penalty.or(base.presence_penalty),
            seed: self.seed.or(base.seed),
            response_format: self
                .response_format
                .clone()
                .or_else(|| base.response_format.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ParamOverrides::default()
    }
}

fn object_or_json_string<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        Some(serde_json::Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(text)) => serde_json::from_str(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(serde_json::Value::Null) | None => Ok(None),
        other => Ok(other),
    }
}

/// Structured-output constraint forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema { json_schema: JsonSchemaFormat },
}

/// Named schema for `json_schema` output. The schema document is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Fully populated, range-checked generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub seed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 2048,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            seed: 0,
            response_format: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overlay_prefers_request_fields() {
        let defaults = ParamOverrides {
            temperature: Some(0.2),
            max_tokens: Some(512),
            seed: Some(7),
            ..Default::default()
        };
        let request = ParamOverrides {
            temperature: Some(0.9),
            ..Default::default()
        };

        let merged = request.overlay(&defaults);
        assert_eq!(merged.temperature, Some(0.9));
        assert_eq!(merged.max_tokens, Some(512));
        assert_eq!(merged.seed, Some(7));
        assert_eq!(merged.top_p, None);
    }

    #[test]
    fn test_response_format_accepts_json_string() {
        let overrides: ParamOverrides =
            serde_json::from_value(json!({"response_format": "{\"type\":\"json_object\"}"}))
                .unwrap();
        assert_eq!(overrides.response_format, Some(json!({"type": "json_object"})));

        let overrides: ParamOverrides =
            serde_json::from_value(json!({"response_format": {"type": "text"}})).unwrap();
        assert_eq!(overrides.response_format, Some(json!({"type": "text"})));

        let overrides: ParamOverrides =
            serde_json::from_value(json!({"response_format": null})).unwrap();
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_response_format_wire_shape() {
        let format = ResponseFormat::JsonSchema {
            json_schema: JsonSchemaFormat {
                name: "answer".to_string(),
                schema: json!({"type": "object"}),
                strict: None,
            },
        };
        assert_eq!(
            serde_json::to_value(&format).unwrap(),
            json!({"type": "json_schema", "json_schema": {"name": "answer", "schema": {"type": "object"}}})
        );
        assert_eq!(
            serde_json::to_value(ResponseFormat::JsonObject).unwrap(),
            json!({"type": "json_object"})
        );
    }
}
