//! Parameter validation.
//!
//! Everything here is pure: a request is checked and normalised in full
//! before the dispatcher asks for a concurrency slot, so bad input is shed
//! without holding any capacity.

use std::ops::RangeInclusive;

use crate::types::{
    GenerationParams, GenerationRequest, JsonSchemaFormat, ParamOverrides, Payload, ResponseFormat,
};
use crate::Error;

pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.0..=2.0;
pub const TOP_P_RANGE: RangeInclusive<f64> = 0.0..=1.0;
pub const PENALTY_RANGE: RangeInclusive<f64> = -2.0..=2.0;

/// A request whose payload and parameters passed validation.
///
/// Only [`validate_request`] builds one, so holding a `ValidatedRequest`
/// means every parameter is populated and inside its bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    payload: Payload,
    params: GenerationParams,
}

impl ValidatedRequest {
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }
}

/// Validate a request against a backend's defaults.
pub fn validate_request(
    request: GenerationRequest,
    defaults: &ParamOverrides,
) -> Result<ValidatedRequest, Error> {
    validate_payload(&request.payload)?;
    let params = validate_params(&request.params, defaults)?;
    Ok(ValidatedRequest {
        payload: request.payload,
        params,
    })
}

fn validate_payload(payload: &Payload) -> Result<(), Error> {
    match payload {
        Payload::Chat { messages } => {
            if messages.is_empty() {
                return Err(Error::validation(
                    "messages",
                    "must contain at least one message",
                ));
            }
        }
        Payload::Vision { image, prompt } => {
            if image.is_empty() {
                return Err(Error::validation("image", "must not be empty"));
            }
            if prompt.trim().is_empty() {
                return Err(Error::validation("prompt", "must not be empty"));
            }
        }
    }
    Ok(())
}

/// Merge request overrides over backend defaults over built-in defaults,
/// then range-check every field.
pub fn validate_params(
    overrides: &ParamOverrides,
    defaults: &ParamOverrides,
) -> Result<GenerationParams, Error> {
    let merged = overrides.overlay(defaults);
    let base = GenerationParams::default();

    let max_tokens = match merged.max_tokens {
        Some(value) if value <= 0 => {
            return Err(Error::validation(
                "max_tokens",
                format!("must be greater than 0, got {value}"),
            ))
        }
        Some(value) => u32::try_from(value).map_err(|_| {
            Error::validation(
                "max_tokens",
                format!("must be at most {}, got {value}", u32::MAX),
            )
        })?,
        None => base.max_tokens,
    };

    Ok(GenerationParams {
        temperature: check_range(
            "temperature",
            merged.temperature.unwrap_or(f64::from(base.temperature)),
            &TEMPERATURE_RANGE,
        )?,
        max_tokens,
        top_p: check_range(
            "top_p",
            merged.top_p.unwrap_or(f64::from(base.top_p)),
            &TOP_P_RANGE,
        )?,
        frequency_penalty: check_range(
            "frequency_penalty",
            merged
                .frequency_penalty
                .unwrap_or(f64::from(base.frequency_penalty)),
            &PENALTY_RANGE,
        )?,
        presence_penalty: check_range(
            "presence_penalty",
            merged
                .presence_penalty
                .unwrap_or(f64::from(base.presence_penalty)),
            &PENALTY_RANGE,
        )?,
        seed: merged.seed.unwrap_or(base.seed),
        response_format: merged
            .response_format
            .as_ref()
            .map(parse_response_format)
            .transpose()?,
    })
}

/// Checks `value` at full precision and narrows it for the wire afterwards.
fn check_range(field: &str, value: f64, range: &RangeInclusive<f64>) -> Result<f32, Error> {
    // NaN fails `contains`, which is what we want.
    if range.contains(&value) {
        Ok(value as f32)
    } else {
        Err(Error::validation(
            field,
            format!(
                "must be within [{:.1}, {:.1}], got {value:?}",
                range.start(),
                range.end()
            ),
        ))
    }
}

fn parse_response_format(raw: &serde_json::Value) -> Result<ResponseFormat, Error> {
    let object = raw
        .as_object()
        .ok_or_else(|| Error::validation("response_format", "must be an object"))?;

    let kind = object
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::validation("response_format.type", "is required"))?;

    match kind {
        "text" => Ok(ResponseFormat::Text),
        "json_object" => Ok(ResponseFormat::JsonObject),
        "json_schema" => {
            let json_schema = object
                .get("json_schema")
                .and_then(|s| s.as_object())
                .ok_or_else(|| {
                    Error::validation(
                        "response_format.json_schema",
                        "is required when type is \"json_schema\"",
                    )
                })?;

            let name = json_schema
                .get("name")
                .and_then(|n| n.as_str())
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| {
                    Error::validation("response_format.json_schema.name", "is required")
                })?;

            let schema = json_schema
                .get("schema")
                .filter(|s| !s.is_null())
                .ok_or_else(|| {
                    Error::validation("response_format.json_schema.schema", "is required")
                })?;

            Ok(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat {
                    name: name.to_string(),
                    schema: schema.clone(),
                    strict: json_schema.get("strict").and_then(|s| s.as_bool()),
                },
            })
        }
        other => Err(Error::validation(
            "response_format.type",
            format!("must be one of \"text\", \"json_object\", \"json_schema\", got {other:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageInput, Message};
    use serde_json::json;

    fn field_of(error: Error) -> String {
        match error {
            Error::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_fill_every_field() {
        let params = validate_params(&ParamOverrides::default(), &ParamOverrides::default())
            .unwrap();
        assert_eq!(params, GenerationParams::default());
        assert_eq!(params.max_tokens, 2048);
        assert_eq!(params.top_p, 1.0);
        assert!(params.response_format.is_none());
    }

    #[test]
    fn test_backend_defaults_then_request_overrides() {
        let defaults = ParamOverrides {
            temperature: Some(0.3),
            max_tokens: Some(256),
            seed: Some(42),
            ..Default::default()
        };
        let request = ParamOverrides {
            temperature: Some(1.5),
            ..Default::default()
        };

        let params = validate_params(&request, &defaults).unwrap();
        assert_eq!(params.temperature, 1.5);
        assert_eq!(params.max_tokens, 256);
        assert_eq!(params.seed, 42);
        assert_eq!(params.frequency_penalty, 0.0);
    }

    #[test]
    fn test_temperature_out_of_range() {
        let request = ParamOverrides {
            temperature: Some(3.0),
            ..Default::default()
        };
        let error = validate_params(&request, &ParamOverrides::default()).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("temperature"), "{message}");
        assert!(message.contains("[0.0, 2.0]"), "{message}");
    }

    #[test]
    fn test_near_bound_values_from_json_are_rejected() {
        let request: ParamOverrides =
            serde_json::from_str(r#"{"temperature": 2.00000001, "top_p": 0.5}"#).unwrap();
        let error = validate_params(&request, &ParamOverrides::default()).unwrap_err();
        assert_eq!(field_of(error), "temperature");

        let request: ParamOverrides = serde_json::from_str(r#"{"top_p": 1.00000001}"#).unwrap();
        let error = validate_params(&request, &ParamOverrides::default()).unwrap_err();
        assert_eq!(field_of(error), "top_p");
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let request = ParamOverrides {
            temperature: Some(2.0),
            top_p: Some(0.0),
            frequency_penalty: Some(-2.0),
            presence_penalty: Some(2.0),
            max_tokens: Some(1),
            ..Default::default()
        };
        let params = validate_params(&request, &ParamOverrides::default()).unwrap();
        assert_eq!(params.temperature, 2.0);
        assert_eq!(params.max_tokens, 1);
    }

    #[test]
    fn test_each_field_is_named_in_errors() {
        let cases = [
            (
                ParamOverrides {
                    temperature: Some(2.00000001),
                    ..Default::default()
                },
                "temperature",
            ),
            (
                ParamOverrides {
                    top_p: Some(1.00000001),
                    ..Default::default()
                },
                "top_p",
            ),
            (
                ParamOverrides {
                    top_p: Some(1.01),
                    ..Default::default()
                },
                "top_p",
            ),
            (
                ParamOverrides {
                    frequency_penalty: Some(-2.5),
                    ..Default::default()
                },
                "frequency_penalty",
            ),
            (
                ParamOverrides {
                    presence_penalty: Some(f64::NAN),
                    ..Default::default()
                },
                "presence_penalty",
            ),
            (
                ParamOverrides {
                    max_tokens: Some(0),
                    ..Default::default()
                },
                "max_tokens",
            ),
            (
                ParamOverrides {
                    max_tokens: Some(i64::from(u32::MAX) + 1),
                    ..Default::default()
                },
                "max_tokens",
            ),
        ];

        for (request, field) in cases {
            let error = validate_params(&request, &ParamOverrides::default()).unwrap_err();
            assert_eq!(field_of(error), field);
        }
    }

    #[test]
    fn test_invalid_backend_default_is_rejected() {
        let defaults = ParamOverrides {
            top_p: Some(4.0),
            ..Default::default()
        };
        let error = validate_params(&ParamOverrides::default(), &defaults).unwrap_err();
        assert_eq!(field_of(error), "top_p");
    }

    #[test]
    fn test_seed_accepts_any_value() {
        let request = ParamOverrides {
            seed: Some(-123_456_789),
            ..Default::default()
        };
        let params = validate_params(&request, &ParamOverrides::default()).unwrap();
        assert_eq!(params.seed, -123_456_789);
    }

    #[test]
    fn test_response_format_variants() {
        let parse = |value: serde_json::Value| {
            let request = ParamOverrides {
                response_format: Some(value),
                ..Default::default()
            };
            validate_params(&request, &ParamOverrides::default())
        };

        assert_eq!(
            parse(json!({"type": "text"})).unwrap().response_format,
            Some(ResponseFormat::Text)
        );
        assert_eq!(
            parse(json!({"type": "json_object"})).unwrap().response_format,
            Some(ResponseFormat::JsonObject)
        );

        let schema = json!({"type": "object", "properties": {"answer": {"type": "string"}}});
        let params = parse(json!({
            "type": "json_schema",
            "json_schema": {"name": "response", "schema": schema}
        }))
        .unwrap();
        match params.response_format {
            Some(ResponseFormat::JsonSchema { json_schema }) => {
                assert_eq!(json_schema.name, "response");
                assert_eq!(json_schema.schema, schema);
            }
            other => panic!("unexpected format {other:?}"),
        }

        let missing_name = parse(json!({"type": "json_schema", "json_schema": {"schema": {}}}));
        assert_eq!(
            field_of(missing_name.unwrap_err()),
            "response_format.json_schema.name"
        );

        let missing_schema = parse(json!({"type": "json_schema", "json_schema": {"name": "x"}}));
        assert_eq!(
            field_of(missing_schema.unwrap_err()),
            "response_format.json_schema.schema"
        );

        assert_eq!(
            field_of(parse(json!({"type": "yaml"})).unwrap_err()),
            "response_format.type"
        );
        assert_eq!(
            field_of(parse(json!("text")).unwrap_err()),
            "response_format"
        );
    }

    #[test]
    fn test_payload_rules() {
        let defaults = ParamOverrides::default();

        let empty_chat = GenerationRequest::chat(vec![]);
        assert_eq!(
            field_of(validate_request(empty_chat, &defaults).unwrap_err()),
            "messages"
        );

        let chat = GenerationRequest::chat(vec![Message::user("hello")]);
        let validated = validate_request(chat, &defaults).unwrap();
        assert_eq!(validated.payload().kind(), "chat");

        let no_image = GenerationRequest::vision(ImageInput::new(Vec::<u8>::new(), "image/png"), "what?");
        assert_eq!(
            field_of(validate_request(no_image, &defaults).unwrap_err()),
            "image"
        );

        let blank_prompt =
            GenerationRequest::vision(ImageInput::new(vec![1u8, 2, 3], "image/png"), "  ");
        assert_eq!(
            field_of(validate_request(blank_prompt, &defaults).unwrap_err()),
            "prompt"
        );
    }
}
