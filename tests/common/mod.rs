#![allow(dead_code)]

use model_gateway::dispatcher::{Dispatcher, Lane};
use model_gateway::types::{BackendConfig, BackendKind};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::MockServer;

pub const CHAT_PATH: &str = "/v1/chat/completions";

pub fn backend_config(server: &MockServer, model: &str) -> BackendConfig {
    BackendConfig::new(model, format!("{}/v1", server.uri()))
}

pub fn dispatcher(text: BackendConfig, image: BackendConfig) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        Lane::from_config(BackendKind::Text, &text).unwrap(),
        Lane::from_config(BackendKind::Image, &image).unwrap(),
    ))
}

/// Buffered Chat Completions reply carrying `text`.
pub fn completion_body(text: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    })
}

/// Streaming reply: one chunk per delta, then `[DONE]`.
pub fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        let chunk = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}
