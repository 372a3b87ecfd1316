//! HTTP surface: routes, auth, and mapping of results onto JSON and SSE.

pub mod auth;
mod error;
mod health;
mod image;
mod sse;
mod text;

pub use error::{status_for, ApiError};

use crate::dispatcher::Dispatcher;
use crate::settings::{CorsSettings, ServerSettings};
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            dispatcher,
            api_key: api_key.into(),
        }
    }
}

pub fn router(state: AppState, server: &ServerSettings) -> Router {
    let models = Router::new()
        .route("/text_model/chat/completion", post(text::completion))
        .route("/text_model/chat/stream", post(text::stream))
        .route("/image_model/chat/completion", post(image::completion))
        .route("/image_model/chat/stream", post(image::stream))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .merge(models)
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(cors_layer(&server.cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn is_any(values: &[String]) -> bool {
    values.iter().any(|value| value.trim() == "*")
}

pub(crate) fn cors_layer(cors: &CorsSettings) -> CorsLayer {
    let mut layer = CorsLayer::new();

    layer = if is_any(&cors.allow_origins) {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(parse_all(
            &cors.allow_origins,
            "origin",
            |v| HeaderValue::from_str(v).ok(),
        )))
    };

    layer = if is_any(&cors.allow_methods) {
        layer.allow_methods(Any)
    } else {
        layer.allow_methods(parse_all(&cors.allow_methods, "method", |v| {
            Method::from_bytes(v.to_ascii_uppercase().as_bytes()).ok()
        }))
    };

    layer = if is_any(&cors.allow_headers) {
        layer.allow_headers(Any)
    } else {
        layer.allow_headers(parse_all(&cors.allow_headers, "header", |v| {
            HeaderName::from_bytes(v.as_bytes()).ok()
        }))
    };

    if cors.allow_credentials {
        if is_any(&cors.allow_origins) || is_any(&cors.allow_methods) || is_any(&cors.allow_headers)
        {
            warn!("CORS credentials cannot be combined with wildcard rules; credentials disabled");
        } else {
            layer = layer.allow_credentials(true);
        }
    }

    layer
}

fn parse_all<T>(values: &[String], kind: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .filter_map(|value| {
            let parsed = parse(value);
            if parsed.is_none() {
                warn!(kind, value, "Ignoring invalid CORS entry");
            }
            parsed
        })
        .collect()
}
