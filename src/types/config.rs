use serde::{Deserialize, Serialize};
use std::fmt;

use super::params::ParamOverrides;

/// Which upstream a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Text,
    Image,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Text => "text",
            BackendKind::Image => "image",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one upstream model server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Model name sent in every upstream request.
    pub model_name: String,
    /// Base URL of the OpenAI-compatible API, e.g. `http://localhost:8000/v1`.
    pub base_url: String,
    /// Maximum number of upstream calls in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Maximum number of requests allowed to wait for a slot. `None` means unbounded.
    #[serde(default)]
    pub max_queued: Option<usize>,
    /// Bearer token for the upstream, if it needs one.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Timeout for buffered upstream calls. Streams are not time-limited.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Default generation arguments for this backend.
    #[serde(default)]
    pub llm_args: ParamOverrides,
}

fn default_max_concurrency() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    300
}

impl BackendConfig {
    pub fn new(model_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            base_url: base_url.into(),
            max_concurrency: default_max_concurrency(),
            max_queued: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
            llm_args: ParamOverrides::default(),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_max_queued(mut self, max_queued: usize) -> Self {
        self.max_queued = Some(max_queued);
        self
    }

    pub fn with_llm_args(mut self, llm_args: ParamOverrides) -> Self {
        self.llm_args = llm_args;
        self
    }
}
