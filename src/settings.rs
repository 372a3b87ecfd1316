//! Process configuration, read once at start-up from the environment.
//!
//! Nested keys use `__` as separator, e.g. `TEXT_MODEL__BASE_URL` or
//! `SERVER__CORS__ALLOW_ORIGINS=https://a.example,https://b.example`.

use crate::types::{BackendConfig, ParamOverrides};
use crate::validator::validate_params;
use crate::Error;
use ::config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;

const LIST_KEYS: [&str; 3] = [
    "server.cors.allow_origins",
    "server.cors.allow_methods",
    "server.cors.allow_headers",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Shared secret callers present in `X-API-Key`.
    pub api_key: String,
    #[serde(default)]
    pub server: ServerSettings,
    pub text_model: BackendConfig,
    pub image_model: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Largest accepted request body, image uploads included.
    pub max_upload_bytes: usize,
    pub cors: CorsSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1999,
            log_level: "info".to_string(),
            max_upload_bytes: 20 * 1024 * 1024,
            cors: CorsSettings::default(),
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `*` in any list means "any".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    pub allow_origins: Vec<String>,
    pub allow_credentials: bool,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
}

impl Default for CorsSettings {
    fn default() -> Self {
        let any = vec!["*".to_string()];
        Self {
            allow_origins: any.clone(),
            allow_credentials: false,
            allow_methods: any.clone(),
            allow_headers: any,
        }
    }
}

fn default_environment() -> String {
    "development".to_string()
}

impl Settings {
    /// Load from the process environment.
    pub fn load() -> Result<Self, Error> {
        Self::from_source(environment())
    }

    /// Load from an explicit set of variables instead of the process environment.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self, Error> {
        Self::from_source(environment().source(Some(vars)))
    }

    fn from_source(source: Environment) -> Result<Self, Error> {
        let settings: Settings = Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    fn validate(&self) -> Result<(), Error> {
        if self.api_key.trim().is_empty() {
            return Err(Error::config("API_KEY must not be empty"));
        }
        validate_backend("text_model", &self.text_model)?;
        validate_backend("image_model", &self.image_model)?;
        Ok(())
    }
}

fn environment() -> Environment {
    LIST_KEYS.iter().fold(
        Environment::default()
            .separator("__")
            .try_parsing(true)
            .list_separator(","),
        |env, key| env.with_list_parse_key(key),
    )
}

fn validate_backend(name: &str, backend: &BackendConfig) -> Result<(), Error> {
    if backend.model_name.trim().is_empty() {
        return Err(Error::config(format!("{name}.model_name must not be empty")));
    }
    if backend.base_url.trim().is_empty() {
        return Err(Error::config(format!("{name}.base_url must not be empty")));
    }
    if backend.max_concurrency == 0 {
        return Err(Error::config(format!(
            "{name}.max_concurrency must be at least 1"
        )));
    }
    if backend.timeout_secs == 0 {
        return Err(Error::config(format!(
            "{name}.timeout_secs must be at least 1"
        )));
    }
    validate_params(&ParamOverrides::default(), &backend.llm_args)
        .map_err(|e| Error::config(format!("{name}.llm_args: {e}")))?;
    Ok(())
}
