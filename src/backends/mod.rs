//! Upstream backend implementations.

pub mod openai;

pub use openai::OpenAICompatibleBackend;
