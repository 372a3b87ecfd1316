//! A gateway in front of two OpenAI-compatible model servers.
//!
//! Requests for the text and image backends are validated, admitted through a
//! per-backend FIFO concurrency gate, forwarded upstream, and relayed back
//! either as a single response or as a stream of chunks.

pub mod api;
pub mod backend;
pub mod backends;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod observability;
pub mod relay;
pub mod response;
pub mod settings;
pub mod sse_stream;
pub mod types;
pub mod validator;

// Re-export core types for easy usage
pub use backend::ModelBackend;
pub use error::Error;
pub use response::*;
pub use sse_stream::SseEvent;
pub use types::*;
