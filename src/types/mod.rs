//! Core types used throughout the gateway.

pub mod config;
pub mod message;
pub mod params;
pub mod streaming;

// Re-export commonly used types
pub use config::*;
pub use message::*;
pub use params::*;
pub use streaming::*;
