use thiserror::Error;

/// Errors that can occur while admitting, dispatching or relaying a generation request.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range input, rejected before any concurrency slot is taken.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// The upstream model server was unreachable, failed, or answered with garbage.
    #[error("{}", upstream_message(.status, .message))]
    Upstream { status: Option<u16>, message: String },

    #[error("upstream model server timed out")]
    Timeout,

    /// The caller went away before the request finished.
    #[error("request cancelled by caller")]
    Cancelled,

    #[error("{backend} backend queue is full ({limit} requests already waiting)")]
    QueueFull { backend: String, limit: usize },

    #[error("gateway is shutting down")]
    Shutdown,

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn upstream_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("upstream error (status {status}): {message}"),
        None => format!("upstream error: {message}"),
    }
}

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Error::Upstream {
            status: None,
            message: message.into(),
        }
    }

    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        Error::Upstream {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if e.is_decode() {
            Error::upstream(format!("malformed response body: {e}"))
        } else {
            Error::Upstream {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
