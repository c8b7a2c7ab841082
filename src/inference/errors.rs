//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility. These types carry the context needed to build
//! meaningful log entries: endpoint, status code, and a snippet of the offending
//! body or frame.

use thiserror::Error;

/// Upper bound on how much of a raw body or frame is kept in an error.
pub const SNIPPET_LIMIT: usize = 512;

/// Errors that can occur while talking to an inference endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the endpoint could not be established.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// Connect, whole-request, or between-frame inactivity timeout elapsed.
    #[error("timeout after {duration_secs}s waiting on {endpoint}")]
    Timeout {
        endpoint: String,
        duration_secs: u64,
    },

    /// The connection broke after the response started.
    #[error("connection reset by {endpoint}: {reason}")]
    ConnectionReset { endpoint: String, reason: String },

    /// A frame or body was not valid JSON (or not valid UTF-8).
    #[error("malformed frame: {reason} (data: {frame})")]
    MalformedFrame { reason: String, frame: String },

    /// Valid JSON that does not have the shape of a completion payload.
    #[error("unexpected schema: {reason} (payload: {payload})")]
    UnexpectedSchema { reason: String, payload: String },

    /// Non-2xx HTTP response, or an error object sent mid-stream.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// The audio file for a transcription could not be read.
    #[error("audio file {path}: {reason}")]
    AudioFile { path: String, reason: String },
}

/// Coarse grouping of [`InferenceError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Server,
    Config,
}

impl InferenceError {
    /// Which family this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            InferenceError::ConnectFailed { .. }
            | InferenceError::Timeout { .. }
            | InferenceError::ConnectionReset { .. } => ErrorCategory::Transport,
            InferenceError::MalformedFrame { .. } | InferenceError::UnexpectedSchema { .. } => {
                ErrorCategory::Protocol
            }
            InferenceError::HttpError { .. } => ErrorCategory::Server,
            InferenceError::ConfigError { .. } | InferenceError::AudioFile { .. } => {
                ErrorCategory::Config
            }
        }
    }

    /// HTTP status code, if this is an `HttpError`.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Classify a `reqwest` failure that happened before or while sending.
    ///
    /// A timeout during connection setup reports `connect_timeout_secs`,
    /// any later one `timeout_secs`.
    pub(crate) fn from_send(
        err: &reqwest::Error,
        endpoint: &str,
        timeout_secs: u64,
        connect_timeout_secs: u64,
    ) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout {
                endpoint: endpoint.to_string(),
                duration_secs: if err.is_connect() {
                    connect_timeout_secs
                } else {
                    timeout_secs
                },
            }
        } else {
            InferenceError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// Classify a `reqwest` failure that happened while reading a body.
    pub(crate) fn from_body(err: &reqwest::Error, endpoint: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout {
                endpoint: endpoint.to_string(),
                duration_secs: timeout_secs,
            }
        } else {
            InferenceError::ConnectionReset {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Truncate `text` to at most [`SNIPPET_LIMIT`] characters, marking the cut.
pub fn snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_LIMIT) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
