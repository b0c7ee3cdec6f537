//! Fetch failure taxonomy
//!
//! Every terminal outcome of a fetch maps to one [`FetchError`]. Callers
//! that only need the coarse classification use [`FetchError::kind`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Request timed out after {attempts} attempt(s): {url}")]
    Timeout { url: String, attempts: u32 },

    #[error("Rate limited (HTTP 429) after {attempts} attempt(s): {url}")]
    RateLimited { url: String, attempts: u32 },

    #[error("Connection failed after {attempts} attempt(s): {url} - {message}")]
    Connection {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Server error {status} after {attempts} attempt(s): {url}")]
    ServerError {
        url: String,
        status: u16,
        attempts: u32,
    },

    #[error("HTTP request failed with status {status}: {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to parse response from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Request cancelled: {url}")]
    Cancelled { url: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Coarse classification of a [`FetchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    ConnectionError,
    ServerError,
    HttpError,
    ParseError,
    InvalidUrl,
    Cancelled,
    ClientError,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate-limited",
            Self::ConnectionError => "connection-error",
            Self::ServerError => "server-error",
            Self::HttpError => "http-error",
            Self::ParseError => "parse-error",
            Self::InvalidUrl => "invalid-url",
            Self::Cancelled => "cancelled",
            Self::ClientError => "client-error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Connection { .. } => FailureKind::ConnectionError,
            Self::ServerError { .. } => FailureKind::ServerError,
            Self::HttpStatus { .. } => FailureKind::HttpError,
            Self::Parse { .. } => FailureKind::ParseError,
            Self::InvalidUrl { .. } => FailureKind::InvalidUrl,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::Client(_) => FailureKind::ClientError,
        }
    }

    /// True for failures that were retried before becoming terminal
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::Timeout
                | FailureKind::RateLimited
                | FailureKind::ConnectionError
                | FailureKind::ServerError
        )
    }

    /// Number of HTTP attempts made, when the failure went through retries
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Timeout { attempts, .. }
            | Self::RateLimited { attempts, .. }
            | Self::Connection { attempts, .. }
            | Self::ServerError { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerError { status, .. } | Self::HttpStatus { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}
