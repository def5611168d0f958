use std::io;

use axum::http::header::InvalidHeaderValue;
use thiserror::Error;

/// Failure to resolve a resource through a [`ContentSource`](crate::ContentSource).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Io(#[from] io::Error),
}

/// Why a `Range` header was rejected. Every variant is answered with 416.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    /// The header could not be parsed at all.
    #[error("malformed range: {0}")]
    Malformed(String),

    /// The header parsed, but at least one range lies outside the resource.
    #[error("range not satisfiable for {total} bytes")]
    Unsatisfiable { total: u64 },

    #[error("{count} ranges requested, at most {max} allowed")]
    TooManyRanges { count: usize, max: usize },
}

/// Fatal failure of a single request after validation passed.
///
/// Whatever was already written to the body stays written.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("content source failed: {0}")]
    Source(io::Error),

    #[error("streaming failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid response header: {0}")]
    Header(#[from] InvalidHeaderValue),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
