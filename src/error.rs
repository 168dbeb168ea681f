//! Error taxonomy shared across component boundaries (§7 of the spec).
//!
//! Components return `RadarError` so callers — the HTTP layer chief
//! among them — can match on the kind of failure rather than inspect
//! a message string. The composition root and anything above it keeps
//! using `anyhow::Result`, same as the teacher crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RadarError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl From<rusqlite::Error> for RadarError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => RadarError::NotFound(e.to_string()),
            other => RadarError::InternalInvariant(other.to_string()),
        }
    }
}

impl From<sled::Error> for RadarError {
    fn from(e: sled::Error) -> Self {
        RadarError::InternalInvariant(format!("sled: {e}"))
    }
}

impl From<reqwest::Error> for RadarError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            RadarError::TransientNetwork(e.to_string())
        } else if e.status().map(|s| s.as_u16()) == Some(429) {
            RadarError::RateLimited(e.to_string())
        } else {
            RadarError::UpstreamUnavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RadarError {
    fn from(e: serde_json::Error) -> Self {
        RadarError::ParseError(e.to_string())
    }
}

impl RadarError {
    /// HTTP status code this error should surface as, for the envelope in §7.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            RadarError::NotFound(_) => StatusCode::NOT_FOUND,
            RadarError::ParseError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RadarError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            RadarError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            RadarError::TransientNetwork(_) => StatusCode::SERVICE_UNAVAILABLE,
            RadarError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RadarError::InternalInvariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
