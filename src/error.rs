//! Error types and HTTP status code mapping.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};

use crate::BoxBody;

/// Every failure the gateway can produce, each mapping to a specific
/// HTTP status.
#[derive(Debug)]
pub enum GatewayError {
    /// The configuration file could not be loaded or parsed.
    Config(String),
    /// The configured origin URL is malformed or unusable.
    InvalidOrigin(String),
    /// The origin request failed at the transport level.
    Upstream(hyper_util::client::legacy::Error),
    /// The origin round-trip exceeded the configured request timeout.
    Timeout(Duration),
    /// An admin API payload was missing or malformed.
    BadRequest(String),
    /// The request targeted an admin route it may not use.
    Forbidden(String),
    /// The concurrency limit was reached and the request was shed.
    ServiceUnavailable { limit: usize },
    /// The gateway state file could not be read or written.
    State(String),
    /// An internal error that does not fit other categories.
    Internal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::InvalidOrigin(msg) => write!(f, "invalid origin: {msg}"),
            Self::Upstream(err) => write!(f, "upstream error: {err}"),
            Self::Timeout(limit) => write!(f, "upstream timed out after {limit:?}"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            Self::ServiceUnavailable { limit } => {
                write!(f, "concurrency limit of {limit} requests reached")
            }
            Self::State(msg) => write!(f, "state store error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Returns the HTTP status code corresponding to this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::InvalidOrigin(_) | Self::State(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Converts this error into an HTTP response with a JSON body.
    pub fn into_response(self) -> Response<BoxBody> {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": match &self {
                Self::Config(_) => "config_error",
                Self::InvalidOrigin(_) => "invalid_origin",
                Self::Upstream(_) => "upstream_error",
                Self::Timeout(_) => "upstream_timeout",
                Self::BadRequest(_) => "bad_request",
                Self::Forbidden(_) => "forbidden",
                Self::ServiceUnavailable { .. } => "service_unavailable",
                Self::State(_) => "state_error",
                Self::Internal(_) => "internal_error",
            },
            "message": self.to_string(),
        });

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(full_body(body.to_string()))
            .unwrap_or_else(|_| {
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(full_body(""))
                    .expect("building fallback response must not fail")
            })
    }
}

/// Wraps a buffered payload into the gateway's uniform [`BoxBody`] type.
pub fn full_body(payload: impl Into<Bytes>) -> BoxBody {
    Full::new(payload.into())
        .map_err(|never| -> Box<dyn std::error::Error + Send + Sync> { match never {} })
        .boxed()
}

impl From<hyper_util::client::legacy::Error> for GatewayError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        Self::Upstream(err)
    }
}

impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<hyper::http::Error> for GatewayError {
    fn from(err: hyper::http::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
