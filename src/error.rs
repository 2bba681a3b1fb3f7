//! Error types shared by services and HTTP handlers.
//!
//! Collaborators raise [`ServiceError`] carrying a structured [`ErrorKind`] at the
//! point of failure. Retry classification and HTTP status mapping both read the kind;
//! the message is for humans.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Classification attached to every service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    ServerUnavailable,
    ConnectionReset,
    Authentication,
    Validation,
    ContentBlocked,
    MalformedResponse,
    NotFound,
    BudgetExceeded,
    Internal,
}

impl ErrorKind {
    /// Kinds that are worth re-attempting without any change to the request.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::RateLimited
                | Self::ServerUnavailable
                | Self::ConnectionReset
        )
    }

    /// Kinds that must never be retried, whatever the message says.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            Self::Authentication
                | Self::Validation
                | Self::ContentBlocked
                | Self::NotFound
                | Self::BudgetExceeded
        )
    }

    /// Classify an HTTP status returned by a remote collaborator.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            400 | 413 | 415 | 422 => Self::Validation,
            401 | 403 => Self::Authentication,
            404 => Self::NotFound,
            408 => Self::Timeout,
            429 => Self::RateLimited,
            502..=504 => Self::ServerUnavailable,
            _ => Self::Internal,
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Network
        } else if err.is_decode() {
            Self::MalformedResponse
        } else if let Some(status) = err.status() {
            Self::from_status(status)
        } else if err.to_string().to_lowercase().contains("reset") {
            Self::ConnectionReset
        } else {
            Self::Network
        }
    }
}

/// Failure raised by an external collaborator (vision model, object store, cache).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        let kind = ErrorKind::from_reqwest(&err);
        Self::new(kind, format!("{}: {}", context, err))
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Service(e) => match e.kind {
                ErrorKind::RateLimited | ErrorKind::BudgetExceeded => {
                    StatusCode::TOO_MANY_REQUESTS
                }
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::ContentBlocked => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                // Our credentials for an upstream were rejected; not the caller's fault
                ErrorKind::Authentication | ErrorKind::MalformedResponse => {
                    StatusCode::BAD_GATEWAY
                }
                ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::ServerUnavailable
                | ErrorKind::ConnectionReset => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Service(e) if e.kind.is_transient() => "UPSTREAM_UNAVAILABLE",
            Self::Service(_) => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Service(e) if e.kind == ErrorKind::Internal => {
                "An internal error occurred".to_string()
            }
            Self::Service(e) => e.message.clone(),
            // Don't leak internal error details
            Self::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(e) => {
                tracing::error!(error = ?e, "Internal server error");
            }
            Self::Service(e) => {
                tracing::warn!(kind = ?e.kind, error = %e, "Upstream service error");
            }
            _ => {
                tracing::warn!(error = %self, "API error");
            }
        }

        let status = self.status_code();
        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message: self.public_message(),
            kind: match &self {
                Self::Service(e) => Some(e.kind),
                _ => None,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_classify_into_kinds() {
        use reqwest::StatusCode as S;
        assert_eq!(ErrorKind::from_status(S::TOO_MANY_REQUESTS), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(S::BAD_GATEWAY), ErrorKind::ServerUnavailable);
        assert_eq!(ErrorKind::from_status(S::SERVICE_UNAVAILABLE), ErrorKind::ServerUnavailable);
        assert_eq!(ErrorKind::from_status(S::UNAUTHORIZED), ErrorKind::Authentication);
        assert_eq!(ErrorKind::from_status(S::BAD_REQUEST), ErrorKind::Validation);
        assert_eq!(ErrorKind::from_status(S::INTERNAL_SERVER_ERROR), ErrorKind::Internal);
    }

    #[test]
    fn transient_and_permanent_are_disjoint() {
        let all = [
            ErrorKind::Network,
            ErrorKind::Timeout,
            ErrorKind::RateLimited,
            ErrorKind::ServerUnavailable,
            ErrorKind::ConnectionReset,
            ErrorKind::Authentication,
            ErrorKind::Validation,
            ErrorKind::ContentBlocked,
            ErrorKind::MalformedResponse,
            ErrorKind::NotFound,
            ErrorKind::BudgetExceeded,
            ErrorKind::Internal,
        ];
        for kind in all {
            assert!(!(kind.is_transient() && kind.is_permanent()), "{:?}", kind);
        }
    }

    #[test]
    fn service_errors_map_to_http_status() {
        let rate = ApiError::from(ServiceError::new(ErrorKind::RateLimited, "slow down"));
        assert_eq!(rate.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let blocked = ApiError::from(ServiceError::new(ErrorKind::ContentBlocked, "blocked"));
        assert_eq!(blocked.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let internal = ApiError::from(ServiceError::new(ErrorKind::Internal, "secret detail"));
        assert_eq!(internal.public_message(), "An internal error occurred");
    }
}
