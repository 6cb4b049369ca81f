use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use stele_backend::{ErrorKind, RegistryError};
use stele_forward::ForwardError;
use stele_query::QueryError;
use stele_store::StoreError;
use thiserror::Error;

/// Result alias for server construction and lifecycle.
pub type ServerResult<T> = Result<T, ServerError>;

/// Startup and lifecycle failures of the server process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A wire-facing failure: the taxonomy kind plus a client-safe message.
///
/// Every handler error renders as `{"error": <message>, "kind": <kind>}`
/// with the status the kind maps to. `Internal` detail never leaves the
/// process; the full error is logged instead.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::BadRequest.as_str(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: ErrorKind::NotFound.as_str(),
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: "unauthorized",
            message: "invalid credentials".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn from_kind(kind: ErrorKind, message: String) -> Self {
        let status = match kind {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if kind == ErrorKind::Internal {
            tracing::error!(error = %message, "internal failure");
            "internal error".to_string()
        } else {
            message
        };
        Self {
            status,
            kind: kind.as_str(),
            message,
        }
    }

    /// The response body without the envelope, for embedding in batch
    /// outcome lists.
    pub fn body(&self) -> serde_json::Value {
        json!({ "error": self.message, "kind": self.kind })
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        Self::from_kind(ErrorKind::BadRequest, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(self.body());
        if self.status == StatusCode::UNAUTHORIZED {
            (
                self.status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"stele\"")],
                body,
            )
                .into_response()
        } else {
            (self.status, body).into_response()
        }
    }
}
