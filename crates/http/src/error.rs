//! Maps the broker's error taxonomy onto HTTP status codes
//! (`spec.md` §7 "Propagation policy").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pushi_common::{BrokerError, RepositoryError};

use crate::types::ErrorResponse;

/// The control plane's error type. Thin wrapper so `IntoResponse` can be
/// implemented locally (`BrokerError` lives in `pushi-common` and is shared
/// by crates, like `pushi-ws`, that have no notion of HTTP status codes).
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        Self(BrokerError::Repository(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            BrokerError::Auth(_) => (StatusCode::UNAUTHORIZED, "auth_error"),
            BrokerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            BrokerError::Limit(_) => (StatusCode::BAD_REQUEST, "limit_exceeded"),
            BrokerError::Protocol(_) => (StatusCode::BAD_REQUEST, "protocol_error"),
            BrokerError::Operational(_) => (StatusCode::BAD_REQUEST, "operational_error"),
            BrokerError::Adapter(_) => (StatusCode::BAD_GATEWAY, "adapter_error"),
            BrokerError::Repository(RepositoryError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            BrokerError::Repository(RepositoryError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }
        };

        let body = ErrorResponse {
            error: self.0.to_string(),
            code: Some(code.to_string()),
            timestamp: chrono::Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
