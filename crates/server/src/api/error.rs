//! Mapping of service errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use gatehouse_core::{PipelineError, ServiceError};

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A service error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::InvalidDefinition(_) => StatusCode::BAD_REQUEST,
            ServiceError::Pipeline(e) => match e {
                PipelineError::Credential(_) | PipelineError::CredentialRequired => {
                    StatusCode::UNAUTHORIZED
                }
                PipelineError::UnknownFeed(_) => StatusCode::NOT_FOUND,
                PipelineError::InvalidDefinition(_) => StatusCode::BAD_REQUEST,
                PipelineError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
                PipelineError::Backend(_) => StatusCode::BAD_GATEWAY,
                PipelineError::Issuance(_) | PipelineError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ServiceError::Config(_) | ServiceError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::VerificationError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ServiceError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                ServiceError::InvalidDefinition("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::Pipeline(PipelineError::Credential(
                    VerificationError::IdentityMismatch,
                )),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ServiceError::Storage("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status(), expected);
        }
    }
}
