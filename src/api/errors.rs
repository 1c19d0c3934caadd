use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::tasks::errors::PipelineError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    PayloadTooLarge(String),
    ServiceUnavailable(String),
    Pipeline(PipelineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Pipeline(err) => match err {
                PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
                PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
                PipelineError::NoIdentifiableStudent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
                PipelineError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (detail, kind) = match self {
            ApiError::Pipeline(err) => {
                if status.is_server_error() {
                    tracing::error!(kind = err.kind(), error = %err, "Pipeline request failed");
                }
                (err.to_string(), Some(err.kind()))
            }
            ApiError::ServiceUnavailable(message) => {
                tracing::error!(error = %message, "Service unavailable");
                (message, None)
            }
            ApiError::BadRequest(message) | ApiError::PayloadTooLarge(message) => (message, None),
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail, kind })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_map_to_http_statuses() {
        let cases = [
            (PipelineError::not_found("exam", "x"), StatusCode::NOT_FOUND),
            (PipelineError::Validation("bad".to_string()), StatusCode::BAD_REQUEST),
            (
                PipelineError::NoIdentifiableStudent { reason: "no token".to_string() },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (PipelineError::external("grading", anyhow::anyhow!("down")), StatusCode::BAD_GATEWAY),
            (
                PipelineError::persistence("repository", "lost"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
