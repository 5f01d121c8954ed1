use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use formsync_core::Error as CoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("missing x-user-id header")]
    MissingUserId,

    #[error("invalid x-user-id header: {0}")]
    InvalidUserId(String),

    #[error("invalid x-user-plan header: {0}")]
    InvalidPlan(String),

    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingUserId => StatusCode::UNAUTHORIZED,
            ApiError::InvalidUserId(_) | ApiError::InvalidPlan(_) | ApiError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Core(err) => match err {
                CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::Unauthorized(_) | CoreError::QuotaExceeded { .. } => {
                    StatusCode::FORBIDDEN
                }
                CoreError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
                CoreError::MalformedPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CoreError::Backend { .. } | CoreError::BackendMessage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}
