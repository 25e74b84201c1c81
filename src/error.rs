use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::ProductError;

/// Errors surfaced at the HTTP boundary
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body could not be read as a product
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Product(#[from] ProductError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Product(ProductError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Product(ProductError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Product(ProductError::DuplicateKey(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details stay in the log
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Internal error while handling request");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": error_type_name(status),
            "message": message,
        }));

        (status, body).into_response()
    }
}

fn error_type_name(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::INTERNAL_SERVER_ERROR => "internal_server_error",
        _ => "error",
    }
}
