//! Error responses of the HTTP API.
//!
//! Every failure is rendered as `{"detail": "..."}` with a matching status.

use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use folio_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request parameters out of range.
    #[error("{0}")]
    Validation(String),
    /// An upstream dependency has nothing to serve.
    #[error("{0}")]
    Unavailable(String),
    /// Processing failed; `context` names the operation.
    #[error("{context}: {source}")]
    Internal {
        context: &'static str,
        #[source]
        source: EngineError,
    },
}

impl ApiError {
    pub fn internal(context: &'static str) -> impl FnOnce(EngineError) -> Self {
        move |source| ApiError::Internal { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal { .. } = &self {
            tracing::error!(error = %self, "Request failed");
        }
        let body = serde_json::json!({ "detail": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
