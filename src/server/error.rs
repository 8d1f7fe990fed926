use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors returned by the JSON endpoints.
///
/// Rendered as `{"error": {"category": ..., "message": ...}}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The upstream feed failed and nothing is cached.
    #[error("Podcast feed unavailable: {message}")]
    FeedUnavailable {
        message: String,
        fallback_url: String,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::FeedUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Catalog(CatalogError::UnknownSection(_)) => StatusCode::NOT_FOUND,
            ApiError::Catalog(CatalogError::QueryTooLong(_)) => StatusCode::BAD_REQUEST,
            ApiError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn category(&self) -> &'static str {
        match self {
            ApiError::FeedUnavailable { .. } => "upstream",
            ApiError::Catalog(CatalogError::UnknownSection(_)) => "not_found",
            ApiError::Catalog(CatalogError::QueryTooLong(_)) => "invalid_request",
            ApiError::Catalog(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, status = %status, "Request failed");
        }

        let mut error = serde_json::json!({
            "category": self.category(),
            "message": self.to_string(),
        });
        if let ApiError::FeedUnavailable { fallback_url, .. } = &self {
            error["fallback_url"] = serde_json::Value::String(fallback_url.clone());
        }

        (status, Json(serde_json::json!({ "error": error }))).into_response()
    }
}
