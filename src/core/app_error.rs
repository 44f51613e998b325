use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::core::aliases::DieselError;

/// Application error taxonomy. Everything a handler can fail with collapses
/// into one of these; the client only ever sees the fixed `{"error": ...}`
/// bodies below, details stay in the logs.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Product not found")]
    NotFound,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Token expired")]
    Unauthorized,
    #[error("Token invalid")]
    TokenInvalid,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<DieselError> for AppError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => AppError::NotFound,
            _ => AppError::Other(err.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, "Product not found"),
            Self::BadRequest(detail) => {
                tracing::debug!(%detail, "Rejecting malformed request");
                (StatusCode::BAD_REQUEST, "Bad Request")
            }
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Token expired"),
            // Malformed tokens are a 400, not a 401, to match the wire
            // behavior clients already depend on.
            Self::TokenInvalid => (StatusCode::BAD_REQUEST, "Token invalid"),
            Self::Other(err) => {
                tracing::error!(error = ?err, "Unhandled application error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };

        (status, Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn bad_request_hides_detail_from_client() {
        let response = AppError::BadRequest("product_ids was empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({ "error": "Bad Request" }));
    }

    #[tokio::test]
    async fn not_found_renders_404() {
        let response = AppError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Product not found" })
        );
    }

    #[tokio::test]
    async fn expired_token_is_401_but_invalid_token_is_400() {
        assert_eq!(
            AppError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::TokenInvalid.into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn diesel_not_found_maps_to_not_found() {
        let err = AppError::from(DieselError::NotFound);
        assert!(matches!(err, AppError::NotFound));
    }
}
