//! Extractors that turn axum rejections into structured `AppError` responses
//! instead of axum's plain-text defaults.

use axum::{
    Json,
    extract::{
        FromRequest, FromRequestParts, Path, Request,
        rejection::{JsonRejection, PathRejection},
    },
    http::request::Parts,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Drop-in for `axum::Json<T>` in handler signatures.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(body_error(&rejection.body_text())),
        }
    }
}

/// Drop-in for `axum::extract::Path<T>`; a malformed id becomes a 400 with the field named.
pub struct AppPath<T>(pub T);

impl<S, T> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(AppPath(value)),
            Err(rejection) => Err(path_error(&rejection)),
        }
    }
}

fn body_error(body_text: &str) -> AppError {
    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(serde_field(body_text).unwrap_or_else(|| "body".to_string())),
        received: None,
        docs_hint: Some(
            "Check the request body against the endpoint's schema (GET /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

fn path_error(rejection: &PathRejection) -> AppError {
    AppError::Validation {
        message: format!("Invalid path: {}", rejection.body_text()),
        field: Some("path".to_string()),
        received: None,
        docs_hint: Some("Home and intervention ids are UUIDs.".to_string()),
    }
}

/// Pull the field name out of serde's "missing field `x`" / "unknown field `x`" messages.
fn serde_field(message: &str) -> Option<String> {
    ["missing field `", "unknown field `"]
        .iter()
        .find_map(|marker| {
            let start = message.find(marker)? + marker.len();
            let rest = &message[start..];
            rest.find('`').map(|end| rest[..end].to_string())
        })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::*;

    #[test]
    fn finds_missing_field() {
        let msg = "Failed to deserialize: missing field `address` at line 1 column 12";
        assert_eq!(serde_field(msg), Some("address".to_string()));
    }

    #[test]
    fn finds_unknown_field() {
        assert_eq!(
            serde_field("unknown field `colour`, expected one of `address`"),
            Some("colour".to_string())
        );
    }

    #[test]
    fn generic_errors_point_at_body() {
        assert_eq!(serde_field("invalid type: string, expected f64"), None);
        let err = body_error("invalid type: string, expected f64");
        match &err {
            AppError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("body")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
