use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hearth_core::error::{self, ApiError, ParseTagError};
use hearth_core::intervention::InterventionError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing or invalid credentials (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Authenticated but not allowed (403)
    Forbidden {
        message: String,
        docs_hint: Option<String>,
    },
    /// Resource not found (404)
    NotFound { resource: String },
    /// State conflict, e.g. an intervention already closed (409)
    Conflict {
        message: String,
        docs_hint: Option<String>,
    },
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Forbidden { message, docs_hint } => (
                StatusCode::FORBIDDEN,
                ApiError {
                    error: error::codes::FORBIDDEN.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Conflict { message, docs_hint } => (
                StatusCode::CONFLICT,
                ApiError {
                    error: error::codes::CONFLICT.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Database(err) => {
                // Unique violation: a concurrent request already opened the row we tried to add
                if let sqlx::Error::Database(ref db_err) = err {
                    if db_err.code().as_deref() == Some("23505") {
                        tracing::warn!(error = %db_err, "unique constraint violation");
                        return AppError::Conflict {
                            message: "A conflicting record already exists".to_string(),
                            docs_hint: Some(
                                "Re-read the resource; another request changed it first."
                                    .to_string(),
                            ),
                        }
                        .into_response();
                    }
                }
                tracing::error!("Database error: {:?}", err);

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

/// A stored tag we cannot parse means the row is corrupt, not that the client erred.
impl From<ParseTagError> for AppError {
    fn from(err: ParseTagError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<InterventionError> for AppError {
    fn from(err: InterventionError) -> Self {
        match err {
            InterventionError::AlreadyClosed { .. } => AppError::Conflict {
                message: err.to_string(),
                docs_hint: Some(
                    "List interventions to see the current state before deciding.".to_string(),
                ),
            },
            InterventionError::DeferralNotInFuture { .. } => AppError::Validation {
                message: err.to_string(),
                field: Some("defer_until".to_string()),
                received: None,
                docs_hint: Some("Pick a date after today.".to_string()),
            },
        }
    }
}

/// Parse a path segment into a tag enum, reporting the client's bad value.
pub fn parse_path_tag<T>(raw: &str, field: &str) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = ParseTagError>,
{
    raw.parse::<T>().map_err(|err| AppError::Validation {
        message: err.to_string(),
        field: Some(field.to_string()),
        received: Some(serde_json::Value::String(raw.to_string())),
        docs_hint: None,
    })
}
