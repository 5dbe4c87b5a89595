use crate::forms::FieldErrors;
use crate::{fund, grants};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Everything a handler can fail with, already mapped to a response shape.
#[derive(Debug)]
pub enum AppError {
    Invalid(FieldErrors),
    NotFound(String),
    Conflict(&'static str),
    Forbidden,
    /// Guard failure; answered with `303 See Other`.
    Redirect(&'static str),
    Internal(anyhow::Error),
}

impl AppError {
    fn form(msg: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(fund::FORM_ERROR, msg);
        AppError::Invalid(errors)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<FieldErrors> for AppError {
    fn from(errors: FieldErrors) -> Self {
        AppError::Invalid(errors)
    }
}

impl From<fund::WorkflowError> for AppError {
    fn from(err: fund::WorkflowError) -> Self {
        match err {
            fund::WorkflowError::Invalid(errors) => AppError::Invalid(errors),
            fund::WorkflowError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            fund::WorkflowError::Other(err) => AppError::Internal(err),
        }
    }
}

impl From<grants::WorkflowError> for AppError {
    fn from(err: grants::WorkflowError) -> Self {
        match err {
            grants::WorkflowError::Invalid(errors) => AppError::Invalid(errors),
            grants::WorkflowError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            grants::WorkflowError::EditConflict => AppError::Conflict("confirm override"),
            grants::WorkflowError::Closed => AppError::form(grants::drafts::CYCLE_CLOSED),
            grants::WorkflowError::AlreadyApplied => {
                AppError::form("An application was already submitted for this grant cycle.")
            }
            grants::WorkflowError::Other(err) => AppError::Internal(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Invalid(errors) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "errors": errors }))).into_response()
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response(),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, Json(json!({ "error": msg }))).into_response(),
            AppError::Forbidden => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": "forbidden" }))).into_response()
            }
            AppError::Redirect(to) => (StatusCode::SEE_OTHER, [(header::LOCATION, to)]).into_response(),
            AppError::Internal(err) => {
                error!(?err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
