//! Grant applications: cycles, drafts, submission, staff actions, awards
//! and year-end reports.

pub mod admin;
pub mod application;
pub mod awards;
pub mod cycle;
pub mod drafts;
pub mod registration;
pub mod submit;
pub mod view;
pub mod yer;

use crate::forms::FieldErrors;
use thiserror::Error;

pub use crate::fund::FORM_ERROR;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid form: {0}")]
    Invalid(FieldErrors),
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Someone else saved the draft moments ago.
    #[error("confirm override")]
    EditConflict,
    #[error("the grant cycle is closed")]
    Closed,
    #[error("an application was already submitted for this cycle")]
    AlreadyApplied,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<FieldErrors> for WorkflowError {
    fn from(errors: FieldErrors) -> Self {
        WorkflowError::Invalid(errors)
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        WorkflowError::Other(err.into())
    }
}

pub(crate) fn field_error(field: &str, msg: &str) -> WorkflowError {
    let mut errors = FieldErrors::new();
    errors.add(field, msg);
    WorkflowError::Invalid(errors)
}
