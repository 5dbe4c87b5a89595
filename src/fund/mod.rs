//! Fundraising workflow for giving-project members.

pub mod cron;
pub mod donors;
pub mod membership;
pub mod news;
pub mod registration;
pub mod steps;

use crate::forms::FieldErrors;
use thiserror::Error;

pub use crate::forms::FORM_ERROR;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid form: {0}")]
    Invalid(FieldErrors),
    #[error("{0} not found")]
    NotFound(&'static str),
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

pub(crate) fn form_error(msg: &str) -> WorkflowError {
    let mut errors = FieldErrors::new();
    errors.add(FORM_ERROR, msg);
    WorkflowError::Invalid(errors)
}
