use std::path::PathBuf;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid or expired")]
    NotFound,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Not ready")]
    NotReady,

    #[error("Job already started")]
    AlreadyStarted,

    #[error("Failed to internally queue")]
    Dispatch,
}

impl ResponseError for JobError {
    fn status_code(&self) -> StatusCode {
        match self {
            JobError::NotFound => StatusCode::NOT_FOUND,
            JobError::InvalidFormat(_) | JobError::NotReady => StatusCode::BAD_REQUEST,
            JobError::AlreadyStarted => StatusCode::CONFLICT,
            JobError::Dispatch => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            JobError::InvalidFormat(_) => "Invalid format".to_owned(),
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(body)
    }
}

/// Failure reported by the external media tool.
///
/// The display text is what the job records as its error message.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to launch media tool: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),

    #[error("media tool finished but produced no file at {}", .0.display())]
    MissingOutput(PathBuf),
}
