use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

use crate::store::{Entity, StoreError};
use crate::validation::InvalidName;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
    #[error("Name for update is missing")]
    MissingName,
    #[error("{0} not found")]
    NotFound(Entity),
    #[error("{0} name already exists")]
    AlreadyExists(Entity),
    #[error("unauthorized")]
    Unauthorized,
    #[error("Flag {0} was saved on the project but not on every environment, resync it to converge")]
    PartialCascade(String),
    #[error("database unavailable")]
    DatabaseUnavailable,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlagError {
    /// Returns (error_code, status_code) for this error.
    fn error_metadata(&self) -> (&'static str, StatusCode) {
        match self {
            FlagError::RequestParsingError(_) => ("request_parsing_error", StatusCode::BAD_REQUEST),
            FlagError::InvalidName(_) => ("invalid_name", StatusCode::BAD_REQUEST),
            FlagError::MissingName => ("missing_name", StatusCode::BAD_REQUEST),
            FlagError::AlreadyExists(_) => ("already_exists", StatusCode::BAD_REQUEST),
            FlagError::Unauthorized => ("unauthorized", StatusCode::UNAUTHORIZED),
            FlagError::NotFound(_) => ("not_found", StatusCode::NOT_FOUND),
            FlagError::PartialCascade(_) => ("partial_cascade", StatusCode::INTERNAL_SERVER_ERROR),
            FlagError::Internal(_) => ("internal_error", StatusCode::INTERNAL_SERVER_ERROR),
            FlagError::DatabaseUnavailable => {
                ("database_unavailable", StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    }

    /// Returns a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        self.error_metadata().0
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_metadata().1
    }
}

impl From<StoreError> for FlagError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(entity) => FlagError::NotFound(entity),
            StoreError::AlreadyExists(entity) => FlagError::AlreadyExists(entity),
            StoreError::Database(
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_),
            ) => {
                tracing::error!("database unavailable: {}", e);
                FlagError::DatabaseUnavailable
            }
            StoreError::Database(_) | StoreError::Migration(_) => {
                FlagError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for FlagError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = match &self {
            FlagError::NotFound(_) | FlagError::AlreadyExists(_) => {
                tracing::info!("{}", self);
                self.to_string()
            }
            FlagError::Internal(msg) => {
                tracing::error!(error_code = self.error_code(), "Internal server error: {}", msg);
                "An internal server error occurred".to_string()
            }
            FlagError::PartialCascade(_) | FlagError::DatabaseUnavailable => {
                tracing::error!(error_code = self.error_code(), "{}", self);
                self.to_string()
            }
            // never say which part of the credential was wrong
            FlagError::Unauthorized => "unauthorized".to_string(),
            _ => self.to_string(),
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}
