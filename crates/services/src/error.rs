//! Shared error types for the services crate.

use thiserror::Error;

use lab_core::model::LabDefinitionError;
use lab_core::{InvalidStateError, ProgressError, ValidationError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by a `LabGateway`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("backend request failed with status {status}: {message}")]
    HttpStatus {
        status: reqwest::StatusCode,
        message: String,
    },
    /// The backend answered with `success: false`.
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("backend response could not be decoded: {0}")]
    Malformed(String),
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// The status code, when the backend answered with a non-2xx response.
    #[must_use]
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            GatewayError::HttpStatus { status, .. } => Some(*status),
            GatewayError::Http(err) => err.status(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(reqwest::StatusCode::NOT_FOUND)
    }
}

/// Errors emitted by `LabLoopService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LabError {
    #[error(transparent)]
    Validation(ValidationError),
    #[error(transparent)]
    InvalidState(InvalidStateError),
    #[error(transparent)]
    Remote(#[from] GatewayError),
    #[error(transparent)]
    Definition(#[from] LabDefinitionError),
}

impl From<ProgressError> for LabError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::Validation(err) => LabError::Validation(err),
            ProgressError::InvalidState(err) => LabError::InvalidState(err),
        }
    }
}

impl From<ValidationError> for LabError {
    fn from(err: ValidationError) -> Self {
        LabError::Validation(err)
    }
}

impl From<InvalidStateError> for LabError {
    fn from(err: InvalidStateError) -> Self {
        LabError::InvalidState(err)
    }
}

impl LabError {
    /// Short text suitable for showing to the student.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            LabError::Validation(err) => err.to_string(),
            LabError::InvalidState(err) => err.to_string(),
            LabError::Remote(GatewayError::Rejected(message)) => message.clone(),
            LabError::Remote(GatewayError::HttpStatus { message, .. }) if !message.is_empty() => {
                message.clone()
            }
            LabError::Remote(GatewayError::Http(_)) => {
                "could not reach the lab server, please try again".to_string()
            }
            LabError::Remote(err) => format!("lab server error: {err}"),
            LabError::Definition(err) => format!("this lab is misconfigured: {err}"),
        }
    }

    /// The failure came from the backend or the network.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, LabError::Remote(_))
    }
}

/// Errors raised while loading `ClientConfig`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
