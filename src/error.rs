//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Descriptor or deployment misconfiguration. Never caused by request content.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing model key.")]
    MissingModelKey,
    #[error("model '{0}' is not bound on the resource instance")]
    UnboundModel(String),
    #[error("No fields found for pluckMode '{0}'")]
    UndeclaredPluckMode(String),
    #[error("resource '{0}' has no table binding")]
    MissingTable(String),
    #[error("unknown resource '{0}'")]
    UnknownResource(String),
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("no container modifier registered for kind '{0}'")]
    MissingModifier(String),
    #[error("duplicate route: {method} {path}")]
    DuplicateRoute { method: &'static str, path: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Failures reported by a document store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("unknown index '{index}' on table '{table}'")]
    UnknownIndex { table: String, index: String },
    #[error("unsupported query: {0}")]
    Unsupported(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Store(_) => "store_error",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::Validation("Missing id.".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NotFound("Not Found".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::from(ConfigError::MissingModelKey).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::from(StoreError::UnknownTable("users".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn pluck_mode_message_names_mode() {
        let err = AppError::from(ConfigError::UndeclaredPluckMode("detailed".into()));
        assert_eq!(err.to_string(), "No fields found for pluckMode 'detailed'");
    }
}
