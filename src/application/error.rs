use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    application::repos::StoreError, domain::error::ValidationError, infra::error::InfraError,
};

/// Diagnostic chain attached to error responses for the response logger.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

pub mod codes {
    pub const MALFORMED_PARAMETER: &str = "malformed_parameter";
    pub const UNKNOWN_FIELD: &str = "unknown_field";
    pub const UNSUPPORTED_OPERATOR: &str = "unsupported_operator";
    pub const INVALID_VALUE: &str = "invalid_value";
    pub const MALFORMED_DESCRIPTOR: &str = "malformed_descriptor";
    pub const STORE_UNAVAILABLE: &str = "store_unavailable";
    pub const STORE_TIMEOUT: &str = "store_timeout";
    pub const STORE_ERROR: &str = "store_error";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorMessage,
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Store(StoreError::Unavailable(_) | StoreError::Timeout) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Store(StoreError::Query(_) | StoreError::Decode(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Infra(InfraError::Database { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(err) => match err {
                ValidationError::MalformedParameter { .. } => codes::MALFORMED_PARAMETER,
                ValidationError::UnknownField { .. } => codes::UNKNOWN_FIELD,
                ValidationError::UnsupportedOperator { .. } => codes::UNSUPPORTED_OPERATOR,
                ValidationError::InvalidValue { .. } => codes::INVALID_VALUE,
                ValidationError::MalformedDescriptor { .. } => codes::MALFORMED_DESCRIPTOR,
            },
            AppError::Store(StoreError::Unavailable(_)) => codes::STORE_UNAVAILABLE,
            AppError::Store(StoreError::Timeout) => codes::STORE_TIMEOUT,
            AppError::Store(_) => codes::STORE_ERROR,
            AppError::Infra(_) => codes::INTERNAL,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Filter request could not be processed",
            AppError::Store(StoreError::Unavailable(_) | StoreError::Timeout) => {
                "Catalog temporarily unavailable"
            }
            AppError::Store(_) => "Catalog query failed",
            AppError::Infra(_) => "Unexpected error occurred",
        }
    }

    /// Client faults carry their detail as a hint; server faults keep it in
    /// the log only.
    fn hint(&self) -> Option<String> {
        match self {
            AppError::Validation(err) => Some(err.to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorMessage {
                code: self.code().to_string(),
                message: self.presentation_message().to_string(),
                hint: self.hint(),
            },
        };
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}
