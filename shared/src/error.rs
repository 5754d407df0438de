use serde::Serialize;
use thiserror::Error;

/// Error taxonomy shared by every order and payment operation.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unprocessable: {0}")]
    UnprocessableEntity(String),

    #[error("internal error: {context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::UnprocessableEntity(message.into())
    }

    /// Wraps an infrastructure failure with a short description of what was being attempted.
    pub fn internal<E>(context: impl Into<String>, err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Internal {
            context: context.into(),
            source: err.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::UnprocessableEntity(_) => "UNPROCESSABLE_ENTITY",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Forbidden(_) => 403,
            Self::Unauthorized(_) => 401,
            Self::BadRequest(_) | Self::Validation(_) => 400,
            Self::Conflict(_) => 409,
            Self::UnprocessableEntity(_) => 422,
            Self::Internal { .. } => 500,
        }
    }

    /// Message safe to return to API callers. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal { context, .. } => format!("internal error: {}", context),
            other => other.to_string(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            error: self.public_message(),
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(err: diesel::result::Error) -> Self {
        AppError::internal("database", err)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub error: String,
}
