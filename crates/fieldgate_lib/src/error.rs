//! Field-local failures.

use fieldgate_common_types::{EntityKey, ErrorCategory};
use thiserror::Error;

use crate::schema::SchemaError;

pub type FieldResult<T> = Result<T, FieldError>;

/// Why a single field could not produce a value. None of these abort the
/// query: the field is nulled (see null propagation in
/// [`crate::execution`]) and one error is reported at its path.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("{0}")]
    Input(String),
    #[error("The current user is not authenticated")]
    Authentication,
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    NotFound(String),
    #[error("The data source for `{entity_type}` is unavailable")]
    SourceUnavailable { entity_type: String },
    /// The message shown to callers never includes the underlying error.
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl FieldError {
    pub fn input(message: impl Into<String>) -> Self {
        FieldError::Input(message.into())
    }

    pub fn not_found(entity_type: &str, key: &EntityKey) -> Self {
        FieldError::NotFound(format!("No `{entity_type}` found for key {key}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        FieldError::Internal(anyhow::anyhow!(message.into()))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FieldError::Input(_) => ErrorCategory::Input,
            FieldError::Authentication => ErrorCategory::Authentication,
            FieldError::Authorization(_) => ErrorCategory::Authorization,
            FieldError::NotFound(_) => ErrorCategory::NotFound,
            FieldError::SourceUnavailable { .. } => ErrorCategory::SourceUnavailable,
            FieldError::Internal(_) => ErrorCategory::Internal,
        }
    }
}

impl From<SchemaError> for FieldError {
    fn from(err: SchemaError) -> Self {
        FieldError::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_their_cause() {
        let err = FieldError::from(anyhow::anyhow!("connection refused: 10.0.0.3:5432"));
        assert_eq!(err.to_string(), "Internal server error");
        assert_eq!(err.category(), ErrorCategory::Internal);
    }

    #[test]
    fn not_found_names_entity_and_key() {
        let err = FieldError::not_found("Category", &EntityKey::Int(7));
        assert_eq!(err.to_string(), "No `Category` found for key 7");
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }
}
