// Repository and schema error types
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::database::manager::DatabaseError;
use crate::filter::FilterError;

/// Errors surfaced by `EntityRepository` and `SchemaDeriver`.
///
/// Every variant is propagated unchanged to the caller, which decides how to
/// render it. `Configuration` is only produced while descriptors are being
/// built or derived, never by a request-time operation.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    #[error("{message}")]
    Validation {
        message: String,
        field_errors: BTreeMap<String, String>,
    },

    #[error("Unique constraint violated on {table}.{field}")]
    UniqueConstraint { table: String, field: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Persistence(DatabaseError),
}

impl EntityError {
    pub fn not_found(entity: impl Into<String>, key: impl ToString) -> Self {
        EntityError::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>, field_errors: BTreeMap<String, String>) -> Self {
        EntityError::Validation {
            message: message.into(),
            field_errors,
        }
    }

    /// Validation failure for a single field
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut field_errors = BTreeMap::new();
        field_errors.insert(field.into(), reason.into());
        EntityError::validation("Invalid field value", field_errors)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        EntityError::Configuration(message.into())
    }

    /// Suggested status code for the calling layer
    pub fn status_code(&self) -> u16 {
        match self {
            EntityError::NotFound { .. } => 404,
            EntityError::Validation { .. } => 422,
            EntityError::UniqueConstraint { .. } => 409,
            EntityError::Configuration(_) => 500,
            EntityError::Persistence(_) => 500,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            EntityError::NotFound { .. } => "NOT_FOUND",
            EntityError::Validation { .. } => "VALIDATION_ERROR",
            EntityError::UniqueConstraint { .. } => "UNIQUE_CONSTRAINT",
            EntityError::Configuration(_) => "CONFIGURATION_ERROR",
            EntityError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    /// Convert to a JSON body the view layer can render
    pub fn to_json(&self) -> Value {
        match self {
            EntityError::Validation { message, field_errors } => json!({
                "error": true,
                "message": message,
                "code": self.error_code(),
                "field_errors": field_errors,
            }),
            EntityError::Persistence(err) => {
                // Don't expose backend details to clients
                tracing::error!("Persistence error: {}", err);
                json!({
                    "error": true,
                    "message": "An error occurred while processing your request",
                    "code": self.error_code(),
                })
            }
            _ => json!({
                "error": true,
                "message": self.to_string(),
                "code": self.error_code(),
            }),
        }
    }
}

impl From<DatabaseError> for EntityError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::UniqueViolation { table, column } => EntityError::UniqueConstraint {
                table,
                field: column,
            },
            other => EntityError::Persistence(other),
        }
    }
}

impl From<FilterError> for EntityError {
    fn from(err: FilterError) -> Self {
        EntityError::Persistence(DatabaseError::Filter(err))
    }
}
