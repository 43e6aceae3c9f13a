//! Migration-specific error types.

use super::column::PhysicalType;
use super::queue::MigrationStatus;
use crate::catalog::TenantId;
use crate::storage::key::{format_id, Id};
use thiserror::Error;

/// Coarse classification of a [`MigrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected input, nothing was written.
    Validation,
    /// Request inconsistent with the catalog or queue, nothing was written.
    Consistency,
    /// DDL execution failure, recorded on the migration.
    Execution,
    /// Failure of the metadata store itself.
    Storage,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Consistency => write!(f, "consistency"),
            ErrorCategory::Execution => write!(f, "execution"),
            ErrorCategory::Storage => write!(f, "storage"),
        }
    }
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The abstract type or its configuration cannot be mapped to columns.
    #[error("unsupported field type {kind}: {reason}")]
    UnsupportedType {
        /// The abstract type name.
        kind: String,
        /// Why the type was rejected.
        reason: String,
    },

    /// A column type change would lose data.
    #[error("incompatible type change on column {column}: cannot convert {from_type} to {to_type}")]
    IncompatibleTypeChange {
        /// Physical column name.
        column: String,
        /// The source type.
        from_type: PhysicalType,
        /// The target type.
        to_type: PhysicalType,
    },

    /// Object does not exist in the tenant.
    #[error("object not found: {object}")]
    ObjectNotFound {
        /// Object id or name.
        object: String,
    },

    /// Object name already used in the tenant.
    #[error("object already exists: {name}")]
    ObjectAlreadyExists {
        /// Logical name.
        name: String,
    },

    /// Field does not exist in the tenant.
    #[error("field not found: {field}")]
    FieldNotFound {
        /// Field id or name.
        field: String,
    },

    /// Field name already used on the object.
    #[error("field already exists: {object}.{name}")]
    FieldAlreadyExists {
        /// Owning object name.
        object: String,
        /// Field name.
        name: String,
    },

    /// Input failed validation.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// Migration not found.
    #[error("migration not found: {}", format_id(.migration_id))]
    MigrationNotFound {
        /// The ID of the migration that was not found.
        migration_id: Id,
    },

    /// Status transition not allowed by the migration lifecycle.
    #[error("migration {} cannot move from {from} to {to}", format_id(.migration_id))]
    InvalidTransition {
        /// Migration id.
        migration_id: Id,
        /// Current status.
        from: MigrationStatus,
        /// Requested status.
        to: MigrationStatus,
    },

    /// DDL execution of a migration failed.
    #[error("migration #{sequence} ({}) failed: {reason}", format_id(.migration_id))]
    ExecutionFailed {
        /// Migration id.
        migration_id: Id,
        /// Per-tenant sequence number.
        sequence: u64,
        /// Underlying error.
        reason: String,
    },

    /// A failed migration blocks the tenant's queue.
    #[error(
        "tenant {tenant} is blocked by failed migration #{sequence} ({}): {reason}",
        format_id(.migration_id)
    )]
    QueueBlocked {
        /// Tenant.
        tenant: TenantId,
        /// Failed migration id.
        migration_id: Id,
        /// Per-tenant sequence number.
        sequence: u64,
        /// Recorded failure reason.
        reason: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl MigrationError {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MigrationError::UnsupportedType { .. }
            | MigrationError::Validation { .. }
            | MigrationError::ObjectAlreadyExists { .. }
            | MigrationError::FieldAlreadyExists { .. } => ErrorCategory::Validation,
            MigrationError::IncompatibleTypeChange { .. }
            | MigrationError::ObjectNotFound { .. }
            | MigrationError::FieldNotFound { .. }
            | MigrationError::MigrationNotFound { .. }
            | MigrationError::InvalidTransition { .. } => ErrorCategory::Consistency,
            MigrationError::ExecutionFailed { .. } | MigrationError::QueueBlocked { .. } => {
                ErrorCategory::Execution
            }
            MigrationError::Storage(_)
            | MigrationError::Serialization(_)
            | MigrationError::Deserialization(_) => ErrorCategory::Storage,
        }
    }
}

impl From<sled::Error> for MigrationError {
    fn from(e: sled::Error) -> Self {
        MigrationError::Storage(crate::error::Error::Storage(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::IncompatibleTypeChange {
            column: "amount".to_string(),
            from_type: PhysicalType::Text,
            to_type: PhysicalType::Float,
        };
        assert_eq!(
            err.to_string(),
            "incompatible type change on column amount: cannot convert text to float"
        );

        let err = MigrationError::FieldAlreadyExists {
            object: "opportunity".to_string(),
            name: "amount".to_string(),
        };
        assert!(err.to_string().contains("opportunity.amount"));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            MigrationError::UnsupportedType {
                kind: "SELECT".into(),
                reason: "no options".into()
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            MigrationError::ObjectNotFound {
                object: "x".into()
            }
            .category(),
            ErrorCategory::Consistency
        );
        assert_eq!(
            MigrationError::ExecutionFailed {
                migration_id: [0u8; 16],
                sequence: 1,
                reason: "no such table".into()
            }
            .category(),
            ErrorCategory::Execution
        );
    }
}
