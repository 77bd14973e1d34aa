//! Service Layer Error Types
//!
//! Errors returned by the contribution plan services. Each variant maps to a
//! stable machine-readable code surfaced in GraphQL error extensions.

use crate::db::DatabaseError;
use crate::models::{EntityKind, ValidationError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PlanServiceError {
    /// Caller lacks a permission the operation requires
    #[error("Unauthorized: {operation} on {kind} requires {missing:?}")]
    PermissionDenied {
        kind: EntityKind,
        operation: String,
        missing: Vec<String>,
    },

    /// Mutation needs an authenticated user for the audit columns
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Validation failed for the submitted input
    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    /// Record not found (or already deleted) by ID
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Uuid },

    /// Replace targeted a row that is no longer the active version
    #[error("{kind} {id} is not active and cannot be replaced")]
    NotActive { kind: EntityKind, id: Uuid },

    /// Referenced row or product does not exist
    #[error("Invalid reference {field}: {value}")]
    InvalidReference { field: String, value: String },

    /// Filter combination not supported for this entity kind
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    DatabaseError(#[from] DatabaseError),
}

impl PlanServiceError {
    pub fn permission_denied(
        kind: EntityKind,
        operation: impl Into<String>,
        missing: Vec<String>,
    ) -> Self {
        Self::PermissionDenied {
            kind,
            operation: operation.into(),
            missing,
        }
    }

    pub fn not_found(kind: EntityKind, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn not_active(kind: EntityKind, id: Uuid) -> Self {
        Self::NotActive { kind, id }
    }

    pub fn invalid_reference(field: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidReference {
            field: field.into(),
            value: value.to_string(),
        }
    }

    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::ValidationFailed(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NotActive { .. } => "NOT_ACTIVE",
            Self::InvalidReference { .. } => "INVALID_REFERENCE",
            Self::QueryFailed(_) => "INVALID_QUERY",
            Self::DatabaseError(_) => "DATABASE_ERROR",
        }
    }
}
