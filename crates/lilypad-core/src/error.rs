// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for lilypad-core.
//!
//! Provides a unified error type that maps to stable wire-level error codes.

#![allow(dead_code)] // Variants and methods used in tests and for future expansion

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while processing control-plane operations.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// A document was not found in the store.
    NotFound {
        /// Document kind (e.g. "function", "invocation").
        kind: String,
        /// The document id that was not found.
        id: String,
    },

    /// A write presented a stale revision (concurrent writer won) or tried
    /// to create a document that already exists.
    Conflict {
        /// Document kind.
        kind: String,
        /// The contested document id.
        id: String,
    },

    /// The invocation is in an invalid status for the requested transition.
    InvalidState {
        /// The invocation ULID.
        ulid: String,
        /// The status required by the transition.
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// A progress update arrived before the minimum interval elapsed.
    RateLimited {
        /// The invocation ULID.
        ulid: String,
    },

    /// A sequential function already has an active invocation.
    SequentialConflict {
        /// The function name.
        function: String,
    },

    /// Input validation failed.
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The subject does not hold the required grants.
    Forbidden {
        /// The subject that was rejected.
        subject: String,
    },

    /// A stored document carries a schema version this build cannot read.
    /// Fatal: the process must not serve with an incompatible schema.
    MigrationFailure {
        /// Document kind.
        kind: &'static str,
        /// The schema version found in storage.
        stored: i64,
        /// The newest schema version this build supports.
        supported: i64,
    },

    /// Storage backend operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::SequentialConflict { .. } => "SEQUENTIAL_FUNCTION",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::MigrationFailure { .. } => "MIGRATION_FAILURE",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether a caller may retry the operation after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::RateLimited { .. })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, id } => {
                write!(f, "{} '{}' not found", kind, id)
            }
            Self::Conflict { kind, id } => {
                write!(f, "Revision conflict writing {} '{}'", kind, id)
            }
            Self::InvalidState {
                ulid,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Invocation '{}' is in invalid status: expected '{}', got '{}'",
                    ulid, expected, actual
                )
            }
            Self::RateLimited { ulid } => {
                write!(f, "Cannot progress invocation '{}' too quickly", ulid)
            }
            Self::SequentialConflict { function } => {
                write!(
                    f,
                    "Cannot spawn concurrent invocations for sequential function '{}'",
                    function
                )
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::Forbidden { subject } => {
                write!(f, "Subject '{}' lacks the required grants", subject)
            }
            Self::MigrationFailure {
                kind,
                stored,
                supported,
            } => {
                write!(
                    f,
                    "Stored {} document has schema version {} but this build supports up to {}",
                    kind, stored, supported
                )
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
