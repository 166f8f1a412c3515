/// Centralized error handling for the monitoring engine
///
/// This module defines the engine-wide error type and the stable
/// machine-readable codes the host interface exposes.
///
/// # Error Handling Strategy
///
/// - **Library code**: Use typed errors with `thiserror`
/// - **Config loading**: Use `anyhow::Result` for convenience
/// - **Host boundary**: Always serialize to `ErrorObject`; consumers
///   localize on `code` and never see raw infrastructure messages
use std::io;

use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};
use thiserror::Error;

/// Stable machine-readable error codes surfaced at the host interface
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    NotFound,
    DuplicateSiteIdentifier,
    DuplicateMonitorId,
    NoMonitors,
    SchemaNewer,
    IntegrityFailed,
    Timeout,
    Transient,
    Cancelled,
    Internal,
}

/// A single per-field validation issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Payload failed schema validation; carries per-field issues
    #[error("validation failed: {summary}")]
    Validation {
        summary: String,
        issues: Vec<FieldIssue>,
    },

    /// Target entity missing
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("duplicate site identifier: {0}")]
    DuplicateSiteIdentifier(String),

    #[error("duplicate monitor id: {0}")]
    DuplicateMonitorId(String),

    #[error("site has no monitors: {0}")]
    NoMonitors(String),

    /// Backup or migration target is newer than this build supports
    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaNewer { found: i64, supported: i64 },

    #[error("integrity check failed: {0}")]
    IntegrityFailed(String),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// Classified retriable failure (DB busy/locked, network reset)
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Uncategorized; always logged with full context before surfacing
    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    #[must_use]
    pub fn validation(summary: impl Into<String>, issues: Vec<FieldIssue>) -> Self {
        Self::Validation {
            summary: summary.into(),
            issues,
        }
    }

    #[must_use]
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The stable code this error maps to at the host boundary
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::Validation,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::DuplicateSiteIdentifier(_) => ErrorCode::DuplicateSiteIdentifier,
            Self::DuplicateMonitorId(_) => ErrorCode::DuplicateMonitorId,
            Self::NoMonitors(_) => ErrorCode::NoMonitors,
            Self::SchemaNewer { .. } => ErrorCode::SchemaNewer,
            Self::IntegrityFailed(_) => ErrorCode::IntegrityFailed,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Transient(_) => ErrorCode::Transient,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Storage(e) if is_busy(e) => ErrorCode::Transient,
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Whether the operational hook may retry this failure
    ///
    /// Validation, not-found, and uniqueness violations fail fast.
    /// Unknown errors are retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Timeout(_) => true,
            Self::Storage(e) => is_busy(e),
            Self::Io(_) | Self::Internal(_) => true,
            Self::Validation { .. }
            | Self::NotFound { .. }
            | Self::DuplicateSiteIdentifier(_)
            | Self::DuplicateMonitorId(_)
            | Self::NoMonitors(_)
            | Self::SchemaNewer { .. }
            | Self::IntegrityFailed(_)
            | Self::Cancelled
            | Self::Serialization(_) => false,
        }
    }

    /// Serialize for the host interface with a sanitized message
    ///
    /// Infrastructure errors collapse to a generic message; the original
    /// cause stays in the logs, keyed by correlation ID.
    #[must_use]
    pub fn to_object(&self) -> ErrorObject {
        let code = self.code();
        let (message, details) = match self {
            Self::Validation { summary, issues } => (
                summary.clone(),
                serde_json::to_value(issues).ok(),
            ),
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => {
                ("an internal error occurred".to_string(), None)
            }
            other => (other.to_string(), None),
        };
        ErrorObject {
            code,
            message,
            details,
        }
    }
}

/// Error shape exposed to the host interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorObject {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Whether a rusqlite error is a transient busy/locked condition
fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

/// Whether a rusqlite error is a unique-constraint violation
///
/// Managers convert these into `DUPLICATE_*` domain errors.
#[must_use]
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Validation.to_string(), "VALIDATION");
        assert_eq!(
            ErrorCode::DuplicateSiteIdentifier.to_string(),
            "DUPLICATE_SITE_IDENTIFIER"
        );
        assert_eq!(ErrorCode::SchemaNewer.to_string(), "SCHEMA_NEWER");
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::IntegrityFailed).unwrap();
        assert_eq!(json, "\"INTEGRITY_FAILED\"");
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(
            EngineError::DuplicateSiteIdentifier("a".into()).code(),
            ErrorCode::DuplicateSiteIdentifier
        );
        assert_eq!(EngineError::Timeout(1000).code(), ErrorCode::Timeout);
        assert_eq!(
            EngineError::internal("boom").code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Transient("reset".into()).is_transient());
        assert!(EngineError::internal("??").is_transient());
        assert!(!EngineError::Cancelled.is_transient());
        assert!(!EngineError::not_found("site", "x").is_transient());
        assert!(!EngineError::validation("bad", vec![]).is_transient());
    }

    #[test]
    fn test_internal_errors_are_sanitized() {
        let obj = EngineError::internal("connection string leaked").to_object();
        assert_eq!(obj.code, ErrorCode::Internal);
        assert!(!obj.message.contains("leaked"));
    }

    #[test]
    fn test_validation_details_carry_issues() {
        let err = EngineError::validation(
            "site invalid",
            vec![FieldIssue::new("name", "must not be empty")],
        );
        let obj = err.to_object();
        assert_eq!(obj.code, ErrorCode::Validation);
        let details = obj.details.unwrap();
        assert_eq!(details[0]["field"], "name");
    }
}
