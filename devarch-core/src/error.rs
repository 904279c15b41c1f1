use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Engine-agnostic error kinds. Every fallible operation in the core fails
/// with exactly one of these; callers branch on the kind, never on message
/// text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Input violates a named rule (charset, length, uniqueness).
    Validation,
    /// Target entity absent.
    NotFound,
    /// Uniqueness or state conflict (name collision, unmanaged network).
    Conflict,
    /// Submitted plan fingerprint no longer matches the stack.
    PlanStale,
    /// Per-stack advisory lock is held by another apply.
    StackBusy,
    /// Container engine ping fails or socket missing.
    EngineUnavailable,
    /// Filesystem or socket permission error.
    PermissionDenied,
    /// Deadline elapsed.
    Timeout,
    /// Invariant violation or unexpected condition.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PlanStale => "plan-stale",
            ErrorKind::StackBusy => "stack-busy",
            ErrorKind::EngineUnavailable => "engine-unavailable",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }

    /// Exit code for the CLI bootstrap.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Validation => 2,
            ErrorKind::EngineUnavailable => 3,
            ErrorKind::PlanStale => 4,
            ErrorKind::StackBusy => 5,
            _ => 1,
        }
    }
}

/// Structured error carried across every layer of the core.
///
/// Engine-specific strings are preserved in `cause` for diagnostics but are
/// never pattern-matched by callers.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub field: Option<String>,
    pub suggestion: Option<String>,
    cause: Option<Arc<anyhow::Error>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
            suggestion: None,
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn plan_stale(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PlanStale, message)
    }

    pub fn stack_busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StackBusy, message)
    }

    pub fn engine_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EngineUnavailable, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(Arc::new(cause.into()));
        self
    }

    /// The wrapped engine- or library-specific cause, if any.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)?;
        if let Some(field) = &self.field {
            write!(f, " (field: {})", field)?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (try: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => {
                Error::not_found("database row not found").with_cause(err)
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::conflict("uniqueness constraint violated").with_cause(err)
            }
            _ => Error::internal(format!("database error: {}", err)).with_cause(err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                Error::permission_denied(format!("permission denied: {}", err)).with_cause(err)
            }
            std::io::ErrorKind::NotFound => {
                Error::not_found(format!("file not found: {}", err)).with_cause(err)
            }
            std::io::ErrorKind::TimedOut => {
                Error::timeout(format!("io timed out: {}", err)).with_cause(err)
            }
            _ => Error::internal(format!("io error: {}", err)).with_cause(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::internal(format!("json error: {}", err)).with_cause(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::validation(format!("yaml error: {}", err)).with_cause(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::validation(format!("toml error: {}", err)).with_cause(err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::timeout("deadline elapsed").with_cause(err)
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(ErrorKind::Validation.exit_code(), 2);
        assert_eq!(ErrorKind::EngineUnavailable.exit_code(), 3);
        assert_eq!(ErrorKind::PlanStale.exit_code(), 4);
        assert_eq!(ErrorKind::StackBusy.exit_code(), 5);
        assert_eq!(ErrorKind::Internal.exit_code(), 1);
        assert_eq!(ErrorKind::Conflict.exit_code(), 1);
    }

    #[test]
    fn display_includes_field_and_suggestion() {
        let err = Error::validation("stack name too long")
            .with_field("name")
            .with_suggestion("my-stack");
        let text = err.to_string();
        assert!(text.contains("validation"));
        assert!(text.contains("field: name"));
        assert!(text.contains("try: my-stack"));
    }

    #[test]
    fn io_permission_maps_to_permission_denied() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "socket");
        let err: Error = io.into();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(err.cause().is_some());
    }
}
