//! Typed error surface for the Engine boundary (spec.md §7).
//!
//! Internal modules keep using `anyhow::Result` for context-chained
//! plumbing, the same way the teacher's `storage`/`ingestion` modules do.
//! `HeraldError` is the boundary type the Engine's public methods return,
//! classifying the terminal error into one of the six kinds spec.md names.

use std::fmt;

/// One of the six error kinds spec.md §7 defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Unavailable,
    Permission,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Permission => "permission",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// `{kind, message, wrapped?}` error returned by every Engine operation.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HeraldError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub wrapped: Option<anyhow::Error>,
}

pub type Result<T> = std::result::Result<T, HeraldError>;

impl HeraldError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        HeraldError {
            kind,
            message: message.into(),
            wrapped: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn wrap(kind: ErrorKind, message: impl Into<String>, err: anyhow::Error) -> Self {
        HeraldError {
            kind,
            message: message.into(),
            wrapped: Some(err),
        }
    }
}

/// Classifies a `sqlx::Error` terminating a Store call into a `HeraldError`,
/// following the same "verbatim, wrapped" surfacing policy spec.md §7
/// requires of the Engine.
impl From<sqlx::Error> for HeraldError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => HeraldError::wrap(ErrorKind::NotFound, "row not found", err.into()),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();
                if db_err.is_unique_violation() {
                    HeraldError::wrap(ErrorKind::Conflict, msg, anyhow::anyhow!(err.to_string()))
                } else {
                    HeraldError::wrap(ErrorKind::Internal, msg, anyhow::anyhow!(err.to_string()))
                }
            }
            other => HeraldError::wrap(ErrorKind::Internal, other.to_string(), anyhow::anyhow!(err.to_string())),
        }
    }
}

/// Internal Store calls return `anyhow::Result` with `.context(...)` chains
/// (the teacher's plumbing style); classification still has to happen here
/// because that's where the typed boundary spec.md §7 requires actually
/// lives, so this looks through the chain for the `sqlx::Error` the context
/// wraps rather than collapsing everything to `Internal`.
impl From<anyhow::Error> for HeraldError {
    fn from(err: anyhow::Error) -> Self {
        let kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<sqlx::Error>())
            .map(|sqlx_err| match sqlx_err {
                sqlx::Error::RowNotFound => ErrorKind::NotFound,
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => ErrorKind::Conflict,
                _ => ErrorKind::Internal,
            })
            .unwrap_or(ErrorKind::Internal);
        let message = err.to_string();
        HeraldError::wrap(kind, message, err)
    }
}
