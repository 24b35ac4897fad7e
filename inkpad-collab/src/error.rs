//! Error taxonomy shared by every engine operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of record an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Document,
    Version,
    Invitation,
    Session,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Document => "document",
            ResourceKind::Version => "version",
            ResourceKind::Invitation => "invitation",
            ResourceKind::Session => "session",
        };
        f.write_str(s)
    }
}

/// Engine errors.
///
/// `PermissionDenied` and `Validation` are raised at the call boundary and are
/// never downgraded into a weaker permission level.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollabError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: Uuid },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("transient I/O failure: {0}")]
    TransientIo(String),
}

impl CollabError {
    pub fn not_found(kind: ResourceKind, id: Uuid) -> Self {
        CollabError::NotFound { kind, id }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CollabError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CollabError::NotFound { .. } => ErrorKind::NotFound,
            CollabError::Validation(_) => ErrorKind::Validation,
            CollabError::TransientIo(_) => ErrorKind::TransientIo,
        }
    }
}

/// Wire-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    Validation,
    TransientIo,
}

/// Error description carried in failed responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    /// Present for `NotFound`.
    pub resource: Option<(ResourceKind, Uuid)>,
}

impl From<&CollabError> for ErrorBody {
    fn from(err: &CollabError) -> Self {
        let resource = match err {
            CollabError::NotFound { kind, id } => Some((*kind, *id)),
            _ => None,
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            resource,
        }
    }
}

impl From<ErrorBody> for CollabError {
    fn from(body: ErrorBody) -> Self {
        match (body.kind, body.resource) {
            (ErrorKind::NotFound, Some((kind, id))) => CollabError::NotFound { kind, id },
            (ErrorKind::PermissionDenied, _) => CollabError::PermissionDenied(body.message),
            (ErrorKind::Validation, _) => CollabError::Validation(body.message),
            // A NotFound without a resource cannot be rebuilt faithfully.
            (ErrorKind::NotFound, None) => CollabError::Validation(body.message),
            (ErrorKind::TransientIo, _) => CollabError::TransientIo(body.message),
        }
    }
}
