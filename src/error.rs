//! Crate-wide error taxonomy.
//!
//! Every component raises its own `thiserror` enum; this module unifies
//! them behind one `TrackerError` so callers on any connection kind see a
//! stable `Kind` + message, matching the error domain table in the design
//! (`parse`, `unknown-prefix`, `unknown-class`, ... `cancelled`).

use std::fmt;

/// The stable error classification surfaced to callers, independent of
/// which component raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    UnknownPrefix,
    UnknownClass,
    UnknownProperty,
    TypeError,
    Constraint,
    OntologyNotFound,
    OntologyChangeNotSupported,
    Internal,
    Unsupported,
    NoSpace,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::UnknownPrefix => "unknown-prefix",
            ErrorKind::UnknownClass => "unknown-class",
            ErrorKind::UnknownProperty => "unknown-property",
            ErrorKind::TypeError => "type-error",
            ErrorKind::Constraint => "constraint",
            ErrorKind::OntologyNotFound => "ontology-not-found",
            ErrorKind::OntologyChangeNotSupported => "ontology-change-not-supported",
            ErrorKind::Internal => "internal",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::NoSpace => "no-space",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TrackerError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based line/column for parse errors, when known.
    pub position: Option<(u64, u64)>,
}

impl TrackerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        TrackerError {
            kind,
            message: message.into(),
            position: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, line: u64, col: u64) -> Self {
        TrackerError {
            kind,
            message: message.into(),
            position: Some((line, col)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

// --- Component error conversions -------------------------------------------------

impl From<crate::rdf::RdfStoreError> for TrackerError {
    fn from(e: crate::rdf::RdfStoreError) -> Self {
        TrackerError::new(ErrorKind::Internal, e.to_string())
    }
}

impl From<crate::ontology::OntologyError> for TrackerError {
    fn from(e: crate::ontology::OntologyError) -> Self {
        use crate::ontology::OntologyError as OE;
        let kind = match &e {
            OE::UnknownClass(_) => ErrorKind::UnknownClass,
            OE::UnknownProperty(_) => ErrorKind::UnknownProperty,
            OE::Cycle(_) => ErrorKind::Internal,
            OE::Parse(_) => ErrorKind::Parse,
            OE::ChangeNotSupported(_) => ErrorKind::OntologyChangeNotSupported,
            OE::DuplicateIri(_) => ErrorKind::Internal,
        };
        TrackerError::new(kind, e.to_string())
    }
}

impl From<crate::storage::StorageError> for TrackerError {
    fn from(e: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError as SE;
        let kind = match &e {
            SE::Sqlite(err) => match err {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::DiskFull =>
                {
                    ErrorKind::NoSpace
                }
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    ErrorKind::Constraint
                }
                _ => ErrorKind::Internal,
            },
            SE::Constraint(_) => ErrorKind::Constraint,
            SE::Io(_) => ErrorKind::Internal,
            SE::Busy => ErrorKind::Internal,
        };
        TrackerError::new(kind, e.to_string())
    }
}

impl From<crate::sparql::SparqlError> for TrackerError {
    fn from(e: crate::sparql::SparqlError) -> Self {
        use crate::sparql::SparqlError as QE;
        let kind = match &e {
            QE::Parse(_) => ErrorKind::Parse,
            QE::UnknownPrefix(_) => ErrorKind::UnknownPrefix,
            QE::UnknownClass(_) => ErrorKind::UnknownClass,
            QE::UnknownProperty(_) => ErrorKind::UnknownProperty,
            QE::TypeError(_) => ErrorKind::TypeError,
            QE::InvalidQuery(_) => ErrorKind::Parse,
            QE::Unsupported(_) => ErrorKind::Unsupported,
            QE::Storage(_) => ErrorKind::Internal,
            QE::Cancelled => ErrorKind::Cancelled,
        };
        TrackerError::new(kind, e.to_string())
    }
}
