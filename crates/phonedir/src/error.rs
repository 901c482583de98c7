//! Error types for the directory store

use crate::lock::LockError;
use crate::resolver::ResolveError;
use crate::store::{CascadeReport, MoveReport};
use phonedir_ids::IdParseError;
use phonedir_protocol::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error category reported to callers and in reconciliation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Parse,
    Io,
    PartialFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Parse => "parse",
            Self::Io => "io",
            Self::PartialFailure => "partial_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store error type
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Parse error in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Partial failure: {0}")]
    PartialFailure(Box<PartialFailure>),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Io { .. } | Self::Lock(_) => ErrorKind::Io,
            Self::PartialFailure(_) => ErrorKind::PartialFailure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ResolveError> for StoreError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound { .. } => Self::NotFound(err.to_string()),
            ResolveError::UnsafeSegment(_)
            | ResolveError::RelativeBase(_)
            | ResolveError::WrongExtension { .. } => Self::Validation(err.to_string()),
            ResolveError::Io { path, source } => Self::Io { path, source },
        }
    }
}

impl From<IdParseError> for StoreError {
    fn from(err: IdParseError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// What got done before a multi-file operation stopped.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PartialFailure {
    Cascade(CascadeReport),
    Move { report: MoveReport, reason: String },
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cascade(report) => write!(
                f,
                "deleting {} finished {} of {} steps ({} failed)",
                report.root,
                report.succeeded(),
                report.steps.len(),
                report.failed()
            ),
            Self::Move { report, reason } => write!(
                f,
                "moved {} extensions into {} but the source was not updated: {}",
                report.moved(),
                report.destination,
                reason
            ),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StoreError>;
