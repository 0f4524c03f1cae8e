//! Error taxonomy for the processing pipeline.
//!
//! Transient failures (locked files, network blips) are retried by the
//! [`retry`](crate::retry) policies and surface only after exhaustion.
//! Integrity failures are fatal for the current document and are never
//! retried. A lookup miss is not an error at all; it is recorded as a
//! status change in the changelog.

use std::time::Duration;
use thiserror::Error;

use crate::validate::ValidationIssue;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Parse(String),

    #[error("XML write failed: {0}")]
    Write(String),

    #[error("document has no root element")]
    MissingRoot,
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(String),

    #[error("package part not found: {0}")]
    MissingPart(String),

    #[error("invalid XML in {part}: {source}")]
    Xml {
        part: String,
        #[source]
        source: XmlError,
    },

    #[error("relationship error: {0}")]
    Relationship(String),

    #[error("hyperlink not found: {0}")]
    LinkNotFound(String),

    #[error("unexpected package structure: {0}")]
    Structure(String),
}

impl From<zip::result::ZipError> for PackageError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => PackageError::Io(e),
            other => PackageError::Zip(other.to_string()),
        }
    }
}

impl PackageError {
    pub fn xml(part: &str, source: XmlError) -> Self {
        PackageError::Xml {
            part: part.to_string(),
            source,
        }
    }
}

/// Validation errors that survived allowlist filtering at a checkpoint.
#[derive(Error, Debug)]
#[error("{} validation error(s) at {checkpoint}: {}", .issues.len(), first_issue(.issues))]
pub struct ValidationFailure {
    pub checkpoint: String,
    pub issues: Vec<ValidationIssue>,
}

fn first_issue(issues: &[ValidationIssue]) -> String {
    issues
        .first()
        .map(|i| i.to_string())
        .unwrap_or_default()
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("lookup request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("lookup service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid lookup response: {0}")]
    Decode(String),

    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("lookup cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ResolveError::Status { status, .. } => *status == 429 || *status >= 500,
            ResolveError::Decode(_) | ResolveError::Timeout(_) | ResolveError::Cancelled => false,
        }
    }
}

/// Top-level failure of one document's session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("package error: {0}")]
    Package(#[from] PackageError),

    #[error("integrity check failed: {0}")]
    Integrity(#[from] ValidationFailure),

    #[error("metadata resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("mutation of {link_id} failed: {message}")]
    Mutation { link_id: String, message: String },

    #[error("backup error: {0}")]
    Backup(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out: {0}")]
    Timeout(String),
}

impl SessionError {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::Io(e) => io_is_transient(e),
            SessionError::Package(PackageError::Io(e)) => io_is_transient(e),
            SessionError::Resolve(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// File-in-use and interrupted-call conditions.
pub fn io_is_transient(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    if matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
    ) {
        return true;
    }
    // sharing / lock violation
    #[cfg(windows)]
    if matches!(err.raw_os_error(), Some(32) | Some(33)) {
        return true;
    }
    // EBUSY / ETXTBSY
    #[cfg(unix)]
    if matches!(err.raw_os_error(), Some(16) | Some(26)) {
        return true;
    }
    false
}
