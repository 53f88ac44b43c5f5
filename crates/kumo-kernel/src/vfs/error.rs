//! VFS error types.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backends::s3::BucketNameViolation;
use crate::rexec::RemoteError;

/// Error taxonomy shared by every layer.
///
/// Drives retry decisions, the remote wire format and CLI exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// ENOENT-equivalent. Tolerable when the caller opts in.
    NotFound,
    /// Connection refused. Retried.
    TransientNetwork,
    /// Timeout or hangup. Retried with backoff.
    TransientTransport,
    /// Bad input: bucket names, non-directory destinations, missing flags.
    Validation,
    /// Operation cannot run in this context.
    Unsupported,
    /// Opaque failure from a storage client or job provider.
    Upstream,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Process exit code for CLI callers.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::NotFound => 1,
            ErrorKind::Validation => 2,
            ErrorKind::Unsupported => 3,
            ErrorKind::TransientNetwork | ErrorKind::TransientTransport => 4,
            ErrorKind::Upstream => 5,
            ErrorKind::Internal => 70,
        }
    }

    /// Classify an I/O error.
    pub fn of_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::ConnectionRefused => ErrorKind::TransientNetwork,
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorKind::TransientTransport,
            io::ErrorKind::PermissionDenied
            | io::ErrorKind::AlreadyExists
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::NotADirectory
            | io::ErrorKind::IsADirectory
            | io::ErrorKind::DirectoryNotEmpty => ErrorKind::Validation,
            _ => ErrorKind::Internal,
        }
    }
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File, object or bucket not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Several sources were copied onto a single file.
    #[error("Destination is not a directory: {0}")]
    DestinationNotDirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Bucket removal requested without the recursive flag.
    #[error("refusing to remove bucket {0} without the recursive flag")]
    BucketNeedsRecursive(String),

    /// Bucket name violates a naming rule.
    #[error("invalid bucket name {name:?}: {violation}")]
    InvalidBucketName {
        name: String,
        violation: BucketNameViolation,
    },

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No mount covers the path.
    #[error("no such backend for path: {0}")]
    NoMountPoint(String),

    /// `grep` found nothing in any file.
    #[error("no matches: {0}")]
    NoMatches(String),

    /// Filesystem is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Operation not available in this context.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Storage client or job provider failure.
    #[error("{message}")]
    Upstream { message: String, code: Option<u16> },

    /// Failure reported by the other side of the remote channel.
    #[error("{message}")]
    Remote {
        kind: ErrorKind,
        message: String,
        code: Option<u16>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create a DestinationNotDirectory error.
    pub fn destination_not_directory(path: impl Into<String>) -> Self {
        Self::DestinationNotDirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a NoMountPoint error.
    pub fn no_mount_point(path: impl Into<String>) -> Self {
        Self::NoMountPoint(path.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an Upstream error.
    pub fn upstream(message: impl Into<String>, code: Option<u16>) -> Self {
        Self::Upstream {
            message: message.into(),
            code,
        }
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_) | VfsError::NoMountPoint(_) | VfsError::NoMatches(_) => {
                ErrorKind::NotFound
            }
            VfsError::AlreadyExists(_)
            | VfsError::NotADirectory(_)
            | VfsError::DestinationNotDirectory(_)
            | VfsError::IsADirectory(_)
            | VfsError::DirectoryNotEmpty(_)
            | VfsError::BucketNeedsRecursive(_)
            | VfsError::InvalidBucketName { .. }
            | VfsError::PathEscapesRoot(_)
            | VfsError::InvalidPath(_) => ErrorKind::Validation,
            VfsError::ReadOnly | VfsError::Unsupported(_) => ErrorKind::Unsupported,
            VfsError::Upstream { .. } => ErrorKind::Upstream,
            VfsError::Remote { kind, .. } => *kind,
            VfsError::Io(e) => ErrorKind::of_io(e),
            VfsError::Other(_) => ErrorKind::Internal,
        }
    }

    /// True for ENOENT-class errors, local or remote.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Upstream status code, when one is known.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            VfsError::Upstream { code, .. } | VfsError::Remote { code, .. } => *code,
            _ => None,
        }
    }

    /// Process exit code for CLI callers.
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// True when `grep` found nothing, locally or on the far side.
    pub fn is_no_matches(&self) -> bool {
        matches!(self, VfsError::NoMatches(_))
    }

    /// Serialize for the remote channel.
    pub fn to_remote(&self) -> RemoteError {
        let reason = match self {
            VfsError::NoMatches(pattern) => Some(format!("{NO_MATCHES_REASON}{pattern}")),
            _ => None,
        };
        RemoteError {
            kind: self.kind(),
            message: self.to_string(),
            code: self.status_code(),
            reason,
        }
    }
}

const NO_MATCHES_REASON: &str = "no_matches:";

/// Errors coming back over the remote channel keep their kind and code.
impl From<RemoteError> for VfsError {
    fn from(e: RemoteError) -> Self {
        if let Some(pattern) = e
            .reason
            .as_deref()
            .and_then(|r| r.strip_prefix(NO_MATCHES_REASON))
        {
            return VfsError::NoMatches(pattern.to_string());
        }
        VfsError::Remote {
            kind: e.kind,
            message: e.message,
            code: e.code,
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Io(e) => e,
            VfsError::NotFound(msg) | VfsError::NoMountPoint(msg) => {
                io::Error::new(io::ErrorKind::NotFound, msg)
            }
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::NotADirectory(msg) | VfsError::DestinationNotDirectory(msg) => {
                io::Error::new(io::ErrorKind::NotADirectory, msg)
            }
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::PathEscapesRoot(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            VfsError::ReadOnly => {
                io::Error::new(io::ErrorKind::PermissionDenied, "filesystem is read-only")
            }
            other => io::Error::other(other.to_string()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
