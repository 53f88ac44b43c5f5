//! Fetch error types.

use thiserror::Error;

use crate::rexec::RemoteError;
use crate::vfs::{ErrorKind, VfsError};

/// Transient failure classes, each with its own retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Connection refused.
    Refused,
    /// Timeout or connection reset.
    Timeout,
}

/// Errors from the fetch client.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection reset: {0}")]
    Reset(String),

    /// Response with status >= 400.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Sandboxed fetch without a proxy to forward to.
    #[error("remote fetch unavailable: no proxy configured for this sandbox")]
    RemoteFetchUnavailable,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl FetchError {
    /// Which retry budget this failure draws from, if any.
    pub fn retry_class(&self) -> Option<RetryClass> {
        match self {
            FetchError::Refused(_) => Some(RetryClass::Refused),
            FetchError::Timeout(_) | FetchError::Reset(_) => Some(RetryClass::Timeout),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Refused(_) => ErrorKind::TransientNetwork,
            FetchError::Timeout(_) | FetchError::Reset(_) => ErrorKind::TransientTransport,
            FetchError::Status { status: 404, .. } => ErrorKind::NotFound,
            FetchError::Status { .. } | FetchError::Transport(_) | FetchError::Decode { .. } => {
                ErrorKind::Upstream
            }
            FetchError::RemoteFetchUnavailable => ErrorKind::Unsupported,
            FetchError::InvalidUrl(_) => ErrorKind::Validation,
            FetchError::Vfs(e) => e.kind(),
            FetchError::Remote(e) => e.kind,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Vfs(e) => e.status_code(),
            FetchError::Remote(e) => e.code,
            _ => None,
        }
    }

    /// Serialize for the remote channel.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            FetchError::Vfs(e) => e.to_remote(),
            FetchError::Remote(e) => e.clone(),
            other => {
                let mut remote = RemoteError::new(other.kind(), other.to_string());
                remote.code = other.status_code();
                remote
            }
        }
    }
}

impl From<FetchError> for VfsError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Vfs(e) => e,
            FetchError::Remote(e) => e.into(),
            FetchError::Status { status, message } => VfsError::upstream(message, Some(status)),
            FetchError::RemoteFetchUnavailable => VfsError::unsupported(e.to_string()),
            other => VfsError::Remote {
                kind: other.kind(),
                message: other.to_string(),
                code: other.status_code(),
            },
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert_eq!(
            FetchError::Refused("x".into()).retry_class(),
            Some(RetryClass::Refused)
        );
        assert_eq!(
            FetchError::Reset("x".into()).retry_class(),
            Some(RetryClass::Timeout)
        );
        assert_eq!(FetchError::RemoteFetchUnavailable.retry_class(), None);
    }

    #[test]
    fn test_status_keeps_code() {
        let e = FetchError::Status {
            status: 503,
            message: "unavailable".into(),
        };
        assert_eq!(e.to_remote().code, Some(503));
        let vfs: VfsError = e.into();
        assert_eq!(vfs.status_code(), Some(503));
        assert_eq!(vfs.kind(), ErrorKind::Upstream);
    }

    #[test]
    fn test_unavailable_is_unsupported() {
        let vfs: VfsError = FetchError::RemoteFetchUnavailable.into();
        assert_eq!(vfs.kind(), ErrorKind::Unsupported);
    }
}
