//! Remote execution channel.
//!
//! A request is a whitespace-tokenized command line (every argument
//! percent-encoded) plus a JSON options payload; the reply is JSON or a
//! serialized [`RemoteError`]. Sandboxed callers use it to reach a proxy that
//! has direct storage and network access.
//!
//! ```text
//! sandbox                                      proxy
//! ┌────────────────┐  vfs-s3 ls /s3/minio …   ┌──────────────────┐
//! │StorageForwarder├─────────────────────────►│ Dispatcher       │
//! │FetchClient     │  fetch https%3A%2F%2F…   │  ├─ Vfs (native) │
//! └────────────────┘◄─────────────────────────┤  └─ FetchClient  │
//!                        JSON / RemoteError   └──────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vfs::ErrorKind;

pub mod command;
mod dispatch;
mod loopback;
mod process;

pub use command::{DataReply, RemoteCommand, S3Op, S3Request};
pub use dispatch::Dispatcher;
pub use loopback::LoopbackExec;
pub use process::{ProcessExec, Request, Response, serve_lines};

/// Error as it crosses the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Machine-readable detail for errors the caller reacts to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            reason: None,
        }
    }

    /// Malformed command line or payload.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// The channel itself failed (child exited, pipe closed).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientTransport, message)
    }
}

/// Request/response command channel.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn exec(
        &self,
        command: &str,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_wire_shape() {
        let e = RemoteError::bad_request("unknown op");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "validation", "message": "unknown op"}));
        let back: RemoteError = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }
}
