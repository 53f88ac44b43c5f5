//! Fetch results.

use serde::{Deserialize, Serialize};

/// Content produced by the fetch client.
///
/// The `Error` variant lets a batch fetch report a failed slot without
/// aborting its siblings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FetchedFile {
    Text(String),
    Binary(#[serde(with = "crate::b64")] Vec<u8>),
    Json(serde_json::Value),
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
    },
}

impl FetchedFile {
    /// Build the error marker.
    pub fn error(message: impl Into<String>, code: Option<u16>) -> Self {
        Self::Error {
            message: message.into(),
            code,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FetchedFile::Error { .. })
    }

    /// Raw bytes of the content. `None` for error markers.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        match self {
            FetchedFile::Text(s) => Some(s.clone().into_bytes()),
            FetchedFile::Binary(b) => Some(b.clone()),
            FetchedFile::Json(v) => serde_json::to_vec(v).ok(),
            FetchedFile::Error { .. } => None,
        }
    }

    /// Content rendered as text, or the error message for markers.
    pub fn to_text(&self) -> String {
        match self {
            FetchedFile::Text(s) => s.clone(),
            FetchedFile::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            FetchedFile::Json(v) => serde_json::to_string_pretty(v).unwrap_or_default(),
            FetchedFile::Error { message, .. } => message.clone(),
        }
    }
}
