//! `fstat` results.

use serde::{Deserialize, Serialize};

/// Result of `fstat`.
///
/// `data` is present only when the caller asked for content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FStat {
    /// Viewer hint for the presentation layer (`open`, `image`, `ls`).
    pub viewer: String,
    /// Path as the caller wrote it.
    pub filepath: String,
    /// Absolute namespace path.
    pub fullpath: String,
    pub is_directory: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default, with = "crate::b64::option", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

impl FStat {
    /// Stat of a file without content.
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        Self {
            viewer: viewer_for(&path).to_string(),
            filepath: path.clone(),
            fullpath: path,
            is_directory: false,
            size,
            data: None,
        }
    }

    /// Stat of a directory.
    pub fn directory(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            viewer: "ls".to_string(),
            filepath: path.clone(),
            fullpath: path,
            is_directory: true,
            size: 0,
            data: None,
        }
    }

    /// Attach content.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.size = data.len() as u64;
        self.data = Some(data);
        self
    }

    /// Content as UTF-8 text, lossily.
    pub fn text(&self) -> Option<String> {
        self.data
            .as_ref()
            .map(|d| String::from_utf8_lossy(d).into_owned())
    }
}

/// Pick a viewer by file extension.
fn viewer_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => "image",
        _ => "open",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_hint() {
        assert_eq!(FStat::file("/s3/m/b/cat.JPG", 1).viewer, "image");
        assert_eq!(FStat::file("/tmp/notes.txt", 1).viewer, "open");
        assert_eq!(FStat::directory("/tmp").viewer, "ls");
    }

    #[test]
    fn test_data_travels_as_base64() {
        let stat = FStat::file("/tmp/a", 0).with_data(vec![0, 159, 146, 150]);
        assert_eq!(stat.size, 4);
        let json = serde_json::to_value(&stat).unwrap();
        assert_eq!(json["data"], "AJ+Slg==");
        let back: FStat = serde_json::from_value(json).unwrap();
        assert_eq!(back, stat);
    }

    #[test]
    fn test_absent_data_is_omitted() {
        let json = serde_json::to_value(FStat::directory("/d")).unwrap();
        assert!(json.get("data").is_none());
        let back: FStat = serde_json::from_value(json).unwrap();
        assert!(back.data.is_none());
    }
}
