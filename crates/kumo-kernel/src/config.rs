//! Runtime configuration.
//!
//! Loaded once at startup from `~/.config/kumo/config.toml` (or an explicit
//! path). Every section is optional.
//!
//! ```toml
//! mode = "native"              # or "sandboxed"
//!
//! [cluster]
//! base_url = "https://kube.internal:6443"
//!
//! [fetch]
//! timeout_secs = 30
//!
//! [local]
//! mount = "/local"
//! root = "~/work"
//!
//! [jobs]
//! inline = true
//! image = "ghcr.io/kumo-vfs/kumo-worker:latest"
//!
//! [proxy]
//! command = "kumo"
//! args = ["serve"]
//!
//! [[providers]]
//! name = "minio"
//! endpoint = "http://localhost:9000"
//! access_key_id_env = "MINIO_ACCESS_KEY"
//! secret_access_key_env = "MINIO_SECRET_KEY"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::providers::Provider;

/// Where the process runs relative to storage and the network.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Direct access to disk, network and storage clients.
    #[default]
    Native,
    /// Everything goes through the proxy process.
    Sandboxed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Base URL substituted for `cluster://` locators.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub mount: String,
    /// Directory exposed at `mount`. `~` is expanded. Defaults to the
    /// working directory.
    pub root: Option<String>,
    pub read_only: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            mount: "/local".to_string(),
            root: None,
            read_only: false,
        }
    }
}

impl LocalConfig {
    /// Root directory with `~` expanded.
    pub fn root_dir(&self) -> ConfigResult<PathBuf> {
        match &self.root {
            Some(root) => Ok(PathBuf::from(shellexpand::tilde(root).as_ref())),
            None => std::env::current_dir().map_err(|source| ConfigError::Read {
                path: PathBuf::from("."),
                source,
            }),
        }
    }
}

/// Data-parallel offload settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Run offloaded work on the local runtime.
    pub inline: bool,
    /// Worker image when a request names none.
    pub image: Option<String>,
}

/// How a sandboxed process reaches its proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            command: "kumo".to_string(),
            args: vec!["serve".to_string()],
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KumoConfig {
    pub mode: Mode,
    pub cluster: ClusterConfig,
    pub fetch: FetchConfig,
    /// `None` disables the local mount.
    pub local: Option<LocalConfig>,
    pub jobs: JobsConfig,
    pub proxy: ProxyConfig,
    pub providers: Vec<Provider>,
}

impl KumoConfig {
    /// `~/.config/kumo/config.toml` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kumo").join("config.toml"))
    }

    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        Self::parse(s, Path::new("<inline>"))
    }

    fn parse(s: &str, path: &Path) -> ConfigResult<Self> {
        let config: Self = toml::from_str(s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Load the default file, or built-in defaults if there is none.
    pub fn load_default() -> ConfigResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if let Some(local) = &self.local {
            let mount = local.mount.trim_end_matches('/');
            if !mount.starts_with('/') || mount.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "local mount {:?} must be an absolute path below /",
                    local.mount
                )));
            }
            if mount == "/s3" || mount.starts_with("/s3/") {
                return Err(ConfigError::Invalid(format!(
                    "local mount {mount} collides with object storage"
                )));
            }
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.cluster.base_url = Some(base_url.into());
        self
    }

    /// Mount `root` at `mount`.
    pub fn with_local(mut self, mount: impl Into<String>, root: impl Into<String>) -> Self {
        self.local = Some(LocalConfig {
            mount: mount.into(),
            root: Some(root.into()),
            read_only: false,
        });
        self
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_inline_jobs(mut self) -> Self {
        self.jobs.inline = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = KumoConfig::from_toml_str("").unwrap();
        assert_eq!(config, KumoConfig::default());
        assert_eq!(config.mode, Mode::Native);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(30));
        assert_eq!(config.proxy.args, vec!["serve"]);
        assert!(config.local.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = KumoConfig::from_toml_str(
            r#"
mode = "sandboxed"

[cluster]
base_url = "https://kube:6443"

[fetch]
timeout_secs = 5

[local]
root = "/srv/data"

[jobs]
inline = true

[[providers]]
name = "minio"
endpoint = "http://localhost:9000"
access_key_id_env = "MINIO_ACCESS_KEY"
secret_access_key_env = "MINIO_SECRET_KEY"

[[providers]]
name = "scratch"
endpoint = "memory://"
"#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Sandboxed);
        assert_eq!(config.cluster.base_url.as_deref(), Some("https://kube:6443"));
        assert_eq!(config.fetch.timeout_secs, 5);
        let local = config.local.unwrap();
        assert_eq!(local.mount, "/local");
        assert_eq!(local.root_dir().unwrap(), PathBuf::from("/srv/data"));
        assert!(config.jobs.inline);
        assert_eq!(config.providers.len(), 2);
        assert!(config.providers[1].is_memory());
    }

    #[test]
    fn test_mode_parses_from_str() {
        assert_eq!("sandboxed".parse::<Mode>().unwrap(), Mode::Sandboxed);
        assert_eq!(Mode::Native.to_string(), "native");
    }

    #[test]
    fn test_rejects_local_mount_under_s3() {
        let err = KumoConfig::from_toml_str("[local]\nmount = \"/s3/disk\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = KumoConfig::from_toml_str("[local]\nmount = \"relative\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mode = 3").unwrap();
        let err = KumoConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));

        let err = KumoConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_builders() {
        let config = KumoConfig::default()
            .with_mode(Mode::Sandboxed)
            .with_base_url("http://k")
            .with_local("/data", "~/x")
            .with_provider(Provider::memory("scratch"))
            .with_inline_jobs();
        assert_eq!(config.mode, Mode::Sandboxed);
        assert_eq!(config.local.as_ref().unwrap().mount, "/data");
        assert_eq!(config.providers.len(), 1);
    }
}
