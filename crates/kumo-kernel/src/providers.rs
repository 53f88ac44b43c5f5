//! Object-storage provider discovery.
//!
//! A provider is one configured storage endpoint. Each yields exactly one
//! mount at `/s3/<name>`. Providers are enumerated once at startup and never
//! change afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{MemoryObjectStore, ObjectStore};
use crate::vfs::{StorageMount, VfsError, VfsResult};

/// Endpoint scheme for ephemeral in-process stores.
pub const MEMORY_SCHEME: &str = "memory://";

/// Region used when a provider does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Configuration for one object-storage provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Mount name; the provider appears at `/s3/<name>`.
    pub name: String,

    /// Endpoint URL. `None` means the AWS default endpoint; `memory://`
    /// selects an in-process store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Access key id (inline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    /// Environment variable holding the access key id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key_env: Option<String>,

    /// Environment variable holding a session token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token_env: Option<String>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "<redacted>"))
            .field("access_key_id_env", &self.access_key_id_env)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("secret_access_key_env", &self.secret_access_key_env)
            .finish()
    }
}

/// Resolved credentials handed to the storage client.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Inline value first, then the named environment variable.
fn inline_or_env(inline: &Option<String>, env: &Option<String>) -> Option<String> {
    if let Some(value) = inline {
        return Some(value.clone());
    }
    env.as_ref().and_then(|var| std::env::var(var).ok())
}

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
            region: default_region(),
            access_key_id: None,
            access_key_id_env: None,
            secret_access_key: None,
            secret_access_key_env: None,
            session_token_env: None,
        }
    }

    /// An in-process provider, handy for tests and demos.
    pub fn memory(name: impl Into<String>) -> Self {
        Self::new(name).with_endpoint(MEMORY_SCHEME)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set credentials directly.
    pub fn with_credentials(mut self, access_key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret.into());
        self
    }

    /// Read credentials from these environment variables at startup.
    pub fn with_credentials_env(mut self, access_key_id_env: impl Into<String>, secret_env: impl Into<String>) -> Self {
        self.access_key_id_env = Some(access_key_id_env.into());
        self.secret_access_key_env = Some(secret_env.into());
        self
    }

    pub fn is_memory(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| e.starts_with(MEMORY_SCHEME))
    }

    pub fn mount(&self) -> StorageMount {
        StorageMount::new(&self.name)
    }

    /// Resolve credentials from config or environment.
    ///
    /// `None` when either half is missing; the client then falls back to its
    /// own default chain.
    pub fn resolve_credentials(&self) -> Option<ProviderCredentials> {
        let access_key_id = inline_or_env(&self.access_key_id, &self.access_key_id_env)?;
        let secret_access_key = inline_or_env(&self.secret_access_key, &self.secret_access_key_env)?;
        Some(ProviderCredentials {
            access_key_id,
            secret_access_key,
            session_token: inline_or_env(&None, &self.session_token_env),
        })
    }

    fn validate(&self) -> VfsResult<()> {
        if self.name.is_empty() || self.name.contains('/') || self.name.contains(char::is_whitespace) {
            return Err(VfsError::invalid_path(format!(
                "provider name {:?} must be a single path segment",
                self.name
            )));
        }
        Ok(())
    }
}

/// Enumerates providers at startup.
#[async_trait]
pub trait ProviderDiscovery: Send + Sync {
    async fn providers(&self) -> VfsResult<Vec<Provider>>;
}

/// Providers listed in the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigProviders {
    providers: Vec<Provider>,
}

impl ConfigProviders {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl ProviderDiscovery for ConfigProviders {
    /// Validated providers, one per name. A later entry with the same name
    /// replaces the earlier one.
    async fn providers(&self) -> VfsResult<Vec<Provider>> {
        let mut by_name = BTreeMap::new();
        for provider in &self.providers {
            provider.validate()?;
            if by_name.insert(provider.name.clone(), provider.clone()).is_some() {
                warn!(name = %provider.name, "duplicate provider, keeping the last definition");
            }
        }
        Ok(by_name.into_values().collect())
    }
}

/// Open the storage client for a provider.
pub async fn open_store(provider: &Provider) -> VfsResult<Arc<dyn ObjectStore>> {
    if provider.is_memory() {
        return Ok(Arc::new(MemoryObjectStore::new()));
    }
    #[cfg(feature = "s3")]
    {
        let credentials = provider.resolve_credentials();
        let store = crate::storage::AwsObjectStore::connect(
            provider.endpoint.as_deref(),
            &provider.region,
            credentials.as_ref(),
        )
        .await;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "s3"))]
    {
        Err(VfsError::unsupported(format!(
            "provider {}: built without the `s3` feature, only {MEMORY_SCHEME} endpoints are available",
            provider.name
        )))
    }
}
