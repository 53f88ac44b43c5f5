//! Cluster endpoint discovery for `kubernetes:///` URLs.

use std::sync::Arc;

use parking_lot::RwLock;

use super::error::FetchError;
use crate::kube::CLUSTER_SCHEME;

/// Supplies the live cluster base URL. Asked on every fetch.
pub trait ClusterEndpoint: Send + Sync {
    fn base_url(&self) -> Option<String>;
}

/// Fixed base URL (or none).
#[derive(Debug, Clone, Default)]
pub struct StaticEndpoint(Option<String>);

impl StaticEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self(Some(base_url.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl ClusterEndpoint for StaticEndpoint {
    fn base_url(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Base URL that can change at runtime, e.g. when the context switches.
#[derive(Debug, Clone, Default)]
pub struct SharedEndpoint {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, base_url: Option<String>) {
        *self.inner.write() = base_url;
    }
}

impl ClusterEndpoint for SharedEndpoint {
    fn base_url(&self) -> Option<String> {
        self.inner.read().clone()
    }
}

/// Rewrite a `kubernetes:///` URL onto the current base URL. Other URLs
/// pass through.
pub fn rewrite(url: &str, endpoint: &dyn ClusterEndpoint) -> Result<String, FetchError> {
    let Some(rest) = url.strip_prefix(CLUSTER_SCHEME) else {
        return Ok(url.to_string());
    };
    let base = endpoint.base_url().ok_or_else(|| {
        FetchError::InvalidUrl(format!("{url}: no cluster endpoint has been discovered"))
    })?;
    Ok(format!("{}/{}", base.trim_end_matches('/'), rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_uses_current_base() {
        let endpoint = SharedEndpoint::new();
        let url = "kubernetes:///api/v1/namespaces/default/pods";
        assert!(rewrite(url, &endpoint).is_err());

        endpoint.set(Some("https://10.0.0.1:6443/".into()));
        assert_eq!(
            rewrite(url, &endpoint).unwrap(),
            "https://10.0.0.1:6443/api/v1/namespaces/default/pods"
        );

        endpoint.set(Some("http://127.0.0.1:8001".into()));
        assert_eq!(
            rewrite(url, &endpoint).unwrap(),
            "http://127.0.0.1:8001/api/v1/namespaces/default/pods"
        );
    }

    #[test]
    fn test_plain_urls_pass_through() {
        let url = "https://example.com/x";
        assert_eq!(rewrite(url, &StaticEndpoint::none()).unwrap(), url);
    }
}
