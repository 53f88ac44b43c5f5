//! The assembled runtime.
//!
//! A [`Kernel`] owns the frozen mount table, the fetch client and the
//! cluster endpoint. Native kernels hold storage clients directly;
//! sandboxed kernels mount forwarders that reach a proxy over a
//! [`RemoteExec`] channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use kumo_types::backend::normalize_mount_path;
use tracing::{debug, info};

use crate::config::{KumoConfig, Mode};
use crate::fetch::{ExecutionContext, FetchClient, ReqwestTransport, SharedEndpoint};
use crate::jobs::{InlineJobs, JobProvider};
use crate::providers::{ConfigProviders, Provider, ProviderDiscovery, open_store};
use crate::rexec::{Dispatcher, ProcessExec, RemoteExec};
use crate::storage::ObjectStore;
use crate::vfs::{
    LocalBackend, MountTable, MountTableBuilder, StorageForwarder, StorageResponder, Vfs, VfsError,
    VfsOps, VfsResult,
};

/// Running kernel state.
pub struct Kernel {
    vfs: Vfs,
    fetch: Arc<FetchClient>,
    endpoint: Arc<SharedEndpoint>,
    context: ExecutionContext,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("context", &self.context)
            .field("mounts", self.vfs.table())
            .finish_non_exhaustive()
    }
}

impl Kernel {
    /// Start from config. Sandboxed mode spawns the proxy process.
    pub async fn start(config: &KumoConfig) -> VfsResult<Self> {
        let context = match config.mode {
            Mode::Native => ExecutionContext::Native,
            Mode::Sandboxed => {
                let proxy = ProcessExec::spawn(&config.proxy.command, &config.proxy.args)?;
                ExecutionContext::Sandboxed {
                    proxy: Some(Arc::new(proxy)),
                }
            }
        };
        let discovery = ConfigProviders::new(config.providers.clone());
        Self::assemble(config, context, &discovery).await
    }

    /// Build a kernel for an explicit execution context.
    ///
    /// `context` wins over `config.mode`.
    pub async fn assemble(
        config: &KumoConfig,
        context: ExecutionContext,
        discovery: &dyn ProviderDiscovery,
    ) -> VfsResult<Self> {
        let providers = discovery.providers().await?;
        let mut builder = MountTable::builder();

        match &context {
            ExecutionContext::Native => {
                mount_native(config, &providers, &mut builder).await?;
            }
            ExecutionContext::Sandboxed { proxy } => {
                let exec = proxy
                    .clone()
                    .ok_or_else(|| VfsError::unsupported("sandboxed mode needs a proxy channel"))?;
                mount_forwarders(&providers, exec, &mut builder);
                if config.local.is_some() {
                    debug!("sandboxed: local mount skipped");
                }
            }
        }

        let vfs = Vfs::new(builder.build().await?);

        let endpoint = Arc::new(SharedEndpoint::new());
        endpoint.set(config.cluster.base_url.clone());

        let transport = ReqwestTransport::new(config.fetch.timeout())?;
        let fetch = FetchClient::new(Arc::new(transport))
            .with_context(context.clone())
            .with_endpoint(endpoint.clone())
            .with_vfs(vfs.clone());

        info!(
            sandboxed = context.is_sandboxed(),
            mounts = vfs.table().len(),
            providers = providers.len(),
            "kernel ready"
        );

        Ok(Self {
            vfs,
            fetch: Arc::new(fetch),
            endpoint,
            context,
        })
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn fetch(&self) -> &Arc<FetchClient> {
        &self.fetch
    }

    /// Cluster base URL; swap it when the active context changes.
    pub fn endpoint(&self) -> &Arc<SharedEndpoint> {
        &self.endpoint
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Dispatcher serving this kernel's mounts to a sandboxed peer.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.vfs.clone()).with_fetch(self.fetch.clone())
    }
}

async fn mount_native(
    config: &KumoConfig,
    providers: &[Provider],
    builder: &mut MountTableBuilder,
) -> VfsResult<()> {
    let mut stores: BTreeMap<String, Arc<dyn ObjectStore>> = BTreeMap::new();
    for provider in providers {
        let store = open_store(provider).await?;
        stores.insert(provider.mount().mount_path().to_string(), store);
    }

    let jobs: Option<Arc<dyn JobProvider>> = config
        .jobs
        .inline
        .then(|| Arc::new(InlineJobs::new(stores.clone())) as Arc<dyn JobProvider>);

    for provider in providers {
        let mount = provider.mount();
        let Some(store) = stores.get(mount.mount_path()).cloned() else {
            continue;
        };
        let mut responder = StorageResponder::new(mount, store);
        if let Some(jobs) = &jobs {
            responder = responder.with_jobs(Arc::clone(jobs), config.jobs.image.clone());
        }
        builder.mount_backend(Arc::new(responder));
    }

    if let Some(local) = &config.local {
        let mount = normalize_mount_path(&local.mount);
        let root = local
            .root_dir()
            .map_err(|e| VfsError::invalid_path(e.to_string()))?;
        let read_only = local.read_only;
        builder.mount(mount.clone(), move || async move {
            let mut backend = LocalBackend::new(mount, root);
            backend.set_read_only(read_only);
            Ok(Arc::new(backend) as Arc<dyn VfsOps>)
        });
    }
    Ok(())
}

fn mount_forwarders(providers: &[Provider], exec: Arc<dyn RemoteExec>, builder: &mut MountTableBuilder) {
    for provider in providers {
        let forwarder = StorageForwarder::new(provider.mount(), Arc::clone(&exec));
        builder.mount_backend(Arc::new(forwarder));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ClusterEndpoint;
    use crate::rexec::LoopbackExec;
    use crate::vfs::LsOptions;

    fn native_config(root: &std::path::Path) -> KumoConfig {
        KumoConfig::default()
            .with_local("/local", root.to_string_lossy())
            .with_provider(Provider::memory("minio"))
            .with_inline_jobs()
            .with_base_url("https://kube:6443")
    }

    async fn native(config: &KumoConfig) -> Kernel {
        Kernel::assemble(
            config,
            ExecutionContext::Native,
            &ConfigProviders::new(config.providers.clone()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_native_mounts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();
        let kernel = native(&native_config(dir.path())).await;

        let root = kernel.vfs().ls(&LsOptions::default(), &["/".into()]).await.unwrap();
        let names: Vec<_> = root.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["/local", "/s3"]);

        let data = kernel.vfs().read_all("/local/hello.txt").await.unwrap();
        assert_eq!(data, b"hi");

        kernel.vfs().mkdir("/s3/minio/photos").await.unwrap();
        kernel.vfs().fwrite("/s3/minio/photos/a.txt", b"A").await.unwrap();
        assert_eq!(kernel.vfs().read_all("/s3/minio/photos/a.txt").await.unwrap(), b"A");

        assert!(!kernel.context().is_sandboxed());
        assert_eq!(kernel.endpoint().base_url().as_deref(), Some("https://kube:6443"));
    }

    #[tokio::test]
    async fn test_sandboxed_kernel_forwards_to_proxy() {
        let dir = tempfile::tempdir().unwrap();
        let config = native_config(dir.path());
        let proxy = native(&config).await;
        proxy.vfs().mkdir("/s3/minio/logs").await.unwrap();
        proxy.vfs().fwrite("/s3/minio/logs/app.log", b"ok\n").await.unwrap();

        let exec: Arc<dyn RemoteExec> = Arc::new(LoopbackExec::new(Arc::new(proxy.dispatcher())));
        let sandboxed = Kernel::assemble(
            &config.clone().with_mode(Mode::Sandboxed),
            ExecutionContext::Sandboxed { proxy: Some(exec) },
            &ConfigProviders::new(config.providers.clone()),
        )
        .await
        .unwrap();

        // No local mount inside the sandbox.
        assert!(sandboxed.vfs().table().get("/local").is_none());
        let got = sandboxed.vfs().read_all("/s3/minio/logs/app.log").await.unwrap();
        assert_eq!(got, b"ok\n");
        sandboxed.vfs().fwrite("/s3/minio/logs/new.log", b"x").await.unwrap();
        assert_eq!(proxy.vfs().read_all("/s3/minio/logs/new.log").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_sandboxed_without_proxy_fails() {
        let err = Kernel::assemble(
            &KumoConfig::default(),
            ExecutionContext::Sandboxed { proxy: None },
            &ConfigProviders::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VfsError::Unsupported(_)));
    }
}
