//! Remote fetch client.
//!
//! Fetches `http(s)://` and `kubernetes:///` URLs with transient-failure
//! retry, reads everything else as a local locator, and bridges to a proxy
//! when running sandboxed.
//!
//! | Context     | Remote URL                     | Local locator                |
//! |-------------|--------------------------------|------------------------------|
//! | Native      | transport, with retry          | VFS router, else disk        |
//! | Sandboxed   | `fetch` command to the proxy   | VFS router, else the proxy   |
//!
//! A sandboxed client never opens a connection itself.

mod batch;
mod endpoint;
mod error;
mod retry;
mod stream;
mod transport;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use kumo_types::FetchedFile;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

pub use batch::split_locators;
pub use endpoint::{ClusterEndpoint, SharedEndpoint, StaticEndpoint, rewrite};
pub use error::{FetchError, FetchResult, RetryClass};
pub use retry::RetryPolicy;
pub use stream::{FetchStream, StreamControl, StreamEvent};
pub use transport::{BodyStream, HttpRequest, HttpTransport, OpenResponse, ReqwestTransport};

use crate::kube::CLUSTER_SCHEME;
use crate::rexec::{RemoteCommand, RemoteExec};
use crate::vfs::{Vfs, VfsError};

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOptions {
    /// HTTP method, GET when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Buffered response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub status_code: u16,
    #[serde(with = "kumo_types::b64")]
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code < 400
    }
}

/// How [`FetchClient::fetch_file`] decodes a body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FetchKind {
    #[default]
    Text,
    Binary,
    Json,
}

/// Where the client runs.
#[derive(Clone, Default)]
pub enum ExecutionContext {
    #[default]
    Native,
    /// No direct network or file access; everything goes through `proxy`.
    Sandboxed { proxy: Option<Arc<dyn RemoteExec>> },
}

impl ExecutionContext {
    pub fn is_sandboxed(&self) -> bool {
        matches!(self, ExecutionContext::Sandboxed { .. })
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionContext::Native => write!(f, "Native"),
            ExecutionContext::Sandboxed { proxy } => f
                .debug_struct("Sandboxed")
                .field("proxy", &proxy.is_some())
                .finish(),
        }
    }
}

/// True for locators fetched over the network.
pub fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with(CLUSTER_SCHEME)
}

/// Fetch client shared by the CLI, the dispatcher and batch fetch.
pub struct FetchClient {
    context: ExecutionContext,
    transport: Arc<dyn HttpTransport>,
    endpoint: Arc<dyn ClusterEndpoint>,
    vfs: Option<Vfs>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("context", &self.context)
            .field("base_url", &self.endpoint.base_url())
            .field("vfs", &self.vfs.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

impl FetchClient {
    /// Native client with no cluster endpoint and the default retry policy.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            context: ExecutionContext::Native,
            transport,
            endpoint: Arc::new(StaticEndpoint::none()),
            vfs: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Arc<dyn ClusterEndpoint>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Read local locators through the router instead of the disk.
    pub fn with_vfs(mut self, vfs: Vfs) -> Self {
        self.vfs = Some(vfs);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Fetch `url` into memory. Error statuses are returned, not raised.
    pub async fn fetch(&self, url: &str, opts: &FetchOptions) -> FetchResult<FetchResponse> {
        if !is_remote(url) {
            return self.fetch_local(url, opts).await;
        }
        if let ExecutionContext::Sandboxed { proxy } = &self.context {
            return proxied(proxy.as_deref(), url, opts).await;
        }
        let req = self.request(url, opts)?;
        debug!(url = %req.url, method = %req.method, "fetch");
        let (status_code, body) = self.retry.run(url, || self.transport.send(&req)).await?;
        Ok(FetchResponse { status_code, body })
    }

    /// Fetch and decode by `kind`. Status >= 400 is an error carrying the
    /// status code.
    pub async fn fetch_file(&self, url: &str, kind: FetchKind) -> FetchResult<FetchedFile> {
        let resp = self.fetch(url, &FetchOptions::default()).await?;
        if !resp.is_success() {
            let message = String::from_utf8_lossy(&resp.body).trim().to_string();
            return Err(FetchError::Status {
                status: resp.status_code,
                message: if message.is_empty() {
                    format!("request to {url} failed")
                } else {
                    message
                },
            });
        }
        Ok(match kind {
            FetchKind::Text => FetchedFile::Text(String::from_utf8_lossy(&resp.body).into_owned()),
            FetchKind::Binary => FetchedFile::Binary(resp.body),
            FetchKind::Json => {
                FetchedFile::Json(serde_json::from_slice(&resp.body).map_err(|e| {
                    FetchError::Decode {
                        url: url.to_string(),
                        message: e.to_string(),
                    }
                })?)
            }
        })
    }

    /// Open `url` as a stream of chunks.
    ///
    /// Only connection setup is retried; a failure mid-body surfaces as a
    /// terminal [`StreamEvent::Error`]. Sandboxed and local streams carry
    /// the whole body as one chunk.
    pub async fn open_stream(&self, url: &str, opts: &FetchOptions) -> FetchResult<FetchStream> {
        if self.context.is_sandboxed() || !is_remote(url) {
            let resp = self.fetch(url, opts).await?;
            let chunk = Bytes::from(resp.body);
            let body = futures::stream::once(async move { Ok(chunk) }).boxed();
            return Ok(FetchStream::new(resp.status_code, body));
        }
        let req = self.request(url, opts)?;
        debug!(url = %req.url, "open stream");
        let open = self.retry.run(url, || self.transport.open(&req)).await?;
        Ok(FetchStream::new(open.status, open.body))
    }

    fn request(&self, url: &str, opts: &FetchOptions) -> FetchResult<HttpRequest> {
        let mut req = HttpRequest::get(rewrite(url, self.endpoint.as_ref())?);
        if let Some(method) = &opts.method {
            req.method = method.to_uppercase();
        }
        req.headers = opts.headers.clone();
        req.body = opts.body.as_ref().map(|b| b.clone().into_bytes());
        Ok(req)
    }

    async fn fetch_local(&self, locator: &str, opts: &FetchOptions) -> FetchResult<FetchResponse> {
        let path = shellexpand::tilde(locator).into_owned();
        if let Some(vfs) = &self.vfs
            && vfs.resolve(&path).is_ok()
        {
            return Ok(FetchResponse::ok(vfs.read_all(&path).await?));
        }
        if let ExecutionContext::Sandboxed { proxy } = &self.context {
            return proxied(proxy.as_deref(), &path, opts).await;
        }
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(FetchResponse::ok(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VfsError::not_found(path).into())
            }
            Err(e) => Err(VfsError::Io(e).into()),
        }
    }
}

async fn proxied(
    proxy: Option<&dyn RemoteExec>,
    url: &str,
    opts: &FetchOptions,
) -> FetchResult<FetchResponse> {
    let proxy = proxy.ok_or(FetchError::RemoteFetchUnavailable)?;
    let (line, options) = RemoteCommand::Fetch {
        url: url.to_string(),
        opts: opts.clone(),
    }
    .encode();
    debug!(url, "forwarding fetch to proxy");
    let value = proxy.exec(&line, options).await?;
    serde_json::from_value(value).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for fetch tests.

    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Pops one scripted result per request and records the URLs it saw.
    #[derive(Default)]
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<(u16, Vec<u8>), FetchError>>>,
        routes: Mutex<BTreeMap<String, (u16, Vec<u8>)>>,
        pub seen: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, result: Result<(u16, Vec<u8>), FetchError>) -> &Self {
            self.script.lock().push_back(result);
            self
        }

        /// Fixed response for one URL, used once the script is empty.
        pub fn route(&self, url: &str, status: u16, body: &str) -> &Self {
            self.routes
                .lock()
                .insert(url.to_string(), (status, body.as_bytes().to_vec()));
            self
        }

        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, req: &HttpRequest) -> Result<(u16, Vec<u8>), FetchError> {
            self.seen.lock().push(req.url.clone());
            if let Some(next) = self.script.lock().pop_front() {
                return next;
            }
            self.routes
                .lock()
                .get(&req.url)
                .cloned()
                .ok_or_else(|| FetchError::Refused(req.url.clone()))
        }

        async fn open(&self, req: &HttpRequest) -> Result<OpenResponse, FetchError> {
            let (status, body) = self.send(req).await?;
            let body = futures::stream::iter(
                body.chunks(2)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect::<Vec<_>>(),
            )
            .boxed();
            Ok(OpenResponse { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use crate::rexec::RemoteError;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct EchoProxy;

    #[async_trait]
    impl RemoteExec for EchoProxy {
        async fn exec(&self, command: &str, _options: Value) -> Result<Value, RemoteError> {
            Ok(json!(FetchResponse::ok(command.as_bytes().to_vec())))
        }
    }

    #[test]
    fn test_scheme_detection() {
        assert!(is_remote("https://x"));
        assert!(is_remote("kubernetes:///api/v1/pods"));
        assert!(!is_remote("~/notes.txt"));
        assert!(!is_remote("/s3/minio/b/k"));
    }

    #[tokio::test]
    async fn test_cluster_url_rewritten_per_call() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Ok((200, b"{}".to_vec())));
        transport.push(Ok((200, b"{}".to_vec())));
        let endpoint = Arc::new(SharedEndpoint::new());
        let client = FetchClient::new(transport.clone()).with_endpoint(endpoint.clone());

        endpoint.set(Some("https://a:6443".into()));
        client.fetch_file("kubernetes:///api/v1/pods", FetchKind::Json).await.unwrap();
        endpoint.set(Some("https://b:6443".into()));
        client.fetch_file("kubernetes:///api/v1/pods", FetchKind::Json).await.unwrap();

        assert_eq!(
            transport.seen(),
            vec!["https://a:6443/api/v1/pods", "https://b:6443/api/v1/pods"]
        );
    }

    #[tokio::test]
    async fn test_error_status_carries_code() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Ok((404, b"pods \"x\" not found".to_vec())));
        let client = FetchClient::new(transport);
        let err = client.fetch_file("https://k/x", FetchKind::Text).await.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_sandbox_without_proxy_never_touches_transport() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = FetchClient::new(transport.clone())
            .with_context(ExecutionContext::Sandboxed { proxy: None });
        let err = client
            .fetch("https://example.com", &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RemoteFetchUnavailable));
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_forwards_fetch_command() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = FetchClient::new(transport.clone()).with_context(
            ExecutionContext::Sandboxed {
                proxy: Some(Arc::new(EchoProxy)),
            },
        );
        let file = client.fetch_file("https://example.com/a b", FetchKind::Text).await.unwrap();
        assert_eq!(file.to_text(), "fetch https%3A%2F%2Fexample.com%2Fa%20b");
        assert!(transport.seen().is_empty());

        let mut stream = client
            .open_stream("https://example.com/x", &FetchOptions::default())
            .await
            .unwrap();
        assert!(matches!(stream.next_event().await, Some(StreamEvent::Data(_))));
        assert!(matches!(stream.next_event().await, Some(StreamEvent::End)));
    }

    #[tokio::test]
    async fn test_local_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        let client = FetchClient::new(Arc::new(ScriptedTransport::new()));
        let file = client
            .fetch_file(path.to_str().unwrap(), FetchKind::Text)
            .await
            .unwrap();
        assert_eq!(file, FetchedFile::Text("hello".into()));

        let missing = dir.path().join("missing.txt");
        let err = client
            .fetch_file(missing.to_str().unwrap(), FetchKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Vfs(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_native_stream_is_chunked() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Ok((200, b"abcde".to_vec())));
        let client = FetchClient::new(transport);
        let stream = client
            .open_stream("https://example.com/big", &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(stream.status_code(), 200);
        assert_eq!(stream.collect().await.unwrap(), b"abcde");
    }
}
