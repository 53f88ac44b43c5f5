//! HTTP transport seam.

use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

use super::error::FetchError;

/// Outgoing request, already rewritten to a concrete URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

/// Body stream of an open response.
pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Status plus streaming body.
pub struct OpenResponse {
    pub status: u16,
    pub body: BodyStream,
}

/// Sends requests. Implementations classify failures into the
/// [`FetchError`] transient variants so the retry policy can act on them.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send and buffer the whole body.
    async fn send(&self, req: &HttpRequest) -> Result<(u16, Vec<u8>), FetchError>;

    /// Send and hand back the body as a stream.
    async fn open(&self, req: &HttpRequest) -> Result<OpenResponse, FetchError>;
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, req: &HttpRequest) -> Result<reqwest::RequestBuilder, FetchError> {
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|_| FetchError::InvalidUrl(format!("bad method {}", req.method)))?;
        let mut builder = self.client.request(method, &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, req: &HttpRequest) -> Result<(u16, Vec<u8>), FetchError> {
        let resp = self.build(req)?.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(classify)?;
        Ok((status, body.to_vec()))
    }

    async fn open(&self, req: &HttpRequest) -> Result<OpenResponse, FetchError> {
        let resp = self.build(req)?.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let body = resp.bytes_stream().map(|r| r.map_err(classify)).boxed();
        Ok(OpenResponse { status, body })
    }
}

/// Map a reqwest failure onto the retry classes.
fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout(err.to_string());
    }
    if err.is_builder() {
        return FetchError::InvalidUrl(err.to_string());
    }
    from_io_kind(io_kind(&err), err.to_string())
}

/// Only a refused connection means the peer is restarting. DNS and TLS
/// failures during connect are not retried as refusals.
fn from_io_kind(kind: Option<io::ErrorKind>, message: String) -> FetchError {
    match kind {
        Some(io::ErrorKind::ConnectionRefused) => FetchError::Refused(message),
        Some(
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof,
        ) => FetchError::Reset(message),
        Some(io::ErrorKind::TimedOut) => FetchError::Timeout(message),
        _ => FetchError::Transport(message),
    }
}

/// First `io::Error` in the source chain.
fn io_kind(err: &(dyn std::error::Error + 'static)) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            return Some(io.kind());
        }
        source = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_refused_connections_are_refusals() {
        let refused = from_io_kind(Some(io::ErrorKind::ConnectionRefused), "refused".into());
        assert!(matches!(refused, FetchError::Refused(_)));
        let reset = from_io_kind(Some(io::ErrorKind::ConnectionReset), "reset".into());
        assert!(matches!(reset, FetchError::Reset(_)));

        // A failed name lookup carries no refusal in its source chain.
        let dns = from_io_kind(None, "dns error: failed to lookup address".into());
        assert!(matches!(dns, FetchError::Transport(_)));
        let other = from_io_kind(Some(io::ErrorKind::InvalidData), "tls handshake".into());
        assert!(matches!(other, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_bad_method_is_invalid_url() {
        let transport = ReqwestTransport::new(Duration::from_secs(1)).unwrap();
        let mut req = HttpRequest::get("http://127.0.0.1:9/");
        req.method = "NOT A METHOD".into();
        let err = transport.send(&req).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
