//! Streaming fetch with flow control and abort.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::FetchError;
use super::transport::BodyStream;

/// One step of a streaming fetch.
///
/// Exactly one of `End`, `Error` or `Aborted` is delivered per stream, after
/// which [`FetchStream::next_event`] returns `None`.
#[derive(Debug)]
pub enum StreamEvent {
    Data(Bytes),
    End,
    Error(FetchError),
    Aborted,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Data(_))
    }
}

/// Cloneable handle for pausing, resuming and aborting a stream from
/// another task.
#[derive(Debug, Clone)]
pub struct StreamControl {
    paused: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
}

impl StreamControl {
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Tear down the transport. The stream still reports `Aborted`.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Pull-based response body.
pub struct FetchStream {
    status: u16,
    body: Option<BodyStream>,
    control: StreamControl,
    paused: watch::Receiver<bool>,
}

impl FetchStream {
    pub(crate) fn new(status: u16, body: BodyStream) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            status,
            body: Some(body),
            control: StreamControl {
                paused: Arc::new(tx),
                cancel: CancellationToken::new(),
            },
            paused: rx,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }

    /// Next event. Waits while paused; `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let cancel = self.control.cancel.clone();
        loop {
            let body = self.body.as_mut()?;
            if cancel.is_cancelled() {
                self.body = None;
                return Some(StreamEvent::Aborted);
            }
            if *self.paused.borrow_and_update() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = self.paused.changed() => {}
                }
                continue;
            }
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                item = body.next() => item,
            };
            return Some(match item {
                Some(Ok(chunk)) => StreamEvent::Data(chunk),
                Some(Err(e)) => {
                    self.body = None;
                    StreamEvent::Error(e)
                }
                None => {
                    self.body = None;
                    StreamEvent::End
                }
            });
        }
    }

    /// Drain into one buffer, failing on error or abort.
    pub async fn collect(mut self) -> Result<Vec<u8>, FetchError> {
        let mut out = Vec::new();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Data(chunk) => out.extend_from_slice(&chunk),
                StreamEvent::End => break,
                StreamEvent::Error(e) => return Err(e),
                StreamEvent::Aborted => {
                    return Err(FetchError::Transport("stream aborted".to_string()));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    fn chunks(parts: &[&'static str]) -> BodyStream {
        let parts: Vec<Result<Bytes, FetchError>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        stream::iter(parts).boxed()
    }

    #[tokio::test]
    async fn test_end_is_delivered_once() {
        let mut s = FetchStream::new(200, chunks(&["a", "b"]));
        let mut events = Vec::new();
        while let Some(e) = s.next_event().await {
            events.push(e);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], StreamEvent::End));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_abort_emits_single_aborted() {
        let mut s = FetchStream::new(200, stream::pending().boxed());
        let control = s.control();
        let task = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(e) = s.next_event().await {
                events.push(e);
            }
            events
        });
        tokio::task::yield_now().await;
        control.abort();
        let events = task.await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Aborted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_data_until_resume() {
        let mut s = FetchStream::new(200, chunks(&["x"]));
        let control = s.control();
        control.pause();
        let waited = tokio::time::timeout(Duration::from_secs(1), s.next_event()).await;
        assert!(waited.is_err());

        control.resume();
        assert!(matches!(s.next_event().await, Some(StreamEvent::Data(_))));
        assert!(matches!(s.next_event().await, Some(StreamEvent::End)));
        assert!(s.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_abort_while_paused() {
        let mut s = FetchStream::new(200, chunks(&["x"]));
        let control = s.control();
        control.pause();
        control.abort();
        assert!(matches!(s.next_event().await, Some(StreamEvent::Aborted)));
        assert!(s.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(FetchError::Reset("peer hung up".into())),
        ])
        .boxed();
        let s = FetchStream::new(200, body);
        assert!(matches!(s.collect().await, Err(FetchError::Reset(_))));
    }
}
