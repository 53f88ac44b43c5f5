//! Comma-separated batch fetch.

use std::sync::Arc;

use futures::future::try_join_all;
use kumo_types::FetchedFile;
use tracing::debug;

use super::error::{FetchError, FetchResult};
use super::{FetchClient, FetchKind};

/// Split a comma-separated locator list, dropping empty slots.
pub fn split_locators(locators: &str) -> Vec<String> {
    locators
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl FetchClient {
    /// Fetch every locator concurrently, results in input order.
    ///
    /// With `tolerant`, a failed slot becomes [`FetchedFile::Error`].
    /// Otherwise the first failure is returned and the remaining fetches
    /// are left to finish in the background, their results discarded.
    pub async fn fetch_batch(
        self: &Arc<Self>,
        locators: &str,
        kind: FetchKind,
        tolerant: bool,
    ) -> FetchResult<Vec<FetchedFile>> {
        let locators = split_locators(locators);
        debug!(count = locators.len(), tolerant, "batch fetch");
        let handles = locators.into_iter().map(|locator| {
            let client = Arc::clone(self);
            let handle = tokio::spawn(async move { client.fetch_file(&locator, kind).await });
            async move {
                let result = handle
                    .await
                    .map_err(|e| FetchError::Transport(format!("fetch task failed: {e}")))
                    .and_then(|r| r);
                match result {
                    Err(e) if tolerant => Ok(FetchedFile::error(e.to_string(), e.status_code())),
                    other => other,
                }
            }
        });
        try_join_all(handles).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::ScriptedTransport;
    use crate::fetch::RetryPolicy;

    fn client(transport: Arc<ScriptedTransport>) -> Arc<FetchClient> {
        Arc::new(FetchClient::new(transport).with_retry(RetryPolicy::none()))
    }

    #[test]
    fn test_split() {
        assert_eq!(split_locators("a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_locators("").is_empty());
    }

    #[tokio::test]
    async fn test_tolerant_batch_marks_failed_slot() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .route("https://h/a", 200, "A")
            .route("https://h/b", 500, "boom")
            .route("https://h/c", 200, "C");
        let files = client(transport)
            .fetch_batch("https://h/a,https://h/b,https://h/c", FetchKind::Text, true)
            .await
            .unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0], FetchedFile::Text("A".into()));
        assert_eq!(files[1], FetchedFile::error("HTTP 500: boom", Some(500)));
        assert_eq!(files[2], FetchedFile::Text("C".into()));
    }

    #[tokio::test]
    async fn test_strict_batch_fails() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.route("https://h/a", 200, "A");
        let err = client(transport)
            .fetch_batch("https://h/a,https://h/missing", FetchKind::Text, false)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Refused(_)));
    }
}
