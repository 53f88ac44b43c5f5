//! Retry policy for transient fetch failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::{FetchError, RetryClass};

/// Retry budgets per failure class.
///
/// Connection refused gets many quick retries at a fixed delay; timeouts and
/// resets get a short escalating ladder. The two counters are independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub refused_retries: u32,
    pub refused_delay: Duration,
    /// One entry per timeout retry.
    pub timeout_delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            refused_retries: 10,
            refused_delay: Duration::from_millis(50),
            timeout_delays: vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(5000),
            ],
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            refused_retries: 0,
            refused_delay: Duration::ZERO,
            timeout_delays: Vec::new(),
        }
    }

    /// Delay before retry number `attempt` (0-based) of `class`, or `None`
    /// when the budget is spent.
    pub fn delay(&self, class: RetryClass, attempt: u32) -> Option<Duration> {
        match class {
            RetryClass::Refused => (attempt < self.refused_retries).then_some(self.refused_delay),
            RetryClass::Timeout => self.timeout_delays.get(attempt as usize).copied(),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or a budget runs out.
    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut refused = 0u32;
        let mut timeouts = 0u32;
        loop {
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            let Some(class) = err.retry_class() else {
                return Err(err);
            };
            let counter = match class {
                RetryClass::Refused => &mut refused,
                RetryClass::Timeout => &mut timeouts,
            };
            let Some(delay) = self.delay(class, *counter) else {
                return Err(err);
            };
            *counter += 1;
            warn!(url, attempt = *counter, ?class, ?delay, error = %err, "retrying fetch");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails once per scripted error (`r` refused, `t` timeout, `x`
    /// permanent), then succeeds with the call count.
    fn scripted(
        script: &'static str,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<u32, FetchError>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(match script.as_bytes().get(n as usize) {
                Some(b'r') => Err(FetchError::Refused("127.0.0.1:1".into())),
                Some(b't') => Err(FetchError::Timeout("slow".into())),
                Some(_) => Err(FetchError::InvalidUrl("nope".into())),
                None => Ok(n),
            })
        };
        (calls, op)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_three_times_then_ok() {
        let (calls, op) = scripted("rrr");
        let start = Instant::now();
        let result = RetryPolicy::default().run("http://x", op).await.unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_backoff_ladder() {
        let (calls, op) = scripted("tt");
        let start = Instant::now();
        RetryPolicy::default().run("http://x", op).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_timeout_surfaces() {
        let (calls, op) = scripted("tttt");
        let start = Instant::now();
        let err = RetryPolicy::default().run("http://x", op).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(6500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_budget_exhausted() {
        let (calls, op) = scripted("rrrrrrrrrrr");
        let err = RetryPolicy::default().run("http://x", op).await.unwrap_err();
        assert!(matches!(err, FetchError::Refused(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_are_independent() {
        let (calls, op) = scripted("trtrt");
        RetryPolicy::default().run("http://x", op).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let (calls, op) = scripted("x");
        assert!(RetryPolicy::default().run("nope", op).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
