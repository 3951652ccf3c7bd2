//! Async test helpers
//!
//! Timeout wrappers and polling for conditions reached by background tasks.

use std::future::Future;
use tokio::time::{sleep, timeout, Duration, Instant};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that should fail fast (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Helper to assert a future completes within duration
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

/// Poll `condition` every few milliseconds until it holds or `duration`
/// passes. Returns whether it held.
pub async fn eventually<F>(duration: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + duration;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_assert_completes_within() {
        let value = assert_completes_within(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_eventually() {
        let polls = AtomicUsize::new(0);
        assert!(eventually(DEFAULT_TEST_TIMEOUT, || polls.fetch_add(1, Ordering::SeqCst) >= 3).await);
        assert!(!eventually(SHORT_TEST_TIMEOUT, || false).await);
    }
}
