//! Retry policy with exponential backoff.
//!
//! Wraps any async upstream call: transient failures (as decided by the
//! error classifier or a caller-supplied predicate) are retried with a
//! jittered, capped exponential delay; everything else is returned as-is.

use crate::classifier::{is_transient_error, ErrorSignal};
use crate::metrics::UPSTREAM_RETRIES;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound of the random jitter, as a fraction of the exponential delay.
pub const JITTER_FACTOR: f64 = 0.2;

/// Decides whether a failed attempt is worth another try.
pub type RetryPredicate = Arc<dyn Fn(&dyn ErrorSignal, Option<u16>) -> bool + Send + Sync>;

/// Notified before every backoff sleep.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, attempt: u32, delay: Duration, error: &dyn ErrorSignal);
}

/// Observer that logs each retry and counts it in the upstream retry metric.
#[derive(Debug, Clone, Copy)]
pub struct LogRetries {
    pub upstream: &'static str,
}

impl RetryObserver for LogRetries {
    fn on_retry(&self, attempt: u32, delay: Duration, error: &dyn ErrorSignal) {
        UPSTREAM_RETRIES.with_label_values(&[self.upstream]).inc();
        warn!(
            upstream = self.upstream,
            attempt,
            delay_ms = delay.as_millis() as u64,
            status_code = ?error.status_code(),
            error = %error,
            "Retrying upstream call"
        );
    }
}

/// Exponential delay for `attempt` (0-indexed): `base * 2^attempt` plus up to
/// 20% jitter, capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponential = base.as_nanos() as f64 * 2f64.powi(attempt.min(1023) as i32);
    let jitter = exponential * JITTER_FACTOR * rand::thread_rng().gen_range(0.0..1.0);
    let capped = (exponential + jitter).min(max.as_nanos() as f64);
    Duration::from_nanos(capped as u64)
}

/// Retry parameters for one call. Cheap to clone; build one per call.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    should_retry: RetryPredicate,
    observer: Option<Arc<dyn RetryObserver>>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            should_retry: Arc::new(|error: &dyn ErrorSignal, status: Option<u16>| is_transient_error(error, status)),
            observer: None,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&dyn ErrorSignal, Option<u16>) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl RetryObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay)
    }

    /// Runs `operation` up to `max_retries + 1` times.
    ///
    /// # Errors
    /// Returns the error of the last attempt, or the first error the
    /// predicate declines to retry, unchanged.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorSignal,
    {
        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let status = error.status_code();
            if attempt >= self.max_retries || !(self.should_retry)(&error, status) {
                return Err(error);
            }

            let delay = self.delay_for_attempt(attempt);
            if let Some(observer) = &self.observer {
                observer.on_retry(attempt + 1, delay, &error);
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Free-function form of [`RetryPolicy::execute`].
pub async fn retry_with_backoff<F, Fut, T, E>(operation: F, policy: &RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ErrorSignal,
{
    policy.execute(operation).await
}

/// A one-argument async function bundled with the policy it retries under.
pub struct WithRetry<F> {
    inner: F,
    policy: RetryPolicy,
}

/// Wraps `inner` so every call goes through `policy`; the argument is cloned
/// for each attempt.
pub fn with_retry<F>(inner: F, policy: RetryPolicy) -> WithRetry<F> {
    WithRetry { inner, policy }
}

impl<F> WithRetry<F> {
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        A: Clone,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorSignal,
    {
        self.policy.execute(|| (self.inner)(args.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Upstream(u16);

    impl fmt::Display for Upstream {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "API error: {}", self.0)
        }
    }

    impl ErrorSignal for Upstream {
        fn status_code(&self) -> Option<u16> {
            Some(self.0)
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u32, Duration)>>);

    impl RetryObserver for Arc<Recorder> {
        fn on_retry(&self, attempt: u32, delay: Duration, _error: &dyn ErrorSignal) {
            self.0.lock().unwrap().push((attempt, delay));
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1000), Duration::from_millis(10_000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_503s_then_success() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, Upstream> = fast_policy(3)
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(Upstream(503)) } else { Ok("done") } }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Upstream> = fast_policy(3)
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Upstream(400)) }
            })
            .await;

        assert_eq!(result.unwrap_err().0, 400);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Upstream> = fast_policy(2)
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(Upstream(if n == 2 { 504 } else { 503 })) }
            })
            .await;

        assert_eq!(result.unwrap_err().0, 504);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_single_attempt() {
        let calls = AtomicU32::new(0);
        let _ = fast_policy(0)
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Upstream(503)) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate_overrides_classifier() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3).with_predicate(|_, status| status == Some(400));
        let _ = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Upstream(400)) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_each_retry_and_sleep_happens() {
        let recorder = Arc::new(Recorder::default());
        let policy = fast_policy(3).with_observer(Arc::clone(&recorder));
        let started = tokio::time::Instant::now();

        let _ = policy
            .execute(|| async { Err::<(), _>(Upstream(503)) })
            .await;

        let seen = recorder.0.lock().unwrap().clone();
        let attempts: Vec<u32> = seen.iter().map(|(a, _)| *a).collect();
        assert_eq!(attempts, vec![1, 2, 3]);

        let total: Duration = seen.iter().map(|(_, d)| *d).sum();
        assert!(started.elapsed() >= total);
        // 1s + 2s + 4s before jitter
        assert!(total >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_forwards_argument() {
        let calls = AtomicU32::new(0);
        let double = |x: u32| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n == 0 { Err(Upstream(502)) } else { Ok(x * 2) } }
        };

        let wrapped = with_retry(double, fast_policy(3));
        assert_eq!(wrapped.call(21).await.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(10_000);
        assert_eq!(calculate_backoff(4, base, max), max);
        assert_eq!(calculate_backoff(40, base, max), max);
        assert_eq!(calculate_backoff(u32::MAX, base, max), max);
    }

    proptest! {
        #[test]
        fn prop_backoff_within_jitter_band(attempt in 0u32..12, base_ms in 1u64..5_000) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_secs(3600 * 24);
            let exponential = base_ms as f64 * 2f64.powi(attempt as i32);
            let delay_ms = calculate_backoff(attempt, base, max).as_nanos() as f64 / 1e6;

            prop_assert!(delay_ms >= exponential);
            prop_assert!(delay_ms < exponential * 1.2);
        }

        #[test]
        fn prop_backoff_non_decreasing_until_saturation(attempt in 0u32..20, base_ms in 1u64..2_000) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(10_000);
            let current = calculate_backoff(attempt, base, max);
            let next = calculate_backoff(attempt + 1, base, max);

            // jittered ranges of consecutive attempts never overlap
            prop_assert!(next >= current);
            prop_assert!(next <= max);
        }
    }
}
