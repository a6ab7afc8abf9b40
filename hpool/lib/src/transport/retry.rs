//! Exponential backoff for connect failures and timeouts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::{FailureKind, TransportFailure};
use crate::options::RetryPolicy;

/// Upper bound for the delay between two attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Runs `operation` under `policy`.
///
/// Only [retryable](TransportFailure::is_retryable) failures are retried; the
/// delay starts at the policy backoff and doubles up to [`MAX_RETRY_DELAY`].
///
/// ## Errors
///
/// - With [`RetryPolicy::None`], the first failure is returned unchanged
/// - Non-retryable failures are returned immediately
/// - Once the retries are used up, a [`FailureKind::MaxRetry`] failure wrapping
///   the last cause is returned
///
/// ## Examples
///
/// ```
/// use hpool_lib::RetryPolicy;
/// use hpool_lib::transport::{TransportFailure, retry::with_retries};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let value = with_retries(RetryPolicy::attempts(2), "http://h/", || async {
///     Ok::<_, TransportFailure>(42)
/// })
/// .await
/// .unwrap();
/// assert_eq!(value, 42);
/// # }
/// ```
pub async fn with_retries<F, Fut, T>(
    policy: RetryPolicy,
    url: &str,
    operation: F,
) -> Result<T, TransportFailure>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, TransportFailure>>,
{
    let RetryPolicy::Attempts { total, backoff } = policy else {
        return operation().await;
    };

    let mut delay = backoff;
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(failure) if failure.is_retryable() => {
                if attempt >= total {
                    return Err(TransportFailure::new(
                        FailureKind::MaxRetry,
                        format!("Max retries exceeded with url: {url} (caused by {failure})"),
                    )
                    .with_source(failure));
                }
                attempt += 1;
                warn!(url, attempt, ?delay, "retrying after transport failure: {failure}");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
            Err(failure) => return Err(failure),
        }
    }
}
