//! Throttle retry logic
//!
//! Retries remote store calls answered with 429 / 503 using exponential
//! backoff until `max_wait_ms` elapses.

use crate::store::StoreError;
use std::time::{Duration, Instant};

/// Status codes the content store uses to shed load
const THROTTLE_STATUSES: [u16; 2] = [429, 503];

/// True for responses worth retrying
pub fn is_throttled(err: &StoreError) -> bool {
    match err {
        StoreError::Api(status, _) => THROTTLE_STATUSES.contains(status),
        StoreError::RateLimited { .. } => true,
        _ => false,
    }
}

/// Retry an operation with exponential backoff while it is throttled.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If throttled:
///    a. If time elapsed < max_wait_ms: log WARN, backoff, retry
///    b. Otherwise: log ERROR, return [`StoreError::RateLimited`]
/// 4. Any other error is returned immediately
///
/// Backoff starts at 10 ms, doubles each attempt, capped at 1000 ms.
pub async fn retry_on_throttle<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt: u32 = 0;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        "Store request succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_throttled(&err) {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Store request failed: max retry time exceeded"
                    );
                    return Err(StoreError::RateLimited { attempts: attempt });
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "Store throttled request, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}
